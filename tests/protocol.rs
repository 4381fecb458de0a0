// Protocol codec: resumable multi-bulk parsing, inline tokenization,
// framing violations, and the reply emission path (fixed buffer, queue,
// deferred array headers).

use std::io::Read;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

use rudis::net::client::{Client, ClientStream, WriteOutcome};
use rudis::protocol::{try_parse_request, ParseResult, ReqType};

/// Client over one end of a socketpair; the returned peer reads whatever
/// the reply path writes.
fn test_client() -> (Client, UnixStream) {
    let (ours, peer) = UnixStream::pair().expect("socketpair");
    let fd = ours.as_raw_fd();
    let c = Client::new(1, fd, ClientStream::Unix(ours), "/test:0".into(), true, 0);
    (c, peer)
}

fn feed(c: &mut Client, bytes: &[u8]) {
    c.querybuf.append(bytes);
}

fn args(c: &Client) -> Vec<Vec<u8>> {
    c.argv.iter().map(|a| a.as_bytes().to_vec()).collect()
}

// ── Multi-bulk ───────────────────────────────────────────────────────────────

#[test]
fn whole_multibulk_request_parses() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"*3\r\n$3\r\nSET\r\n$5\r\nhello\r\n$5\r\nworld\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::Ready);
    assert_eq!(args(&c), vec![b"SET".to_vec(), b"hello".to_vec(), b"world".to_vec()]);
    assert!(c.querybuf.is_empty());
}

#[test]
fn multibulk_resumes_across_reads() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"*2\r\n$4\r\nLLEN\r\n$3\r\nm");
    assert_eq!(try_parse_request(&mut c), ParseResult::Incomplete);
    assert_eq!(c.reqtype, ReqType::Multibulk);
    assert_eq!(c.multibulklen, 1);

    feed(&mut c, b"yl\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::Ready);
    assert_eq!(args(&c), vec![b"LLEN".to_vec(), b"myl".to_vec()]);
}

#[test]
fn multibulk_header_split_mid_line() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"*1");
    assert_eq!(try_parse_request(&mut c), ParseResult::Incomplete);
    feed(&mut c, b"\r\n$4\r\nPING\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::Ready);
    assert_eq!(args(&c), vec![b"PING".to_vec()]);
}

#[test]
fn binary_safe_bulk_payload() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"*2\r\n$3\r\nGET\r\n$4\r\na\x00\r b");
    // Payload contains \x00, \r and a space; length framing wins.
    feed(&mut c, b"\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::Ready);
    assert_eq!(c.argv[1].as_bytes(), b"a\x00\r b");
}

#[test]
fn invalid_multibulk_count_is_a_protocol_error() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"*abc\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::BadProtocol);
    assert!(c.close_after_reply);
}

#[test]
fn oversized_bulk_is_refused() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"*1\r\n$536870912\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::BadProtocol);
    assert!(c.close_after_reply);
}

#[test]
fn missing_dollar_is_a_protocol_error() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"*1\r\n:3\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::BadProtocol);
}

#[test]
fn zero_count_multibulk_yields_empty_argv() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"*0\r\nPING\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::Ready);
    assert!(c.argv.is_empty());
    // The remainder stays queued for the next pass.
    assert_eq!(c.querybuf.as_bytes(), b"PING\r\n");
}

// ── Inline ───────────────────────────────────────────────────────────────────

#[test]
fn inline_request_tokenizes_on_whitespace() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"SET greeting \"hello world\"\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::Ready);
    assert_eq!(
        args(&c),
        vec![b"SET".to_vec(), b"greeting".to_vec(), b"hello world".to_vec()]
    );
}

#[test]
fn inline_escapes_decode() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"ECHO \"a\\x41\\n\\t\"\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::Ready);
    assert_eq!(c.argv[1].as_bytes(), b"aA\n\t");
}

#[test]
fn inline_unbalanced_quotes_close_the_client() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"SET \"oops\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::BadProtocol);
    assert!(c.close_after_reply);
}

#[test]
fn empty_inline_line_yields_empty_argv() {
    let (mut c, _peer) = test_client();
    feed(&mut c, b"\r\n");
    assert_eq!(try_parse_request(&mut c), ParseResult::Ready);
    assert!(c.argv.is_empty());
}

// ── Reply path ───────────────────────────────────────────────────────────────

fn drain(peer: &mut UnixStream, expected_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; expected_len];
    peer.read_exact(&mut out).expect("reply bytes");
    out
}

#[test]
fn reply_shapes_render_exactly() {
    let (mut c, mut peer) = test_client();
    c.add_reply_status("OK");
    c.add_reply_i64(42);
    c.add_reply_bulk(b"payload");
    c.add_reply_nil();
    c.add_reply_double(3.5);
    assert_eq!(c.write_pending(false).unwrap(), WriteOutcome::Drained);

    let expected: &[u8] = b"+OK\r\n:42\r\n$7\r\npayload\r\n$-1\r\n$3\r\n3.5\r\n";
    assert_eq!(drain(&mut peer, expected.len()), expected);
}

#[test]
fn deferred_array_header_is_patched_in_place() {
    let (mut c, mut peer) = test_client();
    let slot = c.add_deferred_multibulk_len();
    c.add_reply_bulk(b"a");
    c.add_reply_bulk(b"bb");
    c.set_deferred_multibulk_len(slot, 2);
    assert_eq!(c.write_pending(false).unwrap(), WriteOutcome::Drained);

    let expected: &[u8] = b"*2\r\n$1\r\na\r\n$2\r\nbb\r\n";
    assert_eq!(drain(&mut peer, expected.len()), expected);
}

#[test]
fn large_replies_spill_to_the_queue_in_order() {
    let (mut c, mut peer) = test_client();
    c.add_reply_status("first");
    let big = vec![b'z'; 40 * 1024];
    c.add_reply_bulk(&big);
    c.add_reply_status("last");
    assert!(c.has_pending_output());

    // The per-call byte cap may require more than one drain pass; the
    // socketpair buffer absorbs the whole reply either way.
    while c.write_pending(false).unwrap() == WriteOutcome::Partial {}

    let mut expected = b"+first\r\n".to_vec();
    expected.extend_from_slice(format!("${}\r\n", big.len()).as_bytes());
    expected.extend_from_slice(&big);
    expected.extend_from_slice(b"\r\n");
    expected.extend_from_slice(b"+last\r\n");
    assert_eq!(drain(&mut peer, expected.len()), expected);
}
