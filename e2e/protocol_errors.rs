//! End-to-end: protocol violations, inline requests, arity and type
//! errors, and connection-level error policy (per-command errors keep the
//! connection; framing errors close it).

#[path = "util.rs"]
mod util;

use util::TestServer;

#[test]
fn inline_requests_work() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.send_raw(b"PING\r\n");
    assert_eq!(conn.read_reply(), b"+PONG\r\n");
    conn.send_raw(b"SET greeting \"hello world\"\r\n");
    assert_eq!(conn.read_reply(), b"+OK\r\n");
    conn.send_raw(b"GET greeting\r\n");
    assert_eq!(conn.read_reply(), b"$11\r\nhello world\r\n");

    server.shutdown();
}

#[test]
fn empty_inline_lines_are_skipped() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.send_raw(b"\r\n\r\nPING\r\n");
    assert_eq!(conn.read_reply(), b"+PONG\r\n");

    server.shutdown();
}

#[test]
fn bad_multibulk_count_closes_the_connection() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.send_raw(b"*notanumber\r\n");
    let reply = conn.read_reply();
    assert!(reply.starts_with(b"-ERR Protocol error: invalid multibulk length"));
    assert!(conn.eof());

    server.shutdown();
}

#[test]
fn unbalanced_quotes_close_the_connection() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.send_raw(b"SET \"broken\r\n");
    let reply = conn.read_reply();
    assert!(reply.starts_with(b"-ERR Protocol error: unbalanced quotes"));
    assert!(conn.eof());

    server.shutdown();
}

#[test]
fn per_command_errors_keep_the_connection() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    let unknown = conn.cmd(&[b"NOSUCHCOMMAND", b"x"]);
    assert!(unknown.starts_with(b"-ERR unknown command"));

    let arity = conn.cmd(&[b"GET"]);
    assert!(arity.starts_with(b"-ERR wrong number of arguments for 'get'"));

    conn.cmd(&[b"LPUSH", b"l", b"x"]);
    let wrongtype = conn.cmd(&[b"GET", b"l"]);
    assert!(wrongtype.starts_with(b"-WRONGTYPE"));

    let syntax = conn.cmd(&[b"SET", b"k", b"v", b"BOGUS"]);
    assert!(syntax.starts_with(b"-ERR syntax error"));

    // The connection survived all of it.
    assert_eq!(conn.cmd(&[b"PING"]), b"+PONG\r\n");

    server.shutdown();
}

#[test]
fn case_insensitive_command_lookup() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"set", b"k", b"v"]), b"+OK\r\n");
    assert_eq!(conn.cmd(&[b"GeT", b"k"]), b"$1\r\nv\r\n");

    server.shutdown();
}

#[test]
fn request_split_across_many_writes() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    for chunk in [
        &b"*3\r\n$3\r\nSE"[..],
        &b"T\r\n$1\r\nk\r\n$"[..],
        &b"5\r\nhel"[..],
        &b"lo\r\n"[..],
    ] {
        conn.send_raw(chunk);
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert_eq!(conn.read_reply(), b"+OK\r\n");
    assert_eq!(conn.cmd(&[b"GET", b"k"]), b"$5\r\nhello\r\n");

    server.shutdown();
}
