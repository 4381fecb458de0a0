//! Request parsing and protocol limits.
//!
//! Two request shapes are recognised from the first byte of the query
//! buffer: *multi-bulk* (`*<count>\r\n` followed by `$<len>\r\n<bytes>\r\n`
//! items) and *inline* (a single CRLF-terminated line, tokenized with
//! shell-like quoting).  Both parsers are resumable: partial input stays in
//! the query buffer and the parse state (`reqtype`, `multibulklen`,
//! `bulklen`) lives on the client, so a request may arrive across any
//! number of read events.
//!
//! On a framing violation the client gets an error reply and is flagged to
//! close once the reply is flushed; the offending prefix is discarded.

use thiserror::Error;

use crate::ds::sds::Sds;
use crate::net::client::Client;
use crate::util::string2ll;

/// Fixed per-client reply buffer size.
pub const PROTO_REPLY_CHUNK_BYTES: usize = 16 * 1024;
/// Generic input chunk read per readable event.
pub const PROTO_IOBUF_LEN: usize = 16 * 1024;
/// Max length of an inline request line.
pub const PROTO_INLINE_MAX_SIZE: usize = 64 * 1024;
/// Bulk payloads at or above this size get a dedicated read path.
pub const PROTO_MBULK_BIG_ARG: usize = 32 * 1024;
/// Hard cap on the query buffer; beyond it the client is closed.
pub const PROTO_MAX_QUERYBUF_LEN: usize = 1024 * 1024 * 1024;
/// Max element count of a multi-bulk request.
pub const PROTO_MAX_MULTIBULK_LEN: i64 = 1024 * 1024;
/// Max size of a single bulk payload: 512 MiB.
pub const PROTO_MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Request framing currently being parsed on a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqType {
    None,
    Inline,
    Multibulk,
}

/// Outcome of one parser pass over the query buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// A complete argument vector is in `client.argv`.
    Ready,
    /// More input is required.
    Incomplete,
    /// Framing violation; the client was flagged close-after-reply.
    BadProtocol,
}

/// Inline tokenizer failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("unbalanced quotes in request")]
    UnbalancedQuotes,
}

/// Parse as much of the query buffer as possible.  `Ready` leaves the
/// consumed bytes removed and the argument vector populated (it may be
/// empty for a blank inline line or a `*0` request; the caller just resets).
pub fn try_parse_request(c: &mut Client) -> ParseResult {
    if c.querybuf.is_empty() {
        return ParseResult::Incomplete;
    }
    if c.reqtype == ReqType::None {
        c.reqtype = if c.querybuf.as_bytes()[0] == b'*' {
            ReqType::Multibulk
        } else {
            ReqType::Inline
        };
    }
    match c.reqtype {
        ReqType::Inline => parse_inline(c),
        ReqType::Multibulk => parse_multibulk(c),
        ReqType::None => unreachable!(),
    }
}

fn protocol_error(c: &mut Client, msg: &str) -> ParseResult {
    c.add_reply(format!("-ERR Protocol error: {msg}\r\n").as_bytes());
    c.close_after_reply = true;
    ParseResult::BadProtocol
}

// ─────────────────────────────────────────────────────────────────────────────
// Inline requests
// ─────────────────────────────────────────────────────────────────────────────

fn parse_inline(c: &mut Client) -> ParseResult {
    let buf = c.querybuf.as_bytes();
    let newline = match buf.iter().position(|&b| b == b'\n') {
        Some(n) => n,
        None => {
            if buf.len() > PROTO_INLINE_MAX_SIZE {
                return protocol_error(c, "too big inline request");
            }
            return ParseResult::Incomplete;
        }
    };
    let mut line_end = newline;
    if line_end > 0 && buf[line_end - 1] == b'\r' {
        line_end -= 1;
    }
    let line = buf[..line_end].to_vec();
    c.querybuf.range(newline as isize + 1, -1);
    match split_inline_args(&line) {
        Ok(args) => {
            c.argv = args;
            ParseResult::Ready
        }
        Err(ProtoError::UnbalancedQuotes) => protocol_error(c, "unbalanced quotes in request"),
    }
}

/// Tokenize an inline request line.
///
/// Supports double quotes with `\n \r \t \a \b \xHH \\ \"` escapes, single
/// quotes with `\'`, and whitespace separation outside quotes.
pub fn split_inline_args(line: &[u8]) -> Result<Vec<Sds>, ProtoError> {
    let mut out = Vec::new();
    let mut i = 0;

    while i < line.len() {
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i == line.len() {
            break;
        }
        let mut current = Vec::new();
        let mut in_quotes = false;
        let mut in_single = false;
        loop {
            if in_quotes {
                if i == line.len() {
                    return Err(ProtoError::UnbalancedQuotes);
                }
                match line[i] {
                    b'\\' if i + 3 < line.len()
                        && line[i + 1] == b'x'
                        && line[i + 2].is_ascii_hexdigit()
                        && line[i + 3].is_ascii_hexdigit() =>
                    {
                        let hi = hex_digit(line[i + 2]);
                        let lo = hex_digit(line[i + 3]);
                        current.push((hi << 4) | lo);
                        i += 4;
                    }
                    b'\\' if i + 1 < line.len() => {
                        let c = match line[i + 1] {
                            b'n' => b'\n',
                            b'r' => b'\r',
                            b't' => b'\t',
                            b'b' => 0x08,
                            b'a' => 0x07,
                            other => other,
                        };
                        current.push(c);
                        i += 2;
                    }
                    b'"' => {
                        // Closing quote must terminate the token.
                        if i + 1 < line.len() && !line[i + 1].is_ascii_whitespace() {
                            return Err(ProtoError::UnbalancedQuotes);
                        }
                        i += 1;
                        break;
                    }
                    b => {
                        current.push(b);
                        i += 1;
                    }
                }
            } else if in_single {
                if i == line.len() {
                    return Err(ProtoError::UnbalancedQuotes);
                }
                match line[i] {
                    b'\\' if i + 1 < line.len() && line[i + 1] == b'\'' => {
                        current.push(b'\'');
                        i += 2;
                    }
                    b'\'' => {
                        if i + 1 < line.len() && !line[i + 1].is_ascii_whitespace() {
                            return Err(ProtoError::UnbalancedQuotes);
                        }
                        i += 1;
                        break;
                    }
                    b => {
                        current.push(b);
                        i += 1;
                    }
                }
            } else {
                if i == line.len() {
                    break;
                }
                match line[i] {
                    b' ' | b'\n' | b'\r' | b'\t' | 0x00 => break,
                    b'"' => {
                        in_quotes = true;
                        i += 1;
                    }
                    b'\'' => {
                        in_single = true;
                        i += 1;
                    }
                    b => {
                        current.push(b);
                        i += 1;
                    }
                }
            }
        }
        out.push(Sds::from(current));
    }
    Ok(out)
}

#[inline]
fn hex_digit(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Multi-bulk requests
// ─────────────────────────────────────────────────────────────────────────────

fn parse_multibulk(c: &mut Client) -> ParseResult {
    let mut pos = 0usize;

    if c.multibulklen == 0 {
        let buf = c.querybuf.as_bytes();
        debug_assert!(buf[0] == b'*');
        let newline = match find_crlf(buf) {
            Some(n) => n,
            None => {
                if buf.len() > PROTO_INLINE_MAX_SIZE {
                    return protocol_error(c, "too big mbulk count string");
                }
                return ParseResult::Incomplete;
            }
        };
        let count = match string2ll(&buf[1..newline]) {
            Some(v) if v <= PROTO_MAX_MULTIBULK_LEN => v,
            _ => return protocol_error(c, "invalid multibulk length"),
        };
        pos = newline + 2;
        if count <= 0 {
            // Empty request: consume and report ready with no arguments.
            c.querybuf.range(pos as isize, -1);
            c.argv.clear();
            return ParseResult::Ready;
        }
        c.multibulklen = count;
        c.argv = Vec::with_capacity(count as usize);
    }

    while c.multibulklen > 0 {
        if c.bulklen == -1 {
            let buf = c.querybuf.as_bytes();
            if pos >= buf.len() {
                break;
            }
            let rest = &buf[pos..];
            let newline = match find_crlf(rest) {
                Some(n) => n,
                None => {
                    if rest.len() > PROTO_INLINE_MAX_SIZE {
                        return protocol_error(c, "too big bulk count string");
                    }
                    break;
                }
            };
            if rest[0] != b'$' {
                let got = rest[0] as char;
                return protocol_error(c, &format!("expected '$', got '{got}'"));
            }
            let len = match string2ll(&rest[1..newline]) {
                Some(v) if (0..=PROTO_MAX_BULK_LEN).contains(&v) => v,
                _ => return protocol_error(c, "invalid bulk length"),
            };
            pos += newline + 2;
            c.bulklen = len;
        }

        let buf = c.querybuf.as_bytes();
        let need = c.bulklen as usize + 2;
        if buf.len() - pos < need {
            break;
        }
        c.argv
            .push(Sds::from_slice(&buf[pos..pos + c.bulklen as usize]));
        pos += need;
        c.bulklen = -1;
        c.multibulklen -= 1;
    }

    if pos > 0 {
        c.querybuf.range(pos as isize, -1);
    }
    if c.multibulklen == 0 {
        ParseResult::Ready
    } else {
        ParseResult::Incomplete
    }
}

/// Position of the `\r` of the first CRLF pair, requiring the `\n` present.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_inline_quoting() {
        let args = split_inline_args(b"SET \"hello world\" 'it''s'").unwrap_err();
        assert_eq!(args, ProtoError::UnbalancedQuotes);

        let args = split_inline_args(b"SET \"a\\x41b\" 'c d'").unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args[1].as_bytes(), b"aAb");
        assert_eq!(args[2].as_bytes(), b"c d");
    }

    #[test]
    fn split_inline_empty() {
        assert!(split_inline_args(b"").unwrap().is_empty());
        assert!(split_inline_args(b"   ").unwrap().is_empty());
    }
}
