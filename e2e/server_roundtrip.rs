//! End-to-end: basic command round trips over a real TCP connection,
//! byte-exact replies, pipelining, multiple databases, and clean shutdown.

#[path = "util.rs"]
mod util;

use util::TestServer;

#[test]
fn set_then_get_round_trip() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"SET", b"hello", b"world"]), b"+OK\r\n");
    assert_eq!(conn.cmd(&[b"GET", b"hello"]), b"$5\r\nworld\r\n");
    assert_eq!(conn.cmd(&[b"GET", b"missing"]), b"$-1\r\n");

    server.shutdown();
}

#[test]
fn list_push_index_len() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"RPUSH", b"l", b"a", b"b", b"c"]), b":3\r\n");
    assert_eq!(conn.cmd(&[b"LINDEX", b"l", b"0"]), b"$1\r\na\r\n");
    assert_eq!(conn.cmd(&[b"LINDEX", b"l", b"2"]), b"$1\r\nc\r\n");
    assert_eq!(conn.cmd(&[b"LLEN", b"l"]), b":3\r\n");
    assert_eq!(
        conn.cmd(&[b"LRANGE", b"l", b"0", b"-1"]),
        b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
    );

    server.shutdown();
}

#[test]
fn hash_field_lifecycle() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"HSET", b"h", b"f", b"v"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"HGET", b"h", b"f"]), b"$1\r\nv\r\n");
    assert_eq!(conn.cmd(&[b"HDEL", b"h", b"f"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"HGET", b"h", b"f"]), b"$-1\r\n");
    // Deleting the last field removed the key entirely.
    assert_eq!(conn.cmd(&[b"EXISTS", b"h"]), b":0\r\n");

    server.shutdown();
}

#[test]
fn counters_and_overflow() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"INCR", b"n"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"INCRBY", b"n", b"41"]), b":42\r\n");
    assert_eq!(conn.cmd(&[b"DECR", b"n"]), b":41\r\n");

    conn.cmd(&[b"SET", b"big", b"9223372036854775807"]);
    let reply = conn.cmd(&[b"INCR", b"big"]);
    assert!(reply.starts_with(b"-ERR increment or decrement would overflow"));

    conn.cmd(&[b"SET", b"text", b"abc"]);
    let reply = conn.cmd(&[b"INCR", b"text"]);
    assert!(reply.starts_with(b"-ERR value is not an integer"));

    server.shutdown();
}

#[test]
fn pipelined_commands_reply_in_order() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.send_command(&[b"SET", b"a", b"1"]);
    conn.send_command(&[b"SET", b"b", b"2"]);
    conn.send_command(&[b"GET", b"a"]);
    conn.send_command(&[b"GET", b"b"]);
    assert_eq!(conn.read_reply(), b"+OK\r\n");
    assert_eq!(conn.read_reply(), b"+OK\r\n");
    assert_eq!(conn.read_reply(), b"$1\r\n1\r\n");
    assert_eq!(conn.read_reply(), b"$1\r\n2\r\n");

    server.shutdown();
}

#[test]
fn select_isolates_databases() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.cmd(&[b"SET", b"k", b"db0"]);
    assert_eq!(conn.cmd(&[b"SELECT", b"1"]), b"+OK\r\n");
    assert_eq!(conn.cmd(&[b"GET", b"k"]), b"$-1\r\n");
    conn.cmd(&[b"SET", b"k", b"db1"]);
    assert_eq!(conn.cmd(&[b"MOVE", b"k", b"2"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"SELECT", b"2"]), b"+OK\r\n");
    assert_eq!(conn.cmd(&[b"GET", b"k"]), b"$4\r\ndb1\r\n");
    assert_eq!(conn.cmd(&[b"DBSIZE"]), b":1\r\n");

    let bad = conn.cmd(&[b"SELECT", b"99"]);
    assert!(bad.starts_with(b"-ERR invalid DB index"));

    server.shutdown();
}

#[test]
fn key_commands_round_trip() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.cmd(&[b"SET", b"one", b"1"]);
    conn.cmd(&[b"SET", b"two", b"2"]);
    assert_eq!(conn.cmd(&[b"EXISTS", b"one"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"TYPE", b"one"]), b"+string\r\n");
    assert_eq!(conn.cmd(&[b"TYPE", b"nothing"]), b"+none\r\n");
    assert_eq!(conn.cmd(&[b"RENAME", b"one", b"uno"]), b"+OK\r\n");
    assert_eq!(conn.cmd(&[b"RENAMENX", b"uno", b"two"]), b":0\r\n");
    let missing = conn.cmd(&[b"RENAME", b"ghost", b"x"]);
    assert!(missing.starts_with(b"-ERR no such key"));

    // DEL is idempotent: 1 the first time, 0 after.
    assert_eq!(conn.cmd(&[b"DEL", b"uno"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"DEL", b"uno"]), b":0\r\n");

    let keys = conn.cmd(&[b"KEYS", b"*"]);
    assert_eq!(util::bulk_elements(&keys), vec![b"two".to_vec()]);

    server.shutdown();
}

#[test]
fn quit_closes_after_the_reply() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();
    assert_eq!(conn.cmd(&[b"PING"]), b"+PONG\r\n");
    assert_eq!(conn.cmd(&[b"QUIT"]), b"+OK\r\n");
    assert!(conn.eof());

    server.shutdown();
}

#[test]
fn client_name_and_list() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"CLIENT", b"GETNAME"]), b"$-1\r\n");
    assert_eq!(conn.cmd(&[b"CLIENT", b"SETNAME", b"probe"]), b"+OK\r\n");
    assert_eq!(conn.cmd(&[b"CLIENT", b"GETNAME"]), b"$5\r\nprobe\r\n");
    let listing = conn.cmd(&[b"CLIENT", b"LIST"]);
    let text = String::from_utf8_lossy(&listing).into_owned();
    assert!(text.contains("name=probe"));
    assert!(text.contains("cmd=client"));

    let bad = conn.cmd(&[b"CLIENT", b"SETNAME", b"has space"]);
    assert!(bad.starts_with(b"-ERR Client names"));

    server.shutdown();
}

#[test]
fn echo_is_binary_safe() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();
    let payload = b"a\x00b\r\nc";
    let mut expected = format!("${}\r\n", payload.len()).into_bytes();
    expected.extend_from_slice(payload);
    expected.extend_from_slice(b"\r\n");
    assert_eq!(conn.cmd(&[b"ECHO", payload]), expected);

    server.shutdown();
}
