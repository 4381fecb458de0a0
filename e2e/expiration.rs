//! End-to-end: per-key expiration — lazy reclamation on access, active
//! reclamation without access, TTL introspection, PERSIST.

#[path = "util.rs"]
mod util;

use std::time::Duration;

use util::TestServer;

#[test]
fn px_expiry_reads_as_missing_after_the_deadline() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"SET", b"k", b"v", b"PX", b"50"]), b"+OK\r\n");
    assert_eq!(conn.cmd(&[b"GET", b"k"]), b"$1\r\nv\r\n");
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(conn.cmd(&[b"GET", b"k"]), b"$-1\r\n");
    // Fully gone: no TTL record, no key-space entry.
    assert_eq!(conn.cmd(&[b"PTTL", b"k"]), b":-2\r\n");
    assert_eq!(conn.cmd(&[b"EXISTS", b"k"]), b":0\r\n");

    server.shutdown();
}

#[test]
fn active_cycle_reclaims_without_access() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    for i in 0..30 {
        let key = format!("stale:{i}");
        conn.cmd(&[b"SET", key.as_bytes(), b"v", b"PX", b"40"]);
    }
    conn.cmd(&[b"SET", b"keeper", b"v"]);

    // DBSIZE never touches the stale keys, so only the active sweep can
    // reclaim them.  One cron interval plus slack is ample.
    std::thread::sleep(Duration::from_millis(600));
    assert_eq!(conn.cmd(&[b"DBSIZE"]), b":1\r\n");

    server.shutdown();
}

#[test]
fn expire_ttl_persist_interplay() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.cmd(&[b"SET", b"k", b"v"]);
    assert_eq!(conn.cmd(&[b"TTL", b"k"]), b":-1\r\n");
    assert_eq!(conn.cmd(&[b"EXPIRE", b"k", b"100"]), b":1\r\n");

    let ttl = conn.cmd(&[b"TTL", b"k"]);
    let secs: i64 = String::from_utf8_lossy(&ttl[1..ttl.len() - 2])
        .parse()
        .unwrap();
    assert!((95..=100).contains(&secs), "ttl was {secs}");

    assert_eq!(conn.cmd(&[b"PERSIST", b"k"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"TTL", b"k"]), b":-1\r\n");
    assert_eq!(conn.cmd(&[b"PERSIST", b"k"]), b":0\r\n");

    // Missing keys answer -2 and refuse an expire.
    assert_eq!(conn.cmd(&[b"TTL", b"ghost"]), b":-2\r\n");
    assert_eq!(conn.cmd(&[b"EXPIRE", b"ghost", b"10"]), b":0\r\n");

    server.shutdown();
}

#[test]
fn past_deadline_deletes_immediately() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.cmd(&[b"SET", b"k", b"v"]);
    // EXPIREAT with a deadline in the past removes the key on the spot.
    assert_eq!(conn.cmd(&[b"EXPIREAT", b"k", b"1"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"EXISTS", b"k"]), b":0\r\n");

    server.shutdown();
}

#[test]
fn move_succeeds_over_an_expired_destination_copy() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    // Plant a short-lived copy of the key in db 1, then move the live one
    // from db 0 after the copy's deadline: the stale copy must not block
    // the move, whether or not the active sweep reaped it yet.
    conn.cmd(&[b"SELECT", b"1"]);
    conn.cmd(&[b"SET", b"k", b"stale", b"PX", b"40"]);
    conn.cmd(&[b"SELECT", b"0"]);
    conn.cmd(&[b"SET", b"k", b"fresh"]);
    std::thread::sleep(Duration::from_millis(60));

    assert_eq!(conn.cmd(&[b"MOVE", b"k", b"1"]), b":1\r\n");
    conn.cmd(&[b"SELECT", b"1"]);
    assert_eq!(conn.cmd(&[b"GET", b"k"]), b"$5\r\nfresh\r\n");

    server.shutdown();
}

#[test]
fn overwrite_clears_expiration() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.cmd(&[b"SET", b"k", b"v1", b"PX", b"60000"]);
    let pttl = conn.cmd(&[b"PTTL", b"k"]);
    assert_ne!(pttl, b":-1\r\n".to_vec());
    conn.cmd(&[b"SET", b"k", b"v2"]);
    assert_eq!(conn.cmd(&[b"PTTL", b"k"]), b":-1\r\n");

    server.shutdown();
}

#[test]
fn setex_applies_the_ttl() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"SETEX", b"k", b"100", b"v"]), b"+OK\r\n");
    assert_eq!(conn.cmd(&[b"GET", b"k"]), b"$1\r\nv\r\n");
    let ttl = conn.cmd(&[b"TTL", b"k"]);
    assert!(ttl.starts_with(b":9") || ttl == b":100\r\n".to_vec());

    let bad = conn.cmd(&[b"SETEX", b"k", b"0", b"v"]);
    assert!(bad.starts_with(b"-ERR invalid expire time"));

    server.shutdown();
}
