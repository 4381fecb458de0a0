//! End-to-end: typed command surfaces over the wire — sorted sets, sets,
//! encoding-boundary volumes, and eviction under a memory cap.

#[path = "util.rs"]
mod util;

use util::{bulk_elements, TestServer};

#[test]
fn zadd_zrange_withscores_exact_bytes() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(
        conn.cmd(&[b"ZADD", b"z", b"1", b"a", b"2", b"b", b"3", b"c"]),
        b":3\r\n"
    );
    assert_eq!(
        conn.cmd(&[b"ZRANGE", b"z", b"0", b"-1", b"WITHSCORES"]),
        b"*6\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$1\r\n2\r\n$1\r\nc\r\n$1\r\n3\r\n"
    );

    server.shutdown();
}

#[test]
fn zadd_updates_and_rank_queries() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.cmd(&[b"ZADD", b"z", b"1", b"a", b"2", b"b"]);
    // Same (member, score): no-op.  New score: update without duplicate.
    assert_eq!(conn.cmd(&[b"ZADD", b"z", b"1", b"a"]), b":0\r\n");
    assert_eq!(conn.cmd(&[b"ZADD", b"z", b"9", b"a"]), b":0\r\n");
    assert_eq!(conn.cmd(&[b"ZCARD", b"z"]), b":2\r\n");
    assert_eq!(conn.cmd(&[b"ZSCORE", b"z", b"a"]), b"$1\r\n9\r\n");
    assert_eq!(conn.cmd(&[b"ZRANK", b"z", b"a"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"ZREVRANK", b"z", b"a"]), b":0\r\n");
    assert_eq!(conn.cmd(&[b"ZRANK", b"z", b"nope"]), b"$-1\r\n");
    assert_eq!(conn.cmd(&[b"ZCOUNT", b"z", b"(2", b"+inf"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"ZREM", b"z", b"a", b"b"]), b":2\r\n");
    assert_eq!(conn.cmd(&[b"EXISTS", b"z"]), b":0\r\n");

    server.shutdown();
}

#[test]
fn zremrange_by_score_and_rank() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.cmd(&[
        b"ZADD", b"z", b"1", b"a", b"2", b"b", b"3", b"c", b"4", b"d", b"5", b"e",
    ]);
    // Exclusive min: score 2 survives, 3 and 4 go.
    assert_eq!(conn.cmd(&[b"ZREMRANGEBYSCORE", b"z", b"(2", b"4"]), b":2\r\n");
    assert_eq!(
        conn.cmd(&[b"ZRANGE", b"z", b"0", b"-1"]),
        b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\ne\r\n"
    );
    // Negative rank indexes count from the tail.
    assert_eq!(conn.cmd(&[b"ZREMRANGEBYRANK", b"z", b"-2", b"-1"]), b":2\r\n");
    assert_eq!(conn.cmd(&[b"ZRANGE", b"z", b"0", b"-1"]), b"*1\r\n$1\r\na\r\n");
    // Draining the last member removes the key.
    assert_eq!(conn.cmd(&[b"ZREMRANGEBYRANK", b"z", b"0", b"0"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"EXISTS", b"z"]), b":0\r\n");
    assert_eq!(conn.cmd(&[b"ZREMRANGEBYSCORE", b"z", b"-inf", b"+inf"]), b":0\r\n");

    server.shutdown();
}

#[test]
fn set_operations_ignore_missing_keys() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"SADD", b"s", b"1", b"2", b"3"]), b":3\r\n");
    let inter = conn.cmd(&[b"SINTER", b"s", b"s"]);
    assert_eq!(
        bulk_elements(&inter),
        vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
    );
    let union = conn.cmd(&[b"SUNION", b"s", b"t"]);
    assert_eq!(
        bulk_elements(&union),
        vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
    );
    // Intersection with a missing operand is empty.
    assert_eq!(conn.cmd(&[b"SINTER", b"s", b"t"]), b"*0\r\n");
    let diff = conn.cmd(&[b"SDIFF", b"s", b"t"]);
    assert_eq!(
        bulk_elements(&diff),
        vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
    );

    server.shutdown();
}

#[test]
fn sadd_is_idempotent_and_spop_drains() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"SADD", b"s", b"m"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"SADD", b"s", b"m"]), b":0\r\n");
    assert_eq!(conn.cmd(&[b"SCARD", b"s"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"SPOP", b"s"]), b"$1\r\nm\r\n");
    assert_eq!(conn.cmd(&[b"EXISTS", b"s"]), b":0\r\n");
    assert_eq!(conn.cmd(&[b"SPOP", b"s"]), b"$-1\r\n");

    server.shutdown();
}

#[test]
fn srandmember_negative_count_repeats() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    conn.cmd(&[b"SADD", b"s", b"only"]);
    let reply = conn.cmd(&[b"SRANDMEMBER", b"s", b"-5"]);
    let elements = bulk_elements(&reply);
    assert_eq!(elements.len(), 5);
    assert!(elements.iter().all(|e| e == b"only"));

    // Positive count is capped at the cardinality, distinct members.
    let reply = conn.cmd(&[b"SRANDMEMBER", b"s", b"5"]);
    assert_eq!(bulk_elements(&reply), vec![b"only".to_vec()]);

    server.shutdown();
}

#[test]
fn large_list_crosses_the_encoding_boundary_transparently() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    for i in 0..600 {
        conn.cmd(&[b"RPUSH", b"biglist", format!("item-{i}").as_bytes()]);
    }
    assert_eq!(conn.cmd(&[b"LLEN", b"biglist"]), b":600\r\n");
    assert_eq!(
        conn.cmd(&[b"LINDEX", b"biglist", b"0"]),
        b"$6\r\nitem-0\r\n"
    );
    assert_eq!(
        conn.cmd(&[b"LINDEX", b"biglist", b"-1"]),
        b"$8\r\nitem-599\r\n"
    );
    assert_eq!(conn.cmd(&[b"LREM", b"biglist", b"0", b"item-300"]), b":1\r\n");
    assert_eq!(conn.cmd(&[b"LLEN", b"biglist"]), b":599\r\n");
    assert_eq!(conn.cmd(&[b"LTRIM", b"biglist", b"0", b"9"]), b"+OK\r\n");
    assert_eq!(conn.cmd(&[b"LLEN", b"biglist"]), b":10\r\n");

    server.shutdown();
}

#[test]
fn eviction_makes_room_for_new_writes() {
    let server = TestServer::start(|cfg| {
        cfg.maxmemory = 16 * 1024;
        cfg.maxmemory_policy = "allkeys-lru".parse().unwrap();
    });
    let mut conn = server.connect();

    // Well past the cap at ~100 bytes of accounting per key.
    for i in 0..500 {
        let key = format!("bulk:{i:04}");
        assert_eq!(conn.cmd(&[b"SET", key.as_bytes(), b"0123456789"]), b"+OK\r\n");
    }
    let reply = conn.cmd(&[b"DBSIZE"]);
    let count: i64 = String::from_utf8_lossy(&reply[1..reply.len() - 2])
        .parse()
        .unwrap();
    assert!(count < 500, "eviction never ran: {count} keys survived");
    assert!(count > 0);

    server.shutdown();
}

#[test]
fn noeviction_policy_refuses_writes_over_cap() {
    let server = TestServer::start(|cfg| {
        cfg.maxmemory = 4 * 1024;
    });
    let mut conn = server.connect();

    let mut saw_oom = false;
    for i in 0..200 {
        let key = format!("k:{i:03}");
        let reply = conn.cmd(&[b"SET", key.as_bytes(), b"0123456789"]);
        if reply.starts_with(b"-OOM") {
            saw_oom = true;
            break;
        }
    }
    assert!(saw_oom, "expected an OOM refusal under noeviction");
    // Reads still work.
    assert_eq!(conn.cmd(&[b"GET", b"k:000"]), b"$10\r\n0123456789\r\n");

    server.shutdown();
}

#[test]
fn append_and_strlen() {
    let server = TestServer::start(|_| {});
    let mut conn = server.connect();

    assert_eq!(conn.cmd(&[b"APPEND", b"s", b"Hello "]), b":6\r\n");
    assert_eq!(conn.cmd(&[b"APPEND", b"s", b"World"]), b":11\r\n");
    assert_eq!(conn.cmd(&[b"STRLEN", b"s"]), b":11\r\n");
    assert_eq!(conn.cmd(&[b"GET", b"s"]), b"$11\r\nHello World\r\n");
    assert_eq!(conn.cmd(&[b"INCRBYFLOAT", b"f", b"10.5"]), b"$4\r\n10.5\r\n");
    assert_eq!(conn.cmd(&[b"INCRBYFLOAT", b"f", b"0.1"]), b"$4\r\n10.6\r\n");

    server.shutdown();
}
