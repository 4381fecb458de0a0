// Database layer: key space / expire set coupling, lazy expiration with
// DEL propagation, eviction under a memory cap, and the active expire
// cycle.

use rudis::command::Fx;
use rudis::db::{expire_if_needed, lookup_key_read, lookup_key_write, Db};
use rudis::evict;
use rudis::expire::{active_expire_cycle, CycleKind};
use rudis::obj::object::Robj;
use rudis::server::{
    Config, MaxmemoryPolicy, PropagatedEvent, RecordingSink, Server, Sinks, Stats,
};
use rudis::util::mstime;
use rudis::Sds;

struct Effects {
    dirty: u64,
    stats: Stats,
    sinks: Sinks,
    cfg: Config,
}

impl Effects {
    fn new() -> Self {
        Effects {
            dirty: 0,
            stats: Stats::default(),
            sinks: Sinks::default(),
            cfg: Config::default(),
        }
    }

    fn fx(&mut self, now_ms: u64) -> Fx<'_> {
        Fx {
            dirty: &mut self.dirty,
            stats: &mut self.stats,
            sinks: &mut self.sinks,
            cfg: &self.cfg,
            now_ms,
            lru_clock: 0,
            dbid: 0,
        }
    }
}

fn set_string(db: &mut Db, key: &str, val: &str) {
    db.set_key(key.as_bytes(), Robj::string_from_slice(val.as_bytes()));
}

#[test]
fn expire_set_requires_key_space_membership() {
    let mut db = Db::new(0);
    set_string(&mut db, "k", "v");
    db.set_expire(b"k", 12345);
    assert_eq!(db.get_expire(b"k"), Some(12345));

    // Deleting the key clears the expire record with it.
    assert!(db.delete(b"k"));
    assert_eq!(db.get_expire(b"k"), None);
    assert!(!db.exists(b"k"));
}

#[test]
fn set_key_discards_previous_expiration() {
    let mut db = Db::new(0);
    set_string(&mut db, "k", "v1");
    db.set_expire(b"k", u64::MAX);
    set_string(&mut db, "k", "v2");
    assert_eq!(db.get_expire(b"k"), None);
}

#[test]
fn lazy_expiration_deletes_and_propagates_del() {
    let mut db = Db::new(0);
    let mut ef = Effects::new();
    let sink = RecordingSink::default();
    ef.sinks.register(Box::new(sink.clone()));

    set_string(&mut db, "gone", "v");
    db.set_expire(b"gone", 1000);
    set_string(&mut db, "alive", "v");
    db.set_expire(b"alive", 5000);

    let mut fx = ef.fx(2000);
    assert!(expire_if_needed(&mut db, &mut fx, b"gone"));
    assert!(!expire_if_needed(&mut db, &mut fx, b"alive"));
    assert!(!db.exists(b"gone"));
    assert!(db.exists(b"alive"));

    let events = sink.events.borrow();
    assert_eq!(
        *events,
        vec![PropagatedEvent {
            dbid: 0,
            argv: vec![b"DEL".to_vec(), b"gone".to_vec()],
        }]
    );
    drop(events);
    assert_eq!(ef.stats.expired_keys, 1);
}

#[test]
fn lookups_count_hits_and_misses() {
    let mut db = Db::new(0);
    let mut ef = Effects::new();
    set_string(&mut db, "k", "v");

    let mut fx = ef.fx(0);
    assert!(lookup_key_read(&mut db, &mut fx, b"k").is_some());
    assert!(lookup_key_read(&mut db, &mut fx, b"missing").is_none());
    assert!(lookup_key_write(&mut db, &mut fx, b"k").is_some());
    assert_eq!(ef.stats.keyspace_hits, 1);
    assert_eq!(ef.stats.keyspace_misses, 1);
}

#[test]
fn expired_key_reads_as_missing() {
    let mut db = Db::new(0);
    let mut ef = Effects::new();
    set_string(&mut db, "k", "v");
    db.set_expire(b"k", 10);

    let mut fx = ef.fx(20);
    assert!(lookup_key_read(&mut db, &mut fx, b"k").is_none());
    assert_eq!(ef.stats.keyspace_misses, 1);
    assert_eq!(ef.stats.expired_keys, 1);
}

// ── Eviction ─────────────────────────────────────────────────────────────────

fn filled_server(policy: MaxmemoryPolicy, volatile: bool) -> Server {
    let mut config = Config::default();
    config.databases = 1;
    config.maxmemory_policy = policy;
    let mut server = Server::new(config);
    for i in 0..100 {
        let key = format!("key:{i:03}");
        server.dbs[0].set_key(
            key.as_bytes(),
            Robj::string_from_slice(format!("value:{i}").as_bytes()),
        );
        if volatile {
            server.dbs[0].set_expire(key.as_bytes(), u64::MAX - 1);
        }
    }
    server
}

#[test]
fn noeviction_refuses_when_over_cap() {
    let mut server = filled_server(MaxmemoryPolicy::NoEviction, false);
    server.config.maxmemory = 1;
    assert!(evict::free_memory_if_needed(&mut server).is_err());
    assert_eq!(server.dbs[0].dict.len(), 100);
}

#[test]
fn allkeys_lru_evicts_down_to_the_cap() {
    let mut server = filled_server(MaxmemoryPolicy::AllkeysLru, false);
    let used = server.used_memory();
    server.config.maxmemory = used / 2;
    assert!(evict::free_memory_if_needed(&mut server).is_ok());
    assert!(server.used_memory() <= server.config.maxmemory);
    assert!(server.stats.evicted_keys > 0);
    assert!(server.dbs[0].dict.len() < 100);
}

#[test]
fn full_pool_keeps_the_stale_tail_and_drops_the_fresh_front() {
    let mut server = filled_server(MaxmemoryPolicy::AllkeysLru, false);
    // Distinct idle times: key:000 was touched just now, key:039 longest
    // ago.  Only the first 40 keys get stamps; the rest stay at the clock.
    server.lru_clock = 100;
    for (_, v) in server.dbs[0].dict.iter() {
        v.touch(100);
    }
    for i in 0..40u32 {
        let key = format!("key:{i:03}");
        server.dbs[0].dict.get(key.as_bytes()).unwrap().touch(100 - i);
    }

    for _ in 0..50 {
        evict::eviction_pool_populate(&mut server.dbs[0], false, 100, server.lru_clock);
    }
    let pool = &server.dbs[0].eviction_pool;
    assert_eq!(pool.len(), rudis::evict::EVICTION_POOL_SIZE);
    // Ascending by idle, stalest at the back.
    assert!(pool.windows(2).all(|w| w[0].idle <= w[1].idle));
    assert_eq!(pool.last().unwrap().key.as_bytes(), b"key:039");
    // The freshest keys were displaced out of the front.
    assert!(pool.iter().all(|e| e.key.as_bytes() != b"key:000".as_slice()));
}

#[test]
fn lru_prefers_the_stalest_sampled_key() {
    let mut server = filled_server(MaxmemoryPolicy::AllkeysLru, false);
    // Everything was just touched; make one key look ancient.
    server.lru_clock = 500;
    for (_, v) in server.dbs[0].dict.iter() {
        v.touch(500);
    }
    server.dbs[0].dict.get(b"key:007").unwrap().touch(1);

    // Enough sampling rounds that the stale key is in the pool with
    // certainty for practical purposes; it sorts to the back (highest
    // idle) and survives there across rounds.
    for _ in 0..50 {
        evict::eviction_pool_populate(&mut server.dbs[0], false, 100, server.lru_clock);
    }
    assert_eq!(
        server.dbs[0].eviction_pool.last().unwrap().key.as_bytes(),
        b"key:007"
    );

    let used = server.used_memory();
    server.config.maxmemory = used - 1;
    assert!(evict::free_memory_if_needed(&mut server).is_ok());
    assert_eq!(server.stats.evicted_keys, 1);
    assert!(!server.dbs[0].dict.contains(b"key:007"));
}

#[test]
fn volatile_policies_only_touch_keys_with_expirations() {
    let mut server = filled_server(MaxmemoryPolicy::VolatileLru, false);
    // No key carries an expiration: nothing can be evicted.
    server.config.maxmemory = 1;
    assert!(evict::free_memory_if_needed(&mut server).is_err());
    assert_eq!(server.dbs[0].dict.len(), 100);

    let mut server = filled_server(MaxmemoryPolicy::VolatileRandom, true);
    let used = server.used_memory();
    server.config.maxmemory = used / 2;
    assert!(evict::free_memory_if_needed(&mut server).is_ok());
    assert!(server.dbs[0].dict.len() < 100);
}

#[test]
fn volatile_ttl_picks_the_soonest_deadline() {
    let mut config = Config::default();
    config.databases = 1;
    config.maxmemory_policy = MaxmemoryPolicy::VolatileTtl;
    // Sampling is with replacement; a sample width vastly larger than the
    // key count makes missing the minimum astronomically unlikely.
    config.maxmemory_samples = 1000;
    let mut server = Server::new(config);
    for i in 0..10 {
        let key = format!("key:{i:03}");
        server.dbs[0].set_key(key.as_bytes(), Robj::from_i64(i));
        server.dbs[0].set_expire(key.as_bytes(), 1_000_000 + i as u64);
    }
    let used = server.used_memory();
    server.config.maxmemory = used - 1;
    assert!(evict::free_memory_if_needed(&mut server).is_ok());
    assert!(!server.dbs[0].dict.contains(b"key:000"));
    assert_eq!(server.dbs[0].dict.len(), 9);
}

// ── Active expiration ────────────────────────────────────────────────────────

#[test]
fn slow_cycle_reclaims_expired_keys_without_access() {
    let mut config = Config::default();
    config.databases = 2;
    let mut server = Server::new(config);
    let now = mstime();
    for i in 0..50 {
        let key = format!("stale:{i}");
        server.dbs[1].set_key(key.as_bytes(), Robj::from_i64(i));
        server.dbs[1].set_expire(key.as_bytes(), now.saturating_sub(1000));
    }
    for i in 0..50 {
        let key = format!("fresh:{i}");
        server.dbs[1].set_key(key.as_bytes(), Robj::from_i64(i));
        server.dbs[1].set_expire(key.as_bytes(), now + 60_000);
    }

    // Sampling is random; a few cycles drain a 50%-stale expire set.
    for _ in 0..200 {
        active_expire_cycle(&mut server, CycleKind::Slow);
        if server.stats.expired_keys >= 50 {
            break;
        }
    }
    assert_eq!(server.stats.expired_keys, 50);
    assert_eq!(server.dbs[1].dict.len(), 50);
    assert_eq!(server.dbs[1].expires.len(), 50);
}
