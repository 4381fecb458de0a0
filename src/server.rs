//! Whole-process server state, the periodic cron task, and the before-sleep
//! hook.
//!
//! One [`Server`] value owns every database, every client, the listeners,
//! the command table counters and the propagation sinks.  It is created
//! once before the event loop starts and torn down after the loop stops;
//! nothing in it is shared across threads.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::str::FromStr;

use log::{debug, info, trace};

use crate::ae::{AeEventLoop, AE_READABLE};
use crate::command::{build_command_index, CmdStats, COMMAND_TABLE};
use crate::db::Db;
use crate::expire::{self, ActiveExpireState, CycleKind};
use crate::net::client::Client;
use crate::net::handlers;
use crate::net::anet;
use crate::obj::object::lru_clock_from_ms;
use crate::util::mstime;

/// Margin of descriptors reserved beyond `maxclients` (listeners, logs,
/// spare room).
pub const MIN_RESERVED_FDS: usize = 128;
/// Sliding window length for the throughput estimate.
const OPS_SEC_SAMPLES: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Eviction policy under a configured memory cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxmemoryPolicy {
    NoEviction,
    AllkeysLru,
    VolatileLru,
    AllkeysRandom,
    VolatileRandom,
    VolatileTtl,
}

impl FromStr for MaxmemoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "noeviction" => Ok(MaxmemoryPolicy::NoEviction),
            "allkeys-lru" => Ok(MaxmemoryPolicy::AllkeysLru),
            "volatile-lru" => Ok(MaxmemoryPolicy::VolatileLru),
            "allkeys-random" => Ok(MaxmemoryPolicy::AllkeysRandom),
            "volatile-random" => Ok(MaxmemoryPolicy::VolatileRandom),
            "volatile-ttl" => Ok(MaxmemoryPolicy::VolatileTtl),
            other => Err(format!("unknown maxmemory policy '{other}'")),
        }
    }
}

/// Server configuration, assembled from CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: Option<String>,
    pub unixsocket: Option<String>,
    pub tcp_backlog: i32,
    pub tcp_keepalive: u32,
    pub maxclients: usize,
    pub maxmemory: u64,
    pub maxmemory_policy: MaxmemoryPolicy,
    pub maxmemory_samples: usize,
    pub databases: usize,
    pub hz: u32,
    /// Idle client timeout in seconds (0 = never).
    pub timeout: u64,

    // Encoding-transition thresholds.
    pub list_max_ziplist_entries: usize,
    pub list_max_ziplist_value: usize,
    pub hash_max_ziplist_entries: usize,
    pub hash_max_ziplist_value: usize,
    pub set_max_intset_entries: usize,
    pub zset_max_ziplist_entries: usize,
    pub zset_max_ziplist_value: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 6379,
            bind: None,
            unixsocket: None,
            tcp_backlog: 511,
            tcp_keepalive: 0,
            maxclients: 10000,
            maxmemory: 0,
            maxmemory_policy: MaxmemoryPolicy::NoEviction,
            maxmemory_samples: 5,
            databases: 16,
            hz: 10,
            timeout: 0,
            list_max_ziplist_entries: 512,
            list_max_ziplist_value: 64,
            hash_max_ziplist_entries: 512,
            hash_max_ziplist_value: 64,
            set_max_intset_entries: 512,
            zset_max_ziplist_entries: 128,
            zset_max_ziplist_value: 64,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Propagation sinks
// ─────────────────────────────────────────────────────────────────────────────

/// External persistence/replication consumer.  The engine calls
/// [`propagate`](Propagate::propagate) after every effective write (and for
/// synthetic `DEL`s on expiration/eviction) and
/// [`notify_change`](Propagate::notify_change) for watched-key machinery.
pub trait Propagate {
    fn propagate(&mut self, dbid: usize, argv: &[&[u8]]);
    fn notify_change(&mut self, dbid: usize, key: &[u8]);
}

/// The registered sink set.
#[derive(Default)]
pub struct Sinks {
    sinks: Vec<Box<dyn Propagate>>,
}

impl Sinks {
    pub fn register(&mut self, sink: Box<dyn Propagate>) {
        self.sinks.push(sink);
    }

    pub fn propagate(&mut self, dbid: usize, argv: &[&[u8]]) {
        for s in &mut self.sinks {
            s.propagate(dbid, argv);
        }
    }

    pub fn notify_change(&mut self, dbid: usize, key: &[u8]) {
        for s in &mut self.sinks {
            s.notify_change(dbid, key);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Counters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Stats {
    pub expired_keys: u64,
    pub evicted_keys: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    pub numcommands: u64,
    pub numconnections: u64,
    pub rejected_conn: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// Whole-process state.
pub struct Server {
    pub config: Config,
    pub dbs: Vec<Db>,
    pub clients: HashMap<RawFd, Client>,
    /// Clients with queued output awaiting the next flush.
    pub clients_pending_write: Vec<RawFd>,
    /// Clients flagged for asynchronous close, drained by cron.
    pub clients_to_close: Vec<RawFd>,
    pub command_index: HashMap<&'static str, usize>,
    pub command_stats: Vec<CmdStats>,

    pub tcp_fd: Option<RawFd>,
    pub unix_fd: Option<RawFd>,

    pub next_client_id: u64,
    /// Cached wall clock, refreshed by cron and before each command batch.
    pub now_ms: u64,
    pub lru_clock: u32,
    pub dirty: u64,
    pub stats: Stats,
    pub sinks: Sinks,
    pub expire_state: ActiveExpireState,

    pub cron_loops: u64,
    pub lastsave: u64,
    pub start_time: u64,
    pub loading: bool,
    pub shutdown_requested: bool,

    /// Test hook replacing the coarse used-memory estimate.
    pub used_memory_hook: Option<fn(&Server) -> u64>,

    ops_sec_samples: [u64; OPS_SEC_SAMPLES],
    ops_sec_idx: usize,
    ops_sec_last_sample_ms: u64,
    ops_sec_last_numcommands: u64,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let now = mstime();
        let dbs = (0..config.databases).map(Db::new).collect();
        Server {
            config,
            dbs,
            clients: HashMap::new(),
            clients_pending_write: Vec::new(),
            clients_to_close: Vec::new(),
            command_index: build_command_index(),
            command_stats: vec![CmdStats::default(); COMMAND_TABLE.len()],
            tcp_fd: None,
            unix_fd: None,
            next_client_id: 1,
            now_ms: now,
            lru_clock: lru_clock_from_ms(now),
            dirty: 0,
            stats: Stats::default(),
            sinks: Sinks::default(),
            expire_state: ActiveExpireState::default(),
            cron_loops: 0,
            lastsave: now / 1000,
            start_time: now / 1000,
            loading: false,
            shutdown_requested: false,
            used_memory_hook: None,
            ops_sec_samples: [0; OPS_SEC_SAMPLES],
            ops_sec_idx: 0,
            ops_sec_last_sample_ms: now,
            ops_sec_last_numcommands: 0,
        }
    }

    /// Event loop registry size: every client descriptor plus reserved
    /// margin.
    pub fn event_loop_size(&self) -> usize {
        self.config.maxclients + MIN_RESERVED_FDS
    }

    /// Current memory usage compared against the cap.  A coarse logical
    /// estimate by default; tests may install a hook.
    pub fn used_memory(&self) -> u64 {
        if let Some(hook) = self.used_memory_hook {
            return hook(self);
        }
        self.dbs.iter().map(|d| d.logical_bytes).sum()
    }

    /// Average operations per second over the sliding sample window.
    pub fn ops_per_sec(&self) -> u64 {
        let sum: u64 = self.ops_sec_samples.iter().sum();
        sum / OPS_SEC_SAMPLES as u64
    }

    fn track_ops_per_sec(&mut self) {
        let now = mstime();
        let elapsed = now.saturating_sub(self.ops_sec_last_sample_ms);
        if elapsed < 100 {
            return;
        }
        let ops = self.stats.numcommands - self.ops_sec_last_numcommands;
        let ops_sec = if elapsed > 0 { ops * 1000 / elapsed } else { 0 };
        self.ops_sec_samples[self.ops_sec_idx] = ops_sec;
        self.ops_sec_idx = (self.ops_sec_idx + 1) % OPS_SEC_SAMPLES;
        self.ops_sec_last_sample_ms = now;
        self.ops_sec_last_numcommands = self.stats.numcommands;
    }

    /// Create the configured listeners and register their accept handlers.
    pub fn listen(&mut self, el: &mut AeEventLoop<Server>) -> anyhow::Result<()> {
        if self.config.port != 0 {
            let fd = anet::tcp_server(
                self.config.port,
                self.config.bind.as_deref(),
                self.config.tcp_backlog,
            )?;
            el.create_file_event(fd, AE_READABLE, handlers::accept_tcp_handler)?;
            self.tcp_fd = Some(fd);
            info!(
                "listening on {}:{}",
                self.config.bind.as_deref().unwrap_or("0.0.0.0"),
                self.config.port
            );
        }
        if let Some(path) = self.config.unixsocket.clone() {
            let fd = anet::unix_server(&path, self.config.tcp_backlog)?;
            el.create_file_event(fd, AE_READABLE, handlers::accept_unix_handler)?;
            self.unix_fd = Some(fd);
            info!("listening on unix socket {path}");
        }
        Ok(())
    }

    /// Close listeners and drop every client.  Run after the loop stops.
    pub fn teardown(&mut self, el: &mut AeEventLoop<Server>) {
        let fds: Vec<RawFd> = self.clients.keys().copied().collect();
        for fd in fds {
            handlers::unlink_client_events(el, fd);
        }
        self.clients.clear();
        if let Some(fd) = self.tcp_fd.take() {
            el.delete_file_event(fd, AE_READABLE);
            anet::close_listener(fd);
        }
        if let Some(fd) = self.unix_fd.take() {
            el.delete_file_event(fd, AE_READABLE);
            anet::close_listener(fd);
            if let Some(path) = &self.config.unixsocket {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cron
// ─────────────────────────────────────────────────────────────────────────────

/// Periodic housekeeping, scheduled at `hz` ticks per second: clock
/// refresh, throughput sampling, idle-client sweep, query buffer shrink,
/// the slow active-expiration pass, table resize/rehash budget, and the
/// async-close queue.
pub fn server_cron(el: &mut AeEventLoop<Server>, server: &mut Server, _id: u64) -> Option<u64> {
    server.now_ms = mstime();
    server.lru_clock = lru_clock_from_ms(server.now_ms);
    server.track_ops_per_sec();

    clients_cron(el, server);
    databases_cron(server);

    // Drain clients flagged for asynchronous close.
    let to_close = std::mem::take(&mut server.clients_to_close);
    for fd in to_close {
        let close = server
            .clients
            .get(&fd)
            .map(|c| c.close_asap)
            .unwrap_or(false);
        if close {
            debug!("async close of client fd {fd}");
            handlers::free_client(el, server, fd);
        }
    }

    server.cron_loops += 1;
    Some((1000 / server.config.hz.max(1)) as u64)
}

fn clients_cron(el: &mut AeEventLoop<Server>, server: &mut Server) {
    let now_s = server.now_ms / 1000;
    let timeout = server.config.timeout;

    let mut stale: Vec<RawFd> = Vec::new();
    for (fd, c) in server.clients.iter_mut() {
        if timeout > 0 && now_s.saturating_sub(c.lastinteraction) > timeout {
            stale.push(*fd);
            continue;
        }
        // Reclaim oversized, currently idle query buffers.
        if c.querybuf.avail() > 1024 * 32 && c.querybuf.is_empty() {
            c.querybuf = crate::ds::sds::Sds::new();
            c.querybuf_peak = 0;
        }
    }
    for fd in stale {
        debug!("closing idle client fd {fd}");
        handlers::free_client(el, server, fd);
    }
}

fn databases_cron(server: &mut Server) {
    expire::active_expire_cycle(server, CycleKind::Slow);

    // Shrink sparse tables, then spend up to one millisecond advancing one
    // database's incremental rehash.
    for db in server.dbs.iter_mut() {
        if db.dict.needs_resize() {
            db.dict.resize();
        }
        if db.expires.needs_resize() {
            db.expires.resize();
        }
    }
    for db in server.dbs.iter_mut() {
        if db.dict.is_rehashing() || db.expires.is_rehashing() {
            db.dict.rehash_milliseconds(1);
            db.expires.rehash_milliseconds(1);
            trace!("rehash budget spent on db {}", db.id);
            break;
        }
    }
}

/// Before-sleep hook: the fast expiration cycle, then flush every client
/// with pending output.
pub fn before_sleep(el: &mut AeEventLoop<Server>, server: &mut Server) {
    expire::active_expire_cycle(server, CycleKind::Fast);
    handlers::handle_clients_with_pending_writes(el, server);
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording sink (used by tests and as a reference implementation)
// ─────────────────────────────────────────────────────────────────────────────

/// One propagated effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagatedEvent {
    pub dbid: usize,
    pub argv: Vec<Vec<u8>>,
}

/// Sink that records everything it is handed; the shared handle lets a test
/// inspect the stream after driving the engine.
#[derive(Default, Clone)]
pub struct RecordingSink {
    pub events: std::rc::Rc<std::cell::RefCell<Vec<PropagatedEvent>>>,
}

impl Propagate for RecordingSink {
    fn propagate(&mut self, dbid: usize, argv: &[&[u8]]) {
        self.events.borrow_mut().push(PropagatedEvent {
            dbid,
            argv: argv.iter().map(|a| a.to_vec()).collect(),
        });
    }

    fn notify_change(&mut self, _dbid: usize, _key: &[u8]) {}
}
