//! Command table and the dispatch pipeline from a parsed argument vector to
//! side effects and a queued reply.
//!
//! Dispatch order: the `quit` special case, case-insensitive command lookup,
//! arity verification, the memory-pressure gate (eviction pass, then
//! refusal of deny-oom commands), the loading gate, then the handler inside
//! a call wrapper that records duration and — when the dirty counter moved —
//! forwards the command to the propagation sinks.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use crate::ae::AeEventLoop;
use crate::db::{self, Db};
use crate::ds::sds::Sds;
use crate::evict;
use crate::net::client::Client;
use crate::obj::shared;
use crate::server::{Config, Server, Sinks, Stats};
use crate::types::{hash, list, set, string, zset};
use crate::util::ustime;

// ─────────────────────────────────────────────────────────────────────────────
// Command flags
// ─────────────────────────────────────────────────────────────────────────────

/// May modify the key space.
pub const CMD_WRITE: u32 = 1 << 0;
/// Never modifies the key space.
pub const CMD_READONLY: u32 = 1 << 1;
/// Refused under memory pressure when eviction cannot recover.
pub const CMD_DENYOOM: u32 = 1 << 2;
/// Administrative.
pub const CMD_ADMIN: u32 = 1 << 3;
/// Output is not a pure function of the data set.
pub const CMD_RANDOM: u32 = 1 << 4;
/// Allowed while the server is loading a dataset.
pub const CMD_LOADING: u32 = 1 << 5;
/// Allowed on stale replicas (kept for table fidelity).
pub const CMD_STALE: u32 = 1 << 6;
/// Not forwarded to monitoring sinks.
pub const CMD_SKIP_MONITOR: u32 = 1 << 7;

/// A command handler.
pub type CommandProc = fn(&mut Ctx);

/// One command table entry.
pub struct CommandSpec {
    pub name: &'static str,
    pub proc: CommandProc,
    /// Positive = exact argc; negative = minimum argc.
    pub arity: i32,
    pub flags: u32,
    /// Key positions: (first, last, step); 0 when the command has no keys.
    pub first_key: i32,
    pub last_key: i32,
    pub key_step: i32,
}

/// Per-command counters, parallel to the table.
#[derive(Default, Clone)]
pub struct CmdStats {
    pub microseconds: u64,
    pub calls: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a handler may touch, split out of the server so a handler can
/// borrow the database, the issuing client and the bookkeeping counters at
/// the same time.
pub struct Ctx<'a> {
    pub dbs: &'a mut Vec<Db>,
    pub db_index: usize,
    pub clients: &'a mut HashMap<RawFd, Client>,
    pub fd: RawFd,
    /// Argument vector of the request (argv[0] is the command name).
    pub argv: Vec<Sds>,
    pub cfg: &'a Config,
    pub dirty: &'a mut u64,
    pub stats: &'a mut Stats,
    pub sinks: &'a mut Sinks,
    pub to_close: &'a mut Vec<RawFd>,
    pub now_ms: u64,
    pub lru_clock: u32,
    pub lastsave: u64,
    pub shutdown_requested: &'a mut bool,
}

/// Side-effect bundle passed to the database helpers (everything except the
/// database and the client).
pub struct Fx<'a> {
    pub dirty: &'a mut u64,
    pub stats: &'a mut Stats,
    pub sinks: &'a mut Sinks,
    pub cfg: &'a Config,
    pub now_ms: u64,
    pub lru_clock: u32,
    pub dbid: usize,
}

impl<'a> Ctx<'a> {
    /// The selected database.
    pub fn db(&mut self) -> &mut Db {
        &mut self.dbs[self.db_index]
    }

    /// The issuing client.
    pub fn client(&mut self) -> &mut Client {
        self.clients
            .get_mut(&self.fd)
            .expect("client vanished mid-command")
    }

    /// Disjoint borrows of the database, the client, and the side-effect
    /// bundle — the working set of nearly every handler.
    pub fn split(&mut self) -> (&mut Db, &mut Client, Fx<'_>) {
        let db = &mut self.dbs[self.db_index];
        let c = self
            .clients
            .get_mut(&self.fd)
            .expect("client vanished mid-command");
        let fx = Fx {
            dirty: &mut *self.dirty,
            stats: &mut *self.stats,
            sinks: &mut *self.sinks,
            cfg: self.cfg,
            now_ms: self.now_ms,
            lru_clock: self.lru_clock,
            dbid: self.db_index,
        };
        (db, c, fx)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command table
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! cmd {
    ($name:literal, $proc:path, $arity:literal, $flags:expr, $fk:literal, $lk:literal, $ks:literal) => {
        CommandSpec {
            name: $name,
            proc: $proc,
            arity: $arity,
            flags: $flags,
            first_key: $fk,
            last_key: $lk,
            key_step: $ks,
        }
    };
}

pub static COMMAND_TABLE: &[CommandSpec] = &[
    // Strings
    cmd!("get", string::get_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("set", string::set_command, -3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("setnx", string::setnx_command, 3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("setex", string::setex_command, 4, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("psetex", string::psetex_command, 4, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("getset", string::getset_command, 3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("append", string::append_command, 3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("strlen", string::strlen_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("incr", string::incr_command, 2, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("decr", string::decr_command, 2, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("incrby", string::incrby_command, 3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("decrby", string::decrby_command, 3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("incrbyfloat", string::incrbyfloat_command, 3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    // Lists
    cmd!("rpush", list::rpush_command, -3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("lpush", list::lpush_command, -3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("rpushx", list::rpushx_command, 3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("lpushx", list::lpushx_command, 3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("linsert", list::linsert_command, 5, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("rpop", list::rpop_command, 2, CMD_WRITE, 1, 1, 1),
    cmd!("lpop", list::lpop_command, 2, CMD_WRITE, 1, 1, 1),
    cmd!("llen", list::llen_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("lindex", list::lindex_command, 3, CMD_READONLY, 1, 1, 1),
    cmd!("lset", list::lset_command, 4, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("lrange", list::lrange_command, 4, CMD_READONLY, 1, 1, 1),
    cmd!("ltrim", list::ltrim_command, 4, CMD_WRITE, 1, 1, 1),
    cmd!("lrem", list::lrem_command, 4, CMD_WRITE, 1, 1, 1),
    // Sets
    cmd!("sadd", set::sadd_command, -3, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("srem", set::srem_command, -3, CMD_WRITE, 1, 1, 1),
    cmd!("sismember", set::sismember_command, 3, CMD_READONLY, 1, 1, 1),
    cmd!("scard", set::scard_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("spop", set::spop_command, 2, CMD_WRITE | CMD_RANDOM, 1, 1, 1),
    cmd!("srandmember", set::srandmember_command, -2, CMD_READONLY | CMD_RANDOM, 1, 1, 1),
    cmd!("sinter", set::sinter_command, -2, CMD_READONLY, 1, -1, 1),
    cmd!("sunion", set::sunion_command, -2, CMD_READONLY, 1, -1, 1),
    cmd!("sdiff", set::sdiff_command, -2, CMD_READONLY, 1, -1, 1),
    cmd!("smembers", set::smembers_command, 2, CMD_READONLY, 1, 1, 1),
    // Sorted sets
    cmd!("zadd", zset::zadd_command, -4, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("zincrby", zset::zincrby_command, 4, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("zrem", zset::zrem_command, -3, CMD_WRITE, 1, 1, 1),
    cmd!("zremrangebyscore", zset::zremrangebyscore_command, 4, CMD_WRITE, 1, 1, 1),
    cmd!("zremrangebyrank", zset::zremrangebyrank_command, 4, CMD_WRITE, 1, 1, 1),
    cmd!("zrange", zset::zrange_command, -4, CMD_READONLY, 1, 1, 1),
    cmd!("zrevrange", zset::zrevrange_command, -4, CMD_READONLY, 1, 1, 1),
    cmd!("zcard", zset::zcard_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("zscore", zset::zscore_command, 3, CMD_READONLY, 1, 1, 1),
    cmd!("zcount", zset::zcount_command, 4, CMD_READONLY, 1, 1, 1),
    cmd!("zrank", zset::zrank_command, 3, CMD_READONLY, 1, 1, 1),
    cmd!("zrevrank", zset::zrevrank_command, 3, CMD_READONLY, 1, 1, 1),
    // Hashes
    cmd!("hset", hash::hset_command, 4, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("hsetnx", hash::hsetnx_command, 4, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("hmset", hash::hmset_command, -4, CMD_WRITE | CMD_DENYOOM, 1, 1, 1),
    cmd!("hget", hash::hget_command, 3, CMD_READONLY, 1, 1, 1),
    cmd!("hmget", hash::hmget_command, -3, CMD_READONLY, 1, 1, 1),
    cmd!("hdel", hash::hdel_command, -3, CMD_WRITE, 1, 1, 1),
    cmd!("hlen", hash::hlen_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("hgetall", hash::hgetall_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("hexists", hash::hexists_command, 3, CMD_READONLY, 1, 1, 1),
    cmd!("hkeys", hash::hkeys_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("hvals", hash::hvals_command, 2, CMD_READONLY, 1, 1, 1),
    // Keys / database
    cmd!("del", db::del_command, -2, CMD_WRITE, 1, -1, 1),
    cmd!("exists", db::exists_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("select", db::select_command, 2, CMD_READONLY | CMD_LOADING, 0, 0, 0),
    cmd!("randomkey", db::randomkey_command, 1, CMD_READONLY | CMD_RANDOM, 0, 0, 0),
    cmd!("keys", db::keys_command, 2, CMD_READONLY, 0, 0, 0),
    cmd!("scan", db::scan_command, -2, CMD_READONLY | CMD_RANDOM, 0, 0, 0),
    cmd!("dbsize", db::dbsize_command, 1, CMD_READONLY, 0, 0, 0),
    cmd!("lastsave", db::lastsave_command, 1, CMD_READONLY | CMD_RANDOM, 0, 0, 0),
    cmd!("type", db::type_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("shutdown", db::shutdown_command, -1, CMD_ADMIN | CMD_READONLY | CMD_LOADING, 0, 0, 0),
    cmd!("move", db::move_command, 3, CMD_WRITE, 1, 1, 1),
    cmd!("rename", db::rename_command, 3, CMD_WRITE, 1, 2, 1),
    cmd!("renamenx", db::renamenx_command, 3, CMD_WRITE, 1, 2, 1),
    cmd!("expire", db::expire_command, 3, CMD_WRITE, 1, 1, 1),
    cmd!("expireat", db::expireat_command, 3, CMD_WRITE, 1, 1, 1),
    cmd!("pexpire", db::pexpire_command, 3, CMD_WRITE, 1, 1, 1),
    cmd!("pexpireat", db::pexpireat_command, 3, CMD_WRITE, 1, 1, 1),
    cmd!("ttl", db::ttl_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("pttl", db::pttl_command, 2, CMD_READONLY, 1, 1, 1),
    cmd!("persist", db::persist_command, 2, CMD_WRITE, 1, 1, 1),
    cmd!("flushdb", db::flushdb_command, 1, CMD_WRITE, 0, 0, 0),
    cmd!("flushall", db::flushall_command, 1, CMD_WRITE, 0, 0, 0),
    // Connection / admin
    cmd!("ping", db::ping_command, 1, CMD_READONLY | CMD_STALE, 0, 0, 0),
    cmd!("echo", db::echo_command, 2, CMD_READONLY, 0, 0, 0),
    cmd!("client", client_command_entry, -2, CMD_ADMIN | CMD_READONLY, 0, 0, 0),
];

/// Case-insensitive name → table index.
pub fn build_command_index() -> HashMap<&'static str, usize> {
    COMMAND_TABLE
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name, i))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Execute the request parsed into `client.argv`.  The caller guarantees
/// the vector is non-empty.
pub fn process_command(el: &mut AeEventLoop<Server>, server: &mut Server, fd: RawFd) {
    let Some(c) = server.clients.get_mut(&fd) else {
        return;
    };
    let argv = std::mem::take(&mut c.argv);
    c.reset_request();
    debug_assert!(!argv.is_empty());

    let name = String::from_utf8_lossy(argv[0].as_bytes()).to_ascii_lowercase();

    if name == "quit" {
        c.add_reply(shared::OK);
        c.close_after_reply = true;
        return;
    }

    let Some(&idx) = server.command_index.get(name.as_str()) else {
        c.add_reply_error(&format!("unknown command '{name}'"));
        return;
    };
    let cmd = &COMMAND_TABLE[idx];

    let argc = argv.len() as i32;
    if (cmd.arity > 0 && argc != cmd.arity) || argc < -cmd.arity {
        c.add_reply_error(&format!("wrong number of arguments for '{name}' command"));
        return;
    }
    c.lastcmd = cmd.name;

    // Memory-pressure gate: run an eviction pass before admitting data and
    // refuse deny-oom commands it could not satisfy.
    if server.config.maxmemory > 0 {
        let freed_enough = evict::free_memory_if_needed(server).is_ok();
        if !freed_enough && cmd.flags & CMD_DENYOOM != 0 {
            server
                .clients
                .get_mut(&fd)
                .map(|c| c.add_reply(shared::OOM_ERR));
            return;
        }
    }

    if server.loading && cmd.flags & CMD_LOADING == 0 {
        server
            .clients
            .get_mut(&fd)
            .map(|c| c.add_reply(shared::LOADING_ERR));
        return;
    }

    // Call wrapper: duration, dirty delta, propagation.
    let start = ustime();
    let dirty_before = server.dirty;
    let db_index = server.clients.get(&fd).map(|c| c.db_index).unwrap_or(0);

    let argv = {
        let Server {
            dbs,
            clients,
            config,
            dirty,
            stats,
            sinks,
            clients_to_close,
            lastsave,
            shutdown_requested,
            now_ms,
            lru_clock,
            ..
        } = server;
        let mut ctx = Ctx {
            dbs,
            db_index,
            clients,
            fd,
            argv,
            cfg: config,
            dirty,
            stats,
            sinks,
            to_close: clients_to_close,
            now_ms: *now_ms,
            lru_clock: *lru_clock,
            lastsave: *lastsave,
            shutdown_requested,
        };
        (cmd.proc)(&mut ctx);
        std::mem::take(&mut ctx.argv)
    };

    let duration = ustime() - start;
    server.command_stats[idx].microseconds += duration;
    server.command_stats[idx].calls += 1;
    server.stats.numcommands += 1;

    if server.dirty > dirty_before && cmd.flags & CMD_WRITE != 0 {
        let parts: Vec<&[u8]> = argv.iter().map(|a| a.as_bytes()).collect();
        server.sinks.propagate(db_index, &parts);
    }

    if server.shutdown_requested {
        el.stop();
    }
}

// CLIENT LIST|KILL|GETNAME|SETNAME.  Lives here because it reaches across
// the whole client table rather than one database.
fn client_command_entry(ctx: &mut Ctx) {
    let sub = String::from_utf8_lossy(ctx.argv[1].as_bytes()).to_ascii_lowercase();
    let argc = ctx.argv.len();
    match sub.as_str() {
        "list" if argc == 2 => {
            let now_s = ctx.now_ms / 1000;
            let mut ids: Vec<_> = ctx.clients.values().map(|c| c.id).collect();
            ids.sort_unstable();
            let mut out = String::new();
            for id in ids {
                if let Some(c) = ctx.clients.values().find(|c| c.id == id) {
                    out.push_str(&c.info_line(now_s));
                    out.push('\n');
                }
            }
            ctx.client().add_reply_bulk(out.as_bytes());
        }
        "kill" if argc == 3 => {
            let addr = String::from_utf8_lossy(ctx.argv[2].as_bytes()).into_owned();
            let self_fd = ctx.fd;
            let mut target: Option<RawFd> = None;
            for (fd, c) in ctx.clients.iter() {
                if c.peer == addr {
                    target = Some(*fd);
                    break;
                }
            }
            match target {
                Some(fd) if fd == self_fd => {
                    let c = ctx.client();
                    c.add_reply(shared::OK);
                    c.close_after_reply = true;
                }
                Some(fd) => {
                    if let Some(victim) = ctx.clients.get_mut(&fd) {
                        victim.close_asap = true;
                    }
                    ctx.to_close.push(fd);
                    ctx.client().add_reply(shared::OK);
                }
                None => ctx
                    .client()
                    .add_reply_error("No such client address in the list"),
            }
        }
        "getname" if argc == 2 => {
            let c = ctx.client();
            match c.name.clone() {
                Some(name) => c.add_reply_bulk(name.as_bytes()),
                None => c.add_reply_nil(),
            }
        }
        "setname" if argc == 3 => {
            let name = ctx.argv[2].clone();
            if name
                .as_bytes()
                .iter()
                .any(|&b| !(0x21..=0x7E).contains(&b))
            {
                ctx.client().add_reply_error(
                    "Client names cannot contain spaces, newlines or special characters.",
                );
                return;
            }
            let c = ctx.client();
            c.name = if name.is_empty() { None } else { Some(name) };
            c.add_reply(shared::OK);
        }
        _ => ctx
            .client()
            .add_reply_error("Syntax error, try CLIENT (LIST | KILL ip:port | GETNAME | SETNAME connection-name)"),
    }
}
