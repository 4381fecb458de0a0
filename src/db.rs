//! Database layer: the key space, the expire set, lazy expiration, and the
//! generic key commands.
//!
//! A [`Db`] owns two dictionaries — key → value and key → absolute
//! expiration in milliseconds — plus the eviction sampling buffer.  Every
//! key in the expire set also exists in the key space; deletion always
//! clears both.
//!
//! The helper functions here (`lookup_key_read`, `lookup_key_write`,
//! `expire_if_needed`, …) bundle the side effects every access path owes:
//! the lazy-expiration check with synthetic `DEL` propagation, hit/miss
//! accounting, and the access-clock touch.


use crate::command::{Ctx, Fx};
use crate::ds::dict::Dict;
use crate::ds::sds::Sds;
use crate::evict::EvictionPoolEntry;
use crate::net::client::Client;
use crate::obj::object::{ObjType, Robj};
use crate::obj::shared;
use crate::util::{string2ll, stringmatchlen};

/// Fixed per-key bookkeeping cost charged to the coarse memory accounting.
const PER_KEY_OVERHEAD: usize = 64;

/// One logical database.
pub struct Db {
    pub id: usize,
    /// Key space.
    pub dict: Dict<Sds, Robj>,
    /// Key → absolute expiration time, milliseconds.
    pub expires: Dict<Sds, u64>,
    /// Eviction candidates carried across sampling rounds, ascending idle.
    pub eviction_pool: Vec<EvictionPoolEntry>,
    /// Coarse payload accounting for the memory cap.
    pub logical_bytes: u64,
}

impl Db {
    pub fn new(id: usize) -> Self {
        Db {
            id,
            dict: Dict::new(),
            expires: Dict::new(),
            eviction_pool: Vec::with_capacity(crate::evict::EVICTION_POOL_SIZE),
            logical_bytes: 0,
        }
    }

    // ── Raw value plumbing ─────────────────────────────────────────────────

    /// Install a value under a key that must not exist yet.
    pub fn add(&mut self, key: Sds, val: Robj) {
        self.logical_bytes += (key.len() + PER_KEY_OVERHEAD + val.mem_usage()) as u64;
        let added = self.dict.add(key, val);
        debug_assert!(added, "add() on an existing key");
    }

    /// Replace the value of a key that must already exist.
    pub fn overwrite(&mut self, key: &[u8], val: Robj) {
        let slot = self.dict.get_mut(key).expect("overwrite() on missing key");
        let old = std::mem::replace(slot, val);
        self.logical_bytes = self
            .logical_bytes
            .saturating_sub(old.mem_usage() as u64)
            .saturating_add(slot.mem_usage() as u64);
    }

    /// Add-or-overwrite with `SET` semantics: any previous expiration is
    /// discarded.
    pub fn set_key(&mut self, key: &[u8], val: Robj) {
        if self.dict.contains(key) {
            self.overwrite(key, val);
        } else {
            self.add(Sds::from_slice(key), val);
        }
        self.remove_expire(key);
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.dict.contains(key)
    }

    /// Remove a key from key space and expire set; `true` when it existed.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        if !self.expires.is_empty() {
            let _ = self.expires.remove(key);
        }
        match self.dict.remove(key) {
            Some((k, v)) => {
                self.logical_bytes = self
                    .logical_bytes
                    .saturating_sub((k.len() + PER_KEY_OVERHEAD + v.mem_usage()) as u64);
                true
            }
            None => false,
        }
    }

    /// Drop every key.  Returns the number removed.
    pub fn empty(&mut self) -> usize {
        let removed = self.dict.len();
        self.dict.clear();
        self.expires.clear();
        self.eviction_pool.clear();
        self.logical_bytes = 0;
        removed
    }

    // ── Expire set ─────────────────────────────────────────────────────────

    pub fn get_expire(&self, key: &[u8]) -> Option<u64> {
        if self.expires.is_empty() {
            return None;
        }
        self.expires.get(key).copied()
    }

    /// Record an absolute expiration for an existing key.
    pub fn set_expire(&mut self, key: &[u8], when_ms: u64) {
        debug_assert!(self.dict.contains(key), "expire on missing key");
        self.expires.replace(Sds::from_slice(key), when_ms);
    }

    /// Drop a key's expiration; `true` when one was set.
    pub fn remove_expire(&mut self, key: &[u8]) -> bool {
        self.expires.remove(key).is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Access helpers with side effects
// ─────────────────────────────────────────────────────────────────────────────

/// Delete `key` if its recorded expiration is in the past.  Propagates the
/// deletion as a synthetic `DEL` so external consumers converge.
pub fn expire_if_needed(db: &mut Db, fx: &mut Fx, key: &[u8]) -> bool {
    let when = match db.get_expire(key) {
        Some(w) => w,
        None => return false,
    };
    if fx.now_ms < when {
        return false;
    }
    db.delete(key);
    fx.stats.expired_keys += 1;
    fx.sinks.propagate(fx.dbid, &[b"DEL", key]);
    fx.sinks.notify_change(fx.dbid, key);
    true
}

/// Read-path lookup: lazy expire, hit/miss accounting, access-clock touch.
pub fn lookup_key_read<'d>(db: &'d mut Db, fx: &mut Fx, key: &[u8]) -> Option<&'d Robj> {
    expire_if_needed(db, fx, key);
    match db.dict.get(key) {
        Some(o) => {
            o.touch(fx.lru_clock);
            fx.stats.keyspace_hits += 1;
            Some(o)
        }
        None => {
            fx.stats.keyspace_misses += 1;
            None
        }
    }
}

/// Write-path lookup: lazy expire, access-clock touch, no hit accounting.
pub fn lookup_key_write<'d>(db: &'d mut Db, fx: &mut Fx, key: &[u8]) -> Option<&'d mut Robj> {
    expire_if_needed(db, fx, key);
    match db.dict.get_mut(key) {
        Some(o) => {
            o.touch(fx.lru_clock);
            Some(o)
        }
        None => None,
    }
}

/// Write-path lookup that creates a fresh value when the key is absent.
/// Replies `WRONGTYPE` and yields `None` when an existing value has a
/// different type.
pub fn lookup_write_or_create<'d>(
    db: &'d mut Db,
    c: &mut Client,
    fx: &mut Fx,
    key: &Sds,
    wanted: ObjType,
    make: impl FnOnce() -> Robj,
) -> Option<&'d mut Robj> {
    expire_if_needed(db, fx, key.as_bytes());
    let wrong = matches!(db.dict.get(key.as_bytes()), Some(o) if o.obj_type() != wanted);
    if wrong {
        c.add_reply(shared::WRONGTYPE_ERR);
        return None;
    }
    if !db.dict.contains(key.as_bytes()) {
        db.add(key.dup(), make());
    }
    let o = db.dict.get_mut(key.as_bytes()).expect("just ensured");
    o.touch(fx.lru_clock);
    Some(o)
}

/// Reply `WRONGTYPE` and return `true` unless the object has the wanted
/// type.
pub fn check_type(c: &mut Client, o: &Robj, wanted: ObjType) -> bool {
    if o.obj_type() != wanted {
        c.add_reply(shared::WRONGTYPE_ERR);
        return true;
    }
    false
}

/// Bump the dirty counter and tell the watched-key machinery.
pub fn signal_modified(fx: &mut Fx, key: &[u8]) {
    *fx.dirty += 1;
    fx.sinks.notify_change(fx.dbid, key);
}

// ─────────────────────────────────────────────────────────────────────────────
// Key commands
// ─────────────────────────────────────────────────────────────────────────────

pub fn del_command(ctx: &mut Ctx) {
    let keys: Vec<Sds> = ctx.argv[1..].to_vec();
    let (db, c, mut fx) = ctx.split();
    let mut deleted = 0i64;
    for key in &keys {
        expire_if_needed(db, &mut fx, key.as_bytes());
        if db.delete(key.as_bytes()) {
            signal_modified(&mut fx, key.as_bytes());
            deleted += 1;
        }
    }
    c.add_reply_i64(deleted);
}

pub fn exists_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    expire_if_needed(db, &mut fx, key.as_bytes());
    let n = if db.exists(key.as_bytes()) { 1 } else { 0 };
    c.add_reply_i64(n);
}

pub fn select_command(ctx: &mut Ctx) {
    let idx = match string2ll(ctx.argv[1].as_bytes()) {
        Some(v) if v >= 0 && (v as usize) < ctx.dbs.len() => v as usize,
        Some(_) => {
            ctx.client().add_reply_error("invalid DB index");
            return;
        }
        None => {
            ctx.client().add_reply_error("invalid DB index");
            return;
        }
    };
    let c = ctx.client();
    c.db_index = idx;
    c.add_reply(shared::OK);
}

pub fn randomkey_command(ctx: &mut Ctx) {
    let (db, c, mut fx) = ctx.split();
    let mut rng = rand::thread_rng();
    loop {
        let key = match db.dict.random_entry(&mut rng) {
            Some((k, _)) => k.dup(),
            None => {
                c.add_reply_nil();
                return;
            }
        };
        // Sampling an expired key deletes it and tries again; each round
        // shrinks the key space, so this terminates.
        if expire_if_needed(db, &mut fx, key.as_bytes()) {
            continue;
        }
        c.add_reply_bulk(key.as_bytes());
        return;
    }
}

pub fn keys_command(ctx: &mut Ctx) {
    let pattern = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    let allkeys = pattern.as_bytes() == b"*";

    let mut matched: Vec<Sds> = Vec::new();
    for (key, _) in db.dict.iter() {
        if allkeys || stringmatchlen(pattern.as_bytes(), key.as_bytes(), false) {
            matched.push(key.dup());
        }
    }
    let slot = c.add_deferred_multibulk_len();
    let mut count = 0usize;
    for key in matched {
        if expire_if_needed(db, &mut fx, key.as_bytes()) {
            continue;
        }
        c.add_reply_bulk(key.as_bytes());
        count += 1;
    }
    c.set_deferred_multibulk_len(slot, count);
}

pub fn scan_command(ctx: &mut Ctx) {
    let cursor: u64 = match std::str::from_utf8(ctx.argv[1].as_bytes())
        .ok()
        .and_then(|s| s.parse().ok())
    {
        Some(v) => v,
        None => {
            ctx.client().add_reply_error("invalid cursor");
            return;
        }
    };

    let mut pattern: Option<Vec<u8>> = None;
    let mut count: usize = 10;
    let mut i = 2;
    while i < ctx.argv.len() {
        let opt = ctx.argv[i].as_bytes().to_ascii_lowercase();
        match opt.as_slice() {
            b"match" if i + 1 < ctx.argv.len() => {
                pattern = Some(ctx.argv[i + 1].as_bytes().to_vec());
                i += 2;
            }
            b"count" if i + 1 < ctx.argv.len() => {
                match string2ll(ctx.argv[i + 1].as_bytes()) {
                    Some(v) if v >= 1 => count = v as usize,
                    _ => {
                        ctx.client().add_reply(shared::SYNTAX_ERR);
                        return;
                    }
                }
                i += 2;
            }
            _ => {
                ctx.client().add_reply(shared::SYNTAX_ERR);
                return;
            }
        }
    }

    let (db, c, fx) = ctx.split();
    let mut keys: Vec<Sds> = Vec::new();
    let mut cursor = cursor;
    let mut iterations = count * 10;
    loop {
        cursor = db.dict.scan(cursor, |k, _| {
            keys.push(k.dup());
        });
        iterations -= 1;
        if cursor == 0 || iterations == 0 || keys.len() >= count {
            break;
        }
    }

    c.add_reply_multibulk_len(2);
    c.add_reply_bulk(cursor.to_string().as_bytes());
    let slot = c.add_deferred_multibulk_len();
    let mut emitted = 0usize;
    for key in keys {
        if let Some(p) = &pattern {
            if !stringmatchlen(p, key.as_bytes(), false) {
                continue;
            }
        }
        // Skip (without deleting) keys that are already logically gone.
        if let Some(when) = db.get_expire(key.as_bytes()) {
            if when <= fx.now_ms {
                continue;
            }
        }
        c.add_reply_bulk(key.as_bytes());
        emitted += 1;
    }
    c.set_deferred_multibulk_len(slot, emitted);
}

pub fn dbsize_command(ctx: &mut Ctx) {
    let (db, c, _fx) = ctx.split();
    let n = db.dict.len() as i64;
    c.add_reply_i64(n);
}

pub fn lastsave_command(ctx: &mut Ctx) {
    let lastsave = ctx.lastsave as i64;
    ctx.client().add_reply_i64(lastsave);
}

pub fn type_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    let name = match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => o.obj_type().name(),
        None => "none",
    };
    c.add_reply_status(name);
}

pub fn shutdown_command(ctx: &mut Ctx) {
    if ctx.argv.len() > 2 {
        ctx.client().add_reply(shared::SYNTAX_ERR);
        return;
    }
    if ctx.argv.len() == 2 {
        let opt = ctx.argv[1].as_bytes().to_ascii_lowercase();
        if opt != b"nosave" && opt != b"save" {
            ctx.client().add_reply(shared::SYNTAX_ERR);
            return;
        }
    }
    // No reply: the connection is torn down by process exit.
    *ctx.shutdown_requested = true;
}

pub fn move_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let dst = match string2ll(ctx.argv[2].as_bytes()) {
        Some(v) if v >= 0 && (v as usize) < ctx.dbs.len() => v as usize,
        _ => {
            ctx.client().add_reply_error("index out of range");
            return;
        }
    };
    if dst == ctx.db_index {
        ctx.client()
            .add_reply_error("source and destination objects are the same");
        return;
    }

    {
        let (db, _c, mut fx) = ctx.split();
        expire_if_needed(db, &mut fx, key.as_bytes());
    }
    {
        // The destination is a write-path lookup too: a logically-expired
        // copy there must not block the move.
        let mut fx = Fx {
            dirty: &mut *ctx.dirty,
            stats: &mut *ctx.stats,
            sinks: &mut *ctx.sinks,
            cfg: ctx.cfg,
            now_ms: ctx.now_ms,
            lru_clock: ctx.lru_clock,
            dbid: dst,
        };
        expire_if_needed(&mut ctx.dbs[dst], &mut fx, key.as_bytes());
    }
    let src_index = ctx.db_index;
    if !ctx.dbs[src_index].exists(key.as_bytes()) {
        ctx.client().add_reply(shared::CZERO);
        return;
    }
    if ctx.dbs[dst].exists(key.as_bytes()) {
        ctx.client().add_reply(shared::CZERO);
        return;
    }
    let (k, v) = ctx.dbs[src_index].dict.remove(key.as_bytes()).unwrap();
    let _ = ctx.dbs[src_index].expires.remove(key.as_bytes());
    let usage = (k.len() + PER_KEY_OVERHEAD + v.mem_usage()) as u64;
    ctx.dbs[src_index].logical_bytes = ctx.dbs[src_index].logical_bytes.saturating_sub(usage);
    ctx.dbs[dst].add(k, v);
    *ctx.dirty += 1;
    ctx.client().add_reply(shared::CONE);
}

fn rename_generic(ctx: &mut Ctx, nx: bool) {
    let src = ctx.argv[1].clone();
    let dst = ctx.argv[2].clone();
    if src == dst {
        ctx.client()
            .add_reply_error("source and destination objects are the same");
        return;
    }
    {
        let (db, _c, mut fx) = ctx.split();
        expire_if_needed(db, &mut fx, src.as_bytes());
        expire_if_needed(db, &mut fx, dst.as_bytes());
    }
    let (db, c, mut fx) = ctx.split();
    if !db.exists(src.as_bytes()) {
        c.add_reply(shared::NOKEY_ERR);
        return;
    }
    if nx && db.exists(dst.as_bytes()) {
        c.add_reply(shared::CZERO);
        return;
    }
    let expire = db.get_expire(src.as_bytes());
    let (_, v) = db.dict.remove(src.as_bytes()).unwrap();
    let _ = db.expires.remove(src.as_bytes());
    db.delete(dst.as_bytes());
    db.set_key(dst.as_bytes(), v);
    if let Some(when) = expire {
        db.set_expire(dst.as_bytes(), when);
    }
    signal_modified(&mut fx, src.as_bytes());
    signal_modified(&mut fx, dst.as_bytes());
    if nx {
        c.add_reply(shared::CONE);
    } else {
        c.add_reply(shared::OK);
    }
}

pub fn rename_command(ctx: &mut Ctx) {
    rename_generic(ctx, false);
}

pub fn renamenx_command(ctx: &mut Ctx) {
    rename_generic(ctx, true);
}

// ── Expiration commands ───────────────────────────────────────────────────────

/// Shared body of EXPIRE / PEXPIRE / EXPIREAT / PEXPIREAT.  `basetime_ms`
/// is 0 for the AT variants and now for the relative ones; `unit_ms`
/// scales the argument.
fn expire_generic(ctx: &mut Ctx, basetime_ms: u64, unit_ms: u64) {
    let key = ctx.argv[1].clone();
    let ttl = match string2ll(ctx.argv[2].as_bytes()) {
        Some(v) => v,
        None => {
            ctx.client().add_reply(shared::NOT_INTEGER_ERR);
            return;
        }
    };
    let (db, c, mut fx) = ctx.split();
    expire_if_needed(db, &mut fx, key.as_bytes());
    if !db.exists(key.as_bytes()) {
        c.add_reply(shared::CZERO);
        return;
    }
    let when = basetime_ms as i64 + ttl.saturating_mul(unit_ms as i64);
    if when <= fx.now_ms as i64 {
        // Already in the past: delete now and tell the sinks it is a DEL.
        db.delete(key.as_bytes());
        fx.sinks.propagate(fx.dbid, &[b"DEL", key.as_bytes()]);
        signal_modified(&mut fx, key.as_bytes());
        c.add_reply(shared::CONE);
        return;
    }
    db.set_expire(key.as_bytes(), when as u64);
    signal_modified(&mut fx, key.as_bytes());
    c.add_reply(shared::CONE);
}

pub fn expire_command(ctx: &mut Ctx) {
    let now = ctx.now_ms;
    expire_generic(ctx, now, 1000);
}

pub fn expireat_command(ctx: &mut Ctx) {
    expire_generic(ctx, 0, 1000);
}

pub fn pexpire_command(ctx: &mut Ctx) {
    let now = ctx.now_ms;
    expire_generic(ctx, now, 1);
}

pub fn pexpireat_command(ctx: &mut Ctx) {
    expire_generic(ctx, 0, 1);
}

fn ttl_generic(ctx: &mut Ctx, output_ms: bool) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    expire_if_needed(db, &mut fx, key.as_bytes());
    if !db.exists(key.as_bytes()) {
        c.add_reply_i64(-2);
        return;
    }
    match db.get_expire(key.as_bytes()) {
        Some(when) => {
            let ttl = when.saturating_sub(fx.now_ms);
            if output_ms {
                c.add_reply_i64(ttl as i64);
            } else {
                c.add_reply_i64(((ttl + 500) / 1000) as i64);
            }
        }
        None => c.add_reply_i64(-1),
    }
}

pub fn ttl_command(ctx: &mut Ctx) {
    ttl_generic(ctx, false);
}

pub fn pttl_command(ctx: &mut Ctx) {
    ttl_generic(ctx, true);
}

pub fn persist_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    expire_if_needed(db, &mut fx, key.as_bytes());
    if !db.exists(key.as_bytes()) {
        c.add_reply(shared::CZERO);
        return;
    }
    if db.remove_expire(key.as_bytes()) {
        signal_modified(&mut fx, key.as_bytes());
        c.add_reply(shared::CONE);
    } else {
        c.add_reply(shared::CZERO);
    }
}

// ── Whole-database commands ───────────────────────────────────────────────────

pub fn flushdb_command(ctx: &mut Ctx) {
    let (db, c, mut fx) = ctx.split();
    let removed = db.empty();
    *fx.dirty += removed as u64;
    c.add_reply(shared::OK);
}

pub fn flushall_command(ctx: &mut Ctx) {
    let mut removed = 0usize;
    for db in ctx.dbs.iter_mut() {
        removed += db.empty();
    }
    *ctx.dirty += removed as u64;
    ctx.client().add_reply(shared::OK);
}

pub fn ping_command(ctx: &mut Ctx) {
    ctx.client().add_reply(shared::PONG);
}

pub fn echo_command(ctx: &mut Ctx) {
    let msg = ctx.argv[1].clone();
    ctx.client().add_reply_bulk(msg.as_bytes());
}
