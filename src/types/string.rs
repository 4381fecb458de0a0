//! String type commands.
//!
//! Strings store either a canonical integer, a short immutable byte
//! sequence, or a general mutable buffer; mutation forces the general
//! encoding.  Counter commands operate on the canonical integer form and
//! refuse anything else.

use crate::command::Ctx;
use crate::db::{
    check_type, lookup_key_read, lookup_key_write, lookup_write_or_create, signal_modified,
};
use crate::ds::sds::Sds;
use crate::obj::object::{ObjType, Robj, Value};
use crate::obj::shared;
use crate::util::{d2string, string2d, string2ll};

/// Hard cap on string payloads (matches the bulk protocol limit).
const STRING_MAX_SIZE: usize = 512 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// SET and friends
// ─────────────────────────────────────────────────────────────────────────────

/// Store `argv[val_idx]` under `argv[1]`.  Returns `false` when an NX/XX
/// condition failed (nothing written).
fn set_generic(ctx: &mut Ctx, nx: bool, xx: bool, expire_ms: Option<u64>, val_idx: usize) -> bool {
    let key = ctx.argv[1].clone();
    let val = ctx.argv[val_idx].clone();
    let (db, _c, mut fx) = ctx.split();

    crate::db::expire_if_needed(db, &mut fx, key.as_bytes());
    let exists = db.exists(key.as_bytes());
    if (nx && exists) || (xx && !exists) {
        return false;
    }
    let value = Robj::string_from_sds(val).try_object_encoding();
    db.set_key(key.as_bytes(), value);
    if let Some(ms) = expire_ms {
        db.set_expire(key.as_bytes(), fx.now_ms + ms);
    }
    signal_modified(&mut fx, key.as_bytes());
    true
}

pub fn set_command(ctx: &mut Ctx) {
    let mut nx = false;
    let mut xx = false;
    let mut expire_ms: Option<u64> = None;

    let mut i = 3;
    while i < ctx.argv.len() {
        let opt = ctx.argv[i].as_bytes().to_ascii_uppercase();
        let next = ctx.argv.get(i + 1).cloned();
        match opt.as_slice() {
            b"NX" => {
                nx = true;
                i += 1;
            }
            b"XX" => {
                xx = true;
                i += 1;
            }
            b"EX" | b"PX" => {
                let Some(arg) = next else {
                    ctx.client().add_reply(shared::SYNTAX_ERR);
                    return;
                };
                let Some(v) = string2ll(arg.as_bytes()) else {
                    ctx.client().add_reply(shared::NOT_INTEGER_ERR);
                    return;
                };
                if v <= 0 {
                    ctx.client()
                        .add_reply_error("invalid expire time in 'set' command");
                    return;
                }
                let ms = if opt == b"EX" { v as u64 * 1000 } else { v as u64 };
                expire_ms = Some(ms);
                i += 2;
            }
            _ => {
                ctx.client().add_reply(shared::SYNTAX_ERR);
                return;
            }
        }
    }
    if nx && xx {
        ctx.client().add_reply(shared::SYNTAX_ERR);
        return;
    }

    if set_generic(ctx, nx, xx, expire_ms, 2) {
        ctx.client().add_reply(shared::OK);
    } else {
        ctx.client().add_reply_nil();
    }
}

pub fn setnx_command(ctx: &mut Ctx) {
    if set_generic(ctx, true, false, None, 2) {
        ctx.client().add_reply(shared::CONE);
    } else {
        ctx.client().add_reply(shared::CZERO);
    }
}

fn setex_generic(ctx: &mut Ctx, unit_ms: u64) {
    let Some(ttl) = string2ll(ctx.argv[2].as_bytes()) else {
        ctx.client().add_reply(shared::NOT_INTEGER_ERR);
        return;
    };
    if ttl <= 0 {
        ctx.client()
            .add_reply_error("invalid expire time in 'setex' command");
        return;
    }
    set_generic(ctx, false, false, Some(ttl as u64 * unit_ms), 3);
    ctx.client().add_reply(shared::OK);
}

pub fn setex_command(ctx: &mut Ctx) {
    setex_generic(ctx, 1000);
}

pub fn psetex_command(ctx: &mut Ctx) {
    setex_generic(ctx, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// GET / GETSET / STRLEN
// ─────────────────────────────────────────────────────────────────────────────

pub fn get_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::String) {
                return;
            }
            let bytes = o.string_bytes();
            c.add_reply_bulk(&bytes);
        }
        None => c.add_reply_nil(),
    }
}

pub fn getset_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let val = ctx.argv[2].clone();
    let (db, c, mut fx) = ctx.split();

    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::String) {
                return;
            }
            let old = o.string_bytes().into_owned();
            c.add_reply_bulk(&old);
        }
        None => c.add_reply_nil(),
    }
    db.set_key(key.as_bytes(), Robj::string_from_sds(val).try_object_encoding());
    signal_modified(&mut fx, key.as_bytes());
}

pub fn strlen_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::String) {
                return;
            }
            let len = o.string_len() as i64;
            c.add_reply_i64(len);
        }
        None => c.add_reply(shared::CZERO),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// APPEND
// ─────────────────────────────────────────────────────────────────────────────

pub fn append_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let val = ctx.argv[2].clone();
    let (db, c, mut fx) = ctx.split();

    let Some(o) = lookup_write_or_create(db, c, &mut fx, &key, ObjType::String, || {
        Robj::string_from_sds(Sds::new())
    }) else {
        return;
    };
    if o.string_len() + val.len() > STRING_MAX_SIZE {
        c.add_reply_error("string exceeds maximum allowed size (512MB)");
        return;
    }
    // Mutation forces the general encoding.
    let mut buf = match std::mem::replace(&mut o.value, Value::Int(0)) {
        Value::Raw(s) => s,
        other => {
            let tmp = Robj::new(other);
            Sds::from_slice(&tmp.string_bytes())
        }
    };
    buf.append(val.as_bytes());
    let totlen = buf.len();
    o.value = Value::Raw(buf);
    signal_modified(&mut fx, key.as_bytes());
    c.add_reply_i64(totlen as i64);
}

// ─────────────────────────────────────────────────────────────────────────────
// Counters
// ─────────────────────────────────────────────────────────────────────────────

fn incr_decr(ctx: &mut Ctx, incr: i64) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();

    let current = match lookup_key_write(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if o.obj_type() != ObjType::String {
                c.add_reply(shared::WRONGTYPE_ERR);
                return;
            }
            match o.get_i64() {
                Some(v) => v,
                None => {
                    c.add_reply(shared::NOT_INTEGER_ERR);
                    return;
                }
            }
        }
        None => 0,
    };

    let Some(new) = current.checked_add(incr) else {
        c.add_reply(shared::OVERFLOW_ERR);
        return;
    };
    if db.exists(key.as_bytes()) {
        db.overwrite(key.as_bytes(), Robj::from_i64(new));
    } else {
        db.add(key.dup(), Robj::from_i64(new));
    }
    signal_modified(&mut fx, key.as_bytes());
    c.add_reply_i64(new);
}

pub fn incr_command(ctx: &mut Ctx) {
    incr_decr(ctx, 1);
}

pub fn decr_command(ctx: &mut Ctx) {
    incr_decr(ctx, -1);
}

pub fn incrby_command(ctx: &mut Ctx) {
    let Some(incr) = string2ll(ctx.argv[2].as_bytes()) else {
        ctx.client().add_reply(shared::NOT_INTEGER_ERR);
        return;
    };
    incr_decr(ctx, incr);
}

pub fn decrby_command(ctx: &mut Ctx) {
    let Some(incr) = string2ll(ctx.argv[2].as_bytes()) else {
        ctx.client().add_reply(shared::NOT_INTEGER_ERR);
        return;
    };
    let Some(neg) = incr.checked_neg() else {
        ctx.client().add_reply(shared::OVERFLOW_ERR);
        return;
    };
    incr_decr(ctx, neg);
}

pub fn incrbyfloat_command(ctx: &mut Ctx) {
    let Some(incr) = string2d(ctx.argv[2].as_bytes()) else {
        ctx.client().add_reply(shared::NOT_FLOAT_ERR);
        return;
    };
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();

    let current = match lookup_key_write(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if o.obj_type() != ObjType::String {
                c.add_reply(shared::WRONGTYPE_ERR);
                return;
            }
            match o.get_f64() {
                Some(v) => v,
                None => {
                    c.add_reply(shared::NOT_FLOAT_ERR);
                    return;
                }
            }
        }
        None => 0.0,
    };

    let new = current + incr;
    if new.is_nan() || new.is_infinite() {
        c.add_reply_error("increment would produce NaN or Infinity");
        return;
    }
    let text = d2string(new);
    let value = Robj::string_from_slice(text.as_bytes());
    if db.exists(key.as_bytes()) {
        db.overwrite(key.as_bytes(), value);
    } else {
        db.add(key.dup(), value);
    }
    signal_modified(&mut fx, key.as_bytes());
    c.add_reply_bulk(text.as_bytes());
}
