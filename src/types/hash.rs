//! Hash type: list-pack of alternating (field, value) entries promoted to a
//! field→value table when entries grow long or numerous.

use crate::command::Ctx;
use crate::db::{
    check_type, lookup_key_read, lookup_key_write, lookup_write_or_create, signal_modified,
};
use crate::ds::dict::Dict;
use crate::ds::sds::Sds;
use crate::ds::ziplist::{Ziplist, ZlValue};
use crate::obj::object::{HashEnc, ObjType, Robj, Value};
use crate::obj::shared;
use crate::server::Config;

const GET_FIELDS: u8 = 1;
const GET_VALUES: u8 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Primitive layer
// ─────────────────────────────────────────────────────────────────────────────

fn new_hash_object() -> Robj {
    Robj::new(Value::Hash(HashEnc::Ziplist(Ziplist::new())))
}

fn convert_to_ht(o: &mut Robj) {
    let Value::Hash(enc) = &mut o.value else {
        unreachable!("hash conversion on non-hash");
    };
    if let HashEnc::Ziplist(zl) = enc {
        let mut dict: Dict<Sds, Sds> = Dict::new();
        let mut it = zl.values();
        while let (Some(f), Some(v)) = (it.next(), it.next()) {
            dict.replace(Sds::from(f.to_bytes()), Sds::from(v.to_bytes()));
        }
        *enc = HashEnc::Ht(dict);
    }
}

/// Convert ahead of an insert whose field or value breaks the compact
/// limits.
fn try_conversion(o: &mut Robj, cfg: &Config, parts: &[&[u8]]) {
    if !matches!(&o.value, Value::Hash(HashEnc::Ziplist(_))) {
        return;
    }
    if parts.iter().any(|p| p.len() > cfg.hash_max_ziplist_value) {
        convert_to_ht(o);
    }
}

pub fn hash_len(o: &Robj) -> usize {
    match &o.value {
        Value::Hash(HashEnc::Ziplist(zl)) => zl.count() / 2,
        Value::Hash(HashEnc::Ht(d)) => d.len(),
        _ => unreachable!("hash_len on non-hash"),
    }
}

/// Set a field.  Returns `true` when the field is new.
pub fn hash_set(o: &mut Robj, cfg: &Config, field: &[u8], value: &[u8]) -> bool {
    try_conversion(o, cfg, &[field, value]);
    let added = match &mut o.value {
        Value::Hash(HashEnc::Ziplist(zl)) => {
            match zl.head().and_then(|h| zl.find(h, field, 1)) {
                Some(fpos) => {
                    let vpos = zl.next(fpos).expect("dangling hash field");
                    zl.delete_at(vpos);
                    zl.insert_at(vpos, value);
                    false
                }
                None => {
                    zl.push(field, false);
                    zl.push(value, false);
                    true
                }
            }
        }
        Value::Hash(HashEnc::Ht(d)) => d.replace(Sds::from_slice(field), Sds::from_slice(value)),
        _ => unreachable!("hash_set on non-hash"),
    };
    let grew_past_limit = matches!(
        &o.value,
        Value::Hash(HashEnc::Ziplist(zl)) if zl.count() / 2 > cfg.hash_max_ziplist_entries
    );
    if grew_past_limit {
        convert_to_ht(o);
    }
    added
}

pub fn hash_get(o: &Robj, field: &[u8]) -> Option<Vec<u8>> {
    match &o.value {
        Value::Hash(HashEnc::Ziplist(zl)) => {
            let fpos = zl.head().and_then(|h| zl.find(h, field, 1))?;
            let vpos = zl.next(fpos).expect("dangling hash field");
            Some(zl.get(vpos).to_bytes())
        }
        Value::Hash(HashEnc::Ht(d)) => d.get(field).map(|v| v.as_bytes().to_vec()),
        _ => unreachable!("hash_get on non-hash"),
    }
}

pub fn hash_exists(o: &Robj, field: &[u8]) -> bool {
    match &o.value {
        Value::Hash(HashEnc::Ziplist(zl)) => {
            zl.head().and_then(|h| zl.find(h, field, 1)).is_some()
        }
        Value::Hash(HashEnc::Ht(d)) => d.contains(field),
        _ => unreachable!("hash_exists on non-hash"),
    }
}

/// Delete a field; `true` when it was present.
pub fn hash_del(o: &mut Robj, field: &[u8]) -> bool {
    match &mut o.value {
        Value::Hash(HashEnc::Ziplist(zl)) => {
            match zl.head().and_then(|h| zl.find(h, field, 1)) {
                Some(fpos) => {
                    zl.delete_at(fpos);
                    zl.delete_at(fpos);
                    true
                }
                None => false,
            }
        }
        Value::Hash(HashEnc::Ht(d)) => d.remove(field).is_some(),
        _ => unreachable!("hash_del on non-hash"),
    }
}

/// All (field, value) pairs in iteration order.
pub fn hash_pairs(o: &Robj) -> Vec<(Vec<u8>, Vec<u8>)> {
    match &o.value {
        Value::Hash(HashEnc::Ziplist(zl)) => {
            let mut out = Vec::with_capacity(zl.count() / 2);
            let mut it = zl.values();
            while let (Some(f), Some(v)) = (it.next(), it.next()) {
                out.push((pair_bytes(f), pair_bytes(v)));
            }
            out
        }
        Value::Hash(HashEnc::Ht(d)) => d
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect(),
        _ => unreachable!("hash_pairs on non-hash"),
    }
}

fn pair_bytes(v: ZlValue<'_>) -> Vec<u8> {
    v.to_bytes()
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

pub fn hset_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let field = ctx.argv[2].clone();
    let value = ctx.argv[3].clone();
    let (db, c, mut fx) = ctx.split();

    let Some(o) = lookup_write_or_create(db, c, &mut fx, &key, ObjType::Hash, new_hash_object)
    else {
        return;
    };
    let added = hash_set(o, fx.cfg, field.as_bytes(), value.as_bytes());
    signal_modified(&mut fx, key.as_bytes());
    c.add_reply_i64(if added { 1 } else { 0 });
}

pub fn hsetnx_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let field = ctx.argv[2].clone();
    let value = ctx.argv[3].clone();
    let (db, c, mut fx) = ctx.split();

    let Some(o) = lookup_write_or_create(db, c, &mut fx, &key, ObjType::Hash, new_hash_object)
    else {
        return;
    };
    if hash_exists(o, field.as_bytes()) {
        c.add_reply(shared::CZERO);
        return;
    }
    hash_set(o, fx.cfg, field.as_bytes(), value.as_bytes());
    signal_modified(&mut fx, key.as_bytes());
    c.add_reply(shared::CONE);
}

pub fn hmset_command(ctx: &mut Ctx) {
    if ctx.argv.len() % 2 != 0 {
        ctx.client()
            .add_reply_error("wrong number of arguments for HMSET");
        return;
    }
    let key = ctx.argv[1].clone();
    let pairs: Vec<Sds> = ctx.argv[2..].to_vec();
    let (db, c, mut fx) = ctx.split();

    let Some(o) = lookup_write_or_create(db, c, &mut fx, &key, ObjType::Hash, new_hash_object)
    else {
        return;
    };
    for pair in pairs.chunks_exact(2) {
        hash_set(o, fx.cfg, pair[0].as_bytes(), pair[1].as_bytes());
    }
    signal_modified(&mut fx, key.as_bytes());
    c.add_reply(shared::OK);
}

pub fn hget_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let field = ctx.argv[2].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::Hash) {
                return;
            }
            match hash_get(o, field.as_bytes()) {
                Some(v) => c.add_reply_bulk(&v),
                None => c.add_reply_nil(),
            }
        }
        None => c.add_reply_nil(),
    }
}

pub fn hmget_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let fields: Vec<Sds> = ctx.argv[2..].to_vec();
    let (db, c, mut fx) = ctx.split();
    let o = lookup_key_read(db, &mut fx, key.as_bytes());
    if let Some(o) = o {
        if o.obj_type() != ObjType::Hash {
            c.add_reply(shared::WRONGTYPE_ERR);
            return;
        }
    }
    c.add_reply_multibulk_len(fields.len());
    for field in &fields {
        match o.and_then(|o| hash_get(o, field.as_bytes())) {
            Some(v) => c.add_reply_bulk(&v),
            None => c.add_reply_nil(),
        }
    }
}

pub fn hdel_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let fields: Vec<Sds> = ctx.argv[2..].to_vec();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::CZERO);
        return;
    };
    if o.obj_type() != ObjType::Hash {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }
    let mut deleted = 0i64;
    for field in &fields {
        if hash_del(o, field.as_bytes()) {
            deleted += 1;
            if hash_len(o) == 0 {
                break;
            }
        }
    }
    if hash_len(o) == 0 {
        db.delete(key.as_bytes());
    }
    if deleted > 0 {
        signal_modified(&mut fx, key.as_bytes());
    }
    c.add_reply_i64(deleted);
}

pub fn hlen_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::Hash) {
                return;
            }
            let len = hash_len(o) as i64;
            c.add_reply_i64(len);
        }
        None => c.add_reply(shared::CZERO),
    }
}

pub fn hexists_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let field = ctx.argv[2].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::Hash) {
                return;
            }
            let n = if hash_exists(o, field.as_bytes()) { 1 } else { 0 };
            c.add_reply_i64(n);
        }
        None => c.add_reply(shared::CZERO),
    }
}

fn getall_generic(ctx: &mut Ctx, flags: u8) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_read(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::EMPTY_MULTIBULK);
        return;
    };
    if check_type(c, o, ObjType::Hash) {
        return;
    }
    let pairs = hash_pairs(o);
    let per_pair = (flags.count_ones()) as usize;
    c.add_reply_multibulk_len(pairs.len() * per_pair);
    for (f, v) in pairs {
        if flags & GET_FIELDS != 0 {
            c.add_reply_bulk(&f);
        }
        if flags & GET_VALUES != 0 {
            c.add_reply_bulk(&v);
        }
    }
}

pub fn hgetall_command(ctx: &mut Ctx) {
    getall_generic(ctx, GET_FIELDS | GET_VALUES);
}

pub fn hkeys_command(ctx: &mut Ctx) {
    getall_generic(ctx, GET_FIELDS);
}

pub fn hvals_command(ctx: &mut Ctx) {
    getall_generic(ctx, GET_VALUES);
}
