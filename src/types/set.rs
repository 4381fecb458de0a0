//! Set type: sorted integer array for all-integer members promoted to a
//! members-only table on the first non-integer member or on growth.
//!
//! The multi-set commands (intersection, union, difference) sort their
//! inputs by cardinality so the work is driven by the smallest operand.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::command::Ctx;
use crate::db::{
    check_type, expire_if_needed, lookup_key_read, lookup_key_write, lookup_write_or_create,
    signal_modified,
};
use crate::ds::dict::Dict;
use crate::ds::intset::Intset;
use crate::ds::sds::Sds;
use crate::obj::object::{ObjType, Robj, SetEnc, Value};
use crate::obj::shared;
use crate::server::Config;
use crate::util::string2ll;

/// Ceiling on a single negative-count SRANDMEMBER reply.
const SRANDMEMBER_NEGATIVE_CAP: usize = 1 << 20;

// ─────────────────────────────────────────────────────────────────────────────
// Primitive layer
// ─────────────────────────────────────────────────────────────────────────────

/// Fresh set sized for its first member: integer members start compact.
fn new_set_object(first: &[u8]) -> Robj {
    if string2ll(first).is_some() {
        Robj::new(Value::Set(SetEnc::Intset(Intset::new())))
    } else {
        Robj::new(Value::Set(SetEnc::Ht(Dict::new())))
    }
}

fn convert_to_ht(o: &mut Robj) {
    let Value::Set(enc) = &mut o.value else {
        unreachable!("set conversion on non-set");
    };
    if let SetEnc::Intset(is) = enc {
        let mut dict: Dict<Sds, ()> = Dict::new();
        for v in is.iter() {
            dict.add(Sds::from(v.to_string().as_str()), ());
        }
        *enc = SetEnc::Ht(dict);
    }
}

pub fn set_len(o: &Robj) -> usize {
    match &o.value {
        Value::Set(SetEnc::Intset(is)) => is.len(),
        Value::Set(SetEnc::Ht(d)) => d.len(),
        _ => unreachable!("set_len on non-set"),
    }
}

/// Add a member; `true` when it was new.
pub fn set_add(o: &mut Robj, cfg: &Config, member: &[u8]) -> bool {
    let as_int = string2ll(member);
    // A non-integer member forces the general encoding up front.
    if as_int.is_none() && matches!(&o.value, Value::Set(SetEnc::Intset(_))) {
        convert_to_ht(o);
    }
    let added = match (&mut o.value, as_int) {
        (Value::Set(SetEnc::Intset(is)), Some(v)) => is.add(v),
        (Value::Set(SetEnc::Ht(d)), _) => d.add(Sds::from_slice(member), ()),
        _ => unreachable!("set_add on non-set"),
    };
    let grew_past_limit = matches!(
        &o.value,
        Value::Set(SetEnc::Intset(is)) if is.len() > cfg.set_max_intset_entries
    );
    if grew_past_limit {
        convert_to_ht(o);
    }
    added
}

/// Remove a member; `true` when it was present.
pub fn set_remove(o: &mut Robj, member: &[u8]) -> bool {
    match &mut o.value {
        Value::Set(SetEnc::Intset(is)) => match string2ll(member) {
            Some(v) => is.remove(v),
            None => false,
        },
        Value::Set(SetEnc::Ht(d)) => d.remove(member).is_some(),
        _ => unreachable!("set_remove on non-set"),
    }
}

pub fn set_contains(o: &Robj, member: &[u8]) -> bool {
    match &o.value {
        Value::Set(SetEnc::Intset(is)) => match string2ll(member) {
            Some(v) => is.contains(v),
            None => false,
        },
        Value::Set(SetEnc::Ht(d)) => d.contains(member),
        _ => unreachable!("set_contains on non-set"),
    }
}

/// All members as owned bytes (iterator output order).
pub fn set_members(o: &Robj) -> Vec<Vec<u8>> {
    match &o.value {
        Value::Set(SetEnc::Intset(is)) => {
            is.iter().map(|v| v.to_string().into_bytes()).collect()
        }
        Value::Set(SetEnc::Ht(d)) => d.iter().map(|(k, _)| k.as_bytes().to_vec()).collect(),
        _ => unreachable!("set_members on non-set"),
    }
}

fn set_random_member<R: Rng>(o: &Robj, rng: &mut R) -> Option<Vec<u8>> {
    match &o.value {
        Value::Set(SetEnc::Intset(is)) => is.random(rng).map(|v| v.to_string().into_bytes()),
        Value::Set(SetEnc::Ht(d)) => d
            .random_entry_ref(rng)
            .map(|(k, _)| k.as_bytes().to_vec()),
        _ => unreachable!("set_random_member on non-set"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Single-set commands
// ─────────────────────────────────────────────────────────────────────────────

pub fn sadd_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let members: Vec<Sds> = ctx.argv[2..].to_vec();
    let (db, c, mut fx) = ctx.split();

    let first = members[0].clone();
    let Some(o) = lookup_write_or_create(db, c, &mut fx, &key, ObjType::Set, move || {
        new_set_object(first.as_bytes())
    }) else {
        return;
    };
    let mut added = 0i64;
    for member in &members {
        if set_add(o, fx.cfg, member.as_bytes()) {
            added += 1;
        }
    }
    if added > 0 {
        signal_modified(&mut fx, key.as_bytes());
        *fx.dirty += added as u64 - 1;
    }
    c.add_reply_i64(added);
}

pub fn srem_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let members: Vec<Sds> = ctx.argv[2..].to_vec();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::CZERO);
        return;
    };
    if o.obj_type() != ObjType::Set {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }
    let mut removed = 0i64;
    for member in &members {
        if set_remove(o, member.as_bytes()) {
            removed += 1;
            if set_len(o) == 0 {
                break;
            }
        }
    }
    if set_len(o) == 0 {
        db.delete(key.as_bytes());
    }
    if removed > 0 {
        signal_modified(&mut fx, key.as_bytes());
    }
    c.add_reply_i64(removed);
}

pub fn sismember_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let member = ctx.argv[2].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::Set) {
                return;
            }
            let n = if set_contains(o, member.as_bytes()) { 1 } else { 0 };
            c.add_reply_i64(n);
        }
        None => c.add_reply(shared::CZERO),
    }
}

pub fn scard_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::Set) {
                return;
            }
            let len = set_len(o) as i64;
            c.add_reply_i64(len);
        }
        None => c.add_reply(shared::CZERO),
    }
}

pub fn spop_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply_nil();
        return;
    };
    if o.obj_type() != ObjType::Set {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }
    let mut rng = rand::thread_rng();
    let Some(member) = set_random_member(o, &mut rng) else {
        c.add_reply_nil();
        return;
    };
    set_remove(o, &member);
    let now_empty = set_len(o) == 0;
    if now_empty {
        db.delete(key.as_bytes());
    }
    signal_modified(&mut fx, key.as_bytes());
    c.add_reply_bulk(&member);
}

pub fn srandmember_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let count: Option<i64> = if ctx.argv.len() == 3 {
        match string2ll(ctx.argv[2].as_bytes()) {
            Some(v) => Some(v),
            None => {
                ctx.client().add_reply(shared::NOT_INTEGER_ERR);
                return;
            }
        }
    } else if ctx.argv.len() == 2 {
        None
    } else {
        ctx.client().add_reply(shared::SYNTAX_ERR);
        return;
    };

    let (db, c, mut fx) = ctx.split();
    let nil_shape: &[u8] = if count.is_some() {
        shared::EMPTY_MULTIBULK
    } else {
        shared::NULL_BULK
    };
    let Some(o) = lookup_key_read(db, &mut fx, key.as_bytes()) else {
        c.add_reply(nil_shape);
        return;
    };
    if check_type(c, o, ObjType::Set) {
        return;
    }
    let mut rng = rand::thread_rng();

    match count {
        None => {
            let member = set_random_member(o, &mut rng).expect("sets are never empty");
            c.add_reply_bulk(&member);
        }
        Some(n) if n >= 0 => {
            let mut members = set_members(o);
            let n = (n as usize).min(members.len());
            members.partial_shuffle(&mut rng, n);
            c.add_reply_multibulk_len(n);
            for m in members.iter().take(n) {
                c.add_reply_bulk(m);
            }
        }
        Some(n) => {
            // Negative count: exactly |count| members with repetition,
            // bounded by a fixed per-call ceiling.
            let n = (n.unsigned_abs() as usize).min(SRANDMEMBER_NEGATIVE_CAP);
            c.add_reply_multibulk_len(n);
            for _ in 0..n {
                let member = set_random_member(o, &mut rng).expect("sets are never empty");
                c.add_reply_bulk(&member);
            }
        }
    }
}

pub fn smembers_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_read(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::EMPTY_MULTIBULK);
        return;
    };
    if check_type(c, o, ObjType::Set) {
        return;
    }
    let members = set_members(o);
    c.add_reply_multibulk_len(members.len());
    for m in members {
        c.add_reply_bulk(&m);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Multi-set commands
// ─────────────────────────────────────────────────────────────────────────────

enum SetOp {
    Inter,
    Union,
    Diff,
}

fn multi_set_generic(ctx: &mut Ctx, op: SetOp) {
    let keys: Vec<Sds> = ctx.argv[1..].to_vec();
    let (db, c, mut fx) = ctx.split();

    for key in &keys {
        expire_if_needed(db, &mut fx, key.as_bytes());
    }

    // Immutable pass: missing keys read as empty sets.
    let mut sets: Vec<Option<&Robj>> = Vec::with_capacity(keys.len());
    for key in &keys {
        match db.dict.get(key.as_bytes()) {
            Some(o) => {
                if o.obj_type() != ObjType::Set {
                    c.add_reply(shared::WRONGTYPE_ERR);
                    return;
                }
                o.touch(fx.lru_clock);
                sets.push(Some(o));
            }
            None => sets.push(None),
        }
    }

    match op {
        SetOp::Inter => {
            // Cardinality-sorted: iterate the smallest, probe the rest.
            if sets.iter().any(|s| s.is_none()) {
                c.add_reply(shared::EMPTY_MULTIBULK);
                return;
            }
            let mut ordered: Vec<&Robj> = sets.iter().map(|s| s.unwrap()).collect();
            ordered.sort_by_key(|o| set_len(o));
            let slot = c.add_deferred_multibulk_len();
            let mut count = 0usize;
            for member in set_members(ordered[0]) {
                if ordered[1..].iter().all(|o| set_contains(o, &member)) {
                    c.add_reply_bulk(&member);
                    count += 1;
                }
            }
            c.set_deferred_multibulk_len(slot, count);
        }
        SetOp::Union => {
            let mut acc: Dict<Sds, ()> = Dict::new();
            for o in sets.iter().flatten() {
                for member in set_members(o) {
                    acc.add(Sds::from(member), ());
                }
            }
            c.add_reply_multibulk_len(acc.len());
            for (m, _) in acc.iter() {
                c.add_reply_bulk(m.as_bytes());
            }
        }
        SetOp::Diff => {
            let slot = c.add_deferred_multibulk_len();
            let mut count = 0usize;
            if let Some(first) = sets[0] {
                for member in set_members(first) {
                    let in_other = sets[1..]
                        .iter()
                        .flatten()
                        .any(|o| set_contains(o, &member));
                    if !in_other {
                        c.add_reply_bulk(&member);
                        count += 1;
                    }
                }
            }
            c.set_deferred_multibulk_len(slot, count);
        }
    }
}

pub fn sinter_command(ctx: &mut Ctx) {
    multi_set_generic(ctx, SetOp::Inter);
}

pub fn sunion_command(ctx: &mut Ctx) {
    multi_set_generic(ctx, SetOp::Union);
}

pub fn sdiff_command(ctx: &mut Ctx) {
    multi_set_generic(ctx, SetOp::Diff);
}
