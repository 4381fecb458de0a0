//! List type: compact list-pack encoding promoted to a general double-ended
//! sequence of string objects when elements grow long or numerous.

use std::collections::VecDeque;

use crate::command::Ctx;
use crate::db::{
    check_type, expire_if_needed, lookup_key_read, lookup_key_write, lookup_write_or_create,
    signal_modified,
};
use crate::obj::object::{ListEnc, ObjType, Robj, Value};
use crate::obj::shared;
use crate::server::Config;
use crate::ds::ziplist::{Ziplist, ZlValue};
use crate::ds::sds::Sds;
use crate::util::string2ll;

// ─────────────────────────────────────────────────────────────────────────────
// Primitive layer
// ─────────────────────────────────────────────────────────────────────────────

fn new_list_object() -> Robj {
    Robj::new(Value::List(ListEnc::Ziplist(Ziplist::new())))
}

fn element_from_bytes(b: &[u8]) -> Robj {
    Robj::string_from_slice(b).try_object_encoding()
}

fn robj_eq_bytes(o: &Robj, b: &[u8]) -> bool {
    match o.get_i64() {
        Some(v) => string2ll(b) == Some(v),
        None => &*o.string_bytes() == b,
    }
}

/// Promote the compact encoding to the general one.
fn convert_to_linked(o: &mut Robj) {
    let Value::List(enc) = &mut o.value else {
        unreachable!("list conversion on non-list");
    };
    if let ListEnc::Ziplist(zl) = enc {
        let mut out: VecDeque<Robj> = VecDeque::with_capacity(zl.count());
        for v in zl.values() {
            out.push_back(match v {
                ZlValue::Str(s) => Robj::string_from_slice(s),
                ZlValue::Int(i) => Robj::from_i64(i),
            });
        }
        *enc = ListEnc::Linked(out);
    }
}

/// Number of elements.
pub fn list_len(o: &Robj) -> usize {
    match &o.value {
        Value::List(ListEnc::Ziplist(zl)) => zl.count(),
        Value::List(ListEnc::Linked(l)) => l.len(),
        _ => unreachable!("list_len on non-list"),
    }
}

/// Push one element; converts the encoding first when the element breaks
/// the compact limits, and after when the count does.
pub fn list_push(o: &mut Robj, value: &[u8], head: bool, cfg: &Config) {
    if matches!(&o.value, Value::List(ListEnc::Ziplist(_)))
        && value.len() > cfg.list_max_ziplist_value
    {
        convert_to_linked(o);
    }
    match &mut o.value {
        Value::List(ListEnc::Ziplist(zl)) => {
            zl.push(value, head);
        }
        Value::List(ListEnc::Linked(l)) => {
            if head {
                l.push_front(element_from_bytes(value));
            } else {
                l.push_back(element_from_bytes(value));
            }
        }
        _ => unreachable!("list_push on non-list"),
    }
    let grew_past_limit = matches!(
        &o.value,
        Value::List(ListEnc::Ziplist(zl)) if zl.count() > cfg.list_max_ziplist_entries
    );
    if grew_past_limit {
        convert_to_linked(o);
    }
}

/// Pop one element from an end.
pub fn list_pop(o: &mut Robj, head: bool) -> Option<Vec<u8>> {
    match &mut o.value {
        Value::List(ListEnc::Ziplist(zl)) => {
            let pos = if head { zl.head() } else { zl.tail() }?;
            let out = zl.get(pos).to_bytes();
            zl.delete_at(pos);
            Some(out)
        }
        Value::List(ListEnc::Linked(l)) => {
            let e = if head { l.pop_front() } else { l.pop_back() }?;
            Some(e.string_bytes().into_owned())
        }
        _ => unreachable!("list_pop on non-list"),
    }
}

/// Element bytes at signed index.
pub fn list_index(o: &Robj, index: i64) -> Option<Vec<u8>> {
    match &o.value {
        Value::List(ListEnc::Ziplist(zl)) => {
            let pos = zl.index(index as isize)?;
            Some(zl.get(pos).to_bytes())
        }
        Value::List(ListEnc::Linked(l)) => {
            let len = l.len() as i64;
            let idx = if index < 0 { len + index } else { index };
            if idx < 0 || idx >= len {
                return None;
            }
            Some(l[idx as usize].string_bytes().into_owned())
        }
        _ => unreachable!("list_index on non-list"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Push / pop commands
// ─────────────────────────────────────────────────────────────────────────────

fn push_generic(ctx: &mut Ctx, head: bool, require_existing: bool) {
    let key = ctx.argv[1].clone();
    let values: Vec<Sds> = ctx.argv[2..].to_vec();
    let (db, c, mut fx) = ctx.split();

    if require_existing {
        expire_if_needed(db, &mut fx, key.as_bytes());
        if !db.exists(key.as_bytes()) {
            c.add_reply(shared::CZERO);
            return;
        }
    }
    let Some(o) = lookup_write_or_create(db, c, &mut fx, &key, ObjType::List, new_list_object)
    else {
        return;
    };
    for value in &values {
        list_push(o, value.as_bytes(), head, fx.cfg);
    }
    let len = list_len(o) as i64;
    *fx.dirty += values.len() as u64;
    fx.sinks.notify_change(fx.dbid, key.as_bytes());
    c.add_reply_i64(len);
}

pub fn lpush_command(ctx: &mut Ctx) {
    push_generic(ctx, true, false);
}

pub fn rpush_command(ctx: &mut Ctx) {
    push_generic(ctx, false, false);
}

pub fn lpushx_command(ctx: &mut Ctx) {
    push_generic(ctx, true, true);
}

pub fn rpushx_command(ctx: &mut Ctx) {
    push_generic(ctx, false, true);
}

fn pop_generic(ctx: &mut Ctx, head: bool) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply_nil();
        return;
    };
    if o.obj_type() != ObjType::List {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }
    match list_pop(o, head) {
        Some(bytes) => {
            let now_empty = list_len(o) == 0;
            c.add_reply_bulk(&bytes);
            if now_empty {
                db.delete(key.as_bytes());
            }
            signal_modified(&mut fx, key.as_bytes());
        }
        None => c.add_reply_nil(),
    }
}

pub fn lpop_command(ctx: &mut Ctx) {
    pop_generic(ctx, true);
}

pub fn rpop_command(ctx: &mut Ctx) {
    pop_generic(ctx, false);
}

// ─────────────────────────────────────────────────────────────────────────────
// Introspection commands
// ─────────────────────────────────────────────────────────────────────────────

pub fn llen_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::List) {
                return;
            }
            let len = list_len(o) as i64;
            c.add_reply_i64(len);
        }
        None => c.add_reply(shared::CZERO),
    }
}

pub fn lindex_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let Some(index) = string2ll(ctx.argv[2].as_bytes()) else {
        ctx.client().add_reply(shared::NOT_INTEGER_ERR);
        return;
    };
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::List) {
                return;
            }
            match list_index(o, index) {
                Some(bytes) => c.add_reply_bulk(&bytes),
                None => c.add_reply_nil(),
            }
        }
        None => c.add_reply_nil(),
    }
}

pub fn lrange_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (Some(mut start), Some(mut end)) = (
        string2ll(ctx.argv[2].as_bytes()),
        string2ll(ctx.argv[3].as_bytes()),
    ) else {
        ctx.client().add_reply(shared::NOT_INTEGER_ERR);
        return;
    };
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_read(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::EMPTY_MULTIBULK);
        return;
    };
    if check_type(c, o, ObjType::List) {
        return;
    }
    let llen = list_len(o) as i64;
    if start < 0 {
        start = (llen + start).max(0);
    }
    if end < 0 {
        end = llen + end;
    }
    if start > end || start >= llen {
        c.add_reply(shared::EMPTY_MULTIBULK);
        return;
    }
    if end >= llen {
        end = llen - 1;
    }
    let rangelen = (end - start + 1) as usize;
    c.add_reply_multibulk_len(rangelen);
    for i in start..=end {
        let bytes = list_index(o, i).expect("range precomputed");
        c.add_reply_bulk(&bytes);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mutating commands
// ─────────────────────────────────────────────────────────────────────────────

pub fn lset_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let value = ctx.argv[3].clone();
    let Some(index) = string2ll(ctx.argv[2].as_bytes()) else {
        ctx.client().add_reply(shared::NOT_INTEGER_ERR);
        return;
    };
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::NOKEY_ERR);
        return;
    };
    if o.obj_type() != ObjType::List {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }
    if matches!(&o.value, Value::List(ListEnc::Ziplist(_)))
        && value.len() > fx.cfg.list_max_ziplist_value
    {
        convert_to_linked(o);
    }
    let ok = match &mut o.value {
        Value::List(ListEnc::Ziplist(zl)) => match zl.index(index as isize) {
            Some(pos) => {
                zl.delete_at(pos);
                zl.insert_at(pos, value.as_bytes());
                true
            }
            None => false,
        },
        Value::List(ListEnc::Linked(l)) => {
            let len = l.len() as i64;
            let idx = if index < 0 { len + index } else { index };
            if idx < 0 || idx >= len {
                false
            } else {
                l[idx as usize] = element_from_bytes(value.as_bytes());
                true
            }
        }
        _ => unreachable!(),
    };
    if ok {
        signal_modified(&mut fx, key.as_bytes());
        c.add_reply(shared::OK);
    } else {
        c.add_reply(shared::OUT_OF_RANGE_ERR);
    }
}

pub fn linsert_command(ctx: &mut Ctx) {
    let where_arg = ctx.argv[2].as_bytes().to_ascii_lowercase();
    let before = match where_arg.as_slice() {
        b"before" => true,
        b"after" => false,
        _ => {
            ctx.client().add_reply(shared::SYNTAX_ERR);
            return;
        }
    };
    let key = ctx.argv[1].clone();
    let pivot = ctx.argv[3].clone();
    let value = ctx.argv[4].clone();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::CZERO);
        return;
    };
    if o.obj_type() != ObjType::List {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }
    if matches!(&o.value, Value::List(ListEnc::Ziplist(_)))
        && (value.len() > fx.cfg.list_max_ziplist_value
            || pivot.len() > fx.cfg.list_max_ziplist_value)
    {
        convert_to_linked(o);
    }

    let inserted = match &mut o.value {
        Value::List(ListEnc::Ziplist(zl)) => match zl
            .head()
            .and_then(|h| zl.find(h, pivot.as_bytes(), 0))
        {
            Some(pos) => {
                if before {
                    zl.insert_at(pos, value.as_bytes());
                } else {
                    match zl.next(pos) {
                        Some(next) => zl.insert_at(next, value.as_bytes()),
                        None => zl.push(value.as_bytes(), false),
                    }
                }
                true
            }
            None => false,
        },
        Value::List(ListEnc::Linked(l)) => {
            match l.iter().position(|e| robj_eq_bytes(e, pivot.as_bytes())) {
                Some(idx) => {
                    let at = if before { idx } else { idx + 1 };
                    l.insert(at, element_from_bytes(value.as_bytes()));
                    true
                }
                None => false,
            }
        }
        _ => unreachable!(),
    };

    if inserted {
        let grew_past_limit = matches!(
            &o.value,
            Value::List(ListEnc::Ziplist(zl)) if zl.count() > fx.cfg.list_max_ziplist_entries
        );
        if grew_past_limit {
            convert_to_linked(o);
        }
        let len = list_len(o) as i64;
        signal_modified(&mut fx, key.as_bytes());
        c.add_reply_i64(len);
    } else {
        c.add_reply_i64(-1);
    }
}

pub fn lrem_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let Some(count) = string2ll(ctx.argv[2].as_bytes()) else {
        ctx.client().add_reply(shared::NOT_INTEGER_ERR);
        return;
    };
    let target = ctx.argv[3].clone();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::CZERO);
        return;
    };
    if o.obj_type() != ObjType::List {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }

    let from_tail = count < 0;
    let limit = count.unsigned_abs() as usize;
    let mut removed = 0usize;

    match &mut o.value {
        Value::List(ListEnc::Ziplist(zl)) => {
            if from_tail {
                let mut pos = zl.tail();
                while let Some(p) = pos {
                    let prev = zl.prev(p);
                    if zl.compare(p, target.as_bytes()) {
                        zl.delete_at(p);
                        removed += 1;
                        if removed == limit {
                            break;
                        }
                    }
                    pos = prev;
                }
            } else {
                let mut pos = zl.head();
                while let Some(p) = pos {
                    if zl.compare(p, target.as_bytes()) {
                        zl.delete_at(p);
                        removed += 1;
                        if limit != 0 && removed == limit {
                            break;
                        }
                        pos = if zl.is_entry(p) { Some(p) } else { None };
                    } else {
                        pos = zl.next(p);
                    }
                }
            }
        }
        Value::List(ListEnc::Linked(l)) => {
            if from_tail {
                let mut i = l.len();
                while i > 0 {
                    i -= 1;
                    if robj_eq_bytes(&l[i], target.as_bytes()) {
                        let _ = l.remove(i);
                        removed += 1;
                        if removed == limit {
                            break;
                        }
                    }
                }
            } else {
                let mut i = 0;
                while i < l.len() {
                    if robj_eq_bytes(&l[i], target.as_bytes()) {
                        let _ = l.remove(i);
                        removed += 1;
                        if limit != 0 && removed == limit {
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
            }
        }
        _ => unreachable!(),
    }

    if list_len(o) == 0 {
        db.delete(key.as_bytes());
    }
    if removed > 0 {
        signal_modified(&mut fx, key.as_bytes());
    }
    c.add_reply_i64(removed as i64);
}

pub fn ltrim_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (Some(mut start), Some(mut end)) = (
        string2ll(ctx.argv[2].as_bytes()),
        string2ll(ctx.argv[3].as_bytes()),
    ) else {
        ctx.client().add_reply(shared::NOT_INTEGER_ERR);
        return;
    };
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::OK);
        return;
    };
    if o.obj_type() != ObjType::List {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }
    let llen = list_len(o) as i64;
    if start < 0 {
        start = (llen + start).max(0);
    }
    if end < 0 {
        end = llen + end;
    }
    let (ltrim, rtrim) = if start > end || start >= llen {
        (llen, 0)
    } else {
        let end = end.min(llen - 1);
        (start, llen - 1 - end)
    };

    match &mut o.value {
        Value::List(ListEnc::Ziplist(zl)) => {
            zl.delete_range(0, ltrim as usize);
            if rtrim > 0 {
                zl.delete_range(-(rtrim as isize), rtrim as usize);
            }
        }
        Value::List(ListEnc::Linked(l)) => {
            for _ in 0..ltrim {
                l.pop_front();
            }
            for _ in 0..rtrim {
                l.pop_back();
            }
        }
        _ => unreachable!(),
    }

    if list_len(o) == 0 {
        db.delete(key.as_bytes());
    }
    signal_modified(&mut fx, key.as_bytes());
    c.add_reply(shared::OK);
}
