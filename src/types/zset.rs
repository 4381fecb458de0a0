//! Sorted-set type: list-pack of alternating (member, score-text) entries
//! kept in (score, member) order, promoted to a skip list paired with a
//! member→score table.
//!
//! The two representations satisfy the same contract: members are unique,
//! iteration follows (score ascending, member bytes ascending), and score
//! lookup by member is cheap.

use std::rc::Rc;

use rand::rngs::ThreadRng;

use crate::command::Ctx;
use crate::db::{
    check_type, lookup_key_read, lookup_key_write, lookup_write_or_create, signal_modified,
};
use crate::ds::sds::Sds;
use crate::ds::skiplist::RangeSpec;
use crate::ds::ziplist::{Ziplist, ZlValue};
use crate::obj::object::{ObjType, Robj, Value, ZKey, ZsetEnc, ZsetSkip};
use crate::obj::shared;
use crate::server::Config;
use crate::util::{d2string, string2d};

// ─────────────────────────────────────────────────────────────────────────────
// List-pack representation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn zzl_entry_score(zl: &Ziplist, spos: usize) -> f64 {
    match zl.get(spos) {
        ZlValue::Int(v) => v as f64,
        ZlValue::Str(s) => string2d(s).expect("corrupt score entry"),
    }
}

/// Locate `member`; returns (member offset, score).
fn zzl_find(zl: &Ziplist, member: &[u8]) -> Option<(usize, f64)> {
    let mut pos = zl.head();
    while let Some(mpos) = pos {
        let spos = zl.next(mpos).expect("dangling sorted-set member");
        if zl.compare(mpos, member) {
            return Some((mpos, zzl_entry_score(zl, spos)));
        }
        pos = zl.next(spos);
    }
    None
}

/// Insert keeping (score, member) order.
fn zzl_insert(zl: &mut Ziplist, member: &[u8], score: f64) {
    let score_text = d2string(score);
    let mut pos = zl.head();
    while let Some(mpos) = pos {
        let spos = zl.next(mpos).expect("dangling sorted-set member");
        let cur = zzl_entry_score(zl, spos);
        let precedes = score < cur
            || (score == cur
                && member < zl.get(mpos).to_bytes().as_slice());
        if precedes {
            // Score first, then the member lands in front of it.
            zl.insert_at(mpos, score_text.as_bytes());
            zl.insert_at(mpos, member);
            return;
        }
        pos = zl.next(spos);
    }
    zl.push(member, false);
    zl.push(score_text.as_bytes(), false);
}

fn zzl_delete(zl: &mut Ziplist, mpos: usize) {
    zl.delete_at(mpos);
    zl.delete_at(mpos);
}

// ─────────────────────────────────────────────────────────────────────────────
// Primitive layer over both encodings
// ─────────────────────────────────────────────────────────────────────────────

fn new_zset_object(cfg: &Config, first_member_len: usize) -> Robj {
    if cfg.zset_max_ziplist_entries == 0 || first_member_len > cfg.zset_max_ziplist_value {
        Robj::new(Value::Zset(ZsetEnc::Skiplist(ZsetSkip::new())))
    } else {
        Robj::new(Value::Zset(ZsetEnc::Ziplist(Ziplist::new())))
    }
}

fn convert_to_skiplist(o: &mut Robj, rng: &mut ThreadRng) {
    let Value::Zset(enc) = &mut o.value else {
        unreachable!("zset conversion on non-zset");
    };
    if let ZsetEnc::Ziplist(zl) = enc {
        let mut zs = ZsetSkip::new();
        let mut it = zl.values();
        while let (Some(m), Some(s)) = (it.next(), it.next()) {
            let score = match s {
                ZlValue::Int(v) => v as f64,
                ZlValue::Str(text) => string2d(text).expect("corrupt score entry"),
            };
            let member = Rc::new(Sds::from(m.to_bytes()));
            zs.zsl.insert(rng, score, Rc::clone(&member));
            zs.dict.add(ZKey(member), score);
        }
        *enc = ZsetEnc::Skiplist(zs);
    }
}

pub fn zset_len(o: &Robj) -> usize {
    match &o.value {
        Value::Zset(ZsetEnc::Ziplist(zl)) => zl.count() / 2,
        Value::Zset(ZsetEnc::Skiplist(zs)) => zs.zsl.len(),
        _ => unreachable!("zset_len on non-zset"),
    }
}

pub fn zset_score(o: &Robj, member: &[u8]) -> Option<f64> {
    match &o.value {
        Value::Zset(ZsetEnc::Ziplist(zl)) => zzl_find(zl, member).map(|(_, s)| s),
        Value::Zset(ZsetEnc::Skiplist(zs)) => zs.dict.get(member).copied(),
        _ => unreachable!("zset_score on non-zset"),
    }
}

/// Outcome of an add: new member, score change, or no-op.
#[derive(PartialEq, Eq)]
pub enum ZAddOutcome {
    Added,
    Updated,
    Unchanged,
}

pub fn zset_add(
    o: &mut Robj,
    cfg: &Config,
    rng: &mut ThreadRng,
    score: f64,
    member: &[u8],
) -> ZAddOutcome {
    if matches!(&o.value, Value::Zset(ZsetEnc::Ziplist(_)))
        && member.len() > cfg.zset_max_ziplist_value
    {
        convert_to_skiplist(o, rng);
    }
    let outcome = match &mut o.value {
        Value::Zset(ZsetEnc::Ziplist(zl)) => match zzl_find(zl, member) {
            Some((mpos, cur)) => {
                if cur == score {
                    ZAddOutcome::Unchanged
                } else {
                    zzl_delete(zl, mpos);
                    zzl_insert(zl, member, score);
                    ZAddOutcome::Updated
                }
            }
            None => {
                zzl_insert(zl, member, score);
                ZAddOutcome::Added
            }
        },
        Value::Zset(ZsetEnc::Skiplist(zs)) => match zs.dict.get(member).copied() {
            Some(cur) => {
                if cur == score {
                    ZAddOutcome::Unchanged
                } else {
                    // Reinsertion keeps the index ordered; the member
                    // allocation is shared with the score table.
                    let shared_member = zs.dict.get_key(member).unwrap().0.clone();
                    let deleted = zs.zsl.delete(cur, shared_member.as_ref());
                    debug_assert!(deleted);
                    zs.zsl.insert(rng, score, Rc::clone(&shared_member));
                    *zs.dict.get_mut(member).unwrap() = score;
                    ZAddOutcome::Updated
                }
            }
            None => {
                let member_rc = Rc::new(Sds::from_slice(member));
                zs.zsl.insert(rng, score, Rc::clone(&member_rc));
                zs.dict.add(ZKey(member_rc), score);
                ZAddOutcome::Added
            }
        },
        _ => unreachable!("zset_add on non-zset"),
    };
    let grew_past_limit = matches!(
        &o.value,
        Value::Zset(ZsetEnc::Ziplist(zl)) if zl.count() / 2 > cfg.zset_max_ziplist_entries
    );
    if grew_past_limit {
        convert_to_skiplist(o, rng);
    }
    outcome
}

pub fn zset_remove(o: &mut Robj, member: &[u8]) -> bool {
    match &mut o.value {
        Value::Zset(ZsetEnc::Ziplist(zl)) => match zzl_find(zl, member) {
            Some((mpos, _)) => {
                zzl_delete(zl, mpos);
                true
            }
            None => false,
        },
        Value::Zset(ZsetEnc::Skiplist(zs)) => match zs.dict.remove(member) {
            Some((_, score)) => {
                let removed = zs.zsl.delete(score, &Sds::from_slice(member));
                debug_assert!(removed);
                true
            }
            None => false,
        },
        _ => unreachable!("zset_remove on non-zset"),
    }
}

/// 0-based rank in ascending or descending order.
pub fn zset_rank(o: &Robj, member: &[u8], reverse: bool) -> Option<usize> {
    let len = zset_len(o);
    match &o.value {
        Value::Zset(ZsetEnc::Ziplist(zl)) => {
            let mut rank = 0usize;
            let mut pos = zl.head();
            while let Some(mpos) = pos {
                if zl.compare(mpos, member) {
                    return if reverse {
                        Some(len - 1 - rank)
                    } else {
                        Some(rank)
                    };
                }
                let spos = zl.next(mpos).expect("dangling sorted-set member");
                pos = zl.next(spos);
                rank += 1;
            }
            None
        }
        Value::Zset(ZsetEnc::Skiplist(zs)) => {
            let score = *zs.dict.get(member)?;
            let rank = zs.zsl.rank(score, &Sds::from_slice(member))?;
            if reverse {
                Some(len - rank)
            } else {
                Some(rank - 1)
            }
        }
        _ => unreachable!("zset_rank on non-zset"),
    }
}

/// (member, score) pairs for 0-based rank range `[start, end]`, inclusive,
/// in ascending or descending order.
fn zset_range_pairs(o: &Robj, start: usize, end: usize, reverse: bool) -> Vec<(Vec<u8>, f64)> {
    let mut out = Vec::with_capacity(end - start + 1);
    match &o.value {
        Value::Zset(ZsetEnc::Ziplist(zl)) => {
            let len = zl.count() / 2;
            for i in start..=end {
                let rank = if reverse { len - 1 - i } else { i };
                let mpos = zl.index((rank * 2) as isize).expect("range precomputed");
                let spos = zl.next(mpos).expect("dangling sorted-set member");
                out.push((zl.get(mpos).to_bytes(), zzl_entry_score(zl, spos)));
            }
        }
        Value::Zset(ZsetEnc::Skiplist(zs)) => {
            let len = zs.zsl.len();
            let first_rank = if reverse { len - start } else { start + 1 };
            let mut node = zs.zsl.element_by_rank(first_rank);
            for _ in start..=end {
                let Some(n) = node else { break };
                out.push((n.member().as_bytes().to_vec(), n.score()));
                node = if reverse { n.prev() } else { n.next() };
            }
        }
        _ => unreachable!("zset_range_pairs on non-zset"),
    }
    out
}

/// Delete every member whose score lies inside `range`; both views of the
/// skip-list form are maintained in one pass.  Returns the number removed.
pub fn zset_delete_range_by_score(o: &mut Robj, range: &RangeSpec) -> usize {
    match &mut o.value {
        Value::Zset(ZsetEnc::Ziplist(zl)) => {
            let mut deleted = 0usize;
            let mut pos = zl.head();
            while let Some(mpos) = pos {
                let spos = zl.next(mpos).expect("dangling sorted-set member");
                let score = zzl_entry_score(zl, spos);
                // Entries are score-ordered; past the max nothing matches.
                if !range.lte_max(score) {
                    break;
                }
                if range.gte_min(score) {
                    zzl_delete(zl, mpos);
                    deleted += 1;
                    pos = if zl.is_entry(mpos) { Some(mpos) } else { None };
                } else {
                    pos = zl.next(spos);
                }
            }
            deleted
        }
        Value::Zset(ZsetEnc::Skiplist(zs)) => {
            let ZsetSkip { zsl, dict } = zs;
            zsl.delete_range_by_score(range, |member, _score| {
                let _ = dict.remove(member.as_bytes());
            })
        }
        _ => unreachable!("zset_delete_range_by_score on non-zset"),
    }
}

/// Delete members with 0-based rank in `[start, end]` (caller-clamped).
/// Returns the number removed.
pub fn zset_delete_range_by_rank(o: &mut Robj, start: usize, end: usize) -> usize {
    match &mut o.value {
        Value::Zset(ZsetEnc::Ziplist(zl)) => {
            zl.delete_range((2 * start) as isize, 2 * (end - start + 1)) / 2
        }
        Value::Zset(ZsetEnc::Skiplist(zs)) => {
            let ZsetSkip { zsl, dict } = zs;
            zsl.delete_range_by_rank(start + 1, end + 1, |member, _score| {
                let _ = dict.remove(member.as_bytes());
            })
        }
        _ => unreachable!("zset_delete_range_by_rank on non-zset"),
    }
}

/// Parse a `ZCOUNT`-style score bound: optional `(` prefix for exclusive.
fn parse_range(min: &[u8], max: &[u8]) -> Option<RangeSpec> {
    let mut spec = RangeSpec {
        min: 0.0,
        max: 0.0,
        minex: false,
        maxex: false,
    };
    let (mtext, mex) = if min.first() == Some(&b'(') {
        (&min[1..], true)
    } else {
        (min, false)
    };
    let (xtext, xex) = if max.first() == Some(&b'(') {
        (&max[1..], true)
    } else {
        (max, false)
    };
    spec.min = string2d(mtext)?;
    spec.max = string2d(xtext)?;
    spec.minex = mex;
    spec.maxex = xex;
    Some(spec)
}

fn zset_count_in_range(o: &Robj, range: &RangeSpec) -> usize {
    match &o.value {
        Value::Zset(ZsetEnc::Ziplist(zl)) => {
            let mut count = 0usize;
            let mut pos = zl.head();
            while let Some(mpos) = pos {
                let spos = zl.next(mpos).expect("dangling sorted-set member");
                let score = zzl_entry_score(zl, spos);
                if range.lte_max(score) {
                    if range.gte_min(score) {
                        count += 1;
                    }
                } else {
                    break;
                }
                pos = zl.next(spos);
            }
            count
        }
        Value::Zset(ZsetEnc::Skiplist(zs)) => {
            let Some(first) = zs.zsl.first_in_range(range) else {
                return 0;
            };
            let first_rank = zs
                .zsl
                .rank(first.score(), first.member())
                .expect("node is in the list");
            let last = zs.zsl.last_in_range(range).expect("range verified non-empty");
            let last_rank = zs
                .zsl
                .rank(last.score(), last.member())
                .expect("node is in the list");
            last_rank - first_rank + 1
        }
        _ => unreachable!("zset_count_in_range on non-zset"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

pub fn zadd_command(ctx: &mut Ctx) {
    if (ctx.argv.len() - 2) % 2 != 0 {
        ctx.client().add_reply(shared::SYNTAX_ERR);
        return;
    }
    // Validate every score before touching the data set.
    let mut scores = Vec::with_capacity((ctx.argv.len() - 2) / 2);
    for pair in ctx.argv[2..].chunks_exact(2) {
        match string2d(pair[0].as_bytes()) {
            Some(s) if !s.is_nan() => scores.push(s),
            _ => {
                ctx.client().add_reply(shared::NOT_FLOAT_ERR);
                return;
            }
        }
    }

    let key = ctx.argv[1].clone();
    let pairs: Vec<Sds> = ctx.argv[2..].to_vec();
    let (db, c, mut fx) = ctx.split();

    let cfg = fx.cfg;
    let first_len = pairs[1].len();
    let Some(o) = lookup_write_or_create(db, c, &mut fx, &key, ObjType::Zset, move || {
        new_zset_object(cfg, first_len)
    }) else {
        return;
    };
    let mut rng = rand::thread_rng();
    let mut added = 0i64;
    let mut changed = 0u64;
    for (i, pair) in pairs.chunks_exact(2).enumerate() {
        match zset_add(o, fx.cfg, &mut rng, scores[i], pair[1].as_bytes()) {
            ZAddOutcome::Added => {
                added += 1;
                changed += 1;
            }
            ZAddOutcome::Updated => changed += 1,
            ZAddOutcome::Unchanged => {}
        }
    }
    if changed > 0 {
        *fx.dirty += changed - 1;
        signal_modified(&mut fx, key.as_bytes());
    }
    c.add_reply_i64(added);
}

pub fn zincrby_command(ctx: &mut Ctx) {
    let Some(incr) = string2d(ctx.argv[2].as_bytes()) else {
        ctx.client().add_reply(shared::NOT_FLOAT_ERR);
        return;
    };
    let key = ctx.argv[1].clone();
    let member = ctx.argv[3].clone();
    let (db, c, mut fx) = ctx.split();

    let cfg = fx.cfg;
    let member_len = member.len();
    let Some(o) = lookup_write_or_create(db, c, &mut fx, &key, ObjType::Zset, move || {
        new_zset_object(cfg, member_len)
    }) else {
        return;
    };
    let current = zset_score(o, member.as_bytes()).unwrap_or(0.0);
    let new = current + incr;
    if new.is_nan() {
        c.add_reply_error("resulting score is not a number (NaN)");
        return;
    }
    let mut rng = rand::thread_rng();
    zset_add(o, fx.cfg, &mut rng, new, member.as_bytes());
    signal_modified(&mut fx, key.as_bytes());
    c.add_reply_double(new);
}

pub fn zrem_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let members: Vec<Sds> = ctx.argv[2..].to_vec();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::CZERO);
        return;
    };
    if o.obj_type() != ObjType::Zset {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }
    let mut removed = 0i64;
    for member in &members {
        if zset_remove(o, member.as_bytes()) {
            removed += 1;
            if zset_len(o) == 0 {
                break;
            }
        }
    }
    if zset_len(o) == 0 {
        db.delete(key.as_bytes());
    }
    if removed > 0 {
        signal_modified(&mut fx, key.as_bytes());
    }
    c.add_reply_i64(removed);
}

pub fn zremrangebyscore_command(ctx: &mut Ctx) {
    let Some(range) = parse_range(ctx.argv[2].as_bytes(), ctx.argv[3].as_bytes()) else {
        ctx.client().add_reply_error("min or max is not a float");
        return;
    };
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::CZERO);
        return;
    };
    if o.obj_type() != ObjType::Zset {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }
    let deleted = zset_delete_range_by_score(o, &range);
    if zset_len(o) == 0 {
        db.delete(key.as_bytes());
    }
    if deleted > 0 {
        *fx.dirty += deleted as u64 - 1;
        signal_modified(&mut fx, key.as_bytes());
    }
    c.add_reply_i64(deleted as i64);
}

pub fn zremrangebyrank_command(ctx: &mut Ctx) {
    let (Some(mut start), Some(mut end)) = (
        crate::util::string2ll(ctx.argv[2].as_bytes()),
        crate::util::string2ll(ctx.argv[3].as_bytes()),
    ) else {
        ctx.client().add_reply(shared::NOT_INTEGER_ERR);
        return;
    };
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_write(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::CZERO);
        return;
    };
    if o.obj_type() != ObjType::Zset {
        c.add_reply(shared::WRONGTYPE_ERR);
        return;
    }
    let llen = zset_len(o) as i64;
    if start < 0 {
        start = (llen + start).max(0);
    }
    if end < 0 {
        end = llen + end;
    }
    if start > end || start >= llen {
        c.add_reply(shared::CZERO);
        return;
    }
    if end >= llen {
        end = llen - 1;
    }
    let deleted = zset_delete_range_by_rank(o, start as usize, end as usize);
    if zset_len(o) == 0 {
        db.delete(key.as_bytes());
    }
    if deleted > 0 {
        *fx.dirty += deleted as u64 - 1;
        signal_modified(&mut fx, key.as_bytes());
    }
    c.add_reply_i64(deleted as i64);
}

fn zrange_generic(ctx: &mut Ctx, reverse: bool) {
    let withscores = match ctx.argv.len() {
        4 => false,
        5 if ctx.argv[4].as_bytes().eq_ignore_ascii_case(b"withscores") => true,
        _ => {
            ctx.client().add_reply(shared::SYNTAX_ERR);
            return;
        }
    };
    let (Some(mut start), Some(mut end)) = (
        crate::util::string2ll(ctx.argv[2].as_bytes()),
        crate::util::string2ll(ctx.argv[3].as_bytes()),
    ) else {
        ctx.client().add_reply(shared::NOT_INTEGER_ERR);
        return;
    };
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    let Some(o) = lookup_key_read(db, &mut fx, key.as_bytes()) else {
        c.add_reply(shared::EMPTY_MULTIBULK);
        return;
    };
    if check_type(c, o, ObjType::Zset) {
        return;
    }

    let len = zset_len(o) as i64;
    if start < 0 {
        start = (len + start).max(0);
    }
    if end < 0 {
        end = len + end;
    }
    if start > end || start >= len {
        c.add_reply(shared::EMPTY_MULTIBULK);
        return;
    }
    if end >= len {
        end = len - 1;
    }

    let pairs = zset_range_pairs(o, start as usize, end as usize, reverse);
    c.add_reply_multibulk_len(pairs.len() * if withscores { 2 } else { 1 });
    for (member, score) in pairs {
        c.add_reply_bulk(&member);
        if withscores {
            c.add_reply_double(score);
        }
    }
}

pub fn zrange_command(ctx: &mut Ctx) {
    zrange_generic(ctx, false);
}

pub fn zrevrange_command(ctx: &mut Ctx) {
    zrange_generic(ctx, true);
}

pub fn zcard_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::Zset) {
                return;
            }
            let len = zset_len(o) as i64;
            c.add_reply_i64(len);
        }
        None => c.add_reply(shared::CZERO),
    }
}

pub fn zscore_command(ctx: &mut Ctx) {
    let key = ctx.argv[1].clone();
    let member = ctx.argv[2].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::Zset) {
                return;
            }
            match zset_score(o, member.as_bytes()) {
                Some(s) => c.add_reply_double(s),
                None => c.add_reply_nil(),
            }
        }
        None => c.add_reply_nil(),
    }
}

pub fn zcount_command(ctx: &mut Ctx) {
    let Some(range) = parse_range(ctx.argv[2].as_bytes(), ctx.argv[3].as_bytes()) else {
        ctx.client()
            .add_reply_error("min or max is not a float");
        return;
    };
    let key = ctx.argv[1].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::Zset) {
                return;
            }
            let n = zset_count_in_range(o, &range) as i64;
            c.add_reply_i64(n);
        }
        None => c.add_reply(shared::CZERO),
    }
}

fn zrank_generic(ctx: &mut Ctx, reverse: bool) {
    let key = ctx.argv[1].clone();
    let member = ctx.argv[2].clone();
    let (db, c, mut fx) = ctx.split();
    match lookup_key_read(db, &mut fx, key.as_bytes()) {
        Some(o) => {
            if check_type(c, o, ObjType::Zset) {
                return;
            }
            match zset_rank(o, member.as_bytes(), reverse) {
                Some(rank) => c.add_reply_i64(rank as i64),
                None => c.add_reply_nil(),
            }
        }
        None => c.add_reply_nil(),
    }
}

pub fn zrank_command(ctx: &mut Ctx) {
    zrank_generic(ctx, false);
}

pub fn zrevrank_command(ctx: &mut Ctx) {
    zrank_generic(ctx, true);
}
