//! Skip list: probabilistic ordered index with span counters for rank
//! queries.
//!
//! Nodes order by (score ascending, member bytes ascending).  Every forward
//! pointer carries a *span* — the number of level-0 links it crosses — so
//! rank-by-element and element-by-rank both run in expected O(log N).
//!
//! Member payloads are `Rc<Sds>`: the ordered index and the member→score
//! table of a sorted set reference the same allocation.
//!
//! Node linkage uses raw pointers.  The aliasing discipline is the usual
//! one for intrusive lists: nodes are heap allocations created with
//! `Box::into_raw`, reachable only through one list, mutated only through
//! methods taking `&mut self`, and released either by `delete_node` or by
//! the `Drop` walk over level 0.

#![allow(dangerous_implicit_autorefs)]

use std::ptr;
use std::rc::Rc;

use rand::Rng;

use crate::ds::sds::Sds;

/// Hard cap on node levels; enough for 2^64 elements at p = 1/4.
pub const SKIPLIST_MAXLEVEL: usize = 32;
/// Probability of promoting a node one more level.
pub const SKIPLIST_P: f64 = 0.25;

struct Level {
    forward: *mut Node,
    span: usize,
}

/// One skip-list node.  Exposed read-only so range walks can follow links
/// without re-descending from the header.
pub struct Node {
    member: Rc<Sds>,
    score: f64,
    backward: *mut Node,
    level: Vec<Level>,
}

impl Node {
    fn boxed(level: usize, score: f64, member: Rc<Sds>) -> *mut Node {
        let mut levels = Vec::with_capacity(level);
        for _ in 0..level {
            levels.push(Level {
                forward: ptr::null_mut(),
                span: 0,
            });
        }
        Box::into_raw(Box::new(Node {
            member,
            score,
            backward: ptr::null_mut(),
            level: levels,
        }))
    }

    #[inline]
    pub fn member(&self) -> &Rc<Sds> {
        &self.member
    }

    #[inline]
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Successor in score order.
    #[inline]
    pub fn next(&self) -> Option<&Node> {
        // SAFETY: forward pointers reference live nodes owned by the same
        // list; the returned borrow is tied to `&self`, which is itself
        // borrowed from the list.
        unsafe { self.level[0].forward.as_ref() }
    }

    /// Predecessor in score order (`None` at the first element).
    #[inline]
    pub fn prev(&self) -> Option<&Node> {
        // SAFETY: as for `next`; the backward pointer of the first element
        // is null, never the header sentinel.
        unsafe { self.backward.as_ref() }
    }
}

/// Inclusive/exclusive score interval for range queries.
#[derive(Debug, Clone, Copy)]
pub struct RangeSpec {
    pub min: f64,
    pub max: f64,
    pub minex: bool,
    pub maxex: bool,
}

impl RangeSpec {
    #[inline]
    pub fn gte_min(&self, score: f64) -> bool {
        if self.minex {
            score > self.min
        } else {
            score >= self.min
        }
    }

    #[inline]
    pub fn lte_max(&self, score: f64) -> bool {
        if self.maxex {
            score < self.max
        } else {
            score <= self.max
        }
    }

    /// True when no score can satisfy the interval.
    pub fn is_void(&self) -> bool {
        self.min > self.max || (self.min == self.max && (self.minex || self.maxex))
    }
}

/// Probabilistic ordered index.
pub struct Skiplist {
    header: *mut Node,
    tail: *mut Node,
    length: usize,
    level: usize,
}

impl Default for Skiplist {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn precedes(score: f64, member: &Sds, b_score: f64, b_member: &Sds) -> bool {
    b_score < score || (b_score == score && b_member < member)
}

impl Skiplist {
    pub fn new() -> Self {
        Skiplist {
            header: Node::boxed(SKIPLIST_MAXLEVEL, 0.0, Rc::new(Sds::new())),
            tail: ptr::null_mut(),
            length: 0,
            level: 1,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// First element in score order.
    pub fn first(&self) -> Option<&Node> {
        // SAFETY: the header sentinel is always a valid allocation.
        unsafe { (*self.header).level[0].forward.as_ref() }
    }

    /// Last element in score order.
    pub fn last(&self) -> Option<&Node> {
        // SAFETY: `tail` is either null or a live node of this list.
        unsafe { self.tail.as_ref() }
    }

    fn random_level<R: Rng>(rng: &mut R) -> usize {
        let mut level = 1;
        while level < SKIPLIST_MAXLEVEL && rng.gen::<f64>() < SKIPLIST_P {
            level += 1;
        }
        level
    }

    /// Insert a (score, member) pair assumed not already present; the sorted
    /// set layer above guarantees uniqueness of members.
    pub fn insert<R: Rng>(&mut self, rng: &mut R, score: f64, member: Rc<Sds>) {
        debug_assert!(!score.is_nan());
        let mut update = [ptr::null_mut::<Node>(); SKIPLIST_MAXLEVEL];
        let mut rank = [0usize; SKIPLIST_MAXLEVEL];

        // SAFETY: the descent only follows forward pointers of live nodes;
        // `update` captures the rightmost node before the insertion point on
        // every level, all owned by this list.
        unsafe {
            let mut x = self.header;
            for i in (0..self.level).rev() {
                rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
                while let Some(fwd) = (*x).level[i].forward.as_mut() {
                    if precedes(score, &member, fwd.score, &fwd.member) {
                        rank[i] += (*x).level[i].span;
                        x = fwd;
                    } else {
                        break;
                    }
                }
                update[i] = x;
            }

            let level = Self::random_level(rng);
            if level > self.level {
                for i in self.level..level {
                    rank[i] = 0;
                    update[i] = self.header;
                    (*update[i]).level[i].span = self.length;
                }
                self.level = level;
            }

            let x = Node::boxed(level, score, member);
            for i in 0..level {
                (*x).level[i].forward = (*update[i]).level[i].forward;
                (*update[i]).level[i].forward = x;
                (*x).level[i].span = (*update[i]).level[i].span - (rank[0] - rank[i]);
                (*update[i]).level[i].span = (rank[0] - rank[i]) + 1;
            }
            for i in level..self.level {
                (*update[i]).level[i].span += 1;
            }

            (*x).backward = if update[0] == self.header {
                ptr::null_mut()
            } else {
                update[0]
            };
            if let Some(fwd) = (*x).level[0].forward.as_mut() {
                fwd.backward = x;
            } else {
                self.tail = x;
            }
            self.length += 1;
        }
    }

    /// Remove the exact (score, member) pair; `true` when found.
    pub fn delete(&mut self, score: f64, member: &Sds) -> bool {
        let mut update = [ptr::null_mut::<Node>(); SKIPLIST_MAXLEVEL];
        // SAFETY: same descent discipline as `insert`.
        unsafe {
            let mut x = self.header;
            for i in (0..self.level).rev() {
                while let Some(fwd) = (*x).level[i].forward.as_mut() {
                    if precedes(score, member, fwd.score, &fwd.member) {
                        x = fwd;
                    } else {
                        break;
                    }
                }
                update[i] = x;
            }
            let target = (*update[0]).level[0].forward;
            match target.as_ref() {
                Some(t) if t.score == score && t.member.as_ref() == member => {
                    self.delete_node(target, &update);
                    drop(Box::from_raw(target));
                    true
                }
                _ => false,
            }
        }
    }

    /// Unlink `x` given the per-level predecessors in `update`.
    ///
    /// # Safety
    /// `x` must be a live node of this list and `update[i]` its predecessor
    /// at every level `< self.level`.
    unsafe fn delete_node(&mut self, x: *mut Node, update: &[*mut Node; SKIPLIST_MAXLEVEL]) {
        for i in 0..self.level {
            if (*update[i]).level[i].forward == x {
                (*update[i]).level[i].span += (*x).level[i].span - 1;
                (*update[i]).level[i].forward = (*x).level[i].forward;
            } else {
                (*update[i]).level[i].span -= 1;
            }
        }
        if let Some(fwd) = (*x).level[0].forward.as_mut() {
            fwd.backward = (*x).backward;
        } else {
            self.tail = (*x).backward;
        }
        while self.level > 1 && (*self.header).level[self.level - 1].forward.is_null() {
            self.level -= 1;
        }
        self.length -= 1;
    }

    // ── Range queries ───────────────────────────────────────────────────────

    /// Whether any element falls inside `range`.
    pub fn is_in_range(&self, range: &RangeSpec) -> bool {
        if range.is_void() {
            return false;
        }
        match (self.last(), self.first()) {
            (Some(last), Some(first)) => {
                range.gte_min(last.score) && range.lte_max(first.score)
            }
            _ => false,
        }
    }

    /// First element with score inside `range`.
    pub fn first_in_range(&self, range: &RangeSpec) -> Option<&Node> {
        if !self.is_in_range(range) {
            return None;
        }
        // SAFETY: descent over live nodes as in `insert`.
        unsafe {
            let mut x = self.header;
            for i in (0..self.level).rev() {
                while let Some(fwd) = (*x).level[i].forward.as_ref() {
                    if !range.gte_min(fwd.score) {
                        x = (*x).level[i].forward;
                    } else {
                        break;
                    }
                }
            }
            let x = (*x).level[0].forward.as_ref()?;
            if range.lte_max(x.score) {
                Some(x)
            } else {
                None
            }
        }
    }

    /// Last element with score inside `range`.
    pub fn last_in_range(&self, range: &RangeSpec) -> Option<&Node> {
        if !self.is_in_range(range) {
            return None;
        }
        // SAFETY: descent over live nodes as in `insert`.
        unsafe {
            let mut x = self.header;
            for i in (0..self.level).rev() {
                while let Some(fwd) = (*x).level[i].forward.as_ref() {
                    if range.lte_max(fwd.score) {
                        x = (*x).level[i].forward;
                    } else {
                        break;
                    }
                }
            }
            if x == self.header {
                return None;
            }
            let x = x.as_ref()?;
            if range.gte_min(x.score) {
                Some(x)
            } else {
                None
            }
        }
    }

    /// Delete every element with score inside `range`, invoking `on_delete`
    /// for each removed member so the caller can maintain its member→score
    /// table in the same pass.  Returns the number removed.
    pub fn delete_range_by_score<F: FnMut(&Rc<Sds>, f64)>(
        &mut self,
        range: &RangeSpec,
        mut on_delete: F,
    ) -> usize {
        let mut update = [ptr::null_mut::<Node>(); SKIPLIST_MAXLEVEL];
        let mut removed = 0;
        // SAFETY: descent as in `insert`; each deleted node is unlinked via
        // `delete_node` before its Box is reclaimed.
        unsafe {
            let mut x = self.header;
            for i in (0..self.level).rev() {
                while let Some(fwd) = (*x).level[i].forward.as_ref() {
                    if !range.gte_min(fwd.score) {
                        x = (*x).level[i].forward;
                    } else {
                        break;
                    }
                }
                update[i] = x;
            }
            let mut x = (*x).level[0].forward;
            while let Some(node) = x.as_ref() {
                if !range.lte_max(node.score) {
                    break;
                }
                let next = node.level[0].forward;
                self.delete_node(x, &update);
                let boxed = Box::from_raw(x);
                on_delete(&boxed.member, boxed.score);
                removed += 1;
                x = next;
            }
        }
        removed
    }

    /// Delete elements with 1-based rank in `[start, end]`, invoking
    /// `on_delete` per removed member.  Returns the number removed.
    pub fn delete_range_by_rank<F: FnMut(&Rc<Sds>, f64)>(
        &mut self,
        start: usize,
        end: usize,
        mut on_delete: F,
    ) -> usize {
        let mut update = [ptr::null_mut::<Node>(); SKIPLIST_MAXLEVEL];
        let mut traversed = 0usize;
        let mut removed = 0usize;
        // SAFETY: descent as in `insert`.
        unsafe {
            let mut x = self.header;
            for i in (0..self.level).rev() {
                while !(*x).level[i].forward.is_null() && traversed + (*x).level[i].span < start {
                    traversed += (*x).level[i].span;
                    x = (*x).level[i].forward;
                }
                update[i] = x;
            }
            traversed += 1;
            let mut x = (*x).level[0].forward;
            while let Some(_node) = x.as_ref() {
                if traversed > end {
                    break;
                }
                let next = (*x).level[0].forward;
                self.delete_node(x, &update);
                let boxed = Box::from_raw(x);
                on_delete(&boxed.member, boxed.score);
                removed += 1;
                traversed += 1;
                x = next;
            }
        }
        removed
    }

    // ── Rank queries ────────────────────────────────────────────────────────

    /// 1-based rank of (score, member); `None` when absent.
    pub fn rank(&self, score: f64, member: &Sds) -> Option<usize> {
        let mut rank = 0usize;
        // SAFETY: descent over live nodes.
        unsafe {
            let mut x = self.header;
            for i in (0..self.level).rev() {
                while let Some(fwd) = (*x).level[i].forward.as_ref() {
                    if fwd.score < score
                        || (fwd.score == score && fwd.member.as_ref() <= member)
                    {
                        rank += (*x).level[i].span;
                        x = (*x).level[i].forward;
                    } else {
                        break;
                    }
                }
                if x != self.header && (*x).member.as_ref() == member {
                    return Some(rank);
                }
            }
        }
        None
    }

    /// Element at 1-based `rank`.
    pub fn element_by_rank(&self, rank: usize) -> Option<&Node> {
        if rank == 0 || rank > self.length {
            return None;
        }
        let mut traversed = 0usize;
        // SAFETY: descent over live nodes.
        unsafe {
            let mut x = self.header;
            for i in (0..self.level).rev() {
                while !(*x).level[i].forward.is_null() && traversed + (*x).level[i].span <= rank {
                    traversed += (*x).level[i].span;
                    x = (*x).level[i].forward;
                }
                if traversed == rank && x != self.header {
                    return x.as_ref();
                }
            }
        }
        None
    }

    /// Current top level (test hook for the level bound).
    pub fn height(&self) -> usize {
        self.level
    }
}

impl Drop for Skiplist {
    fn drop(&mut self) {
        // SAFETY: level-0 forward pointers thread every node exactly once;
        // each Box is reclaimed a single time, header last.
        unsafe {
            let mut x = (*self.header).level[0].forward;
            while !x.is_null() {
                let next = (*x).level[0].forward;
                drop(Box::from_raw(x));
                x = next;
            }
            drop(Box::from_raw(self.header));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn rc(s: &str) -> Rc<Sds> {
        Rc::new(Sds::from(s))
    }

    #[test]
    fn insert_orders_by_score_then_member() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut sl = Skiplist::new();
        sl.insert(&mut rng, 2.0, rc("b"));
        sl.insert(&mut rng, 1.0, rc("c"));
        sl.insert(&mut rng, 2.0, rc("a"));
        let first = sl.first().unwrap();
        assert_eq!(first.member().as_bytes(), b"c");
        assert_eq!(first.next().unwrap().member().as_bytes(), b"a");
        assert_eq!(sl.last().unwrap().member().as_bytes(), b"b");
    }

    #[test]
    fn rank_roundtrip() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut sl = Skiplist::new();
        for i in 0..100 {
            sl.insert(&mut rng, i as f64, rc(&format!("m{i:03}")));
        }
        for i in 0..100usize {
            let node = sl.element_by_rank(i + 1).unwrap();
            assert_eq!(sl.rank(node.score(), node.member()), Some(i + 1));
        }
        assert!(sl.delete(50.0, &Sds::from("m050")));
        assert_eq!(sl.len(), 99);
        assert_eq!(sl.rank(51.0, &Sds::from("m051")), Some(51));
    }
}
