//! Chained hash table with two internal tables and stepwise incremental
//! rehashing.
//!
//! The table never blocks a caller for the full O(N) cost of growth:
//! resizing allocates the second table and then every mutating entry point
//! migrates one bucket (`rehash_step`) until the first table drains, at
//! which point the second table is promoted.  While a rehash is active all
//! inserts target the second table and lookups probe both, so a key can
//! never be present in both tables at once.
//!
//! Keys are byte strings (anything `Borrow<[u8]>`); bucket placement uses
//! xxh64 over the key bytes.
//!
//! Two iterator flavours exist.  The *safe* iterator takes the table
//! mutably and holds rehashing paused for its lifetime.  The *unsafe*
//! (read-only) iterator instead records a fingerprint — a mix of the table
//! pointers, sizes and used counts — at creation and asserts on drop that
//! it never changed; a violation is a programming error, not a recoverable
//! condition.
//!
//! `scan` supports resumable whole-table traversal with a reverse-binary
//! cursor: the cursor is incremented from the high bit downwards, which
//! keeps every bucket reachable across intervening resizes at the price of
//! possible duplicate visits (callers must tolerate duplicates).

use std::borrow::Borrow;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use xxhash_rust::xxh64::xxh64;

/// Initial bucket count for a freshly used table.
pub const DICT_HT_INITIAL_SIZE: usize = 4;
/// Above this used/size ratio a resize is forced even when resizing is
/// globally disabled.
const DICT_FORCE_RESIZE_RATIO: usize = 5;
/// Seed for the bucket hash.
const DICT_HASH_SEED: u64 = 0x5f3a_91c2_b04d_e817;

// Global resize permission.  Disabled while an external child process
// shares pages with this one, so bulk bucket moves do not touch memory
// needlessly; a heavily overloaded table still resizes.
static DICT_CAN_RESIZE: AtomicBool = AtomicBool::new(true);

/// Allow automatic resizing (the default).
pub fn dict_enable_resize() {
    DICT_CAN_RESIZE.store(true, Ordering::Relaxed);
}

/// Disallow automatic resizing except under forced load.
pub fn dict_disable_resize() {
    DICT_CAN_RESIZE.store(false, Ordering::Relaxed);
}

struct Entry<K, V> {
    key: K,
    val: V,
    next: Link<K, V>,
}

type Link<K, V> = Option<Box<Entry<K, V>>>;

struct Table<K, V> {
    buckets: Vec<Link<K, V>>,
    used: usize,
}

impl<K, V> Table<K, V> {
    fn empty() -> Self {
        Table {
            buckets: Vec::new(),
            used: 0,
        }
    }

    fn with_size(size: usize) -> Self {
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, || None);
        Table { buckets, used: 0 }
    }

    #[inline]
    fn size(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.buckets.len().wrapping_sub(1)
    }
}

/// Incrementally-rehashed chained hash table.
pub struct Dict<K, V> {
    ht: [Table<K, V>; 2],
    /// Bucket migration cursor; -1 when no rehash is active.
    rehash_idx: i64,
    /// Safe iterators active; while non-zero `rehash_step` is a no-op.
    pause_rehash: u32,
}

impl<K: Borrow<[u8]>, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Borrow<[u8]>, V> Dict<K, V> {
    pub fn new() -> Self {
        Dict {
            ht: [Table::empty(), Table::empty()],
            rehash_idx: -1,
            pause_rehash: 0,
        }
    }

    #[inline]
    fn hash(key: &[u8]) -> u64 {
        xxh64(key, DICT_HASH_SEED)
    }

    /// Number of stored entries across both tables.
    #[inline]
    pub fn len(&self) -> usize {
        self.ht[0].used + self.ht[1].used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket count across both tables.
    #[inline]
    pub fn size(&self) -> usize {
        self.ht[0].size() + self.ht[1].size()
    }

    /// True while a bucket migration is in progress.
    #[inline]
    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx != -1
    }

    // ── Sizing ──────────────────────────────────────────────────────────────

    fn next_power(size: usize) -> usize {
        let mut n = DICT_HT_INITIAL_SIZE;
        while n < size {
            n <<= 1;
        }
        n
    }

    /// Allocate the target table for `size` entries and begin rehashing
    /// into it (or adopt it directly when the dict is still unused).
    pub fn expand(&mut self, size: usize) {
        if self.is_rehashing() || self.ht[0].used > size {
            return;
        }
        let realsize = Self::next_power(size);
        if realsize == self.ht[0].size() {
            return;
        }
        let new = Table::with_size(realsize);
        if self.ht[0].size() == 0 {
            self.ht[0] = new;
        } else {
            self.ht[1] = new;
            self.rehash_idx = 0;
        }
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        if self.ht[0].size() == 0 {
            self.expand(DICT_HT_INITIAL_SIZE);
            return;
        }
        let used = self.ht[0].used;
        let size = self.ht[0].size();
        if used >= size
            && (DICT_CAN_RESIZE.load(Ordering::Relaxed) || used / size >= DICT_FORCE_RESIZE_RATIO)
        {
            self.expand(used * 2);
        }
    }

    /// True when the table is worth shrinking (load below 10%).
    pub fn needs_resize(&self) -> bool {
        let size = self.ht[0].size();
        let used = self.len();
        size > DICT_HT_INITIAL_SIZE && used * 100 / size < 10
    }

    /// Shrink the bucket array to the smallest power of two covering the
    /// current usage (begins an incremental rehash).
    pub fn resize(&mut self) {
        if !DICT_CAN_RESIZE.load(Ordering::Relaxed) || self.is_rehashing() {
            return;
        }
        let minimal = self.ht[0].used.max(DICT_HT_INITIAL_SIZE);
        self.expand(minimal);
    }

    // ── Rehashing ───────────────────────────────────────────────────────────

    /// Migrate up to `n` non-empty buckets from the first table, visiting at
    /// most `n * 10` empty buckets.  Returns `true` while migration remains.
    pub fn rehash(&mut self, n: usize) -> bool {
        if !self.is_rehashing() {
            return false;
        }
        let mut empty_visits = n * 10;
        let mut remaining = n;
        while remaining > 0 && self.ht[0].used != 0 {
            let idx = self.rehash_idx as usize;
            debug_assert!(idx < self.ht[0].size());
            if self.ht[0].buckets[idx].is_none() {
                self.rehash_idx += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    return true;
                }
                continue;
            }
            let mut link = self.ht[0].buckets[idx].take();
            while let Some(mut entry) = link {
                link = entry.next.take();
                let h = Self::hash(entry.key.borrow()) as usize & self.ht[1].mask();
                entry.next = self.ht[1].buckets[h].take();
                self.ht[1].buckets[h] = Some(entry);
                self.ht[0].used -= 1;
                self.ht[1].used += 1;
            }
            self.rehash_idx += 1;
            remaining -= 1;
        }
        if self.ht[0].used == 0 {
            self.ht[0] = std::mem::replace(&mut self.ht[1], Table::empty());
            self.rehash_idx = -1;
            return false;
        }
        true
    }

    /// Single-bucket migration performed by mutating entry points.
    #[inline]
    fn rehash_step(&mut self) {
        if self.pause_rehash == 0 {
            self.rehash(1);
        }
    }

    /// Rehash for at most `budget_ms` milliseconds; returns migrated-bucket
    /// batches × 100 as a coarse progress figure.
    pub fn rehash_milliseconds(&mut self, budget_ms: u64) -> usize {
        let start = std::time::Instant::now();
        let mut batches = 0;
        while self.rehash(100) {
            batches += 100;
            if start.elapsed().as_millis() as u64 >= budget_ms {
                break;
            }
        }
        batches
    }

    // ── Core accessors ──────────────────────────────────────────────────────

    fn bucket_for<'a>(table: &'a Table<K, V>, h: u64, key: &[u8]) -> Option<&'a Entry<K, V>> {
        let mut cur = table.buckets[h as usize & table.mask()].as_deref();
        while let Some(e) = cur {
            if e.key.borrow() == key {
                return Some(e);
            }
            cur = e.next.as_deref();
        }
        None
    }

    /// Immutable lookup.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        if self.len() == 0 {
            return None;
        }
        let h = Self::hash(key);
        for t in 0..2 {
            if self.ht[t].size() == 0 {
                break;
            }
            if let Some(e) = Self::bucket_for(&self.ht[t], h, key) {
                return Some(&e.val);
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Which table currently holds `key`.
    fn table_of(&self, h: u64, key: &[u8]) -> Option<usize> {
        for t in 0..2 {
            if self.ht[t].size() == 0 {
                break;
            }
            if Self::bucket_for(&self.ht[t], h, key).is_some() {
                return Some(t);
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Mutable lookup; performs one rehash step.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let h = Self::hash(key);
        let t = self.table_of(h, key)?;
        let mask = self.ht[t].mask();
        let mut cur = self.ht[t].buckets[h as usize & mask].as_deref_mut();
        while let Some(e) = cur {
            if e.key.borrow() == key {
                return Some(&mut e.val);
            }
            cur = e.next.as_deref_mut();
        }
        None
    }

    /// Borrow the stored key (needed where key identity is shared by
    /// content, e.g. re-using an interned key allocation).
    pub fn get_key(&self, key: &[u8]) -> Option<&K> {
        if self.len() == 0 {
            return None;
        }
        let h = Self::hash(key);
        for t in 0..2 {
            if self.ht[t].size() == 0 {
                break;
            }
            if let Some(e) = Self::bucket_for(&self.ht[t], h, key) {
                return Some(&e.key);
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Insert a new key.  Returns `false` (and drops nothing) when the key
    /// already exists — the caller decides between add and replace.
    pub fn add(&mut self, key: K, val: V) -> bool {
        if self.contains(key.borrow()) {
            return false;
        }
        self.insert_new(key, val);
        true
    }

    /// Insert or overwrite.  Returns `true` when the key was new.
    pub fn replace(&mut self, key: K, val: V) -> bool {
        if let Some(slot) = self.get_mut(key.borrow()) {
            *slot = val;
            return false;
        }
        self.insert_new(key, val);
        true
    }

    /// Unconditional insert of a key known to be absent.  New entries go to
    /// the second table while a rehash is active.
    fn insert_new(&mut self, key: K, val: V) {
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.expand_if_needed();
        let h = Self::hash(key.borrow());
        let t = if self.is_rehashing() { 1 } else { 0 };
        let mask = self.ht[t].mask();
        let idx = h as usize & mask;
        let entry = Box::new(Entry {
            key,
            val,
            next: self.ht[t].buckets[idx].take(),
        });
        self.ht[t].buckets[idx] = Some(entry);
        self.ht[t].used += 1;
    }

    /// Remove a key, returning the owned pair when present.
    pub fn remove(&mut self, key: &[u8]) -> Option<(K, V)> {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let h = Self::hash(key);
        let rehashing = self.is_rehashing();
        for t in 0..2 {
            if self.ht[t].size() == 0 {
                break;
            }
            let mask = self.ht[t].mask();
            let idx = h as usize & mask;
            // Unlink by rebuilding the chain head as needed.
            let mut cursor: *mut Link<K, V> = &mut self.ht[t].buckets[idx];
            // SAFETY: `cursor` always points at a live Link owned by this
            // table; each iteration either returns or advances to the `next`
            // field of the entry it just inspected, which outlives the loop.
            unsafe {
                while let Some(entry) = (*cursor).as_mut() {
                    if entry.key.borrow() == key {
                        let mut removed = (*cursor).take().unwrap();
                        *cursor = removed.next.take();
                        self.ht[t].used -= 1;
                        return Some((removed.key, removed.val));
                    }
                    cursor = &mut (*cursor).as_mut().unwrap().next;
                }
            }
            if !rehashing {
                break;
            }
        }
        None
    }

    /// Drop every entry and return to the unused state.
    pub fn clear(&mut self) {
        self.ht = [Table::empty(), Table::empty()];
        self.rehash_idx = -1;
    }

    // ── Random sampling ─────────────────────────────────────────────────────

    /// Uniform-ish random entry (bucket first, then chain position), without
    /// advancing the rehash.  `None` when empty.
    pub fn random_entry_ref<R: Rng>(&self, rng: &mut R) -> Option<(&K, &V)> {
        if self.len() == 0 {
            return None;
        }
        let entry: &Entry<K, V> = if self.is_rehashing() {
            let s0 = self.ht[0].size();
            let s1 = self.ht[1].size();
            let lower = self.rehash_idx as usize;
            loop {
                // Buckets below the migration cursor are already drained.
                let h = lower + rng.gen_range(0..(s0 + s1 - lower));
                let bucket = if h >= s0 {
                    self.ht[1].buckets[h - s0].as_deref()
                } else {
                    self.ht[0].buckets[h].as_deref()
                };
                if let Some(e) = bucket {
                    break pick_in_chain(e, rng);
                }
            }
        } else {
            loop {
                let h = rng.gen_range(0..self.ht[0].size());
                if let Some(e) = self.ht[0].buckets[h].as_deref() {
                    break pick_in_chain(e, rng);
                }
            }
        };
        Some((&entry.key, &entry.val))
    }

    /// Random entry with the usual single-step rehash on a mutating entry
    /// point.
    pub fn random_entry<R: Rng>(&mut self, rng: &mut R) -> Option<(&K, &V)> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.random_entry_ref(rng)
    }

    /// Sample up to `count` entries (duplicates possible).
    pub fn sample_entries<R: Rng>(&mut self, rng: &mut R, count: usize) -> Vec<(&K, &V)> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        let count = count.min(self.len());
        (0..count)
            .filter_map(|_| self.random_entry_ref(rng))
            .collect()
    }

    // ── Iteration ───────────────────────────────────────────────────────────

    /// Read-only iterator with a structural fingerprint asserted on drop.
    pub fn iter(&self) -> DictIter<'_, K, V> {
        DictIter {
            dict: self,
            table: 0,
            index: 0,
            chain: None,
            started: false,
            fingerprint: self.fingerprint(),
        }
    }

    /// Iterator that keeps single-step rehashing paused for its lifetime,
    /// so every live key is observed exactly once.
    pub fn safe_iter(&mut self) -> SafeDictIter<'_, K, V> {
        self.pause_rehash += 1;
        SafeDictIter {
            dict: self,
            table: 0,
            index: 0,
            chain_pos: 0,
        }
    }

    /// 64-bit digest of the structural state (table identities, sizes and
    /// used counts) used by read-only iterators to detect illegal mutation.
    pub fn fingerprint(&self) -> u64 {
        let integers = [
            self.ht[0].buckets.as_ptr() as u64,
            self.ht[0].size() as u64,
            self.ht[0].used as u64,
            self.ht[1].buckets.as_ptr() as u64,
            self.ht[1].size() as u64,
            self.ht[1].used as u64,
        ];
        let mut hash: u64 = 0;
        for v in integers.iter() {
            hash = hash.wrapping_add(*v);
            // Tomas Wang's 64-bit mix.
            hash = (!hash).wrapping_add(hash << 21);
            hash ^= hash >> 24;
            hash = hash.wrapping_add(hash << 3).wrapping_add(hash << 8);
            hash ^= hash >> 14;
            hash = hash.wrapping_add(hash << 2).wrapping_add(hash << 4);
            hash ^= hash >> 28;
            hash = hash.wrapping_add(hash << 31);
        }
        hash
    }

    // ── Scan ────────────────────────────────────────────────────────────────

    /// Visit the bucket(s) selected by `cursor`, invoking `f` per entry, and
    /// return the next cursor (0 when the traversal is complete).
    ///
    /// The cursor advances by reverse-binary increment, so buckets re-homed
    /// by an intervening resize are still visited; duplicate visits are
    /// possible and callers must tolerate them.
    pub fn scan<F: FnMut(&K, &V)>(&self, cursor: u64, mut f: F) -> u64 {
        if self.len() == 0 {
            return 0;
        }
        let mut v = cursor;
        if !self.is_rehashing() {
            let m0 = self.ht[0].mask() as u64;
            let mut cur = self.ht[0].buckets[(v & m0) as usize].as_deref();
            while let Some(e) = cur {
                f(&e.key, &e.val);
                cur = e.next.as_deref();
            }
            v |= !m0;
            v = v.reverse_bits().wrapping_add(1).reverse_bits();
            return v;
        }

        // While rehashing, scan the smaller table's bucket then every bucket
        // of the larger table that maps onto it.
        let (small, large) = if self.ht[0].size() <= self.ht[1].size() {
            (&self.ht[0], &self.ht[1])
        } else {
            (&self.ht[1], &self.ht[0])
        };
        let m0 = small.mask() as u64;
        let m1 = large.mask() as u64;

        let mut cur = small.buckets[(v & m0) as usize].as_deref();
        while let Some(e) = cur {
            f(&e.key, &e.val);
            cur = e.next.as_deref();
        }
        loop {
            let mut cur = large.buckets[(v & m1) as usize].as_deref();
            while let Some(e) = cur {
                f(&e.key, &e.val);
                cur = e.next.as_deref();
            }
            v |= !m1;
            v = v.reverse_bits().wrapping_add(1).reverse_bits();
            if v & (m0 ^ m1) == 0 {
                break;
            }
        }
        v
    }
}

fn pick_in_chain<'a, K, V, R: Rng>(head: &'a Entry<K, V>, rng: &mut R) -> &'a Entry<K, V> {
    let mut len = 0;
    let mut cur = Some(head);
    while let Some(e) = cur {
        len += 1;
        cur = e.next.as_deref();
    }
    let mut n = rng.gen_range(0..len);
    let mut cur = head;
    while n > 0 {
        cur = cur.next.as_deref().unwrap();
        n -= 1;
    }
    cur
}

// ─────────────────────────────────────────────────────────────────────────────
// Iterators
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only iterator; asserts on drop that the dict was not structurally
/// mutated while it was alive (see [`Dict::fingerprint`]).
pub struct DictIter<'a, K: Borrow<[u8]>, V> {
    dict: &'a Dict<K, V>,
    table: usize,
    index: usize,
    chain: Option<&'a Entry<K, V>>,
    started: bool,
    fingerprint: u64,
}

impl<'a, K: Borrow<[u8]>, V> Iterator for DictIter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<(&'a K, &'a V)> {
        loop {
            if let Some(e) = self.chain {
                self.chain = e.next.as_deref();
                return Some((&e.key, &e.val));
            }
            if self.started {
                self.index += 1;
            } else {
                self.started = true;
            }
            loop {
                let t = &self.dict.ht[self.table];
                if self.index >= t.size() {
                    if self.table == 0 && self.dict.is_rehashing() {
                        self.table = 1;
                        self.index = 0;
                        continue;
                    }
                    return None;
                }
                break;
            }
            self.chain = self.dict.ht[self.table].buckets[self.index].as_deref();
        }
    }
}

impl<'a, K: Borrow<[u8]>, V> Drop for DictIter<'a, K, V> {
    fn drop(&mut self) {
        // Mutation while a read-only iterator is live is a programming
        // error; fail fast in debug builds.
        debug_assert_eq!(self.fingerprint, self.dict.fingerprint());
    }
}

/// Rehash-pausing iterator; see [`Dict::safe_iter`].
///
/// Position is (table, bucket, offset-in-chain); resuming re-walks the chain
/// prefix, which is short by construction (chains shrink under resize).
pub struct SafeDictIter<'a, K, V> {
    dict: &'a mut Dict<K, V>,
    table: usize,
    index: usize,
    chain_pos: usize,
}

impl<'a, K: Borrow<[u8]>, V> SafeDictIter<'a, K, V> {
    /// Advance and yield the next entry.
    pub fn next_entry(&mut self) -> Option<(&K, &V)> {
        loop {
            if self.index >= self.dict.ht[self.table].size() {
                if self.table == 0 && self.dict.is_rehashing() {
                    self.table = 1;
                    self.index = 0;
                    self.chain_pos = 0;
                    continue;
                }
                return None;
            }
            let mut cur = self.dict.ht[self.table].buckets[self.index].as_deref();
            let mut skip = self.chain_pos;
            while skip > 0 {
                match cur {
                    Some(e) => cur = e.next.as_deref(),
                    None => break,
                }
                skip -= 1;
            }
            match cur {
                Some(e) => {
                    self.chain_pos += 1;
                    return Some((&e.key, &e.val));
                }
                None => {
                    self.index += 1;
                    self.chain_pos = 0;
                }
            }
        }
    }
}

impl<'a, K, V> Drop for SafeDictIter<'a, K, V> {
    fn drop(&mut self) {
        self.dict.pause_rehash -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ds::sds::Sds;

    #[test]
    fn add_get_remove() {
        let mut d: Dict<Sds, u64> = Dict::new();
        assert!(d.add(Sds::from("k1"), 1));
        assert!(!d.add(Sds::from("k1"), 2));
        assert_eq!(d.get(b"k1"), Some(&1));
        assert!(!d.replace(Sds::from("k1"), 3));
        assert_eq!(d.get(b"k1"), Some(&3));
        assert_eq!(d.remove(b"k1").map(|(_, v)| v), Some(3));
        assert_eq!(d.get(b"k1"), None);
    }

    #[test]
    fn rehash_migrates_everything() {
        let mut d: Dict<Sds, usize> = Dict::new();
        for i in 0..1000 {
            d.add(Sds::from(format!("key:{i}").as_str()), i);
        }
        while d.rehash(10) {}
        assert_eq!(d.len(), 1000);
        for i in 0..1000 {
            assert_eq!(d.get(format!("key:{i}").as_bytes()), Some(&i));
        }
    }

    #[test]
    fn scan_covers_all_keys() {
        let mut d: Dict<Sds, usize> = Dict::new();
        for i in 0..500 {
            d.add(Sds::from(format!("key:{i}").as_str()), i);
        }
        let mut seen = std::collections::HashSet::new();
        let mut cursor = 0u64;
        loop {
            cursor = d.scan(cursor, |k, _| {
                seen.insert(k.as_bytes().to_vec());
            });
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 500);
    }
}
