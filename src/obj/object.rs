//! Value objects: a tagged container over (type, encoding, payload) plus a
//! 24-bit access-clock stamp used by the LRU eviction sampler.
//!
//! Each of the five value types has one compact and one general encoding;
//! the concrete representation lives directly in the [`Value`] sum, so
//! cross-encoding operations branch on the variant and a transition swaps
//! the payload wholesale.
//!
//! Ownership replaces manual reference counting: a container owns its
//! elements, the key space owns its values.  The one payload that is
//! genuinely shared — a sorted-set member referenced by both the ordered
//! index and the member→score table — is an `Rc<Sds>`.

use std::borrow::Cow;
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::ds::dict::Dict;
use crate::ds::intset::Intset;
use crate::ds::sds::Sds;
use crate::ds::skiplist::Skiplist;
use crate::ds::ziplist::Ziplist;
use crate::util::{string2d, string2ll};

// ─────────────────────────────────────────────────────────────────────────────
// LRU stamp
// ─────────────────────────────────────────────────────────────────────────────

/// Width of the wrapping access-clock stamp.
pub const LRU_BITS: u32 = 24;
/// Largest stamp value before wrap-around.
pub const LRU_CLOCK_MAX: u32 = (1 << LRU_BITS) - 1;
/// Clock granularity in milliseconds per stamp tick.
pub const LRU_CLOCK_RESOLUTION: u64 = 1000;

/// Current LRU stamp for a given wall-clock millisecond reading.
#[inline]
pub fn lru_clock_from_ms(ms: u64) -> u32 {
    ((ms / LRU_CLOCK_RESOLUTION) & LRU_CLOCK_MAX as u64) as u32
}

/// Strings at or below this payload length use the single-allocation
/// immutable encoding.
pub const EMBSTR_SIZE_LIMIT: usize = 39;

// ─────────────────────────────────────────────────────────────────────────────
// Tags
// ─────────────────────────────────────────────────────────────────────────────

/// Value type as reported by `TYPE` and enforced by the per-type commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjType {
    String,
    List,
    Set,
    Zset,
    Hash,
}

impl ObjType {
    pub fn name(self) -> &'static str {
        match self {
            ObjType::String => "string",
            ObjType::List => "list",
            ObjType::Set => "set",
            ObjType::Zset => "zset",
            ObjType::Hash => "hash",
        }
    }
}

/// Concrete in-memory representation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Int,
    Embstr,
    Raw,
    Ziplist,
    Linkedlist,
    Ht,
    Intset,
    Skiplist,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Int => "int",
            Encoding::Embstr => "embstr",
            Encoding::Raw => "raw",
            Encoding::Ziplist => "ziplist",
            Encoding::Linkedlist => "linkedlist",
            Encoding::Ht => "hashtable",
            Encoding::Intset => "intset",
            Encoding::Skiplist => "skiplist",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// List payload: compact list-pack or general double-ended sequence of
/// string objects.
pub enum ListEnc {
    Ziplist(Ziplist),
    Linked(VecDeque<Robj>),
}

/// Hash payload: list-pack of alternating (field, value) or a field→value
/// table.
pub enum HashEnc {
    Ziplist(Ziplist),
    Ht(Dict<Sds, Sds>),
}

/// Set payload: sorted integer array or a members-only table.
pub enum SetEnc {
    Intset(Intset),
    Ht(Dict<Sds, ()>),
}

/// Sorted-set member key: an `Rc<Sds>` shared between the skip list and the
/// member→score table.
#[derive(Clone)]
pub struct ZKey(pub Rc<Sds>);

impl std::borrow::Borrow<[u8]> for ZKey {
    #[inline]
    fn borrow(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// General sorted-set payload: ordered index plus member→score table over
/// the same member allocations.
pub struct ZsetSkip {
    pub zsl: Skiplist,
    pub dict: Dict<ZKey, f64>,
}

impl ZsetSkip {
    pub fn new() -> Self {
        ZsetSkip {
            zsl: Skiplist::new(),
            dict: Dict::new(),
        }
    }
}

impl Default for ZsetSkip {
    fn default() -> Self {
        Self::new()
    }
}

/// Sorted-set payload: list-pack of alternating (member, score-text) kept
/// score-ordered, or the skip-list + table pair.
pub enum ZsetEnc {
    Ziplist(Ziplist),
    Skiplist(ZsetSkip),
}

/// The tagged payload union.
pub enum Value {
    /// String that is a canonical `i64`.
    Int(i64),
    /// Short immutable string in a single allocation.
    Embstr(Box<[u8]>),
    /// General mutable string.
    Raw(Sds),
    List(ListEnc),
    Hash(HashEnc),
    Set(SetEnc),
    Zset(ZsetEnc),
}

// ─────────────────────────────────────────────────────────────────────────────
// Robj
// ─────────────────────────────────────────────────────────────────────────────

/// A stored value: payload plus the wrapping access-clock stamp.
pub struct Robj {
    lru: Cell<u32>,
    pub value: Value,
}

impl Robj {
    pub fn new(value: Value) -> Self {
        Robj {
            lru: Cell::new(0),
            value,
        }
    }

    /// String object from raw bytes, choosing the compact immutable
    /// encoding for short payloads.
    pub fn string_from_slice(bytes: &[u8]) -> Self {
        if bytes.len() <= EMBSTR_SIZE_LIMIT {
            Robj::new(Value::Embstr(bytes.to_vec().into_boxed_slice()))
        } else {
            Robj::new(Value::Raw(Sds::from_slice(bytes)))
        }
    }

    /// String object taking ownership of an existing buffer (general
    /// encoding regardless of length).
    pub fn string_from_sds(s: Sds) -> Self {
        Robj::new(Value::Raw(s))
    }

    /// String object holding `v` in the integer encoding.
    pub fn from_i64(v: i64) -> Self {
        Robj::new(Value::Int(v))
    }

    // ── Tags ────────────────────────────────────────────────────────────────

    pub fn obj_type(&self) -> ObjType {
        match &self.value {
            Value::Int(_) | Value::Embstr(_) | Value::Raw(_) => ObjType::String,
            Value::List(_) => ObjType::List,
            Value::Hash(_) => ObjType::Hash,
            Value::Set(_) => ObjType::Set,
            Value::Zset(_) => ObjType::Zset,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match &self.value {
            Value::Int(_) => Encoding::Int,
            Value::Embstr(_) => Encoding::Embstr,
            Value::Raw(_) => Encoding::Raw,
            Value::List(ListEnc::Ziplist(_)) => Encoding::Ziplist,
            Value::List(ListEnc::Linked(_)) => Encoding::Linkedlist,
            Value::Hash(HashEnc::Ziplist(_)) => Encoding::Ziplist,
            Value::Hash(HashEnc::Ht(_)) => Encoding::Ht,
            Value::Set(SetEnc::Intset(_)) => Encoding::Intset,
            Value::Set(SetEnc::Ht(_)) => Encoding::Ht,
            Value::Zset(ZsetEnc::Ziplist(_)) => Encoding::Ziplist,
            Value::Zset(ZsetEnc::Skiplist(_)) => Encoding::Skiplist,
        }
    }

    pub fn is_string(&self) -> bool {
        self.obj_type() == ObjType::String
    }

    // ── LRU stamp ───────────────────────────────────────────────────────────

    /// Record an access at clock stamp `clock`.
    #[inline]
    pub fn touch(&self, clock: u32) {
        self.lru.set(clock);
    }

    #[inline]
    pub fn lru(&self) -> u32 {
        self.lru.get()
    }

    /// Estimated idle time in milliseconds given the current clock stamp,
    /// accounting for one wrap of the 24-bit counter.
    pub fn idle_time_ms(&self, clock: u32) -> u64 {
        let stamp = self.lru.get();
        let ticks = if clock >= stamp {
            (clock - stamp) as u64
        } else {
            (clock + (LRU_CLOCK_MAX - stamp)) as u64
        };
        ticks * LRU_CLOCK_RESOLUTION
    }

    // ── String accessors ────────────────────────────────────────────────────

    /// Directly addressable bytes of a string object, materializing the
    /// integer form to text when needed.
    pub fn string_bytes(&self) -> Cow<'_, [u8]> {
        match &self.value {
            Value::Int(v) => Cow::Owned(v.to_string().into_bytes()),
            Value::Embstr(b) => Cow::Borrowed(&b[..]),
            Value::Raw(s) => Cow::Borrowed(s.as_bytes()),
            _ => panic!("string_bytes on non-string object"),
        }
    }

    /// Byte length of the textual form of a string object.
    pub fn string_len(&self) -> usize {
        match &self.value {
            Value::Int(v) => {
                let mut n = *v;
                let mut digits = if n < 0 { 1 } else { 0 };
                loop {
                    digits += 1;
                    n /= 10;
                    if n == 0 {
                        break;
                    }
                }
                digits
            }
            Value::Embstr(b) => b.len(),
            Value::Raw(s) => s.len(),
            _ => panic!("string_len on non-string object"),
        }
    }

    /// Interpret a string object as an `i64`.
    pub fn get_i64(&self) -> Option<i64> {
        match &self.value {
            Value::Int(v) => Some(*v),
            Value::Embstr(b) => string2ll(b),
            Value::Raw(s) => string2ll(s.as_bytes()),
            _ => None,
        }
    }

    /// Interpret a string object as a double.
    pub fn get_f64(&self) -> Option<f64> {
        match &self.value {
            Value::Int(v) => Some(*v as f64),
            Value::Embstr(b) => string2d(b),
            Value::Raw(s) => string2d(s.as_bytes()),
            _ => None,
        }
    }

    /// Content equality for string objects, with an integer fast path.
    pub fn string_eq(&self, other: &Robj) -> bool {
        match (&self.value, &other.value) {
            (Value::Int(a), Value::Int(b)) => a == b,
            _ => self.string_bytes() == other.string_bytes(),
        }
    }

    /// Attempt to compress a string object into the integer or the short
    /// immutable encoding.  Mutable strings with large spare capacity are
    /// left untouched only when already compact.
    pub fn try_object_encoding(self) -> Robj {
        let lru = self.lru.get();
        let out = match self.value {
            Value::Raw(s) => match try_compact(s.as_bytes()) {
                Some(v) => v,
                None => Value::Raw(s),
            },
            Value::Embstr(b) => match string2ll(&b) {
                Some(v) => Value::Int(v),
                None => Value::Embstr(b),
            },
            other => other,
        };
        let o = Robj::new(out);
        o.lru.set(lru);
        o
    }

    /// Approximate payload footprint in bytes, used by the coarse
    /// used-memory accounting.  Deep for containers; only computed when a
    /// value is installed into or removed from the key space.
    pub fn mem_usage(&self) -> usize {
        const PER_ENTRY: usize = 48;
        match &self.value {
            Value::Int(_) => 16,
            Value::Embstr(b) => 16 + b.len(),
            Value::Raw(s) => 16 + s.len(),
            Value::List(ListEnc::Ziplist(zl)) => zl.blob_len(),
            Value::List(ListEnc::Linked(l)) => {
                l.iter().map(|o| o.mem_usage() + PER_ENTRY).sum::<usize>()
            }
            Value::Hash(HashEnc::Ziplist(zl)) => zl.blob_len(),
            Value::Hash(HashEnc::Ht(d)) => {
                let mut total = d.size() * 8;
                for (k, v) in d.iter() {
                    total += k.len() + v.len() + PER_ENTRY;
                }
                total
            }
            Value::Set(SetEnc::Intset(is)) => is.blob_len(),
            Value::Set(SetEnc::Ht(d)) => {
                let mut total = d.size() * 8;
                for (k, _) in d.iter() {
                    total += k.len() + PER_ENTRY;
                }
                total
            }
            Value::Zset(ZsetEnc::Ziplist(zl)) => zl.blob_len(),
            Value::Zset(ZsetEnc::Skiplist(zs)) => {
                let mut total = zs.dict.size() * 8;
                for (k, _) in zs.dict.iter() {
                    total += k.0.len() + 2 * PER_ENTRY;
                }
                total
            }
        }
    }
}

/// Compact byte content to `Int` or `Embstr` when eligible.
fn try_compact(bytes: &[u8]) -> Option<Value> {
    if bytes.len() <= 20 {
        if let Some(v) = string2ll(bytes) {
            return Some(Value::Int(v));
        }
    }
    if bytes.len() <= EMBSTR_SIZE_LIMIT {
        return Some(Value::Embstr(bytes.to_vec().into_boxed_slice()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_encodings() {
        let o = Robj::string_from_slice(b"12345");
        assert_eq!(o.encoding(), Encoding::Embstr);
        let o = o.try_object_encoding();
        assert_eq!(o.encoding(), Encoding::Int);
        assert_eq!(o.get_i64(), Some(12345));
        assert_eq!(&*o.string_bytes(), b"12345");

        let long = vec![b'x'; 64];
        let o = Robj::string_from_slice(&long).try_object_encoding();
        assert_eq!(o.encoding(), Encoding::Raw);
    }

    #[test]
    fn decoded_text_matches() {
        for v in [0i64, -1, 42, i64::MIN, i64::MAX] {
            let o = Robj::from_i64(v);
            assert_eq!(&*o.string_bytes(), v.to_string().as_bytes());
            assert_eq!(o.string_len(), v.to_string().len());
        }
    }
}
