//! Dynamic byte string.
//!
//! `Sds` is a length-prefixed, binary-safe byte buffer with an amortised
//! growth policy tuned for append-heavy workloads: the spare capacity kept
//! after a grow doubles the used length up to [`SDS_MAX_PREALLOC`], beyond
//! which each grow adds a flat [`SDS_MAX_PREALLOC`] bytes.  Keys, string
//! payloads, and per-client query buffers are all `Sds` values.
//!
//! Allocation failure aborts the process (the global allocator's behaviour);
//! callers treat growth as infallible.

use std::borrow::Borrow;
use std::fmt;
use std::io::{self, Read};
use std::ops::Deref;

/// Growth-doubling ceiling: 1 MiB.
pub const SDS_MAX_PREALLOC: usize = 1024 * 1024;

/// Length-prefixed mutable byte string.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sds {
    buf: Vec<u8>,
}

impl Sds {
    /// Empty string with no preallocated space.
    pub fn new() -> Self {
        Sds { buf: Vec::new() }
    }

    /// Empty string with `cap` bytes of spare capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Sds {
            buf: Vec::with_capacity(cap),
        }
    }

    /// Copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Sds { buf: bytes.to_vec() }
    }

    /// Used length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Spare capacity available without reallocating.
    #[inline]
    pub fn avail(&self) -> usize {
        self.buf.capacity() - self.buf.len()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Ensure at least `addlen` more bytes can be appended without another
    /// allocation.  Greedy policy: double the final length while it stays
    /// under [`SDS_MAX_PREALLOC`], otherwise add a flat 1 MiB.
    pub fn make_room_for(&mut self, addlen: usize) {
        if self.avail() >= addlen {
            return;
        }
        let newlen = self.buf.len() + addlen;
        let target = if newlen < SDS_MAX_PREALLOC {
            newlen * 2
        } else {
            newlen + SDS_MAX_PREALLOC
        };
        self.buf.reserve_exact(target - self.buf.len());
    }

    /// Append raw bytes (binary-safe).
    pub fn append(&mut self, bytes: &[u8]) {
        self.make_room_for(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    /// Append another `Sds`.
    pub fn append_sds(&mut self, other: &Sds) {
        self.append(other.as_bytes());
    }

    /// Append up to `max` bytes read from `r` directly into spare capacity.
    /// Returns the number of bytes actually read (0 on EOF).
    pub fn append_from<R: Read>(&mut self, r: &mut R, max: usize) -> io::Result<usize> {
        self.make_room_for(max);
        let old = self.buf.len();
        self.buf.resize(old + max, 0);
        match r.read(&mut self.buf[old..old + max]) {
            Ok(n) => {
                self.buf.truncate(old + n);
                Ok(n)
            }
            Err(e) => {
                self.buf.truncate(old);
                Err(e)
            }
        }
    }

    /// Grow to `len` bytes, zero-filling the new tail.  No-op when already
    /// at least that long.
    pub fn grow_zeroed(&mut self, len: usize) {
        if len <= self.buf.len() {
            return;
        }
        self.make_room_for(len - self.buf.len());
        self.buf.resize(len, 0);
    }

    /// Drop all content, keeping the allocation for reuse.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Truncate to `len` bytes (no-op when already shorter).
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Keep only the inclusive range `[start, end]`; negative indexes count
    /// from the end (-1 is the last byte).  An inverted range empties the
    /// string.
    pub fn range(&mut self, start: isize, end: isize) {
        let len = self.buf.len() as isize;
        if len == 0 {
            return;
        }
        let mut s = if start < 0 { (len + start).max(0) } else { start };
        let mut e = if end < 0 { (len + end).max(0) } else { end };
        if e >= len {
            e = len - 1;
        }
        if s > e || s >= len {
            self.buf.clear();
            return;
        }
        if s < 0 {
            s = 0;
        }
        let (s, e) = (s as usize, e as usize);
        self.buf.copy_within(s..=e, 0);
        self.buf.truncate(e - s + 1);
    }

    /// Independent copy.
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Overwrite `self.buf[offset..offset+bytes.len()]`, zero-padding any gap
    /// between the current length and `offset`.
    pub fn overwrite_at(&mut self, offset: usize, bytes: &[u8]) {
        let needed = offset + bytes.len();
        self.grow_zeroed(needed);
        self.buf[offset..needed].copy_from_slice(bytes);
    }
}

impl Deref for Sds {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl Borrow<[u8]> for Sds {
    #[inline]
    fn borrow(&self) -> &[u8] {
        &self.buf
    }
}

impl AsRef<[u8]> for Sds {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl From<&[u8]> for Sds {
    fn from(b: &[u8]) -> Self {
        Sds::from_slice(b)
    }
}

impl From<Vec<u8>> for Sds {
    fn from(buf: Vec<u8>) -> Self {
        Sds { buf }
    }
}

impl From<&str> for Sds {
    fn from(s: &str) -> Self {
        Sds::from_slice(s.as_bytes())
    }
}

impl fmt::Debug for Sds {
    // Quoted lossy text; keys are overwhelmingly printable and a hex dump
    // would drown the interesting part of a log line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.buf))
    }
}
