//! Int-set: a sorted array of unique integers with a promoting element width.
//!
//! The in-use width (16, 32, or 64 bits) is the smallest that holds every
//! member.  Inserting a value that does not fit promotes every element to
//! the wider form; because the new value is then strictly smaller or larger
//! than all existing members, it lands at one end of the array.  Widths
//! never demote.

use rand::Rng;

/// Element storage at the three supported widths.
#[derive(Clone, Debug)]
enum Storage {
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

/// Sorted, unique, promoting-encoding integer array.
#[derive(Clone, Debug)]
pub struct Intset {
    storage: Storage,
}

impl Default for Intset {
    fn default() -> Self {
        Self::new()
    }
}

impl Intset {
    /// Empty set at the narrowest width.
    pub fn new() -> Self {
        Intset {
            storage: Storage::I16(Vec::new()),
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::I16(v) => v.len(),
            Storage::I32(v) => v.len(),
            Storage::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate heap footprint of the element array in bytes.
    pub fn blob_len(&self) -> usize {
        match &self.storage {
            Storage::I16(v) => v.len() * 2,
            Storage::I32(v) => v.len() * 4,
            Storage::I64(v) => v.len() * 8,
        }
    }

    /// Width of the current encoding in bytes (2, 4 or 8).
    pub fn encoding_width(&self) -> usize {
        match &self.storage {
            Storage::I16(_) => 2,
            Storage::I32(_) => 4,
            Storage::I64(_) => 8,
        }
    }

    fn width_for(value: i64) -> usize {
        if value >= i16::MIN as i64 && value <= i16::MAX as i64 {
            2
        } else if value >= i32::MIN as i64 && value <= i32::MAX as i64 {
            4
        } else {
            8
        }
    }

    /// Membership test.
    pub fn contains(&self, value: i64) -> bool {
        if Self::width_for(value) > self.encoding_width() {
            return false;
        }
        self.search(value).is_ok()
    }

    /// Insert `value`; returns `false` when it was already present.
    pub fn add(&mut self, value: i64) -> bool {
        if Self::width_for(value) > self.encoding_width() {
            self.upgrade_and_add(value);
            return true;
        }
        match self.search(value) {
            Ok(_) => false,
            Err(at) => {
                match &mut self.storage {
                    Storage::I16(v) => v.insert(at, value as i16),
                    Storage::I32(v) => v.insert(at, value as i32),
                    Storage::I64(v) => v.insert(at, value),
                }
                true
            }
        }
    }

    /// Remove `value`; returns `false` when it was not a member.
    pub fn remove(&mut self, value: i64) -> bool {
        if Self::width_for(value) > self.encoding_width() {
            return false;
        }
        match self.search(value) {
            Ok(at) => {
                match &mut self.storage {
                    Storage::I16(v) => {
                        v.remove(at);
                    }
                    Storage::I32(v) => {
                        v.remove(at);
                    }
                    Storage::I64(v) => {
                        v.remove(at);
                    }
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Member at sorted position `pos`.
    pub fn get(&self, pos: usize) -> Option<i64> {
        if pos >= self.len() {
            return None;
        }
        Some(match &self.storage {
            Storage::I16(v) => v[pos] as i64,
            Storage::I32(v) => v[pos] as i64,
            Storage::I64(v) => v[pos],
        })
    }

    /// Uniformly random member, `None` when empty.
    pub fn random<R: Rng>(&self, rng: &mut R) -> Option<i64> {
        if self.is_empty() {
            return None;
        }
        self.get(rng.gen_range(0..self.len()))
    }

    /// Iterator in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len()).map(move |i| self.get(i).unwrap())
    }

    fn search(&self, value: i64) -> Result<usize, usize> {
        match &self.storage {
            Storage::I16(v) => v.binary_search(&(value as i16)),
            Storage::I32(v) => v.binary_search(&(value as i32)),
            Storage::I64(v) => v.binary_search(&value),
        }
    }

    /// Promote every element to the width required by `value`, then place
    /// `value` at whichever end its sign dictates.  All existing members fit
    /// at the higher width by construction.
    fn upgrade_and_add(&mut self, value: i64) {
        let prepend = value < 0;
        let widened: Vec<i64> = self.iter().collect();
        let target = Self::width_for(value);

        macro_rules! build {
            ($t:ty) => {{
                let mut v: Vec<$t> = widened.iter().map(|&x| x as $t).collect();
                if prepend {
                    v.insert(0, value as $t);
                } else {
                    v.push(value as $t);
                }
                v
            }};
        }

        self.storage = if target == 4 {
            Storage::I32(build!(i32))
        } else {
            Storage::I64(build!(i64))
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_on_overflow() {
        let mut is = Intset::new();
        assert!(is.add(1));
        assert!(is.add(-5));
        assert_eq!(is.encoding_width(), 2);
        assert!(is.add(1 << 31));
        assert_eq!(is.encoding_width(), 8);
        assert_eq!(is.get(is.len() - 1), Some(1 << 31));
        assert!(is.contains(-5));
        assert!(!is.add(1));
    }
}
