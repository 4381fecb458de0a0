//! Process-wide interned reply fragments.
//!
//! Hot replies — status lines, error lines, nil markers, small integers and
//! short bulk/array headers — are rendered once and shared for the process
//! lifetime.  Nothing here is ever mutated after construction.

use std::sync::OnceLock;

/// Small integers with a preformatted `:N\r\n` reply line.
pub const SHARED_INTEGERS: usize = 10000;
/// Bulk/array header lines preformatted for lengths below this bound.
pub const SHARED_BULKHDR_LEN: usize = 32;

// ── Fixed fragments ───────────────────────────────────────────────────────────

pub const CRLF: &[u8] = b"\r\n";
pub const OK: &[u8] = b"+OK\r\n";
pub const PONG: &[u8] = b"+PONG\r\n";
pub const ERR: &[u8] = b"-ERR\r\n";
pub const EMPTY_BULK: &[u8] = b"$0\r\n\r\n";
pub const CZERO: &[u8] = b":0\r\n";
pub const CONE: &[u8] = b":1\r\n";
pub const CNEGONE: &[u8] = b":-1\r\n";
pub const NULL_BULK: &[u8] = b"$-1\r\n";
pub const NULL_MULTIBULK: &[u8] = b"*-1\r\n";
pub const EMPTY_MULTIBULK: &[u8] = b"*0\r\n";

pub const WRONGTYPE_ERR: &[u8] =
    b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n";
pub const SYNTAX_ERR: &[u8] = b"-ERR syntax error\r\n";
pub const NOKEY_ERR: &[u8] = b"-ERR no such key\r\n";
pub const OUT_OF_RANGE_ERR: &[u8] = b"-ERR index out of range\r\n";
pub const OVERFLOW_ERR: &[u8] = b"-ERR increment or decrement would overflow\r\n";
pub const NOT_INTEGER_ERR: &[u8] = b"-ERR value is not an integer or out of range\r\n";
pub const NOT_FLOAT_ERR: &[u8] = b"-ERR value is not a valid float\r\n";
pub const OOM_ERR: &[u8] = b"-OOM command not allowed when used memory > 'maxmemory'\r\n";
pub const LOADING_ERR: &[u8] =
    b"-LOADING server is loading the dataset in memory\r\n";

/// Preformatted variable tables.
pub struct Shared {
    /// `":0\r\n"` .. `":9999\r\n"`.
    integers: Vec<Box<[u8]>>,
    /// `"*0\r\n"` .. `"*31\r\n"`.
    mbulkhdr: Vec<Box<[u8]>>,
    /// `"$0\r\n"` .. `"$31\r\n"`.
    bulkhdr: Vec<Box<[u8]>>,
}

impl Shared {
    fn build() -> Self {
        let integers = (0..SHARED_INTEGERS)
            .map(|i| format!(":{i}\r\n").into_bytes().into_boxed_slice())
            .collect();
        let mbulkhdr = (0..SHARED_BULKHDR_LEN)
            .map(|i| format!("*{i}\r\n").into_bytes().into_boxed_slice())
            .collect();
        let bulkhdr = (0..SHARED_BULKHDR_LEN)
            .map(|i| format!("${i}\r\n").into_bytes().into_boxed_slice())
            .collect();
        Shared {
            integers,
            mbulkhdr,
            bulkhdr,
        }
    }

    /// Integer reply line for `v` when preformatted, else `None`.
    #[inline]
    pub fn integer(&self, v: i64) -> Option<&[u8]> {
        if (0..SHARED_INTEGERS as i64).contains(&v) {
            Some(&self.integers[v as usize])
        } else {
            None
        }
    }

    /// Array header line for `len` when preformatted, else `None`.
    #[inline]
    pub fn mbulk_header(&self, len: usize) -> Option<&[u8]> {
        self.mbulkhdr.get(len).map(|b| &b[..])
    }

    /// Bulk header line for `len` when preformatted, else `None`.
    #[inline]
    pub fn bulk_header(&self, len: usize) -> Option<&[u8]> {
        self.bulkhdr.get(len).map(|b| &b[..])
    }
}

/// The process-wide table, built on first use.
pub fn shared() -> &'static Shared {
    static SHARED: OnceLock<Shared> = OnceLock::new();
    SHARED.get_or_init(Shared::build)
}
