// rudis — in-memory key/value store core

pub mod ae;
pub mod cli;
pub mod command;
pub mod db;
pub mod ds;
pub mod evict;
pub mod expire;
pub mod net;
pub mod obj;
pub mod protocol;
pub mod server;
pub mod types;
pub mod util;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level convenience re-exports for the most common entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// Length-prefixed, binary-safe dynamic byte string.
pub use ds::sds::Sds;
/// Contiguous variable-width encoded sequence of small items.
pub use ds::ziplist::Ziplist;
/// Sorted, unique, promoting-encoding integer array.
pub use ds::intset::Intset;
/// Incrementally-rehashed chained hash table.
pub use ds::dict::Dict;
/// Probabilistic ordered index with rank support.
pub use ds::skiplist::Skiplist;
/// Polymorphic value object (type tag + encoding + payload).
pub use obj::object::Robj;
/// One logical database: key space + expire set + eviction sampling buffer.
pub use db::Db;
/// The event loop driving all I/O and timers.
pub use ae::AeEventLoop;
/// Whole-process server state.
pub use server::Server;
/// Server configuration assembled from CLI flags.
pub use server::Config;

// ─────────────────────────────────────────────────────────────────────────────
// Version
// ─────────────────────────────────────────────────────────────────────────────

pub const RUDIS_VERSION_MAJOR: i32 = 0;
pub const RUDIS_VERSION_MINOR: i32 = 1;
pub const RUDIS_VERSION_RELEASE: i32 = 0;
pub const RUDIS_VERSION_STRING: &str = "0.1.0";

/// Returns the library version string (e.g. `"0.1.0"`).
pub fn version_string() -> &'static str {
    RUDIS_VERSION_STRING
}
