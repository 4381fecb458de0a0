//! Polymorphic value objects and process-wide interned replies.

pub mod object;
pub mod shared;

pub use object::{Encoding, ObjType, Robj, Value};
pub use shared::{shared, Shared};
