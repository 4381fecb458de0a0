//! Networking: listening sockets, per-client state, and the read/write
//! event handlers that connect sockets to the command pipeline.

pub mod anet;
pub mod client;
pub mod handlers;

pub use client::{Client, ClientStream};
