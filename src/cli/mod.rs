//! Command-line argument handling for `rudis-server`.

pub mod args;

pub use args::{parse_args, parse_args_from, ParsedArgs};
