//! CLI argument types and parsing helpers.
mod cli;
pub(crate) mod defaults;
pub(crate) mod parsers;
mod types;


pub use cli::{Cli, Command, LoadArgs, ServeArgs};
pub use types::{PositiveU64, PositiveUsize};

pub(crate) use parsers::{parse_duration_arg, parse_duration_ms_arg, parse_ws_url};
