//! git-annex external special remote protocol
//!
//! Line-oriented request/reply messages exchanged with git-annex over
//! stdin/stdout, plus the parser for incoming request lines.

pub mod parse;
pub mod types;

pub use parse::{parse_request, ParseError};
pub use types::{Direction, Reply, Request, EXPENSIVE_COST, PROTOCOL_VERSION};
