//! Remote session plumbing
//!
//! The protocol channel to git-annex and the request dispatch loop.

pub mod connection;
pub mod runner;

pub use connection::{Connection, ProtocolError};
pub use runner::{BackendFactory, RemoteRunner};
