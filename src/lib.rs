//! git-annex special remote for Dropbox
//!
//! This crate implements a git-annex external special remote that keeps
//! annexed objects in a Dropbox folder. It speaks the line-oriented
//! external special remote protocol over stdin/stdout and maps store,
//! retrieve, presence-check and remove operations onto the Dropbox HTTP
//! API, using upload sessions for content above the configured chunk
//! size.

pub mod config;
pub mod dropbox;
pub mod protocol;
pub mod remote;
pub mod storage;

pub use config::RemoteConfig;
pub use remote::{BackendFactory, ProtocolError, RemoteRunner};
pub use storage::{DropboxBackend, KeyStorage, StorageError};
