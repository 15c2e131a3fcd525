//! Key storage backends
//!
//! This module defines the KeyStorage trait sitting between protocol
//! dispatch and the storage provider.

pub mod dropbox;

use std::path::Path;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("content verification failed: {0}")]
    Verify(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Progress callback, called with the total bytes moved so far
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64);

/// Key storage trait - the core abstraction for storage backends.
///
/// Keys are opaque identifiers supplied by git-annex; a backend maps
/// each to one stored object.
pub trait KeyStorage: Send + Sync {
    /// Validate the backend once, at initremote time (credential check,
    /// base folder creation).
    fn init(&self) -> StorageResult<()>;

    /// Upload the local file's content under the key.
    fn store(&self, key: &str, file: &Path, progress: ProgressFn<'_>) -> StorageResult<()>;

    /// Download the key's content into the local file.
    fn retrieve(&self, key: &str, file: &Path, progress: ProgressFn<'_>) -> StorageResult<()>;

    /// Does the backend hold this key?
    ///
    /// Err means the answer could not be determined; callers must not
    /// treat that as absence.
    fn check_present(&self, key: &str) -> StorageResult<bool>;

    /// Remove the key's content. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

// Re-export backends
pub use dropbox::DropboxBackend;
