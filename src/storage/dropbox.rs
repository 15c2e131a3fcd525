//! Dropbox-backed key storage
//!
//! Stores each key as one file at <path>/<key>. Content above the
//! configured chunk size goes through an upload session; everything is
//! verified against Dropbox's content hash.

use super::{KeyStorage, ProgressFn, StorageError, StorageResult};
use crate::config::RemoteConfig;
use crate::dropbox::hash::ContentHasher;
use crate::dropbox::types::FileMetadata;
use crate::dropbox::{DbxError, DropboxClient};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

impl From<DbxError> for StorageError {
    fn from(e: DbxError) -> Self {
        match e {
            DbxError::Io(e) => StorageError::Io(e),
            DbxError::NotFound(what) => StorageError::NotFound(what),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Dropbox key storage backend
pub struct DropboxBackend {
    client: DropboxClient,
    config: RemoteConfig,
}

impl DropboxBackend {
    pub fn new(config: RemoteConfig) -> StorageResult<Self> {
        let client = DropboxClient::new(&config.token)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn store_attempt(
        &self,
        remote_path: &str,
        file: &Path,
        size: u64,
        progress: ProgressFn<'_>,
    ) -> StorageResult<()> {
        let mut reader = BufReader::new(File::open(file)?);
        let mut hasher = ContentHasher::new();

        let metadata = if size <= self.config.chunk_size {
            let mut data = Vec::with_capacity(size as usize);
            reader.read_to_end(&mut data)?;
            hasher.update(&data);
            let meta = self.client.upload(remote_path, &data)?;
            progress(data.len() as u64);
            meta
        } else {
            self.store_session(remote_path, &mut reader, &mut hasher, progress)?
        };

        verify_content_hash(remote_path, metadata.content_hash.as_deref(), hasher.finalize())
    }

    /// Chunked store through an upload session. The final short part
    /// rides along with the commit request.
    fn store_session(
        &self,
        remote_path: &str,
        reader: &mut impl Read,
        hasher: &mut ContentHasher,
        progress: ProgressFn<'_>,
    ) -> StorageResult<FileMetadata> {
        let chunk = self.config.chunk_size as usize;
        let session_id = self.client.upload_session_start()?;
        let mut buf = vec![0u8; chunk];
        let mut offset = 0u64;

        loop {
            let n = read_full(reader, &mut buf)?;
            hasher.update(&buf[..n]);
            // a short read means EOF
            if n < chunk {
                let meta = self
                    .client
                    .upload_session_finish(&session_id, offset, &buf[..n], remote_path)?;
                offset += n as u64;
                progress(offset);
                return Ok(meta);
            }
            self.client.upload_session_append(&session_id, offset, &buf[..n])?;
            offset += n as u64;
            progress(offset);
        }
    }
}

impl KeyStorage for DropboxBackend {
    fn init(&self) -> StorageResult<()> {
        self.client
            .check_user()
            .map_err(|e| StorageError::Backend(format!("token validation failed: {}", e)))?;
        self.client.create_folder(&self.config.path)?;
        Ok(())
    }

    fn store(&self, key: &str, file: &Path, progress: ProgressFn<'_>) -> StorageResult<()> {
        let remote_path = self.config.key_path(key);
        let size = std::fs::metadata(file)?.len();

        match self.store_attempt(&remote_path, file, size, &mut *progress) {
            // The session lost its place (e.g. a retried append landed
            // twice); start over once with a fresh session.
            Err(StorageError::Backend(msg)) if msg.contains("incorrect_offset") => {
                log::warn!("upload session for {} lost its offset, restarting", key);
                self.store_attempt(&remote_path, file, size, &mut *progress)
            }
            other => other,
        }
    }

    fn retrieve(&self, key: &str, file: &Path, progress: ProgressFn<'_>) -> StorageResult<()> {
        let remote_path = self.config.key_path(key);
        let out = File::create(file)?;
        let mut writer = HashingWriter::new(BufWriter::new(out));

        let metadata = self.client.download(&remote_path, &mut writer, progress)?;

        let (mut inner, hasher) = writer.into_parts();
        inner.flush()?;
        verify_content_hash(&remote_path, metadata.content_hash.as_deref(), hasher.finalize())
    }

    fn check_present(&self, key: &str) -> StorageResult<bool> {
        let remote_path = self.config.key_path(key);
        match self.client.get_metadata(&remote_path) {
            Ok(_) => Ok(true),
            Err(DbxError::NotFound(_)) => Ok(false),
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let remote_path = self.config.key_path(key);
        match self.client.delete(&remote_path) {
            Ok(()) => Ok(()),
            Err(DbxError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn verify_content_hash(
    path: &str,
    remote: Option<&str>,
    local: String,
) -> StorageResult<()> {
    match remote {
        Some(remote) if remote != local => Err(StorageError::Verify(format!(
            "content hash mismatch for {}: local {}, remote {}",
            path, local, remote
        ))),
        _ => Ok(()),
    }
}

/// Fill the buffer from the reader, short only at EOF
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Write adapter that feeds the content hasher as bytes pass through
struct HashingWriter<W> {
    inner: W,
    hasher: ContentHasher,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
        }
    }

    fn into_parts(self) -> (W, ContentHasher) {
        (self.inner, self.hasher)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_full_exact_and_short() {
        let data = vec![1u8; 10];
        let mut reader = &data[..];

        let mut buf = [0u8; 4];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        // tail is short, then EOF
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_hashing_writer_matches_direct_hash() {
        let data = b"stream me through the writer";
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(data).unwrap();

        let (inner, hasher) = writer.into_parts();
        assert_eq!(inner, data);
        assert_eq!(hasher.finalize(), ContentHasher::hash_bytes(data));
    }

    #[test]
    fn test_verify_content_hash() {
        assert!(verify_content_hash("/p/k", Some("aa"), "aa".to_string()).is_ok());
        // metadata without a hash cannot be checked
        assert!(verify_content_hash("/p/k", None, "aa".to_string()).is_ok());
        assert!(matches!(
            verify_content_hash("/p/k", Some("aa"), "bb".to_string()),
            Err(StorageError::Verify(_))
        ));
    }
}
