//! Dropbox content hash
//!
//! Dropbox identifies file content by the SHA-256 of the concatenated
//! SHA-256 digests of its 4 MiB blocks. Computed incrementally so
//! transfers can hash while streaming.

use sha2::{Digest, Sha256};

/// Block size the content hash is defined over
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Incremental content hash computation
pub struct ContentHasher {
    overall: Sha256,
    block: Sha256,
    block_len: usize,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            overall: Sha256::new(),
            block: Sha256::new(),
            block_len: 0,
        }
    }

    /// Feed more content bytes
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = BLOCK_SIZE - self.block_len;
            let take = room.min(data.len());
            self.block.update(&data[..take]);
            self.block_len += take;
            data = &data[take..];

            if self.block_len == BLOCK_SIZE {
                let digest = std::mem::replace(&mut self.block, Sha256::new()).finalize();
                self.overall.update(digest);
                self.block_len = 0;
            }
        }
    }

    /// Finish and return the lowercase hex hash
    pub fn finalize(mut self) -> String {
        if self.block_len > 0 {
            let digest = self.block.finalize();
            self.overall.update(digest);
        }
        hex::encode(self.overall.finalize())
    }

    /// Hash a complete in-memory buffer
    pub fn hash_bytes(data: &[u8]) -> String {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        // zero blocks: the overall hash covers nothing
        assert_eq!(
            ContentHasher::hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_single_block() {
        let data = b"annexed content";
        let block = Sha256::digest(data);
        let expected = hex::encode(Sha256::digest(block));
        assert_eq!(ContentHasher::hash_bytes(data), expected);
    }

    #[test]
    fn test_multiple_blocks() {
        // one full block plus a short tail
        let mut data = vec![0x5Au8; BLOCK_SIZE];
        data.extend_from_slice(b"tail");

        let mut concat = Vec::new();
        concat.extend_from_slice(Sha256::digest(&data[..BLOCK_SIZE]).as_slice());
        concat.extend_from_slice(Sha256::digest(&data[BLOCK_SIZE..]).as_slice());
        let expected = hex::encode(Sha256::digest(&concat));

        assert_eq!(ContentHasher::hash_bytes(&data), expected);
    }

    #[test]
    fn test_split_updates_match_single_update() {
        let data = vec![0x17u8; BLOCK_SIZE + 1000];
        let whole = ContentHasher::hash_bytes(&data);

        let mut hasher = ContentHasher::new();
        for piece in data.chunks(4096) {
            hasher.update(piece);
        }
        assert_eq!(hasher.finalize(), whole);
    }
}
