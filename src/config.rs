//! Remote configuration
//!
//! Settings arrive through the git-annex protocol (GETCONFIG/GETCREDS)
//! at INITREMOTE and PREPARE time, not from a file.

use thiserror::Error;

/// Default Dropbox folder for stored keys
pub const DEFAULT_PATH: &str = "/git-annex";

/// Default upload-session part size (50 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 50 * 1024 * 1024;

/// Dropbox rejects single upload requests above 150 MB
pub const MAX_CHUNK_SIZE: u64 = 150 * 1000 * 1000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid size {value:?}: {reason}")]
    InvalidSize { value: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Validated remote configuration
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// OAuth2 access token for the Dropbox API
    pub token: String,

    /// Base folder inside Dropbox, normalized to "/a/b" form
    pub path: String,

    /// Upload-session part size in bytes
    pub chunk_size: u64,
}

impl RemoteConfig {
    /// Build a configuration from raw protocol settings.
    ///
    /// `path` and `chunk` are the raw GETCONFIG values; None or empty
    /// means unset and selects the default.
    pub fn from_settings(
        token: String,
        path: Option<String>,
        chunk: Option<String>,
    ) -> Result<Self, ConfigError> {
        if token.is_empty() {
            return Err(ConfigError::Invalid("token must not be empty".to_string()));
        }

        let path = match path.as_deref() {
            None | Some("") => DEFAULT_PATH.to_string(),
            Some(raw) => normalize_path(raw)?,
        };

        let chunk_size = match chunk.as_deref() {
            None | Some("") => DEFAULT_CHUNK_SIZE,
            Some(raw) => {
                let size = parse_size(raw)?;
                if size == 0 {
                    return Err(ConfigError::InvalidSize {
                        value: raw.to_string(),
                        reason: "chunk size must be nonzero".to_string(),
                    });
                }
                if size > MAX_CHUNK_SIZE {
                    return Err(ConfigError::InvalidSize {
                        value: raw.to_string(),
                        reason: format!("chunk size exceeds the {} byte upload limit", MAX_CHUNK_SIZE),
                    });
                }
                size
            }
        };

        Ok(Self {
            token,
            path,
            chunk_size,
        })
    }

    /// Dropbox path holding the given key's content
    pub fn key_path(&self, key: &str) -> String {
        format!("{}/{}", self.path, key)
    }
}

/// Normalize a folder setting to "/a/b" form
fn normalize_path(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "/" {
        return Err(ConfigError::Invalid(format!(
            "path {:?} does not name a folder",
            raw
        )));
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{}", trimmed))
    }
}

/// Parse a human-friendly size: plain bytes, decimal (KB/MB/GB) or
/// binary (KiB/MiB/GiB) suffixes, case-insensitive.
pub fn parse_size(raw: &str) -> Result<u64, ConfigError> {
    let s = raw.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);

    let value: u64 = digits.parse().map_err(|_| ConfigError::InvalidSize {
        value: raw.to_string(),
        reason: "expected a number with an optional unit suffix".to_string(),
    })?;

    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" | "k" => 1000,
        "mb" | "m" => 1000 * 1000,
        "gb" | "g" => 1000 * 1000 * 1000,
        "kib" => 1024,
        "mib" => 1024 * 1024,
        "gib" => 1024 * 1024 * 1024,
        other => {
            return Err(ConfigError::InvalidSize {
                value: raw.to_string(),
                reason: format!("unknown unit {:?}", other),
            })
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| ConfigError::InvalidSize {
            value: raw.to_string(),
            reason: "size overflows".to_string(),
        })
}
