//! External special remote protocol types
//!
//! Defines the message vocabulary exchanged with git-annex over
//! stdin/stdout. One message per line, UTF-8.

use std::fmt;
use std::path::PathBuf;

/// Protocol version announced to git-annex at startup
pub const PROTOCOL_VERSION: u32 = 1;

/// Cost class reported for GETCOST (git-annex's expensiveRemoteCost)
pub const EXPENSIVE_COST: u32 = 200;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Store,
    Retrieve,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Store => "STORE",
            Direction::Retrieve => "RETRIEVE",
        }
    }
}

impl TryFrom<&str> for Direction {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "STORE" => Ok(Direction::Store),
            "RETRIEVE" => Ok(Direction::Retrieve),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests sent by git-annex
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// One-time remote setup and configuration validation
    InitRemote,
    /// Per-run setup before any transfer requests
    Prepare,
    /// Move content between the local file and the remote
    Transfer {
        direction: Direction,
        key: String,
        /// May contain spaces; everything after the key
        file: PathBuf,
    },
    /// Does the remote hold this key?
    CheckPresent { key: String },
    /// Remove the key's content from the remote
    Remove { key: String },
    /// Query for the remote's cost class
    GetCost,
    /// Query for the remote's availability class
    GetAvailability,
    /// Does this remote support the export interface?
    ExportSupported,
    /// Describe the accepted initremote settings
    ListConfigs,
    /// Protocol extensions git-annex offers
    Extensions(Vec<String>),
}

/// Replies sent back to git-annex
///
/// Each variant renders to exactly one protocol line via Display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Version(u32),
    InitRemoteSuccess,
    InitRemoteFailure(String),
    PrepareSuccess,
    PrepareFailure(String),
    TransferSuccess(Direction, String),
    TransferFailure(Direction, String, String),
    CheckPresentSuccess(String),
    CheckPresentFailure(String),
    CheckPresentUnknown(String, String),
    RemoveSuccess(String),
    RemoveFailure(String, String),
    Cost(u32),
    AvailabilityGlobal,
    ExportSupportedFailure,
    /// One accepted initremote setting (LISTCONFIGS reply line)
    Config { name: String, description: String },
    ConfigEnd,
    /// No protocol extensions in use
    Extensions,
    UnsupportedRequest,
}

/// Flatten a message to a single protocol line
fn sanitize(msg: &str) -> String {
    msg.replace(['\n', '\r'], " ")
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Version(v) => write!(f, "VERSION {}", v),
            Reply::InitRemoteSuccess => write!(f, "INITREMOTE-SUCCESS"),
            Reply::InitRemoteFailure(msg) => {
                write!(f, "INITREMOTE-FAILURE {}", sanitize(msg))
            }
            Reply::PrepareSuccess => write!(f, "PREPARE-SUCCESS"),
            Reply::PrepareFailure(msg) => write!(f, "PREPARE-FAILURE {}", sanitize(msg)),
            Reply::TransferSuccess(dir, key) => {
                write!(f, "TRANSFER-SUCCESS {} {}", dir, key)
            }
            Reply::TransferFailure(dir, key, msg) => {
                write!(f, "TRANSFER-FAILURE {} {} {}", dir, key, sanitize(msg))
            }
            Reply::CheckPresentSuccess(key) => write!(f, "CHECKPRESENT-SUCCESS {}", key),
            Reply::CheckPresentFailure(key) => write!(f, "CHECKPRESENT-FAILURE {}", key),
            Reply::CheckPresentUnknown(key, msg) => {
                write!(f, "CHECKPRESENT-UNKNOWN {} {}", key, sanitize(msg))
            }
            Reply::RemoveSuccess(key) => write!(f, "REMOVE-SUCCESS {}", key),
            Reply::RemoveFailure(key, msg) => {
                write!(f, "REMOVE-FAILURE {} {}", key, sanitize(msg))
            }
            Reply::Cost(cost) => write!(f, "COST {}", cost),
            Reply::AvailabilityGlobal => write!(f, "AVAILABILITY GLOBAL"),
            Reply::ExportSupportedFailure => write!(f, "EXPORTSUPPORTED-FAILURE"),
            Reply::Config { name, description } => {
                write!(f, "CONFIG {} {}", name, sanitize(description))
            }
            Reply::ConfigEnd => write!(f, "CONFIGEND"),
            Reply::Extensions => write!(f, "EXTENSIONS"),
            Reply::UnsupportedRequest => write!(f, "UNSUPPORTED-REQUEST"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_lines() {
        assert_eq!(Reply::Version(1).to_string(), "VERSION 1");
        assert_eq!(
            Reply::TransferSuccess(Direction::Store, "KEY1".to_string()).to_string(),
            "TRANSFER-SUCCESS STORE KEY1"
        );
        assert_eq!(
            Reply::CheckPresentUnknown("KEY1".to_string(), "timed out".to_string()).to_string(),
            "CHECKPRESENT-UNKNOWN KEY1 timed out"
        );
        assert_eq!(Reply::Cost(EXPENSIVE_COST).to_string(), "COST 200");
        assert_eq!(Reply::UnsupportedRequest.to_string(), "UNSUPPORTED-REQUEST");
    }

    #[test]
    fn test_failure_message_flattened() {
        let reply = Reply::TransferFailure(
            Direction::Retrieve,
            "KEY1".to_string(),
            "first line\nsecond line".to_string(),
        );
        assert_eq!(
            reply.to_string(),
            "TRANSFER-FAILURE RETRIEVE KEY1 first line second line"
        );
    }

    #[test]
    fn test_direction_round_trip() {
        assert_eq!(Direction::try_from("STORE").unwrap(), Direction::Store);
        assert_eq!(Direction::try_from("RETRIEVE").unwrap(), Direction::Retrieve);
        assert!(Direction::try_from("COPY").is_err());
    }
}
