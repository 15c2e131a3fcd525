//! Dropbox API v2 request and response types
//!
//! Only the fields the remote actually uses are modelled.

use serde::{Deserialize, Serialize};

/// Argument for endpoints keyed by a single path
#[derive(Debug, Serialize)]
pub struct PathArg {
    pub path: String,
}

/// Commit information for uploads
#[derive(Debug, Serialize)]
pub struct CommitInfo {
    pub path: String,
    pub mode: &'static str,
    pub mute: bool,
}

impl CommitInfo {
    /// Standard commit for annexed objects: overwrite in place, no
    /// desktop notification.
    pub fn overwrite(path: &str) -> Self {
        Self {
            path: path.to_string(),
            mode: "overwrite",
            mute: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionStartArg {
    pub close: bool,
}

#[derive(Debug, Deserialize)]
pub struct SessionStartResult {
    pub session_id: String,
}

/// Position within an upload session
#[derive(Debug, Serialize)]
pub struct SessionCursor {
    pub session_id: String,
    pub offset: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionAppendArg {
    pub cursor: SessionCursor,
    pub close: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionFinishArg {
    pub cursor: SessionCursor,
    pub commit: CommitInfo,
}

/// Metadata for a stored file
#[derive(Debug, Clone, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content_hash: Option<String>,
}

/// Body of a 409 API error response
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error_summary: String,
    #[serde(default)]
    pub error: serde_json::Value,
}

/// check/user echo argument and result
#[derive(Debug, Serialize)]
pub struct EchoArg {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct EchoResult {
    pub result: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_info_serialization() {
        let arg = CommitInfo::overwrite("/git-annex/KEY1");
        let json = serde_json::to_string(&arg).unwrap();
        assert_eq!(
            json,
            r#"{"path":"/git-annex/KEY1","mode":"overwrite","mute":true}"#
        );
    }

    #[test]
    fn test_session_finish_serialization() {
        let arg = SessionFinishArg {
            cursor: SessionCursor {
                session_id: "sid123".to_string(),
                offset: 8192,
            },
            commit: CommitInfo::overwrite("/p/k"),
        };
        let json = serde_json::to_string(&arg).unwrap();
        assert!(json.contains(r#""session_id":"sid123""#));
        assert!(json.contains(r#""offset":8192"#));
        assert!(json.contains(r#""mode":"overwrite""#));
    }

    #[test]
    fn test_file_metadata_deserialization() {
        let json = r#"{
            ".tag": "file",
            "name": "KEY1",
            "path_lower": "/git-annex/key1",
            "id": "id:abc",
            "size": 1024,
            "content_hash": "deadbeef"
        }"#;
        let meta: FileMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.name, "KEY1");
        assert_eq!(meta.size, Some(1024));
        assert_eq!(meta.content_hash.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_api_error_body_deserialization() {
        let json = r#"{
            "error_summary": "path/not_found/",
            "error": {".tag": "path", "path": {".tag": "not_found"}}
        }"#;
        let body: ApiErrorBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.error_summary, "path/not_found/");
    }
}
