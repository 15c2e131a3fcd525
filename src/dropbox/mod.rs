//! Dropbox HTTP API v2 client
//!
//! Thin blocking client covering the endpoints the remote needs: RPC
//! calls carry JSON bodies against api.dropboxapi.com; content calls
//! carry their arguments in the Dropbox-API-Arg header against
//! content.dropboxapi.com.

pub mod hash;
pub mod types;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use self::types::{
    ApiErrorBody, CommitInfo, EchoArg, EchoResult, FileMetadata, PathArg, SessionAppendArg,
    SessionCursor, SessionFinishArg, SessionStartArg, SessionStartResult,
};

const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// Read size for streaming downloads
const DOWNLOAD_BUF_SIZE: usize = 64 * 1024;

const MAX_ATTEMPTS: u32 = 4;
const MAX_BACKOFF_SECS: u64 = 32;

/// Dropbox API errors
#[derive(Debug, Error)]
pub enum DbxError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    #[error("API error: {summary}")]
    Api { summary: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl DbxError {
    /// Worth retrying after a delay?
    fn is_transient(&self) -> bool {
        matches!(
            self,
            DbxError::Transport(_) | DbxError::RateLimited { .. } | DbxError::Server { .. }
        )
    }
}

/// Dropbox API client
pub struct DropboxClient {
    http: reqwest::blocking::Client,
    token: String,
}

impl DropboxClient {
    pub fn new(token: &str) -> Result<Self, DbxError> {
        // No overall timeout: uploads of full chunks can legitimately
        // run for minutes.
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()?;

        Ok(Self {
            http,
            token: token.to_string(),
        })
    }

    /// Validate the access token (check/user echo)
    pub fn check_user(&self) -> Result<(), DbxError> {
        let arg = EchoArg {
            query: "git-annex".to_string(),
        };
        let result: EchoResult = self.rpc("check/user", &arg)?;
        if result.result != arg.query {
            return Err(DbxError::UnexpectedResponse(format!(
                "check/user echoed {:?}",
                result.result
            )));
        }
        Ok(())
    }

    pub fn get_metadata(&self, path: &str) -> Result<FileMetadata, DbxError> {
        self.rpc(
            "files/get_metadata",
            &PathArg {
                path: path.to_string(),
            },
        )
    }

    pub fn delete(&self, path: &str) -> Result<(), DbxError> {
        let _: serde_json::Value = self.rpc(
            "files/delete_v2",
            &PathArg {
                path: path.to_string(),
            },
        )?;
        Ok(())
    }

    /// Create a folder; an already-existing folder is success.
    pub fn create_folder(&self, path: &str) -> Result<(), DbxError> {
        let result: Result<serde_json::Value, DbxError> = self.rpc(
            "files/create_folder_v2",
            &PathArg {
                path: path.to_string(),
            },
        );
        match result {
            Ok(_) => Ok(()),
            Err(DbxError::Api { summary }) if summary.contains("conflict") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Single-request upload, for payloads at or below the chunk size
    pub fn upload(&self, path: &str, data: &[u8]) -> Result<FileMetadata, DbxError> {
        let arg = header_safe_json(&CommitInfo::overwrite(path))?;
        with_retry("files/upload", || {
            let resp = self
                .http
                .post(format!("{}/files/upload", CONTENT_BASE))
                .bearer_auth(&self.token)
                .header("Dropbox-API-Arg", arg.as_str())
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data.to_vec())
                .send()?;
            let resp = check_response(resp)?;
            Ok(resp.json()?)
        })
    }

    pub fn upload_session_start(&self) -> Result<String, DbxError> {
        let arg = header_safe_json(&SessionStartArg { close: false })?;
        let result: SessionStartResult = with_retry("files/upload_session/start", || {
            let resp = self
                .http
                .post(format!("{}/files/upload_session/start", CONTENT_BASE))
                .bearer_auth(&self.token)
                .header("Dropbox-API-Arg", arg.as_str())
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .send()?;
            let resp = check_response(resp)?;
            Ok(resp.json()?)
        })?;
        Ok(result.session_id)
    }

    pub fn upload_session_append(
        &self,
        session_id: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DbxError> {
        let arg = header_safe_json(&SessionAppendArg {
            cursor: SessionCursor {
                session_id: session_id.to_string(),
                offset,
            },
            close: false,
        })?;
        with_retry("files/upload_session/append_v2", || {
            let resp = self
                .http
                .post(format!("{}/files/upload_session/append_v2", CONTENT_BASE))
                .bearer_auth(&self.token)
                .header("Dropbox-API-Arg", arg.as_str())
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data.to_vec())
                .send()?;
            check_response(resp)?;
            Ok(())
        })
    }

    pub fn upload_session_finish(
        &self,
        session_id: &str,
        offset: u64,
        data: &[u8],
        path: &str,
    ) -> Result<FileMetadata, DbxError> {
        let arg = header_safe_json(&SessionFinishArg {
            cursor: SessionCursor {
                session_id: session_id.to_string(),
                offset,
            },
            commit: CommitInfo::overwrite(path),
        })?;
        with_retry("files/upload_session/finish", || {
            let resp = self
                .http
                .post(format!("{}/files/upload_session/finish", CONTENT_BASE))
                .bearer_auth(&self.token)
                .header("Dropbox-API-Arg", arg.as_str())
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data.to_vec())
                .send()?;
            let resp = check_response(resp)?;
            Ok(resp.json()?)
        })
    }

    /// Download a file, streaming its body into the writer.
    ///
    /// The progress callback receives cumulative byte counts. The
    /// returned metadata comes from the Dropbox-API-Result header, so
    /// it is available even though the body carries the content.
    pub fn download<W: Write>(
        &self,
        path: &str,
        writer: &mut W,
        progress: &mut dyn FnMut(u64),
    ) -> Result<FileMetadata, DbxError> {
        let arg = header_safe_json(&PathArg {
            path: path.to_string(),
        })?;
        // Retry only covers establishing the response; once bytes are
        // flowing a failure aborts the transfer and git-annex re-requests.
        let mut resp = with_retry("files/download", || {
            let resp = self
                .http
                .post(format!("{}/files/download", CONTENT_BASE))
                .bearer_auth(&self.token)
                .header("Dropbox-API-Arg", arg.as_str())
                .send()?;
            check_response(resp)
        })?;

        let meta: FileMetadata = match resp.headers().get("dropbox-api-result") {
            Some(value) => serde_json::from_slice(value.as_bytes())?,
            None => {
                return Err(DbxError::UnexpectedResponse(
                    "missing Dropbox-API-Result header".to_string(),
                ))
            }
        };

        let mut buf = vec![0u8; DOWNLOAD_BUF_SIZE];
        let mut total = 0u64;
        loop {
            let n = resp.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            total += n as u64;
            progress(total);
        }

        Ok(meta)
    }

    /// RPC endpoint call: JSON body in, JSON result out
    fn rpc<A: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        arg: &A,
    ) -> Result<R, DbxError> {
        with_retry(endpoint, || {
            let resp = self
                .http
                .post(format!("{}/{}", API_BASE, endpoint))
                .bearer_auth(&self.token)
                .json(arg)
                .send()?;
            let resp = check_response(resp)?;
            Ok(resp.json()?)
        })
    }
}

/// Retry transient failures with exponential backoff; rate limits wait
/// out the server-requested delay instead.
fn with_retry<T>(
    op_name: &str,
    mut op: impl FnMut() -> Result<T, DbxError>,
) -> Result<T, DbxError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < MAX_ATTEMPTS && e.is_transient() => {
                attempt += 1;
                let delay = match &e {
                    DbxError::RateLimited { retry_after } => {
                        Duration::from_secs((*retry_after).max(1))
                    }
                    _ => Duration::from_secs(2u64.pow(attempt).min(MAX_BACKOFF_SECS)),
                };
                log::warn!("{} failed ({}), retrying in {:?}", op_name, e, delay);
                thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Map a non-success response to an error
fn check_response(
    resp: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, DbxError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());
    let body = resp.text().unwrap_or_default();
    Err(classify_error(status.as_u16(), &body, retry_after))
}

fn classify_error(status: u16, body: &str, retry_after: Option<u64>) -> DbxError {
    match status {
        401 => DbxError::Auth(body.trim().to_string()),
        409 => match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(api) if api.error_summary.contains("not_found") => {
                DbxError::NotFound(api.error_summary)
            }
            Ok(api) => DbxError::Api {
                summary: api.error_summary,
            },
            Err(_) => DbxError::UnexpectedResponse(format!("HTTP 409: {}", body.trim())),
        },
        429 => DbxError::RateLimited {
            retry_after: retry_after.unwrap_or(1),
        },
        500..=599 => DbxError::Server { status },
        _ => DbxError::UnexpectedResponse(format!("HTTP {}: {}", status, body.trim())),
    }
}

/// Serialize an argument for the Dropbox-API-Arg header.
///
/// Header values must stay within ASCII, so non-ASCII characters are
/// escaped as \uXXXX.
fn header_safe_json<T: Serialize>(arg: &T) -> Result<String, DbxError> {
    let json = serde_json::to_string(arg)?;
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units).iter() {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(out)
}
