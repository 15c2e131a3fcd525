//! Request line parsing
//!
//! Parses lines read from git-annex into structured requests.

use super::types::{Direction, Request};
use std::path::PathBuf;
use thiserror::Error;

/// Parsing errors
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty request line")]
    Empty,

    #[error("unknown request: {0}")]
    UnknownRequest(String),

    #[error("{request} is missing an argument")]
    MissingArgument { request: &'static str },

    #[error("invalid transfer direction: {0}")]
    InvalidDirection(String),
}

/// Parse a request line from git-annex
pub fn parse_request(line: &str) -> Result<Request, ParseError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut parts = line.splitn(2, ' ');
    let word = parts.next().filter(|w| !w.is_empty()).ok_or(ParseError::Empty)?;
    let rest = parts.next().unwrap_or("");

    match word {
        "INITREMOTE" => Ok(Request::InitRemote),
        "PREPARE" => Ok(Request::Prepare),
        "TRANSFER" => parse_transfer(rest),
        "CHECKPRESENT" => Ok(Request::CheckPresent {
            key: require_key(rest, "CHECKPRESENT")?,
        }),
        "REMOVE" => Ok(Request::Remove {
            key: require_key(rest, "REMOVE")?,
        }),
        "GETCOST" => Ok(Request::GetCost),
        "GETAVAILABILITY" => Ok(Request::GetAvailability),
        "EXPORTSUPPORTED" => Ok(Request::ExportSupported),
        "LISTCONFIGS" => Ok(Request::ListConfigs),
        "EXTENSIONS" => Ok(Request::Extensions(
            rest.split_whitespace().map(str::to_string).collect(),
        )),
        _ => Err(ParseError::UnknownRequest(line.to_string())),
    }
}

/// TRANSFER STORE|RETRIEVE <key> <file>
///
/// The key never contains whitespace; the file is the remainder of the
/// line and may.
fn parse_transfer(rest: &str) -> Result<Request, ParseError> {
    let mut parts = rest.splitn(3, ' ');
    let direction = parts
        .next()
        .filter(|w| !w.is_empty())
        .ok_or(ParseError::MissingArgument { request: "TRANSFER" })?;
    let direction = Direction::try_from(direction).map_err(ParseError::InvalidDirection)?;
    let key = parts
        .next()
        .filter(|w| !w.is_empty())
        .ok_or(ParseError::MissingArgument { request: "TRANSFER" })?;
    let file = parts
        .next()
        .filter(|w| !w.is_empty())
        .ok_or(ParseError::MissingArgument { request: "TRANSFER" })?;

    Ok(Request::Transfer {
        direction,
        key: key.to_string(),
        file: PathBuf::from(file),
    })
}

fn require_key(rest: &str, request: &'static str) -> Result<String, ParseError> {
    let key = rest.trim();
    if key.is_empty() || key.contains(' ') {
        return Err(ParseError::MissingArgument { request });
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_requests() {
        assert_eq!(parse_request("INITREMOTE").unwrap(), Request::InitRemote);
        assert_eq!(parse_request("PREPARE").unwrap(), Request::Prepare);
        assert_eq!(parse_request("GETCOST").unwrap(), Request::GetCost);
        assert_eq!(
            parse_request("GETAVAILABILITY").unwrap(),
            Request::GetAvailability
        );
        assert_eq!(
            parse_request("EXPORTSUPPORTED").unwrap(),
            Request::ExportSupported
        );
        assert_eq!(parse_request("LISTCONFIGS").unwrap(), Request::ListConfigs);
    }

    #[test]
    fn test_parse_transfer_store() {
        let req = parse_request(
            "TRANSFER STORE SHA256E-s1024--abcdef /tmp/annex/tmp file with spaces",
        )
        .unwrap();
        assert_eq!(
            req,
            Request::Transfer {
                direction: Direction::Store,
                key: "SHA256E-s1024--abcdef".to_string(),
                file: PathBuf::from("/tmp/annex/tmp file with spaces"),
            }
        );
    }

    #[test]
    fn test_parse_transfer_retrieve() {
        let req = parse_request("TRANSFER RETRIEVE KEY1 /tmp/out").unwrap();
        assert_eq!(
            req,
            Request::Transfer {
                direction: Direction::Retrieve,
                key: "KEY1".to_string(),
                file: PathBuf::from("/tmp/out"),
            }
        );
    }

    #[test]
    fn test_parse_checkpresent_and_remove() {
        assert_eq!(
            parse_request("CHECKPRESENT KEY1").unwrap(),
            Request::CheckPresent {
                key: "KEY1".to_string()
            }
        );
        assert_eq!(
            parse_request("REMOVE KEY1").unwrap(),
            Request::Remove {
                key: "KEY1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_extensions() {
        assert_eq!(
            parse_request("EXTENSIONS INFO ASYNC").unwrap(),
            Request::Extensions(vec!["INFO".to_string(), "ASYNC".to_string()])
        );
    }

    #[test]
    fn test_parse_unknown_request() {
        assert!(matches!(
            parse_request("WHEREIS KEY1"),
            Err(ParseError::UnknownRequest(_))
        ));
    }

    #[test]
    fn test_parse_malformed_transfer() {
        assert!(matches!(
            parse_request("TRANSFER STORE KEY1"),
            Err(ParseError::MissingArgument { .. })
        ));
        assert!(matches!(
            parse_request("TRANSFER SIDEWAYS KEY1 /tmp/f"),
            Err(ParseError::InvalidDirection(_))
        ));
    }

    #[test]
    fn test_parse_empty_line() {
        assert!(matches!(parse_request(""), Err(ParseError::Empty)));
    }
}
