//! Protocol channel to git-annex
//!
//! Owns the buffered stdin/stdout pair. All outgoing traffic goes
//! through here so stdout stays protocol-clean. Queries (GETCONFIG,
//! GETCREDS, ...) are synchronous: the next line read after sending one
//! is its answer.

use crate::protocol::Reply;
use std::io::{BufRead, Write};
use thiserror::Error;

/// Protocol channel errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected answer to {query}: {answer:?}")]
    UnexpectedAnswer { query: &'static str, answer: String },

    #[error("git-annex closed the connection mid-query")]
    UnexpectedEof,
}

/// Buffered two-way channel to git-annex
pub struct Connection<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> Connection<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Send a reply line
    pub fn send(&mut self, reply: &Reply) -> Result<(), ProtocolError> {
        self.send_raw(&reply.to_string())
    }

    /// Read the next line, None at EOF
    pub fn next_line(&mut self) -> Result<Option<String>, ProtocolError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        log::trace!("<- {}", line);
        Ok(Some(line))
    }

    /// GETCONFIG: read a setting; None when unset
    pub fn get_config(&mut self, name: &str) -> Result<Option<String>, ProtocolError> {
        self.send_raw(&format!("GETCONFIG {}", name))?;
        let answer = self.answer()?;
        match answer.strip_prefix("VALUE") {
            Some(rest) => {
                let value = rest.strip_prefix(' ').unwrap_or(rest);
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(value.to_string()))
                }
            }
            None => Err(ProtocolError::UnexpectedAnswer {
                query: "GETCONFIG",
                answer,
            }),
        }
    }

    /// SETCONFIG: store a setting in the remote's git-annex config
    pub fn set_config(&mut self, name: &str, value: &str) -> Result<(), ProtocolError> {
        self.send_raw(&format!("SETCONFIG {} {}", name, value))
    }

    /// GETCREDS: read a stored credential pair; None when unset
    pub fn get_creds(&mut self, name: &str) -> Result<Option<(String, String)>, ProtocolError> {
        self.send_raw(&format!("GETCREDS {}", name))?;
        let answer = self.answer()?;
        let rest = match answer.strip_prefix("CREDS") {
            Some(rest) => rest.trim_start(),
            None => {
                return Err(ProtocolError::UnexpectedAnswer {
                    query: "GETCREDS",
                    answer,
                })
            }
        };
        if rest.is_empty() {
            return Ok(None);
        }
        let mut parts = rest.splitn(2, ' ');
        let login = parts.next().unwrap_or("").to_string();
        let password = parts.next().unwrap_or("").to_string();
        if password.is_empty() {
            return Ok(None);
        }
        Ok(Some((login, password)))
    }

    /// SETCREDS: store a credential pair with git-annex
    pub fn set_creds(
        &mut self,
        name: &str,
        login: &str,
        password: &str,
    ) -> Result<(), ProtocolError> {
        self.send_raw(&format!("SETCREDS {} {} {}", name, login, password))
    }

    /// PROGRESS: report total bytes transferred so far
    pub fn progress(&mut self, bytes: u64) -> Result<(), ProtocolError> {
        self.send_raw(&format!("PROGRESS {}", bytes))
    }

    fn send_raw(&mut self, line: &str) -> Result<(), ProtocolError> {
        log::trace!("-> {}", line);
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        Ok(())
    }

    fn answer(&mut self) -> Result<String, ProtocolError> {
        self.next_line()?.ok_or(ProtocolError::UnexpectedEof)
    }

    /// Tear down the connection, handing back the writer
    pub fn into_writer(self) -> W {
        self.writer
    }
}
