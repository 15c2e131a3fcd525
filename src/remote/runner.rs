//! Request dispatch
//!
//! Drives the protocol session: announces the version, reads requests,
//! runs them against the key storage backend, writes replies. Channel
//! failures abort the run; operation failures become failure replies.

use crate::config::RemoteConfig;
use crate::protocol::{
    parse_request, Direction, Reply, Request, EXPENSIVE_COST, PROTOCOL_VERSION,
};
use crate::remote::connection::{Connection, ProtocolError};
use crate::storage::{KeyStorage, StorageError};
use std::io::{BufRead, Write};
use std::path::Path;

/// Name the OAuth token is filed under in git-annex's credential store
const TOKEN_CRED: &str = "token";
const TOKEN_LOGIN: &str = "oauth2";

/// Builds a backend from a validated configuration
pub type BackendFactory =
    Box<dyn Fn(&RemoteConfig) -> Result<Box<dyn KeyStorage>, StorageError>>;

/// The protocol session driver
pub struct RemoteRunner<R, W> {
    conn: Connection<R, W>,
    factory: BackendFactory,
    backend: Option<Box<dyn KeyStorage>>,
}

impl<R: BufRead, W: Write> RemoteRunner<R, W> {
    pub fn new(reader: R, writer: W, factory: BackendFactory) -> Self {
        Self {
            conn: Connection::new(reader, writer),
            factory,
            backend: None,
        }
    }

    /// Run the session until git-annex closes stdin.
    pub fn run(&mut self) -> Result<(), ProtocolError> {
        self.conn.send(&Reply::Version(PROTOCOL_VERSION))?;

        while let Some(line) = self.conn.next_line()? {
            if line.trim().is_empty() {
                continue;
            }
            match parse_request(&line) {
                Ok(request) => self.handle(request)?,
                Err(e) => {
                    log::warn!("request not understood: {}", e);
                    self.conn.send(&Reply::UnsupportedRequest)?;
                }
            }
        }
        Ok(())
    }

    fn handle(&mut self, request: Request) -> Result<(), ProtocolError> {
        match request {
            Request::InitRemote => {
                let reply = match self.init_remote()? {
                    Ok(()) => Reply::InitRemoteSuccess,
                    Err(msg) => Reply::InitRemoteFailure(msg),
                };
                self.conn.send(&reply)
            }
            Request::Prepare => {
                let reply = match self.prepare()? {
                    Ok(()) => Reply::PrepareSuccess,
                    Err(msg) => Reply::PrepareFailure(msg),
                };
                self.conn.send(&reply)
            }
            Request::Transfer {
                direction,
                key,
                file,
            } => self.transfer(direction, &key, &file),
            Request::CheckPresent { key } => self.check_present(&key),
            Request::Remove { key } => self.remove(&key),
            Request::GetCost => self.conn.send(&Reply::Cost(EXPENSIVE_COST)),
            Request::GetAvailability => self.conn.send(&Reply::AvailabilityGlobal),
            Request::ExportSupported => self.conn.send(&Reply::ExportSupportedFailure),
            Request::ListConfigs => self.list_configs(),
            Request::Extensions(offered) => {
                log::debug!("git-annex offers extensions: {:?}", offered);
                self.conn.send(&Reply::Extensions)
            }
        }
    }

    /// INITREMOTE: validate settings, move the token into the
    /// credential store, set up the backend.
    fn init_remote(&mut self) -> Result<Result<(), String>, ProtocolError> {
        let token = match self.conn.get_config("token")? {
            Some(token) => {
                // the secret must not stay in git-annex's remote config
                self.conn.set_creds(TOKEN_CRED, TOKEN_LOGIN, &token)?;
                self.conn.set_config("token", "")?;
                token
            }
            None => match self.conn.get_creds(TOKEN_CRED)? {
                Some((_login, password)) => password,
                None => {
                    return Ok(Err(
                        "the token setting is required (token=<dropbox oauth2 token>)"
                            .to_string(),
                    ))
                }
            },
        };

        let config = match self.read_config(token)? {
            Ok(config) => config,
            Err(msg) => return Ok(Err(msg)),
        };
        let backend = match (self.factory)(&config) {
            Ok(backend) => backend,
            Err(e) => return Ok(Err(e.to_string())),
        };
        if let Err(e) = backend.init() {
            return Ok(Err(e.to_string()));
        }
        self.backend = Some(backend);
        Ok(Ok(()))
    }

    /// PREPARE: load the token and settings, construct the backend.
    fn prepare(&mut self) -> Result<Result<(), String>, ProtocolError> {
        let token = match self.conn.get_creds(TOKEN_CRED)? {
            Some((_login, password)) => password,
            // remotes initialized by older versions may still carry the
            // token in the remote config
            None => match self.conn.get_config("token")? {
                Some(token) => token,
                None => {
                    return Ok(Err(
                        "no dropbox token found; re-run initremote with token=".to_string(),
                    ))
                }
            },
        };

        let config = match self.read_config(token)? {
            Ok(config) => config,
            Err(msg) => return Ok(Err(msg)),
        };
        match (self.factory)(&config) {
            Ok(backend) => {
                self.backend = Some(backend);
                Ok(Ok(()))
            }
            Err(e) => Ok(Err(e.to_string())),
        }
    }

    fn read_config(
        &mut self,
        token: String,
    ) -> Result<Result<RemoteConfig, String>, ProtocolError> {
        let path = self.conn.get_config("path")?;
        let chunk = self.conn.get_config("chunk")?;
        Ok(RemoteConfig::from_settings(token, path, chunk).map_err(|e| e.to_string()))
    }

    fn transfer(
        &mut self,
        direction: Direction,
        key: &str,
        file: &Path,
    ) -> Result<(), ProtocolError> {
        let Some(backend) = self.backend.as_deref() else {
            return self.conn.send(&Reply::TransferFailure(
                direction,
                key.to_string(),
                "remote not prepared".to_string(),
            ));
        };

        // progress reports interleave with the transfer; channel errors
        // there surface after the operation finishes
        let conn = &mut self.conn;
        let mut channel_error = None;
        let mut progress = |bytes: u64| {
            if channel_error.is_none() {
                if let Err(e) = conn.progress(bytes) {
                    channel_error = Some(e);
                }
            }
        };

        let result = match direction {
            Direction::Store => backend.store(key, file, &mut progress),
            Direction::Retrieve => backend.retrieve(key, file, &mut progress),
        };

        if let Some(e) = channel_error {
            return Err(e);
        }
        let reply = match result {
            Ok(()) => Reply::TransferSuccess(direction, key.to_string()),
            Err(e) => {
                log::error!("{} of {} failed: {}", direction, key, e);
                Reply::TransferFailure(direction, key.to_string(), e.to_string())
            }
        };
        self.conn.send(&reply)
    }

    fn check_present(&mut self, key: &str) -> Result<(), ProtocolError> {
        let reply = match self.backend.as_deref() {
            None => Reply::CheckPresentUnknown(
                key.to_string(),
                "remote not prepared".to_string(),
            ),
            Some(backend) => match backend.check_present(key) {
                Ok(true) => Reply::CheckPresentSuccess(key.to_string()),
                Ok(false) => Reply::CheckPresentFailure(key.to_string()),
                // cannot tell; git-annex must not conclude the key is gone
                Err(e) => Reply::CheckPresentUnknown(key.to_string(), e.to_string()),
            },
        };
        self.conn.send(&reply)
    }

    fn remove(&mut self, key: &str) -> Result<(), ProtocolError> {
        let reply = match self.backend.as_deref() {
            None => Reply::RemoveFailure(key.to_string(), "remote not prepared".to_string()),
            Some(backend) => match backend.remove(key) {
                Ok(()) => Reply::RemoveSuccess(key.to_string()),
                Err(e) => Reply::RemoveFailure(key.to_string(), e.to_string()),
            },
        };
        self.conn.send(&reply)
    }

    fn list_configs(&mut self) -> Result<(), ProtocolError> {
        self.conn.send(&Reply::Config {
            name: "token".to_string(),
            description: "Dropbox OAuth2 access token (required at initremote)".to_string(),
        })?;
        self.conn.send(&Reply::Config {
            name: "path".to_string(),
            description: "Dropbox folder holding the annexed objects (default /git-annex)"
                .to_string(),
        })?;
        self.conn.send(&Reply::Config {
            name: "chunk".to_string(),
            description: "upload part size, e.g. 50MiB (max 150MB)".to_string(),
        })?;
        self.conn.send(&Reply::ConfigEnd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ProgressFn, StorageResult};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// In-memory backend standing in for Dropbox
    struct MemoryBackend {
        objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        fail_present: bool,
    }

    impl KeyStorage for MemoryBackend {
        fn init(&self) -> StorageResult<()> {
            Ok(())
        }

        fn store(&self, key: &str, file: &Path, progress: ProgressFn<'_>) -> StorageResult<()> {
            let data = std::fs::read(file)?;
            progress(data.len() as u64);
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), data);
            Ok(())
        }

        fn retrieve(
            &self,
            key: &str,
            file: &Path,
            progress: ProgressFn<'_>,
        ) -> StorageResult<()> {
            let objects = self.objects.lock().unwrap();
            let data = objects
                .get(key)
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
            std::fs::write(file, data)?;
            progress(data.len() as u64);
            Ok(())
        }

        fn check_present(&self, key: &str) -> StorageResult<bool> {
            if self.fail_present {
                return Err(StorageError::Backend("simulated outage".to_string()));
            }
            Ok(self.objects.lock().unwrap().contains_key(key))
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn factory(
        objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        fail_present: bool,
    ) -> BackendFactory {
        Box::new(move |_config| {
            Ok(Box::new(MemoryBackend {
                objects: objects.clone(),
                fail_present,
            }) as Box<dyn KeyStorage>)
        })
    }

    fn run_session(input: String, factory: BackendFactory) -> Vec<String> {
        let mut runner =
            RemoteRunner::new(Cursor::new(input.into_bytes()), Vec::new(), factory);
        runner.run().unwrap();
        let output = String::from_utf8(runner.conn.into_writer()).unwrap();
        output.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_full_session() {
        let dir = TempDir::new().unwrap();
        let stored = dir.path().join("content");
        std::fs::write(&stored, b"annexed content").unwrap();
        let fetched = dir.path().join("fetched");

        // answer lines are interleaved exactly where the runner queries
        let input = format!(
            "INITREMOTE\n\
             VALUE sekrit\n\
             VALUE\n\
             VALUE\n\
             PREPARE\n\
             CREDS oauth2 sekrit\n\
             VALUE\n\
             VALUE\n\
             TRANSFER STORE KEY1 {store}\n\
             CHECKPRESENT KEY1\n\
             TRANSFER RETRIEVE KEY1 {fetch}\n\
             REMOVE KEY1\n\
             CHECKPRESENT KEY1\n\
             GETCOST\n\
             GETAVAILABILITY\n\
             EXPORTSUPPORTED\n\
             EXTENSIONS INFO\n\
             WHEREIS KEY1\n",
            store = stored.display(),
            fetch = fetched.display(),
        );

        let objects = Arc::new(Mutex::new(HashMap::new()));
        let lines = run_session(input, factory(objects.clone(), false));

        assert_eq!(lines[0], "VERSION 1");
        assert!(lines.contains(&"GETCONFIG token".to_string()));
        assert!(lines.contains(&"SETCREDS token oauth2 sekrit".to_string()));
        assert!(lines.contains(&"INITREMOTE-SUCCESS".to_string()));
        assert!(lines.contains(&"GETCREDS token".to_string()));
        assert!(lines.contains(&"PREPARE-SUCCESS".to_string()));
        assert!(lines.contains(&"PROGRESS 15".to_string()));
        assert!(lines.contains(&"TRANSFER-SUCCESS STORE KEY1".to_string()));
        assert!(lines.contains(&"CHECKPRESENT-SUCCESS KEY1".to_string()));
        assert!(lines.contains(&"TRANSFER-SUCCESS RETRIEVE KEY1".to_string()));
        assert!(lines.contains(&"REMOVE-SUCCESS KEY1".to_string()));
        assert!(lines.contains(&"CHECKPRESENT-FAILURE KEY1".to_string()));
        assert!(lines.contains(&"COST 200".to_string()));
        assert!(lines.contains(&"AVAILABILITY GLOBAL".to_string()));
        assert!(lines.contains(&"EXPORTSUPPORTED-FAILURE".to_string()));
        assert!(lines.contains(&"EXTENSIONS".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("UNSUPPORTED-REQUEST"));

        // retrieved copy matches what was stored
        assert_eq!(std::fs::read(&fetched).unwrap(), b"annexed content");
        // and REMOVE emptied the remote
        assert!(objects.lock().unwrap().is_empty());
    }

    #[test]
    fn test_transfer_before_prepare_fails() {
        let input = "TRANSFER STORE KEY1 /nonexistent\n".to_string();
        let objects = Arc::new(Mutex::new(HashMap::new()));
        let lines = run_session(input, factory(objects, false));

        assert_eq!(
            lines[1],
            "TRANSFER-FAILURE STORE KEY1 remote not prepared"
        );
    }

    #[test]
    fn test_checkpresent_error_answers_unknown() {
        let input = "PREPARE\n\
                     CREDS oauth2 sekrit\n\
                     VALUE\n\
                     VALUE\n\
                     CHECKPRESENT KEY1\n"
            .to_string();
        let objects = Arc::new(Mutex::new(HashMap::new()));
        let lines = run_session(input, factory(objects, true));

        assert!(lines.contains(&"PREPARE-SUCCESS".to_string()));
        let unknown = lines
            .iter()
            .find(|l| l.starts_with("CHECKPRESENT-UNKNOWN KEY1"))
            .expect("no CHECKPRESENT-UNKNOWN reply");
        assert!(unknown.contains("simulated outage"));
    }

    #[test]
    fn test_initremote_without_token_fails() {
        let input = "INITREMOTE\n\
                     VALUE\n\
                     CREDS\n"
            .to_string();
        let objects = Arc::new(Mutex::new(HashMap::new()));
        let lines = run_session(input, factory(objects, false));

        let failure = lines
            .iter()
            .find(|l| l.starts_with("INITREMOTE-FAILURE"))
            .expect("no INITREMOTE-FAILURE reply");
        assert!(failure.contains("token"));
    }

    #[test]
    fn test_initremote_scrubs_token_from_config() {
        let input = "INITREMOTE\n\
                     VALUE sekrit\n\
                     VALUE\n\
                     VALUE\n"
            .to_string();
        let objects = Arc::new(Mutex::new(HashMap::new()));
        let lines = run_session(input, factory(objects, false));

        let setconfig = lines
            .iter()
            .find(|l| l.starts_with("SETCONFIG token"))
            .expect("token was not cleared from the remote config");
        assert_eq!(setconfig.trim(), "SETCONFIG token");
    }

    #[test]
    fn test_prepare_falls_back_to_config_token() {
        let input = "PREPARE\n\
                     CREDS\n\
                     VALUE sekrit\n\
                     VALUE\n\
                     VALUE\n"
            .to_string();
        let objects = Arc::new(Mutex::new(HashMap::new()));
        let lines = run_session(input, factory(objects, false));

        assert!(lines.contains(&"PREPARE-SUCCESS".to_string()));
    }

    #[test]
    fn test_prepare_rejects_bad_chunk_setting() {
        let input = "PREPARE\n\
                     CREDS oauth2 sekrit\n\
                     VALUE\n\
                     VALUE 900GB\n"
            .to_string();
        let objects = Arc::new(Mutex::new(HashMap::new()));
        let lines = run_session(input, factory(objects, false));

        let failure = lines
            .iter()
            .find(|l| l.starts_with("PREPARE-FAILURE"))
            .expect("no PREPARE-FAILURE reply");
        assert!(failure.contains("900GB"));
    }

    #[test]
    fn test_listconfigs() {
        let input = "LISTCONFIGS\n".to_string();
        let objects = Arc::new(Mutex::new(HashMap::new()));
        let lines = run_session(input, factory(objects, false));

        assert!(lines.iter().any(|l| l.starts_with("CONFIG token ")));
        assert!(lines.iter().any(|l| l.starts_with("CONFIG path ")));
        assert!(lines.iter().any(|l| l.starts_with("CONFIG chunk ")));
        assert_eq!(lines.last().map(String::as_str), Some("CONFIGEND"));
    }
}
