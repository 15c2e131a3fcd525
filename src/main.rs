//! git-annex-remote-dbx binary
//!
//! Invoked by git-annex as `git-annex-remote-dbx` with the protocol on
//! stdin/stdout. Logs go to stderr only; a stray line on stdout would
//! corrupt the protocol.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use git_annex_remote_dbx::storage::{DropboxBackend, KeyStorage, StorageError};
use git_annex_remote_dbx::{RemoteConfig, RemoteRunner};
use std::io;
use std::process;

#[derive(Parser, Debug)]
#[command(name = "git-annex-remote-dbx")]
#[command(about = "git-annex special remote for Dropbox", long_about = None)]
#[command(version)]
struct Args {}

fn main() {
    env_logger::Builder::from_env(
        Env::default().filter_or("GIT_ANNEX_REMOTE_DBX_LOG", "warn"),
    )
    .init();

    let _args = Args::parse();

    if let Err(e) = run() {
        log::error!("fatal: {:#}", e);
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();

    let factory = |config: &RemoteConfig| -> Result<Box<dyn KeyStorage>, StorageError> {
        let backend = DropboxBackend::new(config.clone())?;
        Ok(Box::new(backend))
    };

    let mut runner = RemoteRunner::new(stdin.lock(), stdout.lock(), Box::new(factory));
    runner.run().context("protocol channel failed")
}
