//! Logging setup: one subscriber per process.
//!
//! Events go to `odm.log` under the XDG state home when that file can be
//! opened, and to stderr otherwise. Call once, early.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,odm=debug"))
}

fn open_log_file() -> Result<(File, PathBuf)> {
    let state_home = xdg::BaseDirectories::with_prefix("odm")?.get_state_home();
    fs::create_dir_all(&state_home)
        .with_context(|| format!("create state dir: {}", state_home.display()))?;
    let path = state_home.join("odm.log");
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file: {}", path.display()))?;
    Ok((file, path))
}

/// Install the global subscriber. A log file that cannot be opened (missing
/// HOME, unwritable state dir) downgrades to stderr logging rather than
/// failing startup.
pub fn init() {
    match open_log_file() {
        Ok((file, path)) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
            tracing::info!(log = %path.display(), "logging to file");
        }
        Err(err) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .init();
            tracing::warn!(error = %err, "log file unavailable, logging to stderr");
        }
    }
}
