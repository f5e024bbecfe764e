//! File logging. The terminal belongs to the screen, so diagnostics go to
//! `<state dir>/orbiton.log` instead.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "ORBITON_LOG";
pub const LOG_FILE_NAME: &str = "orbiton.log";
const DEFAULT_FILTER: &str = "warn";

/// Installs the global subscriber and returns the log file path.
///
/// Fails if a global subscriber is already set.
pub fn init(state_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(state_dir)?;
    let path = state_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(path)
}
