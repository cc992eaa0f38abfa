use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const LOG_FILE_NAME: &str = "timeboxer.log";

/// Installs the global JSON-lines subscriber writing to `<logs_dir>/timeboxer.log`.
///
/// `RUST_LOG` overrides `level` when set. Calling this again once a global
/// subscriber exists is a no-op.
pub fn init_logging(logs_dir: &Path, level: &str) -> Result<PathBuf, InfraError> {
    use tracing_subscriber::EnvFilter;

    fs::create_dir_all(logs_dir)?;
    let path = logs_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    // try_init fails only when a global subscriber is already installed.
    let _ = subscriber.try_init();
    Ok(path)
}
