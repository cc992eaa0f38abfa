//! Time-boxed day planning: a slot grid per day, tasks dragged into slots,
//! recurring tasks, snoozing and a read-only calendar overlay.
//!
//! Hosts drive everything through [`application::commands`]; each `*_impl`
//! function takes the shared [`AppState`].

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::AppState;
pub use infrastructure::error::InfraError;

use application::bootstrap::bootstrap_workspace;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub workspace_root: String,
    pub database_path: String,
    pub log_path: String,
}

/// Prepares the workspace at `root`, or the current directory when `None`.
pub fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
        log_path: result.log_path.display().to_string(),
    })
}

/// Error text for hosts that only carry strings across their boundary.
pub fn command_error(command: &str, error: &InfraError) -> String {
    tracing::error!(command, error = %error, "command failed");
    error.to_string()
}
