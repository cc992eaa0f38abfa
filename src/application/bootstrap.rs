use crate::infrastructure::config::{ensure_default_configs, load_planner_config, PlannerConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_path: PathBuf,
    pub config: PlannerConfig,
}

/// Prepares `config/`, `state/` and `logs/` under the workspace root, writes
/// missing default configs and applies the database schema.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("timeboxer.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let config = load_planner_config(&config_dir)?;
    initialize_database(&database_path)?;
    let log_path = init_logging(&logs_dir, DEFAULT_LOG_LEVEL)?;

    tracing::info!(
        workspace = %workspace_root.display(),
        timezone = %config.timezone,
        "workspace ready"
    );

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        database_path,
        log_path,
        config,
    })
}
