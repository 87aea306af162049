//! Application state: loaded configuration and the open database

use std::path::Path;

use anyhow::{Context, Result};
use fractal_core::{Config, Database};

pub struct AppState {
    pub config: Config,
    pub db: Database,
}

impl AppState {
    /// Load the config (defaults when no path is given) and open its database
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        let db_path = config.database_path()?;

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let db = Database::open(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        tracing::info!(path = %db_path.display(), "Database ready");

        Ok(Self { config, db })
    }
}
