//! Coordinator configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file
//! is a valid configuration.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub election: ElectionConfig,
    pub reminders: ReminderConfig,
    pub poll: PollConfig,
    pub storage: StorageConfig,
}

/// `[election]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Chain account of the election contract
    pub contract: String,
    /// Chat handles of bots removed from rooms after a round ends
    pub automation_accounts: Vec<String>,
    /// Grant admin rights to participants in their room chat
    pub promote_participants: bool,
    /// Create round 0 rooms ahead of the election
    pub precreate_rooms: bool,
    pub room_name_prefix: String,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            contract: "genesis.eden".to_string(),
            automation_accounts: Vec::new(),
            promote_participants: true,
            precreate_rooms: false,
            room_name_prefix: "Eden".to_string(),
        }
    }
}

/// How a reminder delivery row relates to the send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Send, then record SENT or ERROR. A crash in between may duplicate.
    #[default]
    RecordAfterSend,
    /// Record PENDING, send, then confirm. A crash in between may miss.
    ReserveBeforeSend,
}

/// `[reminders]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    /// Length of the firing window in minutes
    pub window_minutes: u32,
    /// Minutes before the election start
    pub election_start_offsets: Vec<u32>,
    /// Minutes before the end of each round
    pub round_end_offsets: Vec<u32>,
    pub delivery_mode: DeliveryMode,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            window_minutes: 10,
            election_start_offsets: vec![1440, 60, 10],
            round_end_offsets: vec![10],
            delivery_mode: DeliveryMode::default(),
        }
    }
}

/// `[poll]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_seconds: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
        }
    }
}

/// `[storage]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `fractal.db` in the platform data directory
    pub database_path: Option<PathBuf>,
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML content
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.election.contract.trim().is_empty() {
            return Err(ConfigError::Invalid("election.contract is empty".into()));
        }
        if self.reminders.window_minutes == 0 {
            return Err(ConfigError::Invalid(
                "reminders.window_minutes must be positive".into(),
            ));
        }
        if self.poll.interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "poll.interval_seconds must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Database path from the config, or the platform default
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => default_database_path(),
        }
    }
}

fn default_database_path() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("org", "fractal", "fractal").ok_or_else(|| {
        ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine data directory",
        ))
    })?;

    Ok(dirs.data_dir().join("fractal.db"))
}
