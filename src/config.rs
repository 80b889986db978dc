//! Portal configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string; `DATABASE_URL` takes precedence
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Schema holding the portal tables
    #[serde(default = "default_schema")]
    pub schema: String,

    /// NOTIFY channel fed by the change triggers
    #[serde(default = "default_change_channel")]
    pub change_channel: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            schema: default_schema(),
            change_channel: default_change_channel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Lunch balances below this are flagged
    #[serde(default = "default_low_balance")]
    pub low_balance_threshold: f64,

    /// Students under this GPA are counted in classroom stats
    #[serde(default = "default_gpa_floor")]
    pub gpa_floor: f64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            low_balance_threshold: default_low_balance(),
            gpa_floor: default_gpa_floor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_recent_messages")]
    pub recent_messages: usize,

    #[serde(default = "default_upcoming_events")]
    pub upcoming_events: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            recent_messages: default_recent_messages(),
            upcoming_events: default_upcoming_events(),
        }
    }
}

// Defaults
fn default_max_connections() -> u32 { 5 }
fn default_schema() -> String { "portal".to_string() }
fn default_change_channel() -> String { "portal_changes".to_string() }
fn default_low_balance() -> f64 { 5.0 }
fn default_gpa_floor() -> f64 { 2.0 }
fn default_recent_messages() -> usize { 5 }
fn default_upcoming_events() -> usize { 5 }

impl Config {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
