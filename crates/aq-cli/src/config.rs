//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use aq_core::AggregatorConfig;
use aq_core::aggregator::DEFAULT_SESSION_TIMEOUT_MINUTES;
use chrono::Local;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Default prediction backend.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Base URL of the prediction backend.
    pub backend_url: String,
    /// Idle gap, in minutes, after which a new session starts.
    pub session_timeout_minutes: i64,
    /// Offset from UTC used for peak-hour bucketing. Defaults to the host's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("backend_url", &self.backend_url)
            .field("session_timeout_minutes", &self.session_timeout_minutes)
            .field("utc_offset_minutes", &self.utc_offset_minutes)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("academiq.db"),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            session_timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
            utc_offset_minutes: None,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (AQ_*)
        figment = figment.merge(Env::prefixed("AQ_"));

        figment.extract()
    }

    /// Aggregation rules derived from this configuration.
    pub fn aggregator(&self) -> AggregatorConfig {
        let offset = self
            .utc_offset_minutes
            .unwrap_or_else(|| Local::now().offset().local_minus_utc() / 60);
        AggregatorConfig::from_minutes(self.session_timeout_minutes, offset)
    }
}

/// Returns the platform-specific config directory for academIQ.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("academiq"))
}

/// Returns the platform-specific data directory for academIQ.
///
/// On Linux: `~/.local/share/academiq`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("academiq"))
}
