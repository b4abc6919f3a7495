//! Helper configuration.
//!
//! Everything has a default, so the helper runs without any configuration.
//! A TOML file can override the defaults and command-line flags override
//! the file.
//!
//! ```toml
//! pipe_path = '\\.\pipe\ComViewHandle'
//! query_deadline = "100ms"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::DEFAULT_PIPE_PATH;
use crate::resolver::DEFAULT_QUERY_DEADLINE;

/// Helper configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HelperConfig {
    /// Pipe to connect to. Must already exist.
    #[serde(default = "default_pipe_path")]
    pub pipe_path: PathBuf,

    /// How long the dispatch thread waits for a name query.
    #[serde(default = "default_query_deadline")]
    #[serde(with = "humantime_serde")]
    pub query_deadline: Duration,
}

fn default_pipe_path() -> PathBuf {
    PathBuf::from(DEFAULT_PIPE_PATH)
}

const fn default_query_deadline() -> Duration {
    DEFAULT_QUERY_DEADLINE
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            pipe_path: default_pipe_path(),
            query_deadline: default_query_deadline(),
        }
    }
}

impl HelperConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, names unknown keys, or sets
    /// a zero deadline.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for a zero deadline or an empty
    /// pipe path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_deadline.is_zero() {
            return Err(ConfigError::Validation(
                "query_deadline must be greater than zero".to_string(),
            ));
        }
        if self.pipe_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "pipe_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the config file.
    #[error("failed to read config file: {0}")]
    Io(#[source] std::io::Error),

    /// TOML parse error.
    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    /// Semantically invalid value.
    #[error("invalid config: {0}")]
    Validation(String),
}
