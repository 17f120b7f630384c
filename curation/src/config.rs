//! Engine configuration.

use crate::errors::ConfigurationError;
use crate::warehouse::PollConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for one engine run.
///
/// Every field has a default, so a configuration file only needs to name the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Job polling backoff and socket timeout.
    #[serde(default)]
    pub poll: PollConfig,
    /// When set, replaces the retry count of every query spec.
    #[serde(default)]
    pub retry_count: Option<u32>,
    /// Prefix for submitted job ids.
    #[serde(default)]
    pub job_id_prefix: Option<String>,
    /// Default log filter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            retry_count: None,
            job_id_prefix: None,
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::invalid(format!("engine configuration: {e}")))
    }

    /// Reads a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigurationError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::invalid(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Sets the polling configuration.
    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Overrides every spec's retry count.
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Sets the job id prefix.
    #[must_use]
    pub fn with_job_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.job_id_prefix = Some(prefix.into()).filter(|p: &String| !p.is_empty());
        self
    }

    /// Sets the log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}
