//! Configuration management for Parlance
//!
//! This module handles loading, parsing, and validating configuration
//! from YAML files and environment variables.

use crate::error::{ParlanceError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for Parlance
///
/// Holds everything a [`crate::session::ChatSession`] needs: where the reply
/// service lives, how to authenticate against it, and where the record store
/// keeps its data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Reply service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Record store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Reply service configuration
///
/// The reply service accepts a message list plus a chat id and streams the
/// assistant reply back as server-sent `data:` lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Endpoint URL for the streamed-reply POST (e.g. a `/functions/v1/chat`
    /// edge function). Useful to point at a mock server in tests.
    #[serde(default)]
    pub endpoint: String,

    /// Bearer credential sent in the `Authorization` header
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    120
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Record store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Optional path to the SQLite database file. When absent the store
    /// resolves a path under the user's data directory.
    #[serde(default)]
    pub db_path: Option<String>,
}

impl Config {
    /// Load configuration from a YAML file, then apply environment overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ParlanceError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_yaml::from_str(&contents).map_err(ParlanceError::Yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Build a configuration purely from defaults and environment variables
    pub fn from_env() -> Self {
        let mut config = Self {
            service: ServiceConfig::default(),
            store: StoreConfig::default(),
        };
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Recognized variables:
    ///
    /// - `PARLANCE_SERVICE_URL` - overrides `service.endpoint`
    /// - `PARLANCE_API_KEY` - overrides `service.api_key`
    /// - `PARLANCE_STORE_DB` - overrides `store.db_path`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("PARLANCE_SERVICE_URL") {
            self.service.endpoint = endpoint;
        }
        if let Ok(api_key) = std::env::var("PARLANCE_API_KEY") {
            self.service.api_key = api_key;
        }
        if let Ok(db_path) = std::env::var("PARLANCE_STORE_DB") {
            self.store.db_path = Some(db_path);
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ParlanceError::Config`] when the endpoint is missing or not
    /// a valid URL, or when the bearer credential is empty.
    pub fn validate(&self) -> Result<()> {
        if self.service.endpoint.is_empty() {
            return Err(ParlanceError::Config(
                "service.endpoint must be set (or PARLANCE_SERVICE_URL)".to_string(),
            )
            .into());
        }

        url::Url::parse(&self.service.endpoint).map_err(|e| {
            ParlanceError::Config(format!(
                "service.endpoint is not a valid URL: {}: {}",
                self.service.endpoint, e
            ))
        })?;

        if self.service.api_key.is_empty() {
            return Err(ParlanceError::Config(
                "service.api_key must be set (or PARLANCE_API_KEY)".to_string(),
            )
            .into());
        }

        if self.service.timeout_seconds == 0 {
            return Err(
                ParlanceError::Config("service.timeout_seconds must be non-zero".to_string())
                    .into(),
            );
        }

        Ok(())
    }
}
