//! Configuration for nsdrain.
//!
//! Loaded from a TOML file, with `${VAR_NAME}` environment variable
//! interpolation outside of comments.
//!
//! # Example
//!
//! ```toml
//! [store]
//! type = "datastore"
//! project_id = "my-project"
//! access_token = "${DATASTORE_ACCESS_TOKEN}"
//!
//! [purge]
//! checkpoint_path = "namespaces.txt"
//! max_concurrent_kinds = 4
//!
//! [observability.logging]
//! format = "json"
//! ```

mod clone;
mod observability;
mod purge;
mod store;

use std::path::Path;

pub use clone::*;
pub use observability::*;
pub use purge::*;
use serde::{Deserialize, Serialize};
pub use store::*;

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Store whose namespaces are purged, listed or cloned from.
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub purge: PurgeConfig,

    #[serde(default)]
    pub clone: CloneConfig,

    /// Observability configuration (logging, metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// Missing environment variables referenced as `${VAR_NAME}` are an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: AppConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate().map_err(ConfigError::Validation)?;
        self.purge.validate().map_err(ConfigError::Validation)?;
        self.clone.validate().map_err(ConfigError::Validation)?;
        if let Some(destination) = &self.clone.destination {
            destination.validate().map_err(ConfigError::Validation)?;
        }
        Ok(())
    }

    /// Reject a source store that cannot hold data.
    ///
    /// Purging against an empty store would classify every checkpoint line as
    /// an empty namespace and drop it without a single delete.
    pub fn require_store_data(&self) -> Result<(), ConfigError> {
        if self.store.has_data() {
            Ok(())
        } else {
            Err(ConfigError::Validation(
                "no [store] configured; set store.type = \"datastore\" or a memory fixture"
                    .to_string(),
            ))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand `${VAR_NAME}` references. Anything after a `#` on a line is left as is.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#').unwrap_or(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            if whole.start() >= comment_pos {
                break;
            }

            result.push_str(&line[last_end..whole.start()]);
            let value = std::env::var(name.as_str())
                .map_err(|_| ConfigError::EnvVarNotFound(name.as_str().to_string()))?;
            result.push_str(&value);
            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
