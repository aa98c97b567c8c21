//! Namespace clone configuration.
//!
//! # Example
//!
//! ```toml
//! [clone]
//! batch_size = 500
//!
//! [clone.destination]
//! type = "datastore"
//! project_id = "dev-project"
//! ```

use serde::{Deserialize, Serialize};

use super::{PaginationConfig, StoreConfig};

/// Clone configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloneConfig {
    /// Store the records are copied into. The `[store]` section is the source.
    #[serde(default)]
    pub destination: Option<StoreConfig>,

    /// Entities per write batch (at most 500).
    /// Default: 500
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub pagination: PaginationConfig,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            destination: None,
            batch_size: default_batch_size(),
            pagination: PaginationConfig::default(),
        }
    }
}

fn default_batch_size() -> usize {
    500
}

impl CloneConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=crate::pipeline::MAX_WRITE_BATCH).contains(&self.batch_size) {
            return Err(format!(
                "clone.batch_size must be between 1 and {}",
                crate::pipeline::MAX_WRITE_BATCH
            ));
        }
        if self.pagination.page_size == 0 {
            return Err("clone.pagination.page_size must be at least 1".into());
        }
        Ok(())
    }
}
