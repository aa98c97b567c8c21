//! Store connection configuration.
//!
//! # Example
//!
//! ```toml
//! [store]
//! type = "datastore"
//! project_id = "my-project"
//! access_token = "${DATASTORE_ACCESS_TOKEN}"
//!
//! # or, for a local dry run against a JSON fixture:
//! [store]
//! type = "memory"
//! fixture = "fixtures/tenant.json"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Store connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum StoreConfig {
    /// Cloud Datastore (or its emulator) over the v1 REST API.
    Datastore {
        /// Project whose namespaces are processed.
        project_id: String,
        /// API root. Point at the emulator for local runs.
        #[serde(default = "default_endpoint")]
        endpoint: String,
        /// OAuth bearer token. Not needed for the emulator.
        #[serde(default)]
        access_token: Option<String>,
        /// Per-request timeout in seconds.
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },

    /// In-process store, optionally seeded from a JSON fixture.
    Memory {
        #[serde(default)]
        fixture: Option<PathBuf>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory { fixture: None }
    }
}

fn default_endpoint() -> String {
    "https://datastore.googleapis.com".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl StoreConfig {
    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            StoreConfig::Datastore {
                project_id,
                endpoint,
                ..
            } => format!("datastore {project_id} at {endpoint}"),
            StoreConfig::Memory { fixture: Some(path) } => format!("memory ({})", path.display()),
            StoreConfig::Memory { fixture: None } => "memory".to_string(),
        }
    }

    /// Whether the store can hold anything to purge or clone. An unseeded
    /// memory store is always empty.
    pub fn has_data(&self) -> bool {
        !matches!(self, StoreConfig::Memory { fixture: None })
    }

    pub fn validate(&self) -> Result<(), String> {
        if let StoreConfig::Datastore { project_id, .. } = self
            && project_id.is_empty()
        {
            return Err("store.project_id must not be empty".into());
        }
        Ok(())
    }
}
