//! Namespace purge configuration.
//!
//! # Example
//!
//! ```toml
//! [purge]
//! checkpoint_path = "namespaces.txt"
//! safe_list_path = "safeNamespaces.txt"
//! max_concurrent_kinds = 4
//! progress_interval = 10000
//! restart_delay_secs = 10
//! max_passes = 0
//! remove_on_success = false
//!
//! [purge.pagination]
//! page_size = 1000
//! page_retries = 2
//! retry_backoff_ms = 100
//!
//! [purge.safety]
//! dry_run = false
//! ```

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Namespace purge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeConfig {
    /// File listing namespaces still to purge, one per line.
    /// Default: "namespaces.txt"
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// File listing namespaces that must never be purged.
    /// Default: "safeNamespaces.txt"
    #[serde(default = "default_safe_list_path")]
    pub safe_list_path: PathBuf,

    /// Maximum kinds drained concurrently within one namespace.
    /// Default: 4
    #[serde(default = "default_max_concurrent_kinds")]
    pub max_concurrent_kinds: usize,

    /// Log per-kind progress every time this many more records are deleted.
    /// Default: 10000
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Pause between passes over the checkpoint file (in seconds).
    /// Default: 10
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,

    /// Stop after this many passes even if namespaces remain. 0 = until empty.
    /// Default: 0
    #[serde(default)]
    pub max_passes: u32,

    /// Remove a namespace from the checkpoint right after a successful drain.
    /// When false, the namespace stays until a later pass finds it empty.
    /// Default: false
    #[serde(default)]
    pub remove_on_success: bool,

    #[serde(default)]
    pub pagination: PaginationConfig,

    #[serde(default)]
    pub safety: PurgeSafety,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: default_checkpoint_path(),
            safe_list_path: default_safe_list_path(),
            max_concurrent_kinds: default_max_concurrent_kinds(),
            progress_interval: default_progress_interval(),
            restart_delay_secs: default_restart_delay_secs(),
            max_passes: 0,
            remove_on_success: false,
            pagination: PaginationConfig::default(),
            safety: PurgeSafety::default(),
        }
    }
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("namespaces.txt")
}

fn default_safe_list_path() -> PathBuf {
    PathBuf::from("safeNamespaces.txt")
}

fn default_max_concurrent_kinds() -> usize {
    4
}

fn default_progress_interval() -> u64 {
    10_000
}

fn default_restart_delay_secs() -> u64 {
    10
}

/// How kinds are paged through.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaginationConfig {
    /// Entries per query page; also the delete batch size.
    /// Default: 1000
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Extra attempts for a failed page before the kind's scan is abandoned.
    /// Set to 0 to abandon on the first failure.
    /// Default: 2
    #[serde(default = "default_page_retries")]
    pub page_retries: u32,

    /// Backoff unit between page attempts (in milliseconds).
    /// Default: 100
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_retries: default_page_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_page_size() -> usize {
    1000
}

fn default_page_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl PaginationConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Safety settings for purge operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeSafety {
    /// If true, count what would be deleted without deleting it.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,
}

impl PurgeConfig {
    /// Get the restart delay as a Duration.
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_kinds == 0 {
            return Err("purge.max_concurrent_kinds must be at least 1".into());
        }
        if self.progress_interval == 0 {
            return Err("purge.progress_interval must be at least 1".into());
        }
        if self.pagination.page_size == 0 {
            return Err("purge.pagination.page_size must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PurgeConfig::default();
        assert_eq!(config.checkpoint_path, PathBuf::from("namespaces.txt"));
        assert_eq!(config.safe_list_path, PathBuf::from("safeNamespaces.txt"));
        assert_eq!(config.max_concurrent_kinds, 4);
        assert_eq!(config.progress_interval, 10_000);
        assert_eq!(config.restart_delay(), Duration::from_secs(10));
        assert_eq!(config.max_passes, 0);
        assert!(!config.remove_on_success);
        assert_eq!(config.pagination.page_size, 1000);
        assert_eq!(config.pagination.page_retries, 2);
        assert!(!config.safety.dry_run);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            checkpoint_path = "/data/pending.txt"
            safe_list_path = "/data/safe.txt"
            max_concurrent_kinds = 8
            progress_interval = 500
            restart_delay_secs = 1
            max_passes = 3
            remove_on_success = true

            [pagination]
            page_size = 200
            page_retries = 0
            retry_backoff_ms = 5

            [safety]
            dry_run = true
        "#;
        let config: PurgeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.checkpoint_path, PathBuf::from("/data/pending.txt"));
        assert_eq!(config.max_concurrent_kinds, 8);
        assert_eq!(config.max_passes, 3);
        assert!(config.remove_on_success);
        assert_eq!(config.pagination.page_size, 200);
        assert_eq!(config.pagination.page_retries, 0);
        assert_eq!(config.pagination.retry_backoff(), Duration::from_millis(5));
        assert!(config.safety.dry_run);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = PurgeConfig {
            max_concurrent_kinds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<PurgeConfig>("max_tables = 4").is_err());
    }
}
