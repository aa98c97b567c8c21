//! Logging and metrics.
//!
//! - Structured logging with configurable formats (pretty, compact, JSON)
//! - Prometheus counters for deletions, batch failures, clones and namespaces

pub mod metrics;
mod tracing_init;

pub use tracing_init::*;
