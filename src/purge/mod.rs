//! Namespace purge: per-kind workers, the bounded pool that runs them, and the
//! checkpoint-driven loop on top.

mod checkpoint;
mod driver;
mod pool;
mod worker;

pub use checkpoint::{CheckpointError, CheckpointFile, SafeList};
pub use driver::{DriverExit, NamespaceOutcome, PassSummary, PurgeDriver, PurgeError};
pub use pool::{NamespaceReport, drain_namespace};
pub use worker::{DrainSettings, KindOutcome, KindReport, ProgressTracker, drain_kind};
