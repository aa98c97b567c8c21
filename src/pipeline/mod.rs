//! Building blocks shared by the purge and clone paths.
//!
//! - [`probe`]: picks a stable ordering property for a kind
//! - [`scanner`]: cursor-continued page scan over one kind
//! - [`mutator`]: bounded bulk delete and write batches

pub mod mutator;
pub mod probe;
pub mod scanner;

pub use mutator::{DeleteMutator, MAX_WRITE_BATCH, WriteMutator};
pub use probe::{PREFERRED_ORDER_PROPERTY, choose_ordering, probe_ordering};
pub use scanner::{PageScanner, ScanOptions, ScanSummary};
