//! What lives in the store: kinds of a namespace, namespaces of a project, and
//! how much space they take.

mod kinds;
mod namespaces;
pub mod storage;

pub use kinds::{KindInfo, RESERVED_MARKER, is_reserved_kind, list_kinds};
pub use namespaces::{NAMESPACE_PAGE_SIZE, filter_containing, list_namespaces, write_namespace_file};
pub use storage::{StorageReport, storage_report};
