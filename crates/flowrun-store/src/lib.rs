//! Persistence for flowrun: wait records and flow definitions.

pub mod catalog;
pub mod memory;
pub mod sqlite;

pub use catalog::{FileFlowCatalog, MemoryFlowCatalog};
pub use memory::MemoryWaitStore;
pub use sqlite::SqliteWaitStore;
