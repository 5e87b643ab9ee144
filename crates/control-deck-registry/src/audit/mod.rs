//! Audit sink implementations and the async dispatch writer.

pub mod writer;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use writer::AuditWriter;

#[cfg(feature = "memory")]
pub use memory::MemorySink;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSink;
