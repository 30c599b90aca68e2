//! Persistence layer: flow graph storage behind the `FlowStore` trait.

#[cfg(test)]
pub(crate) mod interleave;
pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::{MemoryDocumentStore, MemoryStore};
pub use traits::{DocumentStore, DocumentUpload, FlowStore};
