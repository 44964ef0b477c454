//! Persistence layer: libSQL-backed delivery records for deduplication.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{DedupStore, DeliveryRecord, DeliveryStats};
