//! High-level services built on an executor

mod bulk_sync;

pub use bulk_sync::BulkSync;
