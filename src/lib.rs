//! Songplay warehouse library
//!
//! Loads a song catalog and user activity logs into a star schema, either row
//! by row or through staging tables, and exports it as partitioned JSON Lines.

pub mod config;
pub mod export;
pub mod loader;
pub mod model;
pub mod pipeline;
pub mod source;
pub mod sqlite_persistence;
pub mod store;
pub mod transform;

// Re-export commonly used types for convenience
pub use loader::{LoadMode, LocalBulkTransfer, StagedLocations};
pub use pipeline::{Pipeline, PipelineConfig, RunReport, RunState, SourceTrees};
pub use store::{SqliteWarehouse, StoreError, TableCounts, TargetStore};
