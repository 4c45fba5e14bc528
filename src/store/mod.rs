mod error;
mod schema;
mod sqlite_store;
mod trait_def;

pub use error::{StoreError, TransferError};
pub use schema::WAREHOUSE_VERSIONED_SCHEMAS;
pub use sqlite_store::{SqliteWarehouse, StoredSongplay};
pub use trait_def::{
    Dimension, RecordKind, Row, SetMatcher, StagedDocument, StagingStore, TableCounts,
    TargetStore, TargetTable, WriteOutcome,
};
