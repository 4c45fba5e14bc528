use crate::source::FileId;
use thiserror::Error;

/// Failures of the bulk transfer that feeds the staging tables.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{location} is unreachable: {reason}")]
    Unreachable { location: String, reason: String },

    #[error("{file}: {reason}")]
    Rejected { file: FileId, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Target store unavailable: {0}")]
    Connection(#[source] rusqlite::Error),

    #[error("Write to {table} failed: {source}")]
    Write {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Transfer into {table} failed: {source}")]
    Transfer {
        table: &'static str,
        #[source]
        source: TransferError,
    },

    #[error("Schema error: {0:#}")]
    Schema(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether the store itself, rather than a row or batch, is unusable.
    pub fn is_connection(&self) -> bool {
        match self {
            StoreError::Connection(_) => true,
            StoreError::Transfer {
                source: TransferError::Unreachable { .. },
                ..
            } => true,
            _ => false,
        }
    }

    pub fn table(&self) -> Option<&'static str> {
        match self {
            StoreError::Write { table, .. } | StoreError::Transfer { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Attributes a `rusqlite` failure to `table`, unless the connection is at fault.
    pub fn from_sqlite(table: &'static str, err: rusqlite::Error) -> Self {
        if is_connection_failure(&err) {
            StoreError::Connection(err)
        } else {
            StoreError::Write { table, source: err }
        }
    }
}

fn is_connection_failure(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.code,
            ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure
                | ErrorCode::PermissionDenied
                | ErrorCode::ReadOnly
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::DiskFull
                | ErrorCode::OutOfMemory
                | ErrorCode::FileLockingProtocolFailed
        ),
        rusqlite::Error::InvalidPath(_) => true,
        _ => false,
    }
}
