use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Identity of one input file, as reported in logs and run reports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Path> for FileId {
    fn from(path: &Path) -> Self {
        Self(path.display().to_string())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single input file that could not be turned into records.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{file}: unreadable: {source}")]
    Unreadable {
        file: FileId,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}: cannot be listed: {reason}")]
    Unlisted { file: FileId, reason: String },

    #[error("{file}: malformed record at line {line}: {source}")]
    Malformed {
        file: FileId,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{file}: expected exactly one catalog record, found {found}")]
    RecordCount { file: FileId, found: usize },

    #[error("{file}: line {line}: song play without a user id")]
    AnonymousPlay { file: FileId, line: usize },

    #[error("{file}: line {line}: song play without a subscription level")]
    MissingLevel { file: FileId, line: usize },

    #[error("{file}: line {line}: timestamp {ts} is outside the calendar range")]
    Timestamp { file: FileId, line: usize, ts: i64 },
}

impl ParseError {
    pub fn file(&self) -> &FileId {
        match self {
            ParseError::Unreadable { file, .. }
            | ParseError::Unlisted { file, .. }
            | ParseError::Malformed { file, .. }
            | ParseError::RecordCount { file, .. }
            | ParseError::AnonymousPlay { file, .. }
            | ParseError::MissingLevel { file, .. }
            | ParseError::Timestamp { file, .. } => file,
        }
    }
}
