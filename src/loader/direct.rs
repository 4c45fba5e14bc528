use super::{LoadCounts, LoadError};
use crate::model::{RawCatalogRecord, RawEventRecord};
use crate::source::{FileId, ParseError};
use crate::store::{Row, StoreError, TargetStore, TargetTable, WriteOutcome};
use crate::transform::{ActivityDimensions, CatalogDimensions, FactMatcher, MatchStats};
use thiserror::Error;
use tracing::{debug, warn};

/// A file whose transaction was rolled back.
#[derive(Debug, Error)]
#[error("{file}: {} {row}: {error}", .table.map_or("transaction", |t| t.name()))]
pub struct FileFailure {
    pub file: FileId,
    /// `None` when the transaction itself could not be opened or committed.
    pub table: Option<TargetTable>,
    /// Key of the failing row, or the failing transaction step.
    pub row: String,
    #[source]
    pub error: StoreError,
}

/// What one committed file contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileLoad {
    pub written: LoadCounts,
    pub matches: MatchStats,
    /// Songplays this file inserted without a catalog match; duplicates are not counted.
    pub unmatched_inserted: u64,
}

/// Rows of one file written inside a transaction that is still open.
#[derive(Debug)]
#[must_use]
pub struct PendingFile {
    load: FileLoad,
}

/// Writes one file's rows inside one transaction: dimensions first, then facts.
pub struct DirectLoader<'s, S: TargetStore + ?Sized> {
    store: &'s mut S,
}

impl<'s, S: TargetStore + ?Sized> DirectLoader<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self { store }
    }

    pub fn load_catalog_file(
        &mut self,
        file: &FileId,
        records: &[RawCatalogRecord],
    ) -> Result<FileLoad, LoadError> {
        let pending = self.write_catalog_file(file, records)?;
        self.commit_file(file, pending)
    }

    pub fn load_event_file(
        &mut self,
        file: &FileId,
        events: &[RawEventRecord],
        matcher: &FactMatcher<'_>,
    ) -> Result<FileLoad, LoadError> {
        let pending = self.write_event_file(file, events, matcher)?;
        self.commit_file(file, pending)
    }

    /// Writes artists and songs of one catalog file, leaving the transaction open.
    pub fn write_catalog_file(
        &mut self,
        file: &FileId,
        records: &[RawCatalogRecord],
    ) -> Result<PendingFile, LoadError> {
        let dims = CatalogDimensions::from_records(records);
        let rows = dims
            .artists()
            .map(Row::Artist)
            .chain(dims.songs().map(Row::Song));
        self.write_rows(file, rows)
    }

    /// Writes users, time and songplays of one event file, leaving the
    /// transaction open.
    pub fn write_event_file(
        &mut self,
        file: &FileId,
        events: &[RawEventRecord],
        matcher: &FactMatcher<'_>,
    ) -> Result<PendingFile, LoadError> {
        let dims = ActivityDimensions::from_events(events).map_err(|unplaced| {
            let line = events
                .iter()
                .position(|event| event.ts == unplaced.ts)
                .map_or(0, |index| index + 1);
            LoadError::Parse(ParseError::Timestamp {
                file: file.clone(),
                line,
                ts: unplaced.ts,
            })
        })?;
        let (facts, matches) = matcher.facts(events);
        let rows = dims
            .users()
            .map(Row::User)
            .chain(dims.times().map(Row::Time))
            .chain(facts.iter().map(Row::Songplay));
        let mut pending = self.write_rows(file, rows)?;
        pending.load.matches = matches;
        Ok(pending)
    }

    pub fn commit_file(&mut self, file: &FileId, pending: PendingFile) -> Result<FileLoad, LoadError> {
        self.store
            .commit()
            .map_err(|error| self.abandon(file, None, "commit".to_string(), error))?;
        debug!("Committed {}: {}", file, pending.load.written);
        Ok(pending.load)
    }

    fn write_rows<'r>(
        &mut self,
        file: &FileId,
        rows: impl Iterator<Item = Row<'r>>,
    ) -> Result<PendingFile, LoadError> {
        self.store
            .begin()
            .map_err(|error| self.abandon(file, None, "begin".to_string(), error))?;

        let mut load = FileLoad::default();
        for row in rows {
            match self.store.write(row) {
                Ok(outcome) => {
                    load.written.record(row.table(), outcome);
                    if let (Row::Songplay(play), WriteOutcome::Inserted) = (row, outcome) {
                        if play.song_id.is_none() {
                            load.unmatched_inserted += 1;
                        }
                    }
                }
                Err(error) => return Err(self.abandon(file, Some(row.table()), row.key(), error)),
            }
        }
        Ok(PendingFile { load })
    }

    /// Rolls back the open transaction and classifies `error`.
    fn abandon(
        &mut self,
        file: &FileId,
        table: Option<TargetTable>,
        row: String,
        error: StoreError,
    ) -> LoadError {
        if let Err(rollback_error) = self.store.rollback() {
            warn!("Rollback of {} failed: {}", file, rollback_error);
        }
        if error.is_connection() {
            return LoadError::Connection(error);
        }
        let failure = FileFailure {
            file: file.clone(),
            table,
            row,
            error,
        };
        warn!("Rolled back {}", failure);
        LoadError::File(failure)
    }
}
