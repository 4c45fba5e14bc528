//! Store traits.
//!
//! `TargetStore` is the row-at-a-time surface used by the direct loader;
//! `StagingStore` and `SetMatcher` are the set-based surface used by the
//! staged loader.

use super::error::StoreError;
use crate::model::{ArtistDim, SongDim, SongplayFact, TimeDim, UserDim};
use crate::transform::{CatalogEntry, MatchPolicy, MatchStats};
use serde::Serialize;
use std::fmt;

/// Warehouse tables in load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTable {
    Artists,
    Songs,
    Users,
    Time,
    Songplays,
}

impl TargetTable {
    pub const ALL: [TargetTable; 5] = [
        TargetTable::Artists,
        TargetTable::Songs,
        TargetTable::Users,
        TargetTable::Time,
        TargetTable::Songplays,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TargetTable::Artists => "artists",
            TargetTable::Songs => "songs",
            TargetTable::Users => "users",
            TargetTable::Time => "time",
            TargetTable::Songplays => "songplays",
        }
    }
}

impl fmt::Display for TargetTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row bound for a warehouse table.
#[derive(Debug, Clone, Copy)]
pub enum Row<'a> {
    Artist(&'a ArtistDim),
    Song(&'a SongDim),
    User(&'a UserDim),
    Time(&'a TimeDim),
    Songplay(&'a SongplayFact),
}

impl Row<'_> {
    pub fn table(&self) -> TargetTable {
        match self {
            Row::Artist(_) => TargetTable::Artists,
            Row::Song(_) => TargetTable::Songs,
            Row::User(_) => TargetTable::Users,
            Row::Time(_) => TargetTable::Time,
            Row::Songplay(_) => TargetTable::Songplays,
        }
    }

    /// Key of the row, for log lines and failure reports.
    pub fn key(&self) -> String {
        match self {
            Row::Artist(artist) => artist.artist_id.clone(),
            Row::Song(song) => song.song_id.clone(),
            Row::User(user) => user.user_id.to_string(),
            Row::Time(time) => time.start_time.to_string(),
            Row::Songplay(play) => {
                format!("{}/{}/{}", play.start_time, play.user_id, play.session_id)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    /// The key was present and nothing changed, or the row was a duplicate.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub artists: u64,
    pub songs: u64,
    pub users: u64,
    pub time: u64,
    pub songplays: u64,
    /// Songplays without a catalog match.
    pub unmatched_songplays: u64,
}

impl fmt::Display for TableCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "artists={} songs={} users={} time={} songplays={} (unmatched={})",
            self.artists, self.songs, self.users, self.time, self.songplays, self.unmatched_songplays
        )
    }
}

/// Row-at-a-time access to the warehouse.
///
/// Writes between `begin` and `commit` become visible together; `rollback`
/// discards them.
pub trait TargetStore {
    /// Fails with a connection error when the store cannot be reached.
    fn ping(&mut self) -> Result<(), StoreError>;

    /// Creates missing tables and checks existing ones.
    fn ensure_schema(&mut self) -> Result<(), StoreError>;

    fn begin(&mut self) -> Result<(), StoreError>;

    /// Artists, songs and users are upserted, latest write wins (users only
    /// when the row is at least as recent as the stored one). Time rows and
    /// songplays are inserted unless their key is already present.
    fn write(&mut self, row: Row<'_>) -> Result<WriteOutcome, StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discards the open transaction, if any.
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Every stored song joined with its artist.
    fn catalog_entries(&mut self) -> Result<Vec<CatalogEntry>, StoreError>;

    fn table_counts(&mut self) -> Result<TableCounts, StoreError>;
}

/// The two kinds of raw documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Catalog,
    Events,
}

impl RecordKind {
    pub fn staging_table(&self) -> &'static str {
        match self {
            RecordKind::Catalog => "stg_songs",
            RecordKind::Events => "stg_events",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Catalog => f.write_str("catalog"),
            RecordKind::Events => f.write_str("events"),
        }
    }
}

/// Dimensions that can be derived from staging with plain set operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Artists,
    Songs,
    Users,
    Time,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Artists,
        Dimension::Songs,
        Dimension::Users,
        Dimension::Time,
    ];

    /// `None` for the fact table.
    pub fn of_table(table: TargetTable) -> Option<Dimension> {
        match table {
            TargetTable::Artists => Some(Dimension::Artists),
            TargetTable::Songs => Some(Dimension::Songs),
            TargetTable::Users => Some(Dimension::Users),
            TargetTable::Time => Some(Dimension::Time),
            TargetTable::Songplays => None,
        }
    }

    pub fn table(&self) -> TargetTable {
        match self {
            Dimension::Artists => TargetTable::Artists,
            Dimension::Songs => TargetTable::Songs,
            Dimension::Users => TargetTable::Users,
            Dimension::Time => TargetTable::Time,
        }
    }

    pub fn source(&self) -> RecordKind {
        match self {
            Dimension::Artists | Dimension::Songs => RecordKind::Catalog,
            Dimension::Users | Dimension::Time => RecordKind::Events,
        }
    }
}

/// An untyped raw document, as handed over by a bulk transfer.
pub type StagedDocument = serde_json::Map<String, serde_json::Value>;

/// Set-based loading through staging tables.
///
/// `stage`, `transform` and `SetMatcher::match_and_insert` run inside the
/// transaction the caller opened with `begin`; nothing lands before `commit`.
pub trait StagingStore: TargetStore {
    /// Creates the staging tables when absent.
    fn ensure_staging(&mut self) -> Result<(), StoreError>;

    /// Replaces the staging contents for `kind` with `documents`. Returns the
    /// number of staged rows.
    fn stage(&mut self, kind: RecordKind, documents: &[StagedDocument]) -> Result<u64, StoreError>;

    /// Derives one dimension from staging. Returns the number of rows inserted
    /// or updated.
    fn transform(&mut self, dimension: Dimension) -> Result<u64, StoreError>;
}

/// Set-based fact derivation.
pub trait SetMatcher {
    /// Joins staged song plays against the stored catalog under `policy` and
    /// inserts the resulting songplays, skipping plays already loaded.
    /// Counts cover newly inserted rows only.
    fn match_and_insert(&mut self, policy: &MatchPolicy) -> Result<MatchStats, StoreError>;
}
