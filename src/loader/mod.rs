//! Strategies for getting rows into the warehouse.
//!
//! Direct mode writes parsed records row by row, one transaction per input file.
//! Staged mode bulk-copies raw documents into staging tables and derives the
//! star from them with set-based statements, one transaction per table.

mod direct;
mod staged;

pub use direct::{DirectLoader, FileFailure, FileLoad, PendingFile};
pub use staged::{
    BulkTransfer, LocalBulkTransfer, PendingUnit, StagedLoader, StagedLocations, StagedUnit,
    UnitFailure, UnitResult,
};

use crate::source::ParseError;
use crate::store::{StoreError, TargetTable, WriteOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    #[default]
    Direct,
    Staged,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Direct => f.write_str("direct"),
            LoadMode::Staged => f.write_str("staged"),
        }
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(LoadMode::Direct),
            "staged" => Ok(LoadMode::Staged),
            other => Err(format!("unknown load mode '{other}', expected direct or staged")),
        }
    }
}

/// Rows inserted or updated, per warehouse table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadCounts {
    pub artists: u64,
    pub songs: u64,
    pub users: u64,
    pub time: u64,
    pub songplays: u64,
}

impl LoadCounts {
    pub fn add(&mut self, table: TargetTable, rows: u64) {
        match table {
            TargetTable::Artists => self.artists += rows,
            TargetTable::Songs => self.songs += rows,
            TargetTable::Users => self.users += rows,
            TargetTable::Time => self.time += rows,
            TargetTable::Songplays => self.songplays += rows,
        }
    }

    pub fn record(&mut self, table: TargetTable, outcome: WriteOutcome) {
        if outcome != WriteOutcome::Unchanged {
            self.add(table, 1);
        }
    }

    pub fn merge(&mut self, other: &LoadCounts) {
        for table in TargetTable::ALL {
            self.add(table, other.get(table));
        }
    }

    pub fn get(&self, table: TargetTable) -> u64 {
        match table {
            TargetTable::Artists => self.artists,
            TargetTable::Songs => self.songs,
            TargetTable::Users => self.users,
            TargetTable::Time => self.time,
            TargetTable::Songplays => self.songplays,
        }
    }

    pub fn total(&self) -> u64 {
        TargetTable::ALL.iter().map(|table| self.get(*table)).sum()
    }
}

impl fmt::Display for LoadCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "artists={} songs={} users={} time={} songplays={}",
            self.artists, self.songs, self.users, self.time, self.songplays
        )
    }
}

/// Why a unit of work (a file, or a staged step) did not land.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The store is unusable; the run cannot continue.
    #[error(transparent)]
    Connection(StoreError),

    #[error(transparent)]
    Parse(ParseError),

    #[error(transparent)]
    File(FileFailure),

    #[error(transparent)]
    Unit(UnitFailure),
}

impl LoadError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LoadError::Connection(_))
    }
}
