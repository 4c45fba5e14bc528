use super::{LoadCounts, LoadError};
use crate::source::{Discovery, FileTree, LocalFileTree, SourceFilter};
use crate::store::{
    Dimension, RecordKind, SetMatcher, StagedDocument, StagingStore, StoreError, TargetTable,
    TransferError,
};
use crate::transform::{MatchPolicy, MatchStats};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where the bulk transfer picks raw documents up.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StagedLocations {
    pub songs: String,
    pub events: String,
    /// Identity the transfer acts as; opaque to the loader.
    pub role: Option<String>,
}

impl StagedLocations {
    pub fn location(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Catalog => &self.songs,
            RecordKind::Events => &self.events,
        }
    }
}

/// Moves raw documents from an external location into memory, untouched.
pub trait BulkTransfer {
    /// All documents under `location`, or nothing at all.
    fn fetch(&self, kind: RecordKind, location: &str)
        -> Result<Vec<StagedDocument>, TransferError>;
}

/// Bulk transfer from a local directory tree (`file://` prefix optional).
#[derive(Debug, Clone, Default)]
pub struct LocalBulkTransfer {
    filter: SourceFilter,
}

impl LocalBulkTransfer {
    pub fn new(filter: SourceFilter) -> Self {
        Self { filter }
    }
}

impl BulkTransfer for LocalBulkTransfer {
    fn fetch(
        &self,
        kind: RecordKind,
        location: &str,
    ) -> Result<Vec<StagedDocument>, TransferError> {
        let root = Path::new(location.strip_prefix("file://").unwrap_or(location));
        if !root.is_dir() {
            return Err(TransferError::Unreachable {
                location: location.to_string(),
                reason: "not a readable directory".to_string(),
            });
        }

        let tree = LocalFileTree::new(root, self.filter.clone());
        let Discovery { files, errors } = tree.discover();
        if let Some(err) = errors.into_iter().next() {
            return Err(TransferError::Rejected {
                file: err.file().clone(),
                reason: err.to_string(),
            });
        }

        let mut documents = Vec::new();
        for file in &files {
            let text = tree.read(file).map_err(|err| TransferError::Rejected {
                file: file.clone(),
                reason: err.to_string(),
            })?;
            // Catalog files hold one object, event logs one per line; both are
            // whitespace separated JSON values.
            for value in serde_json::Deserializer::from_str(&text).into_iter::<serde_json::Value>()
            {
                match value {
                    Ok(serde_json::Value::Object(document)) => documents.push(document),
                    Ok(other) => {
                        return Err(TransferError::Rejected {
                            file: file.clone(),
                            reason: format!("expected a JSON object, found {other}"),
                        })
                    }
                    Err(err) => {
                        return Err(TransferError::Rejected {
                            file: file.clone(),
                            reason: err.to_string(),
                        })
                    }
                }
            }
        }
        debug!(
            "Fetched {} {} documents from {} files under {}",
            documents.len(),
            kind,
            files.len(),
            location
        );
        Ok(documents)
    }
}

/// One step of a staged load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagedUnit {
    Stage(RecordKind),
    Transform(TargetTable),
}

impl StagedUnit {
    /// Staging first, then the star in dependency order.
    pub const ALL: [StagedUnit; 7] = [
        StagedUnit::Stage(RecordKind::Catalog),
        StagedUnit::Stage(RecordKind::Events),
        StagedUnit::Transform(TargetTable::Artists),
        StagedUnit::Transform(TargetTable::Songs),
        StagedUnit::Transform(TargetTable::Users),
        StagedUnit::Transform(TargetTable::Time),
        StagedUnit::Transform(TargetTable::Songplays),
    ];

    /// The staging input a transform reads.
    fn input(&self) -> Option<RecordKind> {
        match self {
            StagedUnit::Stage(_) => None,
            StagedUnit::Transform(TargetTable::Artists | TargetTable::Songs) => {
                Some(RecordKind::Catalog)
            }
            StagedUnit::Transform(_) => Some(RecordKind::Events),
        }
    }
}

impl fmt::Display for StagedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagedUnit::Stage(kind) => write!(f, "stage {}", kind),
            StagedUnit::Transform(table) => write!(f, "transform {}", table),
        }
    }
}

#[derive(Debug, Error)]
pub enum UnitFailure {
    #[error("{unit} failed: {error}")]
    Failed {
        unit: StagedUnit,
        #[source]
        error: StoreError,
    },

    #[error("{unit} skipped: staging of {missing} did not complete")]
    Skipped { unit: StagedUnit, missing: RecordKind },
}

impl UnitFailure {
    pub fn unit(&self) -> StagedUnit {
        match self {
            UnitFailure::Failed { unit, .. } | UnitFailure::Skipped { unit, .. } => *unit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitResult {
    Staged(u64),
    Transformed(u64),
    Matched(MatchStats),
}

impl UnitResult {
    /// Rows written to warehouse tables by this unit.
    pub fn written(&self, unit: StagedUnit) -> LoadCounts {
        let mut counts = LoadCounts::default();
        match (unit, self) {
            (StagedUnit::Transform(table), UnitResult::Transformed(rows)) => {
                counts.add(table, *rows)
            }
            (StagedUnit::Transform(table), UnitResult::Matched(stats)) => {
                counts.add(table, stats.total() as u64)
            }
            _ => {}
        }
        counts
    }
}

/// A unit whose writes are done but not yet committed.
#[derive(Debug)]
#[must_use]
pub struct PendingUnit {
    unit: StagedUnit,
    result: UnitResult,
}

/// Runs the staged steps one at a time, remembering which staging tables hold a
/// complete batch so dependent transforms can be skipped.
pub struct StagedLoader<'a, S: StagingStore + SetMatcher + ?Sized> {
    store: &'a mut S,
    transfer: &'a dyn BulkTransfer,
    locations: &'a StagedLocations,
    policy: MatchPolicy,
    staged: HashSet<RecordKind>,
}

impl<'a, S: StagingStore + SetMatcher + ?Sized> StagedLoader<'a, S> {
    pub fn new(
        store: &'a mut S,
        transfer: &'a dyn BulkTransfer,
        locations: &'a StagedLocations,
        policy: MatchPolicy,
    ) -> Self {
        Self {
            store,
            transfer,
            locations,
            policy,
            staged: HashSet::new(),
        }
    }

    /// Any failure here means the store cannot stage at all.
    pub fn prepare(&mut self) -> Result<(), StoreError> {
        self.store.ensure_staging()
    }

    /// Runs `unit` and commits it.
    pub fn run_unit(&mut self, unit: StagedUnit) -> Result<UnitResult, LoadError> {
        let pending = self.begin_unit(unit)?;
        self.commit_unit(pending)
    }

    /// Does the work of `unit` inside a fresh transaction, leaving it open.
    pub fn begin_unit(&mut self, unit: StagedUnit) -> Result<PendingUnit, LoadError> {
        if let Some(missing) = unit.input().filter(|kind| !self.staged.contains(kind)) {
            let failure = UnitFailure::Skipped { unit, missing };
            warn!("{}", failure);
            return Err(LoadError::Unit(failure));
        }

        self.store.begin().map_err(|error| classify(unit, error))?;
        let result = match unit {
            StagedUnit::Stage(kind) => self.stage(kind).map(UnitResult::Staged),
            StagedUnit::Transform(table) => match Dimension::of_table(table) {
                Some(dimension) => self
                    .store
                    .transform(dimension)
                    .map(UnitResult::Transformed),
                None => self
                    .store
                    .match_and_insert(&self.policy)
                    .map(UnitResult::Matched),
            },
        };
        match result {
            Ok(result) => Ok(PendingUnit { unit, result }),
            Err(error) => Err(self.abandon(unit, error)),
        }
    }

    pub fn commit_unit(&mut self, pending: PendingUnit) -> Result<UnitResult, LoadError> {
        let PendingUnit { unit, result } = pending;
        self.store
            .commit()
            .map_err(|error| self.abandon(unit, error))?;
        if let StagedUnit::Stage(kind) = unit {
            self.staged.insert(kind);
        }
        info!("{} done: {:?}", unit, result);
        Ok(result)
    }

    fn abandon(&mut self, unit: StagedUnit, error: StoreError) -> LoadError {
        if let Err(rollback_error) = self.store.rollback() {
            warn!("Rollback of {} failed: {}", unit, rollback_error);
        }
        classify(unit, error)
    }

    fn stage(&mut self, kind: RecordKind) -> Result<u64, StoreError> {
        let location = self.locations.location(kind);
        if let Some(role) = &self.locations.role {
            debug!("Transferring {} from {} as {}", kind, location, role);
        }
        let documents = self
            .transfer
            .fetch(kind, location)
            .map_err(|source| StoreError::Transfer {
                table: kind.staging_table(),
                source,
            })?;
        self.store.stage(kind, &documents)
    }
}

fn classify(unit: StagedUnit, error: StoreError) -> LoadError {
    if error.is_connection() {
        return LoadError::Connection(error);
    }
    let failure = UnitFailure::Failed { unit, error };
    warn!("{}", failure);
    LoadError::Unit(failure)
}
