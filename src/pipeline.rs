//! Run orchestration: discover inputs, push every unit of work through a
//! loader, and account for what happened.
//!
//! Direct mode treats each input file as a unit and loads all catalog files
//! before any event file, so plays are matched against the full catalog.
//! Staged mode treats each staging transfer and each table transform as a
//! unit. Only a store that can no longer be used ends a run early.

use crate::loader::{
    BulkTransfer, DirectLoader, FileFailure, FileLoad, LoadCounts, LoadError, LoadMode,
    StagedLoader, StagedLocations, StagedUnit, UnitFailure, UnitResult,
};
use crate::source::{FileTree, ParseError, RecordSource, SourceItem};
use crate::store::{SetMatcher, StagingStore, StoreError, TableCounts, TargetStore};
use crate::transform::{CatalogIndex, FactMatcher, MatchPolicy};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Discovering,
    Processing,
    Committing,
    Done,   // terminal
    Failed, // terminal
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineConfig {
    pub policy: MatchPolicy,
}

/// Input roots for a direct run.
pub struct SourceTrees<'a> {
    pub catalog: &'a dyn FileTree,
    pub events: &'a dyn FileTree,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    /// The unit just finished: a file id or a staged step.
    pub unit: String,
}

#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub mode: LoadMode,
    pub units_total: usize,
    pub units_processed: usize,
    pub parse_errors: Vec<ParseError>,
    pub file_failures: Vec<FileFailure>,
    pub unit_failures: Vec<UnitFailure>,
    /// Rows inserted or updated by this run.
    pub written: LoadCounts,
    /// Songplays inserted by this run without a catalog match.
    pub unmatched_songplays: u64,
    /// Table sizes after the run; absent when they could not be read.
    pub table_counts: Option<TableCounts>,
    pub fatal: Option<StoreError>,
}

impl RunReport {
    fn new(mode: LoadMode) -> Self {
        Self {
            state: RunState::Discovering,
            mode,
            units_total: 0,
            units_processed: 0,
            parse_errors: Vec::new(),
            file_failures: Vec::new(),
            unit_failures: Vec::new(),
            written: LoadCounts::default(),
            unmatched_songplays: 0,
            table_counts: None,
            fatal: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == RunState::Failed
    }

    /// Units that did not land, whatever the reason.
    pub fn failed_units(&self) -> usize {
        self.parse_errors.len() + self.file_failures.len() + self.unit_failures.len()
    }

    pub fn log_summary(&self) {
        info!("{} load finished: {:?}", self.mode, self.state);
        info!(
            "  Units: {}/{} processed, {} failed",
            self.units_processed,
            self.units_total,
            self.failed_units()
        );
        info!("  Written: {}", self.written);
        info!("  Unmatched songplays: {}", self.unmatched_songplays);
        if let Some(counts) = &self.table_counts {
            info!("  Tables: {}", counts);
        }
        for err in &self.parse_errors {
            warn!("  Parse error: {}", err);
        }
        for failure in &self.file_failures {
            warn!("  File failure: {}", failure);
        }
        for failure in &self.unit_failures {
            warn!("  Unit failure: {}", failure);
        }
        if let Some(fatal) = &self.fatal {
            error!("  Fatal: {}", fatal);
        }
    }
}

type ProgressCallback = Box<dyn FnMut(&Progress)>;

/// Owns the target store for the length of its runs.
pub struct Pipeline<S> {
    store: S,
    config: PipelineConfig,
    state: RunState,
    on_progress: Option<ProgressCallback>,
}

fn transition(state: &mut RunState, next: RunState) {
    if *state != next {
        debug!("Run state {:?} -> {:?}", state, next);
        *state = next;
    }
}

fn report_progress(
    on_progress: &mut Option<ProgressCallback>,
    report: &RunReport,
    unit: String,
) {
    let progress = Progress {
        processed: report.units_processed,
        total: report.units_total,
        unit,
    };
    info!(
        "Processed {}/{}: {}",
        progress.processed, progress.total, progress.unit
    );
    if let Some(callback) = on_progress {
        callback(&progress);
    }
}

/// Files the outcome of one unit into `report`; hands back a fatal error.
fn absorb<T>(
    report: &mut RunReport,
    result: Result<T, LoadError>,
    on_success: impl FnOnce(&mut RunReport, T),
) -> Result<(), StoreError> {
    match result {
        Ok(value) => on_success(report, value),
        Err(LoadError::Connection(error)) => return Err(error),
        Err(LoadError::Parse(err)) => report.parse_errors.push(err),
        Err(LoadError::File(failure)) => report.file_failures.push(failure),
        Err(LoadError::Unit(failure)) => report.unit_failures.push(failure),
    }
    report.units_processed += 1;
    Ok(())
}

fn absorb_file_load(report: &mut RunReport, load: FileLoad) {
    report.written.merge(&load.written);
    report.unmatched_songplays += load.unmatched_inserted;
}

impl<S> Pipeline<S> {
    pub fn new(store: S, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            state: RunState::Discovering,
            on_progress: None,
        }
    }

    /// Called after every unit with the running totals.
    pub fn with_progress(mut self, callback: impl FnMut(&Progress) + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

impl<S: TargetStore> Pipeline<S> {
    fn start(&mut self) -> Result<(), StoreError> {
        self.state = RunState::Discovering;
        self.store.ping()?;
        self.store.ensure_schema()
    }

    fn fail(&mut self, mut report: RunReport, error: StoreError) -> RunReport {
        if let Err(rollback_error) = self.store.rollback() {
            debug!("Rollback after fatal error failed: {}", rollback_error);
        }
        error!("Run failed: {}", error);
        transition(&mut self.state, RunState::Failed);
        report.state = RunState::Failed;
        report.fatal = Some(error);
        report.log_summary();
        report
    }

    fn finish(&mut self, mut report: RunReport) -> RunReport {
        match self.store.table_counts() {
            Ok(counts) => report.table_counts = Some(counts),
            Err(error) if error.is_connection() => return self.fail(report, error),
            Err(error) => warn!("Could not read table counts: {}", error),
        }
        transition(&mut self.state, RunState::Done);
        report.state = RunState::Done;
        report.log_summary();
        report
    }

    /// Loads every catalog file, then every event file, one transaction each.
    pub fn run_direct(&mut self, sources: &SourceTrees<'_>) -> RunReport {
        let mut report = RunReport::new(LoadMode::Direct);
        if let Err(error) = self.start() {
            return self.fail(report, error);
        }

        let catalog = RecordSource::new(sources.catalog);
        let events = RecordSource::new(sources.events);
        let catalog_listing = catalog.discover();
        let event_listing = events.discover();
        report.units_total = catalog_listing.files.len()
            + catalog_listing.errors.len()
            + event_listing.files.len()
            + event_listing.errors.len();
        info!(
            "Discovered {} catalog files under {} and {} event files under {}",
            catalog_listing.files.len(),
            catalog.location(),
            event_listing.files.len(),
            events.location()
        );

        let Self {
            store,
            config,
            state,
            on_progress,
        } = &mut *self;
        transition(state, RunState::Processing);

        let mut loaded = Ok(());
        for SourceItem { file, records } in catalog.catalog() {
            let mut loader = DirectLoader::new(&mut *store);
            let result = records
                .map_err(LoadError::Parse)
                .and_then(|records| loader.write_catalog_file(&file, &records))
                .and_then(|pending| {
                    transition(state, RunState::Committing);
                    loader.commit_file(&file, pending)
                });
            transition(state, RunState::Processing);
            loaded = absorb(&mut report, result, absorb_file_load);
            if loaded.is_err() {
                break;
            }
            report_progress(on_progress, &report, file.to_string());
        }
        if let Err(error) = loaded {
            return self.fail(report, error);
        }

        let index = match store.catalog_entries() {
            Ok(entries) => CatalogIndex::new(entries),
            Err(error) => return self.fail(report, error),
        };
        debug!("Matching against {} catalog entries", index.len());
        let matcher = FactMatcher::new(&index, config.policy);

        let mut loaded = Ok(());
        for SourceItem { file, records } in events.events() {
            let mut loader = DirectLoader::new(&mut *store);
            let result = records
                .map_err(LoadError::Parse)
                .and_then(|events| loader.write_event_file(&file, &events, &matcher))
                .and_then(|pending| {
                    transition(state, RunState::Committing);
                    loader.commit_file(&file, pending)
                });
            transition(state, RunState::Processing);
            loaded = absorb(&mut report, result, absorb_file_load);
            if loaded.is_err() {
                break;
            }
            report_progress(on_progress, &report, file.to_string());
        }
        if let Err(error) = loaded {
            return self.fail(report, error);
        }

        self.finish(report)
    }
}

impl<S: TargetStore + StagingStore + SetMatcher> Pipeline<S> {
    /// Transfers raw documents into staging, then derives each table from it.
    pub fn run_staged(
        &mut self,
        transfer: &dyn BulkTransfer,
        locations: &StagedLocations,
    ) -> RunReport {
        let mut report = RunReport::new(LoadMode::Staged);
        if let Err(error) = self.start() {
            return self.fail(report, error);
        }
        report.units_total = StagedUnit::ALL.len();
        info!(
            "Staging catalog from {} and events from {}",
            locations.songs, locations.events
        );

        let Self {
            store,
            config,
            state,
            on_progress,
        } = &mut *self;
        let mut loader = StagedLoader::new(&mut *store, transfer, locations, config.policy);
        let mut loaded = loader.prepare();
        transition(state, RunState::Processing);

        if loaded.is_ok() {
            for unit in StagedUnit::ALL {
                let result = loader.begin_unit(unit).and_then(|pending| {
                    transition(state, RunState::Committing);
                    loader.commit_unit(pending)
                });
                transition(state, RunState::Processing);
                loaded = absorb(&mut report, result, |report, result| {
                    report.written.merge(&result.written(unit));
                    if let UnitResult::Matched(stats) = result {
                        report.unmatched_songplays += stats.unmatched as u64;
                    }
                });
                if loaded.is_err() {
                    break;
                }
                report_progress(on_progress, &report, unit.to_string());
            }
        }
        drop(loader);
        if let Err(error) = loaded {
            return self.fail(report, error);
        }

        self.finish(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{LocalFileTree, SourceFilter};
    use crate::store::{Row, SqliteWarehouse, WriteOutcome};
    use crate::transform::CatalogEntry;
    use rusqlite::ffi;
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn connection_lost() -> StoreError {
        StoreError::Connection(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_IOERR),
            Some("disk I/O error".to_string()),
        ))
    }

    /// Accepts everything until `writes_before_outage` writes have happened.
    #[derive(Default)]
    struct FlakyStore {
        writes_before_outage: Option<usize>,
        unreachable: bool,
        writes: usize,
        rollbacks: usize,
    }

    impl TargetStore for FlakyStore {
        fn ping(&mut self) -> Result<(), StoreError> {
            if self.unreachable {
                return Err(connection_lost());
            }
            Ok(())
        }

        fn ensure_schema(&mut self) -> Result<(), StoreError> {
            Ok(())
        }

        fn begin(&mut self) -> Result<(), StoreError> {
            Ok(())
        }

        fn write(&mut self, _row: Row<'_>) -> Result<WriteOutcome, StoreError> {
            if self.writes_before_outage == Some(self.writes) {
                return Err(connection_lost());
            }
            self.writes += 1;
            Ok(WriteOutcome::Inserted)
        }

        fn commit(&mut self) -> Result<(), StoreError> {
            Ok(())
        }

        fn rollback(&mut self) -> Result<(), StoreError> {
            self.rollbacks += 1;
            Ok(())
        }

        fn catalog_entries(&mut self) -> Result<Vec<CatalogEntry>, StoreError> {
            Ok(Vec::new())
        }

        fn table_counts(&mut self) -> Result<TableCounts, StoreError> {
            Ok(TableCounts::default())
        }
    }

    fn write_file(root: &Path, name: &str, contents: &str) {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn dataset() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "song_data/A/TRA.json",
            r#"{"num_songs": 1, "artist_id": "ARXR32B1187FB57099", "artist_latitude": null, "artist_longitude": null, "artist_location": "", "artist_name": "Gob", "song_id": "SOFSOCN12A8C143F5D", "title": "Face the Ashes", "duration": 209.60608, "year": 2007}"#,
        );
        write_file(dir.path(), "song_data/A/TRB.json", "{ truncated");
        write_file(
            dir.path(),
            "log_data/2018-11-12-events.json",
            concat!(
                r#"{"artist":"Gob","auth":"Logged In","firstName":"Chloe","gender":"F","itemInSession":3,"lastName":"Cuevas","length":209.60608,"level":"free","location":"San Francisco","method":"PUT","page":"NextSong","registration":1540940782796.0,"sessionId":630,"song":"Face the Ashes","status":200,"ts":1541990258796,"userAgent":"Mozilla","userId":"49"}"#,
                "\n",
                r#"{"artist":null,"auth":"Logged In","firstName":"Chloe","gender":"F","itemInSession":4,"lastName":"Cuevas","length":null,"level":"free","location":"San Francisco","method":"GET","page":"Login","registration":1540940782796.0,"sessionId":630,"song":null,"status":200,"ts":1541990300000,"userAgent":"Mozilla","userId":"49"}"#,
                "\n"
            ),
        );
        dir
    }

    fn trees(root: &Path) -> (LocalFileTree, LocalFileTree) {
        (
            LocalFileTree::new(root.join("song_data"), SourceFilter::default()),
            LocalFileTree::new(root.join("log_data"), SourceFilter::default()),
        )
    }

    #[test]
    fn direct_run_survives_bad_file_and_reports_progress() {
        let dir = dataset();
        let (catalog, events) = trees(dir.path());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();

        let warehouse = SqliteWarehouse::in_memory().unwrap();
        let mut pipeline = Pipeline::new(warehouse, PipelineConfig::default())
            .with_progress(move |progress| sink.borrow_mut().push(progress.clone()));
        let report = pipeline.run_direct(&SourceTrees {
            catalog: &catalog,
            events: &events,
        });

        assert_eq!(report.state, RunState::Done);
        assert_eq!(pipeline.state(), RunState::Done);
        assert_eq!(report.units_total, 3);
        assert_eq!(report.units_processed, 3);
        assert_eq!(report.parse_errors.len(), 1);
        assert_eq!(report.written.songplays, 1);
        assert_eq!(report.unmatched_songplays, 0);
        let counts = report.table_counts.unwrap();
        assert_eq!(counts.songplays, 1);
        assert_eq!(counts.time, 1);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert!(seen[1].unit.ends_with("TRB.json"));
        assert_eq!(seen.last().unwrap().processed, 3);
        assert_eq!(seen.last().unwrap().total, 3);
    }

    #[test]
    fn unreachable_store_fails_run() {
        let dir = dataset();
        let (catalog, events) = trees(dir.path());
        let store = FlakyStore {
            unreachable: true,
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(store, PipelineConfig::default());
        let report = pipeline.run_direct(&SourceTrees {
            catalog: &catalog,
            events: &events,
        });
        assert_eq!(report.state, RunState::Failed);
        assert!(report.fatal.as_ref().unwrap().is_connection());
        assert_eq!(report.units_processed, 0);
    }

    #[test]
    fn connection_lost_mid_run_stops_and_rolls_back() {
        let dir = dataset();
        let (catalog, events) = trees(dir.path());
        // the catalog file writes an artist and a song, the outage hits the event file
        let store = FlakyStore {
            writes_before_outage: Some(2),
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(store, PipelineConfig::default());
        let report = pipeline.run_direct(&SourceTrees {
            catalog: &catalog,
            events: &events,
        });

        assert!(report.is_failed());
        assert_eq!(report.units_processed, 2);
        assert!(report.file_failures.is_empty());
        let store = pipeline.into_store();
        assert_eq!(store.writes, 2);
        assert!(store.rollbacks >= 1);
    }

    #[test]
    fn staged_run_loads_star() {
        let dir = dataset();
        // the staged transfer rejects the truncated catalog document
        std::fs::remove_file(dir.path().join("song_data/A/TRB.json")).unwrap();
        let locations = StagedLocations {
            songs: dir.path().join("song_data").display().to_string(),
            events: dir.path().join("log_data").display().to_string(),
            role: None,
        };
        let warehouse = SqliteWarehouse::in_memory().unwrap();
        let mut pipeline = Pipeline::new(warehouse, PipelineConfig::default());
        let report =
            pipeline.run_staged(&crate::loader::LocalBulkTransfer::default(), &locations);

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.units_processed, StagedUnit::ALL.len());
        assert!(report.unit_failures.is_empty());
        assert_eq!(report.written.songplays, 1);
        let counts = report.table_counts.unwrap();
        assert_eq!(counts.users, 1);
        assert_eq!(counts.unmatched_songplays, 0);
    }
}
