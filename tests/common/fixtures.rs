//! Input trees and warehouses living in a temporary directory.

#![allow(dead_code)]

use serde_json::json;
use songplay_warehouse::source::{LocalFileTree, SourceFilter};
use songplay_warehouse::{
    LocalBulkTransfer, Pipeline, PipelineConfig, RunReport, SourceTrees, SqliteWarehouse,
    StagedLocations,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One catalog document as the catalog dump lays it out.
pub fn catalog_doc(song_id: &str, title: &str, artist_id: &str, artist: &str, duration: f64) -> String {
    json!({
        "num_songs": 1,
        "artist_id": artist_id,
        "artist_latitude": null,
        "artist_longitude": null,
        "artist_location": "",
        "artist_name": artist,
        "song_id": song_id,
        "title": title,
        "duration": duration,
        "year": 0
    })
    .to_string()
}

/// One activity log line for any page.
pub fn event_line(page: &str, ts: i64, user_id: i64, level: &str, session_id: i64) -> String {
    json!({
        "artist": null,
        "auth": "Logged In",
        "firstName": "Kate",
        "gender": "F",
        "itemInSession": 0,
        "lastName": "Harrell",
        "length": null,
        "level": level,
        "location": "Lansing-East Lansing, MI",
        "method": "GET",
        "page": page,
        "registration": 1540472624796.0,
        "sessionId": session_id,
        "song": null,
        "status": 200,
        "ts": ts,
        "userAgent": "Mozilla/5.0 (X11; Linux x86_64)",
        "userId": user_id.to_string()
    })
    .to_string()
}

/// A NextSong line for `song` by `artist`.
pub fn play_line(
    ts: i64,
    user_id: i64,
    level: &str,
    session_id: i64,
    song: &str,
    artist: &str,
    length: f64,
) -> String {
    let mut line: serde_json::Value =
        serde_json::from_str(&event_line("NextSong", ts, user_id, level, session_id))
            .expect("fixture line is valid JSON");
    line["song"] = json!(song);
    line["artist"] = json!(artist);
    line["length"] = json!(length);
    line["method"] = json!("PUT");
    line.to_string()
}

/// A song_data tree, a log_data tree and a warehouse path under one TempDir.
pub struct TestData {
    pub dir: TempDir,
    pub song_data: PathBuf,
    pub log_data: PathBuf,
    pub db_path: PathBuf,
}

impl TestData {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let song_data = dir.path().join("song_data");
        let log_data = dir.path().join("log_data");
        fs::create_dir_all(&song_data).expect("Failed to create song_data");
        fs::create_dir_all(&log_data).expect("Failed to create log_data");
        let db_path = dir.path().join("warehouse.db");
        Self {
            dir,
            song_data,
            log_data,
            db_path,
        }
    }

    pub fn write_catalog(&self, relative: &str, contents: &str) {
        write(&self.song_data, relative, contents);
    }

    pub fn write_log(&self, relative: &str, lines: &[String]) {
        let mut contents = lines.join("\n");
        contents.push('\n');
        write(&self.log_data, relative, &contents);
    }

    pub fn open_warehouse(&self) -> SqliteWarehouse {
        SqliteWarehouse::open(&self.db_path).expect("Failed to open warehouse")
    }

    pub fn staged_locations(&self) -> StagedLocations {
        StagedLocations {
            songs: format!("file://{}", self.song_data.display()),
            events: self.log_data.display().to_string(),
            role: None,
        }
    }

    pub fn run_direct_with(&self, config: PipelineConfig) -> RunReport {
        let catalog = LocalFileTree::new(self.song_data.clone(), SourceFilter::default());
        let events = LocalFileTree::new(self.log_data.clone(), SourceFilter::default());
        let mut pipeline = Pipeline::new(self.open_warehouse(), config);
        pipeline.run_direct(&SourceTrees {
            catalog: &catalog,
            events: &events,
        })
    }

    pub fn run_direct(&self) -> RunReport {
        self.run_direct_with(PipelineConfig::default())
    }

    pub fn run_staged(&self) -> RunReport {
        let transfer = LocalBulkTransfer::default();
        let mut pipeline = Pipeline::new(self.open_warehouse(), PipelineConfig::default());
        pipeline.run_staged(&transfer, &self.staged_locations())
    }
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create fixture dir");
    }
    fs::write(&path, contents).expect("Failed to write fixture");
}
