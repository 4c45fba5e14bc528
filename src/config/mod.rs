mod file_config;

pub use file_config::{ExportConfig, FileConfig, StagingConfig};

use crate::loader::{LoadMode, StagedLocations};
use crate::pipeline::PipelineConfig;
use crate::source::{SourceFilter, DEFAULT_FILE_PATTERN};
use crate::transform::MatchPolicy;
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_DB_PATH: &str = "warehouse.db";
pub const DEFAULT_SONG_DATA: &str = "data/song_data";
pub const DEFAULT_LOG_DATA: &str = "data/log_data";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub song_data: Option<PathBuf>,
    pub log_data: Option<PathBuf>,
    pub file_pattern: Option<String>,
    pub duration_tolerance: Option<f64>,
    pub mode: Option<LoadMode>,
    pub songs_location: Option<String>,
    pub events_location: Option<String>,
    pub role: Option<String>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub song_data: PathBuf,
    pub log_data: PathBuf,
    pub file_pattern: String,
    pub duration_tolerance: f64,
    pub mode: LoadMode,
    pub staging: StagedLocations,
    pub output_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        let song_data = file
            .song_data
            .map(PathBuf::from)
            .or_else(|| cli.song_data.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SONG_DATA));
        let log_data = file
            .log_data
            .map(PathBuf::from)
            .or_else(|| cli.log_data.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DATA));

        let file_pattern = file
            .file_pattern
            .or_else(|| cli.file_pattern.clone())
            .unwrap_or_else(|| DEFAULT_FILE_PATTERN.to_string());
        SourceFilter::new(&file_pattern)
            .with_context(|| format!("Invalid file_pattern {:?}", file_pattern))?;

        let duration_tolerance = file
            .duration_tolerance
            .or(cli.duration_tolerance)
            .unwrap_or(0.0);
        if !duration_tolerance.is_finite() || duration_tolerance < 0.0 {
            bail!(
                "duration_tolerance must be a non-negative number, got {}",
                duration_tolerance
            );
        }

        let mode = match file.mode {
            Some(mode) => mode.parse::<LoadMode>().map_err(|err| anyhow!(err))?,
            None => cli.mode.unwrap_or_default(),
        };

        // Staging locations default to the direct-mode roots
        let staging_file = file.staging.unwrap_or_default();
        let staging = StagedLocations {
            songs: staging_file
                .songs_location
                .or_else(|| cli.songs_location.clone())
                .unwrap_or_else(|| song_data.display().to_string()),
            events: staging_file
                .events_location
                .or_else(|| cli.events_location.clone())
                .unwrap_or_else(|| log_data.display().to_string()),
            role: staging_file.role.or_else(|| cli.role.clone()),
        };

        let output_dir = file
            .export
            .and_then(|export| export.output_dir)
            .map(PathBuf::from)
            .or_else(|| cli.output_dir.clone());

        Ok(Self {
            db_path,
            song_data,
            log_data,
            file_pattern,
            duration_tolerance,
            mode,
            staging,
            output_dir,
        })
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy::with_tolerance(self.duration_tolerance)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            policy: self.match_policy(),
        }
    }

    pub fn source_filter(&self) -> Result<SourceFilter> {
        SourceFilter::new(&self.file_pattern)
            .with_context(|| format!("Invalid file_pattern {:?}", self.file_pattern))
    }

    /// Export root; required only by the export command.
    pub fn output_dir(&self) -> Result<&Path> {
        self.output_dir.as_deref().ok_or_else(|| {
            anyhow!("output_dir must be specified via --output or in the [export] section")
        })
    }
}
