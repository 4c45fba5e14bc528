//! Dumps the warehouse as partitioned JSON Lines.
//!
//! Each table lands in its own directory under the export root, split into
//! Hive-style `column=value` partitions. A table's directory is replaced as a
//! whole, so an export reflects exactly the warehouse at the time it ran.

mod partition;

pub use partition::PartitionKey;

use crate::model::{SongDim, TimeDim};
use crate::store::{SqliteWarehouse, StoreError, StoredSongplay, TargetTable};
use crate::transform::time;
use partition::Partitions;
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const PART_FILE_NAME: &str = "part-00000.jsonl";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("songplay at {start_time} cannot be placed on the calendar")]
    Unplaceable { start_time: i64 },

    #[error("writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serializing {table} row: {source}")]
    Serialize {
        table: TargetTable,
        #[source]
        source: serde_json::Error,
    },
}

/// What one table export produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableExport {
    pub table: TargetTable,
    pub rows: usize,
    pub partitions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub tables: Vec<TableExport>,
}

impl ExportSummary {
    pub fn rows(&self, table: TargetTable) -> usize {
        self.tables
            .iter()
            .filter(|export| export.table == table)
            .map(|export| export.rows)
            .sum()
    }
}

impl fmt::Display for ExportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, export) in self.tables.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}/{}", export.table, export.rows, export.partitions)?;
        }
        Ok(())
    }
}

pub struct PartitionedExporter {
    root: PathBuf,
}

impl PartitionedExporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn export(&self, warehouse: &SqliteWarehouse) -> Result<ExportSummary, ExportError> {
        info!("Exporting {} to {}", warehouse.location(), self.root.display());
        let mut summary = ExportSummary::default();

        let songs = warehouse.read_songs()?;
        let by_year_and_artist = |song: &SongDim| -> Result<Vec<PartitionKey>, ExportError> {
            Ok(vec![
                PartitionKey::new("year", song.year),
                PartitionKey::new("artist_id", &song.artist_id),
            ])
        };
        summary.tables.push(self.write_table(
            TargetTable::Songs,
            &songs,
            Layout::Partitioned(&by_year_and_artist),
        )?);

        let artists = warehouse.read_artists()?;
        summary
            .tables
            .push(self.write_table(TargetTable::Artists, &artists, Layout::Flat)?);

        let users = warehouse.read_users()?;
        summary
            .tables
            .push(self.write_table(TargetTable::Users, &users, Layout::Flat)?);

        let times = warehouse.read_times()?;
        let by_month = |time: &TimeDim| -> Result<Vec<PartitionKey>, ExportError> {
            Ok(vec![
                PartitionKey::new("year", time.year),
                PartitionKey::new("month", time.month),
            ])
        };
        summary.tables.push(self.write_table(
            TargetTable::Time,
            &times,
            Layout::Partitioned(&by_month),
        )?);

        let songplays = warehouse.read_songplays()?;
        let by_play_month = |play: &StoredSongplay| -> Result<Vec<PartitionKey>, ExportError> {
            let start_time = play.fact.start_time;
            let placed =
                time::decompose(start_time).ok_or(ExportError::Unplaceable { start_time })?;
            Ok(vec![
                PartitionKey::new("year", placed.year),
                PartitionKey::new("month", placed.month),
            ])
        };
        summary.tables.push(self.write_table(
            TargetTable::Songplays,
            &songplays,
            Layout::Partitioned(&by_play_month),
        )?);

        info!("Export finished: {}", summary);
        Ok(summary)
    }

    /// Replaces `<root>/<table>` with one part file per partition.
    fn write_table<T: Serialize>(
        &self,
        table: TargetTable,
        rows: &[T],
        layout: Layout<'_, T>,
    ) -> Result<TableExport, ExportError> {
        let table_dir = self.root.join(table.name());
        if table_dir.exists() {
            fs::remove_dir_all(&table_dir).map_err(|source| ExportError::Io {
                path: table_dir.clone(),
                source,
            })?;
        }
        create_dir(&table_dir)?;

        let mut partitions = Partitions::default();
        match layout {
            Layout::Flat => partitions.push_flat(rows),
            Layout::Partitioned(partition_of) => {
                for row in rows {
                    partitions.push(&partition_of(row)?, row);
                }
            }
        }

        let partition_count = partitions.len();
        for (dir, members) in partitions.into_groups() {
            let partition_dir = table_dir.join(dir);
            create_dir(&partition_dir)?;
            let path = partition_dir.join(PART_FILE_NAME);
            write_lines(table, &path, &members)?;
            debug!("Wrote {} rows to {}", members.len(), path.display());
        }

        info!(
            "Exported {} {} rows in {} partitions",
            rows.len(),
            table,
            partition_count
        );
        Ok(TableExport {
            table,
            rows: rows.len(),
            partitions: partition_count,
        })
    }
}

type PartitionFn<'f, T> = &'f dyn Fn(&T) -> Result<Vec<PartitionKey>, ExportError>;

enum Layout<'f, T> {
    /// A single part file directly under the table directory, even when empty.
    Flat,
    Partitioned(PartitionFn<'f, T>),
}

fn create_dir(path: &Path) -> Result<(), ExportError> {
    fs::create_dir_all(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_lines<T: Serialize>(
    table: TargetTable,
    path: &Path,
    rows: &[&T],
) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut writer, row)
            .map_err(|source| ExportError::Serialize { table, source })?;
        writer.write_all(b"\n").map_err(io_err)?;
    }
    writer.flush().map_err(io_err)
}
