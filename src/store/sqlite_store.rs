//! SQLite-backed warehouse.
//!
//! A single connection serves both loaders: row-at-a-time writes inside
//! explicit transactions for direct mode, and set-based statements over the
//! staging tables for staged mode.

use super::error::StoreError;
use super::schema::{
    column_names, STAGING_EVENTS_FIELDS, STAGING_EVENTS_TABLE, STAGING_SONGS_FIELDS,
    STAGING_SONGS_TABLE, WAREHOUSE_VERSIONED_SCHEMAS,
};
use super::trait_def::{
    Dimension, RecordKind, Row, SetMatcher, StagedDocument, StagingStore, TableCounts,
    TargetStore, TargetTable, WriteOutcome,
};
use crate::model::{ArtistDim, SongDim, SongplayFact, TimeDim, UserDim};
use crate::sqlite_persistence::{Table, BASE_DB_VERSION};
use crate::transform::time::{self, TimePart};
use crate::transform::{CatalogEntry, MatchPolicy, MatchStats};
use anyhow::{bail, Context, Result};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{ToSql, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

const TRANSACTION: &str = "transaction";

fn migrate_if_needed(conn: &mut Connection) -> Result<()> {
    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    let latest_version = WAREHOUSE_VERSIONED_SCHEMAS.len() - 1;
    let latest_schema = &WAREHOUSE_VERSIONED_SCHEMAS[latest_version];

    // Brand new, reset, or never versioned: create whatever is absent
    if db_version < BASE_DB_VERSION as i64 {
        info!("Creating warehouse schema at version {}", latest_version);
        latest_schema.create(conn)?;
        return validate(conn);
    }

    let mut current_version = (db_version - BASE_DB_VERSION as i64) as usize;
    if current_version > latest_version {
        bail!(
            "Warehouse schema version {} is newer than the supported version {}",
            current_version,
            latest_version
        );
    }

    if current_version < latest_version {
        let tx = conn.transaction()?;
        for schema in WAREHOUSE_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!(
                    "Migrating warehouse from version {} to {}",
                    current_version, schema.version
                );
                migration_fn(&tx)?;
            }
            current_version = schema.version;
        }
        tx.pragma_update(None, "user_version", BASE_DB_VERSION + current_version)?;
        tx.commit()?;
    }

    // Tables dropped behind our back come back empty
    latest_schema.create(conn)?;
    validate(conn)
}

#[cfg(not(feature = "no_checks"))]
fn validate(conn: &Connection) -> Result<()> {
    let latest_schema = &WAREHOUSE_VERSIONED_SCHEMAS[WAREHOUSE_VERSIONED_SCHEMAS.len() - 1];
    latest_schema
        .validate(conn)
        .context("Warehouse schema does not match its declaration")
}

#[cfg(feature = "no_checks")]
fn validate(_conn: &Connection) -> Result<()> {
    Ok(())
}

/// `time_part(ts_ms, part)`: one calendar field of an epoch-millisecond instant.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "time_part",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| -> rusqlite::Result<Option<i64>> {
            let ts: Option<i64> = ctx.get(0)?;
            let part_name: String = ctx.get(1)?;
            let part = TimePart::parse(&part_name).ok_or_else(|| {
                rusqlite::Error::UserFunctionError(format!("unknown time part '{part_name}'").into())
            })?;
            let Some(ts) = ts else {
                return Ok(None);
            };
            let decomposed = time::decompose(ts).ok_or_else(|| {
                rusqlite::Error::UserFunctionError(
                    format!("timestamp {ts} is outside the calendar range").into(),
                )
            })?;
            Ok(Some(part.of(&decomposed)))
        },
    )
}

/// JSON scalars map onto SQLite values; nested values are kept as JSON text.
fn json_to_sql(value: Option<&serde_json::Value>) -> SqlValue {
    use serde_json::Value;
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(flag)) => SqlValue::Integer(i64::from(*flag)),
        Some(Value::Number(number)) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => number.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Some(Value::String(text)) => SqlValue::Text(text.clone()),
        Some(nested) => SqlValue::Text(nested.to_string()),
    }
}

// =============================================================================
// Row-at-a-time statements
// =============================================================================

const ARTIST_EXISTS: &str = "SELECT 1 FROM artists WHERE artist_id = ?1";
const ARTIST_UPSERT: &str = "INSERT INTO artists (artist_id, name, location, latitude, longitude)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(artist_id) DO UPDATE SET
        name = excluded.name,
        location = excluded.location,
        latitude = excluded.latitude,
        longitude = excluded.longitude
    WHERE artists.name IS NOT excluded.name
        OR artists.location IS NOT excluded.location
        OR artists.latitude IS NOT excluded.latitude
        OR artists.longitude IS NOT excluded.longitude";

const SONG_EXISTS: &str = "SELECT 1 FROM songs WHERE song_id = ?1";
const SONG_UPSERT: &str = "INSERT INTO songs (song_id, title, artist_id, year, duration)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(song_id) DO UPDATE SET
        title = excluded.title,
        artist_id = excluded.artist_id,
        year = excluded.year,
        duration = excluded.duration
    WHERE songs.title IS NOT excluded.title
        OR songs.artist_id IS NOT excluded.artist_id
        OR songs.year IS NOT excluded.year
        OR songs.duration IS NOT excluded.duration";

const USER_EXISTS: &str = "SELECT 1 FROM users WHERE user_id = ?1";
const USER_UPSERT: &str = "INSERT INTO users (user_id, first_name, last_name, gender, level, level_observed_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(user_id) DO UPDATE SET
        first_name = excluded.first_name,
        last_name = excluded.last_name,
        gender = excluded.gender,
        level = excluded.level,
        level_observed_at = excluded.level_observed_at
    WHERE excluded.level_observed_at >= users.level_observed_at
        AND (users.first_name IS NOT excluded.first_name
            OR users.last_name IS NOT excluded.last_name
            OR users.gender IS NOT excluded.gender
            OR users.level IS NOT excluded.level
            OR users.level_observed_at IS NOT excluded.level_observed_at)";

const TIME_INSERT: &str = "INSERT INTO time (start_time, hour, day, week, month, year, weekday)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(start_time) DO NOTHING";

const SONGPLAY_INSERT: &str = "INSERT INTO songplays
        (start_time, user_id, level, song_id, artist_id, session_id, location, user_agent)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
    ON CONFLICT(start_time, user_id, session_id) DO NOTHING";

// =============================================================================
// Set-based statements over staging
// =============================================================================

const STAGED_ARTISTS: &str = "INSERT INTO artists (artist_id, name, location, latitude, longitude)
    SELECT artist_id, artist_name, artist_location, artist_latitude, artist_longitude
    FROM stg_songs
    WHERE true
    ORDER BY rowid
    ON CONFLICT(artist_id) DO UPDATE SET
        name = excluded.name,
        location = excluded.location,
        latitude = excluded.latitude,
        longitude = excluded.longitude
    WHERE artists.name IS NOT excluded.name
        OR artists.location IS NOT excluded.location
        OR artists.latitude IS NOT excluded.latitude
        OR artists.longitude IS NOT excluded.longitude";

const STAGED_SONGS: &str = "INSERT INTO songs (song_id, title, artist_id, year, duration)
    SELECT song_id, title, artist_id, COALESCE(year, 0), duration
    FROM stg_songs
    WHERE true
    ORDER BY rowid
    ON CONFLICT(song_id) DO UPDATE SET
        title = excluded.title,
        artist_id = excluded.artist_id,
        year = excluded.year,
        duration = excluded.duration
    WHERE songs.title IS NOT excluded.title
        OR songs.artist_id IS NOT excluded.artist_id
        OR songs.year IS NOT excluded.year
        OR songs.duration IS NOT excluded.duration";

// Plays without an integer user id or a level never reach users, time or
// songplays, matching the rows the event parser rejects.
const STAGED_USERS: &str = "INSERT INTO users (user_id, first_name, last_name, gender, level, level_observed_at)
    SELECT user_id, first_name, last_name, gender, level, ts
    FROM stg_events
    WHERE page = 'NextSong' AND typeof(user_id) = 'integer' AND level IS NOT NULL
    ORDER BY ts, rowid
    ON CONFLICT(user_id) DO UPDATE SET
        first_name = excluded.first_name,
        last_name = excluded.last_name,
        gender = excluded.gender,
        level = excluded.level,
        level_observed_at = excluded.level_observed_at
    WHERE excluded.level_observed_at >= users.level_observed_at
        AND (users.first_name IS NOT excluded.first_name
            OR users.last_name IS NOT excluded.last_name
            OR users.gender IS NOT excluded.gender
            OR users.level IS NOT excluded.level
            OR users.level_observed_at IS NOT excluded.level_observed_at)";

const STAGED_TIME: &str = "INSERT INTO time (start_time, hour, day, week, month, year, weekday)
    SELECT DISTINCT ts,
        time_part(ts, 'hour'),
        time_part(ts, 'day'),
        time_part(ts, 'week'),
        time_part(ts, 'month'),
        time_part(ts, 'year'),
        time_part(ts, 'weekday')
    FROM stg_events
    WHERE page = 'NextSong' AND typeof(user_id) = 'integer' AND level IS NOT NULL
    ON CONFLICT(start_time) DO NOTHING";

// The correlated subquery picks the smallest qualifying song_id; ?1 is the
// duration tolerance.
const STAGED_SONGPLAYS: &str = "INSERT INTO songplays
        (start_time, user_id, level, song_id, artist_id, session_id, location, user_agent)
    SELECT p.ts, p.user_id, p.level, p.song_id, s.artist_id, p.session_id, p.location, p.user_agent
    FROM (
        SELECT e.rowid AS seq, e.ts, e.user_id, e.level, e.session_id, e.location, e.user_agent,
            (SELECT c.song_id
             FROM songs c
             JOIN artists a ON a.artist_id = c.artist_id
             WHERE c.title = e.song
                AND a.name = e.artist
                AND ABS(c.duration - e.length) <= ?1
             ORDER BY c.song_id
             LIMIT 1) AS song_id
        FROM stg_events e
        WHERE e.page = 'NextSong' AND typeof(e.user_id) = 'integer' AND e.level IS NOT NULL
    ) p
    LEFT JOIN songs s ON s.song_id = p.song_id
    WHERE true
    ORDER BY p.seq
    ON CONFLICT(start_time, user_id, session_id) DO NOTHING";

/// A stored songplay together with its surrogate key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSongplay {
    pub songplay_id: i64,
    #[serde(flatten)]
    pub fact: SongplayFact,
}

pub struct SqliteWarehouse {
    conn: Connection,
    location: String,
}

impl SqliteWarehouse {
    /// Opens (or creates) the warehouse at `db_path` and brings its schema up to date.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(StoreError::Connection)?;
        Self::prepare(conn, db_path.display().to_string())
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Connection)?;
        Self::prepare(conn, ":memory:".to_string())
    }

    fn prepare(conn: Connection, location: String) -> Result<Self, StoreError> {
        register_functions(&conn).context("Failed to register SQL functions")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StoreError::Connection)?;
        let mut warehouse = Self { conn, location };
        warehouse.ensure_schema()?;

        let counts = warehouse.table_counts()?;
        info!("Opened warehouse {}: {}", warehouse.location, counts);
        Ok(warehouse)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Drops every warehouse table, facts first, and forgets the schema version.
    /// The next `ensure_schema` recreates them empty.
    pub fn drop_all(&mut self) -> Result<(), StoreError> {
        let latest_schema = &WAREHOUSE_VERSIONED_SCHEMAS[WAREHOUSE_VERSIONED_SCHEMAS.len() - 1];
        latest_schema.drop_all(&self.conn)?;
        info!("Dropped all warehouse tables in {}", self.location);
        Ok(())
    }

    fn sqlite_err(table: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
        move |err| StoreError::from_sqlite(table, err)
    }

    /// Runs the existence check, then the write, and classifies the outcome.
    fn write_keyed(
        &self,
        table: TargetTable,
        exists_sql: &str,
        key: &dyn ToSql,
        write_sql: &str,
        values: &[&dyn ToSql],
    ) -> Result<WriteOutcome, StoreError> {
        let existed = self
            .conn
            .prepare_cached(exists_sql)
            .and_then(|mut stmt| stmt.exists(&[key]))
            .map_err(Self::sqlite_err(table.name()))?;
        let changed = self
            .conn
            .prepare_cached(write_sql)
            .and_then(|mut stmt| stmt.execute(values))
            .map_err(Self::sqlite_err(table.name()))?;
        Ok(match (existed, changed) {
            (false, _) => WriteOutcome::Inserted,
            (true, 0) => WriteOutcome::Unchanged,
            (true, _) => WriteOutcome::Updated,
        })
    }

    fn insert_once(
        &self,
        table: TargetTable,
        insert_sql: &str,
        values: &[&dyn ToSql],
    ) -> Result<WriteOutcome, StoreError> {
        let changed = self
            .conn
            .prepare_cached(insert_sql)
            .and_then(|mut stmt| stmt.execute(values))
            .map_err(Self::sqlite_err(table.name()))?;
        Ok(if changed == 0 {
            WriteOutcome::Unchanged
        } else {
            WriteOutcome::Inserted
        })
    }

    fn count(&self, sql: &str, table: &'static str) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row(sql, [], |r| r.get(0))
            .map_err(Self::sqlite_err(table))?;
        Ok(count as u64)
    }

    fn read_all<T, F>(&self, table: TargetTable, sql: &str, map_row: F) -> Result<Vec<T>, StoreError>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(Self::sqlite_err(table.name()))?;
        let rows = stmt
            .query_map([], map_row)
            .map_err(Self::sqlite_err(table.name()))?
            .collect::<rusqlite::Result<Vec<T>>>()
            .map_err(Self::sqlite_err(table.name()))?;
        Ok(rows)
    }

    pub fn read_artists(&self) -> Result<Vec<ArtistDim>, StoreError> {
        self.read_all(
            TargetTable::Artists,
            "SELECT artist_id, name, location, latitude, longitude FROM artists ORDER BY artist_id",
            |row| {
                Ok(ArtistDim {
                    artist_id: row.get(0)?,
                    name: row.get(1)?,
                    location: row.get(2)?,
                    latitude: row.get(3)?,
                    longitude: row.get(4)?,
                })
            },
        )
    }

    pub fn read_songs(&self) -> Result<Vec<SongDim>, StoreError> {
        self.read_all(
            TargetTable::Songs,
            "SELECT song_id, title, artist_id, year, duration FROM songs ORDER BY song_id",
            |row| {
                Ok(SongDim {
                    song_id: row.get(0)?,
                    title: row.get(1)?,
                    artist_id: row.get(2)?,
                    year: row.get(3)?,
                    duration: row.get(4)?,
                })
            },
        )
    }

    pub fn read_users(&self) -> Result<Vec<UserDim>, StoreError> {
        self.read_all(
            TargetTable::Users,
            "SELECT user_id, first_name, last_name, gender, level, level_observed_at
             FROM users ORDER BY user_id",
            |row| {
                Ok(UserDim {
                    user_id: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                    gender: row.get(3)?,
                    level: row.get(4)?,
                    level_observed_at: row.get(5)?,
                })
            },
        )
    }

    pub fn read_times(&self) -> Result<Vec<TimeDim>, StoreError> {
        self.read_all(
            TargetTable::Time,
            "SELECT start_time, hour, day, week, month, year, weekday FROM time ORDER BY start_time",
            |row| {
                Ok(TimeDim {
                    start_time: row.get(0)?,
                    hour: row.get(1)?,
                    day: row.get(2)?,
                    week: row.get(3)?,
                    month: row.get(4)?,
                    year: row.get(5)?,
                    weekday: row.get(6)?,
                })
            },
        )
    }

    pub fn read_songplays(&self) -> Result<Vec<StoredSongplay>, StoreError> {
        self.read_all(
            TargetTable::Songplays,
            "SELECT songplay_id, start_time, user_id, level, song_id, artist_id, session_id,
                    location, user_agent
             FROM songplays ORDER BY songplay_id",
            |row| {
                Ok(StoredSongplay {
                    songplay_id: row.get(0)?,
                    fact: SongplayFact {
                        start_time: row.get(1)?,
                        user_id: row.get(2)?,
                        level: row.get(3)?,
                        song_id: row.get(4)?,
                        artist_id: row.get(5)?,
                        session_id: row.get(6)?,
                        location: row.get(7)?,
                        user_agent: row.get(8)?,
                    },
                })
            },
        )
    }
}

impl TargetStore for SqliteWarehouse {
    fn ping(&mut self) -> Result<(), StoreError> {
        // schema_version reads the database header, so an unreadable file fails here
        self.conn
            .query_row("PRAGMA schema_version", [], |r| r.get::<_, i64>(0))
            .map(|_| ())
            .map_err(StoreError::Connection)
    }

    fn ensure_schema(&mut self) -> Result<(), StoreError> {
        self.ping()?;
        migrate_if_needed(&mut self.conn)?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(Self::sqlite_err(TRANSACTION))
    }

    fn write(&mut self, row: Row<'_>) -> Result<WriteOutcome, StoreError> {
        match row {
            Row::Artist(artist) => self.write_keyed(
                TargetTable::Artists,
                ARTIST_EXISTS,
                &artist.artist_id,
                ARTIST_UPSERT,
                params![
                    artist.artist_id,
                    artist.name,
                    artist.location,
                    artist.latitude,
                    artist.longitude
                ],
            ),
            Row::Song(song) => self.write_keyed(
                TargetTable::Songs,
                SONG_EXISTS,
                &song.song_id,
                SONG_UPSERT,
                params![
                    song.song_id,
                    song.title,
                    song.artist_id,
                    song.year,
                    song.duration
                ],
            ),
            Row::User(user) => self.write_keyed(
                TargetTable::Users,
                USER_EXISTS,
                &user.user_id,
                USER_UPSERT,
                params![
                    user.user_id,
                    user.first_name,
                    user.last_name,
                    user.gender,
                    user.level,
                    user.level_observed_at
                ],
            ),
            Row::Time(time) => self.insert_once(
                TargetTable::Time,
                TIME_INSERT,
                params![
                    time.start_time,
                    time.hour,
                    time.day,
                    time.week,
                    time.month,
                    time.year,
                    time.weekday
                ],
            ),
            Row::Songplay(play) => self.insert_once(
                TargetTable::Songplays,
                SONGPLAY_INSERT,
                params![
                    play.start_time,
                    play.user_id,
                    play.level,
                    play.song_id,
                    play.artist_id,
                    play.session_id,
                    play.location,
                    play.user_agent
                ],
            ),
        }
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(Self::sqlite_err(TRANSACTION))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(Self::sqlite_err(TRANSACTION))
    }

    fn catalog_entries(&mut self) -> Result<Vec<CatalogEntry>, StoreError> {
        self.read_all(
            TargetTable::Songs,
            "SELECT s.song_id, s.artist_id, s.title, a.name, s.duration
             FROM songs s
             JOIN artists a ON a.artist_id = s.artist_id",
            |row| {
                Ok(CatalogEntry {
                    song_id: row.get(0)?,
                    artist_id: row.get(1)?,
                    title: row.get(2)?,
                    artist_name: row.get(3)?,
                    duration: row.get(4)?,
                })
            },
        )
    }

    fn table_counts(&mut self) -> Result<TableCounts, StoreError> {
        Ok(TableCounts {
            artists: self.count("SELECT COUNT(*) FROM artists", "artists")?,
            songs: self.count("SELECT COUNT(*) FROM songs", "songs")?,
            users: self.count("SELECT COUNT(*) FROM users", "users")?,
            time: self.count("SELECT COUNT(*) FROM time", "time")?,
            songplays: self.count("SELECT COUNT(*) FROM songplays", "songplays")?,
            unmatched_songplays: self.count(
                "SELECT COUNT(*) FROM songplays WHERE song_id IS NULL",
                "songplays",
            )?,
        })
    }
}

fn staging_layout(kind: RecordKind) -> (&'static Table, &'static [&'static str]) {
    match kind {
        RecordKind::Catalog => (&STAGING_SONGS_TABLE, STAGING_SONGS_FIELDS),
        RecordKind::Events => (&STAGING_EVENTS_TABLE, STAGING_EVENTS_FIELDS),
    }
}

impl StagingStore for SqliteWarehouse {
    fn ensure_staging(&mut self) -> Result<(), StoreError> {
        self.ping()?;
        STAGING_SONGS_TABLE.create(&self.conn)?;
        STAGING_EVENTS_TABLE.create(&self.conn)?;
        Ok(())
    }

    fn stage(&mut self, kind: RecordKind, documents: &[StagedDocument]) -> Result<u64, StoreError> {
        let (table, fields) = staging_layout(kind);
        let columns = column_names(table);
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name,
            columns.join(", "),
            placeholders
        );
        let sqlite_err = Self::sqlite_err(table.name);

        self.conn
            .execute(&format!("DELETE FROM {}", table.name), [])
            .map_err(&sqlite_err)?;
        let mut stmt = self.conn.prepare(&insert_sql).map_err(&sqlite_err)?;
        for document in documents {
            let values = fields.iter().map(|field| json_to_sql(document.get(*field)));
            stmt.execute(params_from_iter(values)).map_err(&sqlite_err)?;
        }

        debug!("Staged {} {} documents into {}", documents.len(), kind, table.name);
        Ok(documents.len() as u64)
    }

    fn transform(&mut self, dimension: Dimension) -> Result<u64, StoreError> {
        let sql = match dimension {
            Dimension::Artists => STAGED_ARTISTS,
            Dimension::Songs => STAGED_SONGS,
            Dimension::Users => STAGED_USERS,
            Dimension::Time => STAGED_TIME,
        };
        let sqlite_err = Self::sqlite_err(dimension.table().name());

        let written = self.conn.execute(sql, []).map_err(&sqlite_err)?;

        debug!("Transformed {} rows into {}", written, dimension.table());
        Ok(written as u64)
    }
}

impl SetMatcher for SqliteWarehouse {
    fn match_and_insert(&mut self, policy: &MatchPolicy) -> Result<MatchStats, StoreError> {
        let sqlite_err = Self::sqlite_err(TargetTable::Songplays.name());

        // songplay_id is the rowid, so new rows land above the current maximum
        let watermark: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(songplay_id), 0) FROM songplays", [], |r| {
                r.get(0)
            })
            .map_err(&sqlite_err)?;
        let inserted = self
            .conn
            .execute(STAGED_SONGPLAYS, params![policy.duration_tolerance])
            .map_err(&sqlite_err)?;
        let unmatched: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM songplays WHERE songplay_id > ?1 AND song_id IS NULL",
                params![watermark],
                |r| r.get(0),
            )
            .map_err(&sqlite_err)?;

        let unmatched = unmatched as usize;
        Ok(MatchStats {
            matched: inserted - unmatched,
            unmatched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artist(id: &str, name: &str) -> ArtistDim {
        ArtistDim {
            artist_id: id.to_string(),
            name: name.to_string(),
            location: None,
            latitude: None,
            longitude: None,
        }
    }

    fn song(id: &str, title: &str, artist_id: &str, duration: f64) -> SongDim {
        SongDim {
            song_id: id.to_string(),
            title: title.to_string(),
            artist_id: artist_id.to_string(),
            year: 0,
            duration,
        }
    }

    fn user(id: i64, level: &str, observed_at: i64) -> UserDim {
        UserDim {
            user_id: id,
            first_name: Some("Lily".to_string()),
            last_name: Some("Koch".to_string()),
            gender: Some("F".to_string()),
            level: level.to_string(),
            level_observed_at: observed_at,
        }
    }

    fn doc(value: serde_json::Value) -> StagedDocument {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn opening_twice_keeps_schema_and_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("warehouse.db");
        {
            let mut warehouse = SqliteWarehouse::open(&db_path).unwrap();
            warehouse.write(Row::Artist(&artist("AR1", "Blondie"))).unwrap();
        }
        let mut warehouse = SqliteWarehouse::open(&db_path).unwrap();
        assert_eq!(warehouse.table_counts().unwrap().artists, 1);
    }

    #[test]
    fn artist_upsert_reports_outcome() {
        let mut warehouse = SqliteWarehouse::in_memory().unwrap();
        let first = artist("AR1", "Blondie");
        assert_eq!(warehouse.write(Row::Artist(&first)).unwrap(), WriteOutcome::Inserted);
        assert_eq!(warehouse.write(Row::Artist(&first)).unwrap(), WriteOutcome::Unchanged);

        let renamed = artist("AR1", "Blondie (band)");
        assert_eq!(warehouse.write(Row::Artist(&renamed)).unwrap(), WriteOutcome::Updated);
        assert_eq!(warehouse.read_artists().unwrap()[0].name, "Blondie (band)");
    }

    #[test]
    fn older_user_event_does_not_override_level() {
        let mut warehouse = SqliteWarehouse::in_memory().unwrap();
        warehouse.write(Row::User(&user(15, "paid", 200))).unwrap();
        let outcome = warehouse.write(Row::User(&user(15, "free", 100))).unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(warehouse.read_users().unwrap()[0].level, "paid");

        warehouse.write(Row::User(&user(15, "free", 300))).unwrap();
        assert_eq!(warehouse.read_users().unwrap()[0].level, "free");
    }

    #[test]
    fn song_with_unknown_artist_is_a_write_error() {
        let mut warehouse = SqliteWarehouse::in_memory().unwrap();
        let err = warehouse
            .write(Row::Song(&song("SO1", "Call Me", "AR404", 210.0)))
            .unwrap_err();
        assert!(!err.is_connection());
        assert_eq!(err.table(), Some("songs"));
    }

    #[test]
    fn rollback_discards_open_transaction() {
        let mut warehouse = SqliteWarehouse::in_memory().unwrap();
        warehouse.begin().unwrap();
        warehouse.write(Row::Artist(&artist("AR1", "Blondie"))).unwrap();
        warehouse.rollback().unwrap();
        assert_eq!(warehouse.table_counts().unwrap().artists, 0);
        // nothing open, nothing to do
        warehouse.rollback().unwrap();
    }

    #[test]
    fn duplicate_songplay_is_unchanged() {
        let mut warehouse = SqliteWarehouse::in_memory().unwrap();
        let time = time::decompose(1541990258796).unwrap();
        let play = SongplayFact {
            start_time: time.start_time,
            user_id: 15,
            level: "paid".to_string(),
            song_id: None,
            artist_id: None,
            session_id: 818,
            location: None,
            user_agent: None,
        };
        warehouse.write(Row::User(&user(15, "paid", time.start_time))).unwrap();
        warehouse.write(Row::Time(&time)).unwrap();
        assert_eq!(warehouse.write(Row::Songplay(&play)).unwrap(), WriteOutcome::Inserted);
        assert_eq!(warehouse.write(Row::Songplay(&play)).unwrap(), WriteOutcome::Unchanged);
        assert_eq!(warehouse.write(Row::Time(&time)).unwrap(), WriteOutcome::Unchanged);

        let counts = warehouse.table_counts().unwrap();
        assert_eq!(counts.songplays, 1);
        assert_eq!(counts.unmatched_songplays, 1);
    }

    #[test]
    fn time_part_matches_decompose() {
        let warehouse = SqliteWarehouse::in_memory().unwrap();
        let (week, weekday): (i64, i64) = warehouse
            .conn
            .query_row(
                "SELECT time_part(1546214400000, 'week'), time_part(1546214400000, 'weekday')",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((week, weekday), (1, 0));

        let unknown = warehouse
            .conn
            .query_row("SELECT time_part(0, 'fortnight')", [], |r| r.get::<_, i64>(0));
        assert!(unknown.is_err());
    }

    #[test]
    fn staged_transforms_build_star() {
        let mut warehouse = SqliteWarehouse::in_memory().unwrap();
        warehouse
            .stage(
                RecordKind::Catalog,
                &[
                    doc(json!({"num_songs": 1, "artist_id": "AR5KOSW1187FB35FF4", "artist_latitude": 49.80388, "artist_longitude": 15.47491, "artist_location": "Dubai UAE", "artist_name": "Elena", "song_id": "SOZCTXZ12AB0182364", "title": "Setanta matins", "duration": 269.58322, "year": 0})),
                    doc(json!({"num_songs": 1, "artist_id": "ARNTLGG11E2835DDB9", "artist_latitude": null, "artist_longitude": null, "artist_location": "", "artist_name": "Clp", "song_id": "SOUDSGM12AC9618304", "title": "Insatiable (Instrumental Version)", "duration": 266.39628, "year": 0})),
                ],
            )
            .unwrap();
        warehouse
            .stage(
                RecordKind::Events,
                &[
                    doc(json!({"artist": "Elena", "auth": "Logged In", "firstName": "Lily", "gender": "F", "itemInSession": 0, "lastName": "Koch", "length": 269.58322, "level": "free", "location": "Chicago", "method": "PUT", "page": "NextSong", "registration": 1.5, "sessionId": 818, "song": "Setanta matins", "status": 200, "ts": 1541990258796_i64, "userAgent": "Mozilla", "userId": "15"})),
                    doc(json!({"artist": null, "auth": "Logged In", "firstName": "Lily", "gender": "F", "itemInSession": 1, "lastName": "Koch", "length": null, "level": "paid", "location": "Chicago", "method": "GET", "page": "Home", "sessionId": 818, "song": null, "status": 200, "ts": 1541990300000_i64, "userAgent": "Mozilla", "userId": "15"})),
                    doc(json!({"artist": "Nobody", "auth": "Logged In", "firstName": "Lily", "gender": "F", "itemInSession": 2, "lastName": "Koch", "length": 100.0, "level": "paid", "location": "Chicago", "method": "PUT", "page": "NextSong", "sessionId": 818, "song": "Missing", "status": 200, "ts": 1541990400000_i64, "userAgent": "Mozilla", "userId": "15"})),
                ],
            )
            .unwrap();

        for dimension in Dimension::ALL {
            warehouse.transform(dimension).unwrap();
        }
        let stats = warehouse.match_and_insert(&MatchPolicy::default()).unwrap();
        assert_eq!(stats, MatchStats { matched: 1, unmatched: 1 });

        let counts = warehouse.table_counts().unwrap();
        assert_eq!(counts.artists, 2);
        assert_eq!(counts.songs, 2);
        assert_eq!(counts.users, 1);
        assert_eq!(counts.time, 2);
        assert_eq!(counts.songplays, 2);
        assert_eq!(warehouse.read_users().unwrap()[0].level, "paid");

        let plays = warehouse.read_songplays().unwrap();
        assert_eq!(plays[0].fact.song_id.as_deref(), Some("SOZCTXZ12AB0182364"));
        assert_eq!(plays[0].fact.artist_id.as_deref(), Some("AR5KOSW1187FB35FF4"));
        assert_eq!(plays[1].fact.song_id, None);

        // second pass over the same staging inserts nothing new
        let again = warehouse.match_and_insert(&MatchPolicy::default()).unwrap();
        assert_eq!(again.total(), 0);
    }

    #[test]
    fn staging_replaces_previous_batch() {
        let mut warehouse = SqliteWarehouse::in_memory().unwrap();
        let batch = [doc(json!({"page": "Home", "ts": 1, "sessionId": 1}))];
        warehouse.stage(RecordKind::Events, &batch).unwrap();
        warehouse.stage(RecordKind::Events, &batch).unwrap();
        let staged: i64 = warehouse
            .conn
            .query_row("SELECT COUNT(*) FROM stg_events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(staged, 1);
    }

    #[test]
    fn drop_all_then_ensure_schema_starts_empty() {
        let mut warehouse = SqliteWarehouse::in_memory().unwrap();
        warehouse.write(Row::Artist(&artist("AR1", "Blondie"))).unwrap();
        warehouse.drop_all().unwrap();
        warehouse.ensure_schema().unwrap();
        assert_eq!(warehouse.table_counts().unwrap(), TableCounts::default());
    }
}
