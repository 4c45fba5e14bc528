//! SQLite schema of the listening warehouse.
//!
//! Four dimension tables and one fact table form the star; two staging tables
//! hold raw documents in staged mode. Timestamps are epoch milliseconds.

use crate::sqlite_column;
use crate::sqlite_persistence::{ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema};

// =============================================================================
// Dimensions
// =============================================================================

pub const ARTISTS_TABLE: Table = Table {
    name: "artists",
    columns: &[
        sqlite_column!("artist_id", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text),
        sqlite_column!("latitude", &SqlType::Real),
        sqlite_column!("longitude", &SqlType::Real),
    ],
    indices: &[("idx_artists_name", "name")],
    unique_constraints: &[],
};

const SONG_ARTIST_FK: ForeignKey = ForeignKey {
    foreign_table: "artists",
    foreign_column: "artist_id",
    on_delete: ForeignKeyOnChange::Restrict,
};

pub const SONGS_TABLE: Table = Table {
    name: "songs",
    columns: &[
        sqlite_column!("song_id", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!(
            "artist_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&SONG_ARTIST_FK)
        ),
        sqlite_column!("year", &SqlType::Integer, non_null = true),
        sqlite_column!("duration", &SqlType::Real, non_null = true),
    ],
    indices: &[("idx_songs_title", "title"), ("idx_songs_artist", "artist_id")],
    unique_constraints: &[],
};

pub const USERS_TABLE: Table = Table {
    name: "users",
    columns: &[
        sqlite_column!("user_id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("first_name", &SqlType::Text),
        sqlite_column!("last_name", &SqlType::Text),
        sqlite_column!("gender", &SqlType::Text),
        sqlite_column!("level", &SqlType::Text, non_null = true),
        sqlite_column!("level_observed_at", &SqlType::Integer, non_null = true), // ts of the event `level` came from
    ],
    indices: &[],
    unique_constraints: &[],
};

pub const TIME_TABLE: Table = Table {
    name: "time",
    columns: &[
        sqlite_column!("start_time", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("hour", &SqlType::Integer, non_null = true),
        sqlite_column!("day", &SqlType::Integer, non_null = true),
        sqlite_column!("week", &SqlType::Integer, non_null = true),
        sqlite_column!("month", &SqlType::Integer, non_null = true),
        sqlite_column!("year", &SqlType::Integer, non_null = true),
        sqlite_column!("weekday", &SqlType::Integer, non_null = true), // 0 = Monday
    ],
    indices: &[("idx_time_year_month", "year, month")],
    unique_constraints: &[],
};

// =============================================================================
// Facts
// =============================================================================

const PLAY_TIME_FK: ForeignKey = ForeignKey {
    foreign_table: "time",
    foreign_column: "start_time",
    on_delete: ForeignKeyOnChange::Restrict,
};

const PLAY_USER_FK: ForeignKey = ForeignKey {
    foreign_table: "users",
    foreign_column: "user_id",
    on_delete: ForeignKeyOnChange::Restrict,
};

const PLAY_SONG_FK: ForeignKey = ForeignKey {
    foreign_table: "songs",
    foreign_column: "song_id",
    on_delete: ForeignKeyOnChange::SetNull,
};

const PLAY_ARTIST_FK: ForeignKey = ForeignKey {
    foreign_table: "artists",
    foreign_column: "artist_id",
    on_delete: ForeignKeyOnChange::SetNull,
};

/// One row per song play; `song_id` and `artist_id` are null when no catalog
/// entry matched. A play is identified by its instant, user and session.
pub const SONGPLAYS_TABLE: Table = Table {
    name: "songplays",
    columns: &[
        sqlite_column!("songplay_id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "start_time",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&PLAY_TIME_FK)
        ),
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&PLAY_USER_FK)
        ),
        sqlite_column!("level", &SqlType::Text, non_null = true),
        sqlite_column!("song_id", &SqlType::Text, foreign_key = Some(&PLAY_SONG_FK)),
        sqlite_column!("artist_id", &SqlType::Text, foreign_key = Some(&PLAY_ARTIST_FK)),
        sqlite_column!("session_id", &SqlType::Integer, non_null = true),
        sqlite_column!("location", &SqlType::Text),
        sqlite_column!("user_agent", &SqlType::Text),
    ],
    indices: &[
        ("idx_songplays_user", "user_id"),
        ("idx_songplays_song", "song_id"),
    ],
    unique_constraints: &[&["start_time", "user_id", "session_id"]],
};

// =============================================================================
// Staging - raw documents, column per source field, no constraints
// =============================================================================

pub const STAGING_SONGS_TABLE: Table = Table {
    name: "stg_songs",
    columns: &[
        sqlite_column!("num_songs", &SqlType::Integer),
        sqlite_column!("artist_id", &SqlType::Text),
        sqlite_column!("artist_latitude", &SqlType::Real),
        sqlite_column!("artist_longitude", &SqlType::Real),
        sqlite_column!("artist_location", &SqlType::Text),
        sqlite_column!("artist_name", &SqlType::Text),
        sqlite_column!("song_id", &SqlType::Text),
        sqlite_column!("title", &SqlType::Text),
        sqlite_column!("duration", &SqlType::Real),
        sqlite_column!("year", &SqlType::Integer),
    ],
    indices: &[],
    unique_constraints: &[],
};

pub const STAGING_EVENTS_TABLE: Table = Table {
    name: "stg_events",
    columns: &[
        sqlite_column!("artist", &SqlType::Text),
        sqlite_column!("auth", &SqlType::Text),
        sqlite_column!("first_name", &SqlType::Text),
        sqlite_column!("gender", &SqlType::Text),
        sqlite_column!("item_in_session", &SqlType::Integer),
        sqlite_column!("last_name", &SqlType::Text),
        sqlite_column!("length", &SqlType::Real),
        sqlite_column!("level", &SqlType::Text),
        sqlite_column!("location", &SqlType::Text),
        sqlite_column!("method", &SqlType::Text),
        sqlite_column!("page", &SqlType::Text),
        sqlite_column!("registration", &SqlType::Real),
        sqlite_column!("session_id", &SqlType::Integer),
        sqlite_column!("song", &SqlType::Text),
        sqlite_column!("status", &SqlType::Integer),
        sqlite_column!("ts", &SqlType::Integer),
        sqlite_column!("user_agent", &SqlType::Text),
        sqlite_column!("user_id", &SqlType::Integer),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// Source field name for each staging column, in column order.
pub const STAGING_SONGS_FIELDS: &[&str] = &[
    "num_songs",
    "artist_id",
    "artist_latitude",
    "artist_longitude",
    "artist_location",
    "artist_name",
    "song_id",
    "title",
    "duration",
    "year",
];

pub const STAGING_EVENTS_FIELDS: &[&str] = &[
    "artist",
    "auth",
    "firstName",
    "gender",
    "itemInSession",
    "lastName",
    "length",
    "level",
    "location",
    "method",
    "page",
    "registration",
    "sessionId",
    "song",
    "status",
    "ts",
    "userAgent",
    "userId",
];

// =============================================================================
// Versioned Schema Definition
// =============================================================================

/// Tables are listed parents first so creation satisfies foreign keys and
/// dropping in reverse removes referencing tables first.
pub const WAREHOUSE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        STAGING_SONGS_TABLE,
        STAGING_EVENTS_TABLE,
        ARTISTS_TABLE,
        SONGS_TABLE,
        USERS_TABLE,
        TIME_TABLE,
        SONGPLAYS_TABLE,
    ],
    migration: None,
}];

pub fn column_names(table: &Table) -> Vec<&'static str> {
    table.columns.iter().map(|column| column.name).collect()
}
