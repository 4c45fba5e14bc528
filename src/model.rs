//! Record types flowing through the pipeline.
//!
//! Raw records mirror the input documents field by field; dimension and fact
//! rows are the shapes written to the warehouse.

use serde::{Deserialize, Deserializer, Serialize};

/// The only event page that carries a song playback.
pub const NEXT_SONG_PAGE: &str = "NextSong";

/// One catalog document: a song together with the artist that performs it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawCatalogRecord {
    pub song_id: String,
    pub title: String,
    pub duration: f64,
    #[serde(default)]
    pub year: i32,
    pub artist_id: String,
    pub artist_name: String,
    #[serde(default)]
    pub artist_location: Option<String>,
    #[serde(default)]
    pub artist_latitude: Option<f64>,
    #[serde(default)]
    pub artist_longitude: Option<f64>,
}

/// One line of a user activity log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventRecord {
    pub ts: i64,
    pub page: String,
    #[serde(default)]
    pub song: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default, deserialize_with = "lenient_user_id")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    pub session_id: i64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl RawEventRecord {
    pub fn is_song_play(&self) -> bool {
        self.page == NEXT_SONG_PAGE
    }
}

/// Logs encode the user id as a number, a numeric string, or `""` when nobody is
/// logged in.
fn lenient_user_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum UserIdRepr {
        Number(i64),
        Text(String),
    }

    match Option::<UserIdRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(UserIdRepr::Number(id)) => Ok(Some(id)),
        Some(UserIdRepr::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(UserIdRepr::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid userId \"{text}\""))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongDim {
    pub song_id: String,
    pub title: String,
    pub artist_id: String,
    pub year: i32,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistDim {
    pub artist_id: String,
    pub name: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A user with the most recently observed subscription level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserDim {
    pub user_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: String,
    /// Timestamp (epoch ms) of the event `level` was taken from.
    pub level_observed_at: i64,
}

/// Calendar decomposition of one observed instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeDim {
    /// Epoch milliseconds, UTC.
    pub start_time: i64,
    pub hour: u32,
    pub day: u32,
    pub week: u32,
    pub month: u32,
    pub year: i32,
    /// 0 = Monday ... 6 = Sunday.
    pub weekday: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongplayFact {
    pub start_time: i64,
    pub user_id: i64,
    pub level: String,
    pub song_id: Option<String>,
    pub artist_id: Option<String>,
    pub session_id: i64,
    pub location: Option<String>,
    pub user_agent: Option<String>,
}

impl SongplayFact {
    pub fn is_matched(&self) -> bool {
        self.song_id.is_some() && self.artist_id.is_some()
    }
}
