//! Derivation of deduplicated dimension rows from raw records.

use super::time;
use crate::model::{
    ArtistDim, RawCatalogRecord, RawEventRecord, SongDim, TimeDim, UserDim,
};
use std::collections::BTreeMap;

/// Song and artist dimensions keyed by their natural ids.
///
/// A later record for an already seen key replaces the earlier attributes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CatalogDimensions {
    songs: BTreeMap<String, SongDim>,
    artists: BTreeMap<String, ArtistDim>,
}

impl CatalogDimensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a RawCatalogRecord>) -> Self {
        let mut dims = Self::new();
        for record in records {
            dims.add(record);
        }
        dims
    }

    pub fn add(&mut self, record: &RawCatalogRecord) {
        self.artists.insert(
            record.artist_id.clone(),
            ArtistDim {
                artist_id: record.artist_id.clone(),
                name: record.artist_name.clone(),
                location: record.artist_location.clone(),
                latitude: record.artist_latitude,
                longitude: record.artist_longitude,
            },
        );
        self.songs.insert(
            record.song_id.clone(),
            SongDim {
                song_id: record.song_id.clone(),
                title: record.title.clone(),
                artist_id: record.artist_id.clone(),
                year: record.year,
                duration: record.duration,
            },
        );
    }

    pub fn songs(&self) -> impl Iterator<Item = &SongDim> {
        self.songs.values()
    }

    pub fn artists(&self) -> impl Iterator<Item = &ArtistDim> {
        self.artists.values()
    }

    pub fn song_count(&self) -> usize {
        self.songs.len()
    }

    pub fn artist_count(&self) -> usize {
        self.artists.len()
    }
}

/// A song play event whose timestamp could not be placed on the calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnplaceableInstant {
    pub ts: i64,
}

/// User and time dimensions derived from song play events.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ActivityDimensions {
    users: BTreeMap<i64, UserDim>,
    times: BTreeMap<i64, TimeDim>,
}

impl ActivityDimensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `events` in order, ignoring anything that is not a song play.
    pub fn from_events<'a>(
        events: impl IntoIterator<Item = &'a RawEventRecord>,
    ) -> Result<Self, UnplaceableInstant> {
        let mut dims = Self::new();
        for event in events {
            dims.add(event)?;
        }
        Ok(dims)
    }

    pub fn add(&mut self, event: &RawEventRecord) -> Result<(), UnplaceableInstant> {
        if !event.is_song_play() {
            return Ok(());
        }

        if !self.times.contains_key(&event.ts) {
            let time = time::decompose(event.ts).ok_or(UnplaceableInstant { ts: event.ts })?;
            self.times.insert(event.ts, time);
        }

        if let (Some(user_id), Some(level)) = (event.user_id, &event.level) {
            let candidate = UserDim {
                user_id,
                first_name: event.first_name.clone(),
                last_name: event.last_name.clone(),
                gender: event.gender.clone(),
                level: level.clone(),
                level_observed_at: event.ts,
            };
            // Ties on the timestamp go to the event seen last.
            match self.users.get(&user_id) {
                Some(current) if current.level_observed_at > event.ts => {}
                _ => {
                    self.users.insert(user_id, candidate);
                }
            }
        }
        Ok(())
    }

    pub fn users(&self) -> impl Iterator<Item = &UserDim> {
        self.users.values()
    }

    pub fn times(&self) -> impl Iterator<Item = &TimeDim> {
        self.times.values()
    }

    pub fn user(&self, user_id: i64) -> Option<&UserDim> {
        self.users.get(&user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn time_count(&self) -> usize {
        self.times.len()
    }
}
