//! Resolution of song play events to catalog songs and artists.
//!
//! A play matches a catalog entry when the song title and the artist name are
//! equal and the durations differ by no more than the policy tolerance. When
//! several entries qualify the one with the smallest `song_id` wins. An event
//! with no qualifying entry still produces a fact, with both keys left empty.

use crate::model::{ArtistDim, RawEventRecord, SongDim, SongplayFact};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    /// Largest accepted absolute difference between catalog duration and played length.
    pub duration_tolerance: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            duration_tolerance: 0.0,
        }
    }
}

impl MatchPolicy {
    pub fn with_tolerance(duration_tolerance: f64) -> Self {
        Self { duration_tolerance }
    }

    pub fn accepts(&self, catalog_duration: f64, played_length: f64) -> bool {
        (catalog_duration - played_length).abs() <= self.duration_tolerance
    }
}

/// A song joined with its artist, as seen by the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub song_id: String,
    pub artist_id: String,
    pub title: String,
    pub artist_name: String,
    pub duration: f64,
}

impl CatalogEntry {
    pub fn join(song: &SongDim, artist: &ArtistDim) -> Self {
        Self {
            song_id: song.song_id.clone(),
            artist_id: artist.artist_id.clone(),
            title: song.title.clone(),
            artist_name: artist.name.clone(),
            duration: song.duration,
        }
    }
}

/// Catalog entries grouped by (title, artist name), each group sorted by `song_id`.
#[derive(Debug, Default, Clone)]
pub struct CatalogIndex {
    by_title_and_artist: HashMap<(String, String), Vec<CatalogEntry>>,
    len: usize,
}

impl CatalogIndex {
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut by_title_and_artist: HashMap<(String, String), Vec<CatalogEntry>> =
            HashMap::new();
        for entry in entries {
            by_title_and_artist
                .entry((entry.title.clone(), entry.artist_name.clone()))
                .or_default()
                .push(entry);
        }
        for candidates in by_title_and_artist.values_mut() {
            candidates.sort_by(|a, b| a.song_id.cmp(&b.song_id));
            candidates.dedup_by(|a, b| a.song_id == b.song_id);
        }
        let len = by_title_and_artist.values().map(Vec::len).sum();
        Self {
            by_title_and_artist,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn candidates(&self, title: &str, artist_name: &str) -> &[CatalogEntry] {
        self.by_title_and_artist
            .get(&(title.to_string(), artist_name.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub matched: usize,
    pub unmatched: usize,
}

impl MatchStats {
    pub fn total(&self) -> usize {
        self.matched + self.unmatched
    }
}

pub struct FactMatcher<'a> {
    index: &'a CatalogIndex,
    policy: MatchPolicy,
}

impl<'a> FactMatcher<'a> {
    pub fn new(index: &'a CatalogIndex, policy: MatchPolicy) -> Self {
        Self { index, policy }
    }

    /// Finds the catalog entry a play refers to, if any.
    pub fn resolve(&self, event: &RawEventRecord) -> Option<&'a CatalogEntry> {
        let (Some(title), Some(artist), Some(length)) =
            (event.song.as_deref(), event.artist.as_deref(), event.length)
        else {
            return None;
        };
        self.index
            .candidates(title, artist)
            .iter()
            .find(|entry| self.policy.accepts(entry.duration, length))
    }

    /// Builds the fact for a song play. Returns `None` for other pages and for
    /// plays without a user id or level.
    pub fn fact_for(&self, event: &RawEventRecord) -> Option<SongplayFact> {
        if !event.is_song_play() {
            return None;
        }
        let user_id = event.user_id?;
        let level = event.level.clone()?;
        let entry = self.resolve(event);
        Some(SongplayFact {
            start_time: event.ts,
            user_id,
            level,
            song_id: entry.map(|e| e.song_id.clone()),
            artist_id: entry.map(|e| e.artist_id.clone()),
            session_id: event.session_id,
            location: event.location.clone(),
            user_agent: event.user_agent.clone(),
        })
    }

    /// Facts for every song play in `events`, in input order.
    pub fn facts<'e>(
        &self,
        events: impl IntoIterator<Item = &'e RawEventRecord>,
    ) -> (Vec<SongplayFact>, MatchStats) {
        let mut stats = MatchStats::default();
        let facts: Vec<SongplayFact> = events
            .into_iter()
            .filter_map(|event| self.fact_for(event))
            .inspect(|fact| {
                if fact.is_matched() {
                    stats.matched += 1;
                } else {
                    stats.unmatched += 1;
                }
            })
            .collect();
        (facts, stats)
    }
}
