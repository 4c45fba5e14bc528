//! Parsing of catalog documents and event logs.

use super::error::{FileId, ParseError};
use crate::model::{RawCatalogRecord, RawEventRecord};
use crate::transform::time;

/// A catalog file holds exactly one JSON object.
pub fn parse_catalog_document(file: &FileId, text: &str) -> Result<RawCatalogRecord, ParseError> {
    let mut records = Vec::new();
    for record in serde_json::Deserializer::from_str(text).into_iter::<RawCatalogRecord>() {
        match record {
            Ok(record) => records.push(record),
            Err(source) => {
                return Err(ParseError::Malformed {
                    file: file.clone(),
                    line: source.line(),
                    source,
                })
            }
        }
    }
    if records.len() != 1 {
        return Err(ParseError::RecordCount {
            file: file.clone(),
            found: records.len(),
        });
    }
    Ok(records.remove(0))
}

/// An event log holds one JSON object per line. Blank lines are skipped and the
/// order of the remaining lines is kept.
pub fn parse_event_log(file: &FileId, text: &str) -> Result<Vec<RawEventRecord>, ParseError> {
    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: RawEventRecord =
            serde_json::from_str(line).map_err(|source| ParseError::Malformed {
                file: file.clone(),
                line: line_number,
                source,
            })?;
        if event.is_song_play() {
            if event.user_id.is_none() {
                return Err(ParseError::AnonymousPlay {
                    file: file.clone(),
                    line: line_number,
                });
            }
            if event.level.is_none() {
                return Err(ParseError::MissingLevel {
                    file: file.clone(),
                    line: line_number,
                });
            }
            if time::instant(event.ts).is_none() {
                return Err(ParseError::Timestamp {
                    file: file.clone(),
                    line: line_number,
                    ts: event.ts,
                });
            }
        }
        events.push(event);
    }
    Ok(events)
}
