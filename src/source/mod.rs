//! Raw record extraction from a file tree.
//!
//! Files are parsed one at a time as the caller iterates; a file that cannot be
//! parsed surfaces as an error item and the remaining files are still visited.
//! Iterating again re-lists the tree from scratch.

mod error;
mod reader;
mod tree;

pub use error::{FileId, ParseError};
pub use reader::{parse_catalog_document, parse_event_log};
pub use tree::{Discovery, FileTree, LocalFileTree, SourceFilter, DEFAULT_FILE_PATTERN};

use crate::model::{RawCatalogRecord, RawEventRecord};

/// The records parsed from one file, or the reason the file was rejected.
#[derive(Debug)]
pub struct SourceItem<T> {
    pub file: FileId,
    pub records: Result<Vec<T>, ParseError>,
}

pub struct RecordSource<'t> {
    tree: &'t dyn FileTree,
}

impl<'t> RecordSource<'t> {
    pub fn new(tree: &'t dyn FileTree) -> Self {
        Self { tree }
    }

    pub fn location(&self) -> String {
        self.tree.location()
    }

    pub fn discover(&self) -> Discovery {
        self.tree.discover()
    }

    pub fn read_catalog(&self, file: &FileId) -> Result<RawCatalogRecord, ParseError> {
        let text = self.read(file)?;
        parse_catalog_document(file, &text)
    }

    pub fn read_events(&self, file: &FileId) -> Result<Vec<RawEventRecord>, ParseError> {
        let text = self.read(file)?;
        parse_event_log(file, &text)
    }

    fn read(&self, file: &FileId) -> Result<String, ParseError> {
        self.tree.read(file).map_err(|source| ParseError::Unreadable {
            file: file.clone(),
            source,
        })
    }

    /// One item per catalog file; each successful item holds exactly one record.
    pub fn catalog(&self) -> impl Iterator<Item = SourceItem<RawCatalogRecord>> + '_ {
        self.items(|source, file| source.read_catalog(file).map(|record| vec![record]))
    }

    /// One item per event log, records in line order.
    pub fn events(&self) -> impl Iterator<Item = SourceItem<RawEventRecord>> + '_ {
        self.items(|source, file| source.read_events(file))
    }

    fn items<'s, T, F>(&'s self, parse: F) -> Box<dyn Iterator<Item = SourceItem<T>> + 's>
    where
        T: 's,
        F: Fn(&Self, &FileId) -> Result<Vec<T>, ParseError> + 's,
    {
        let Discovery { files, errors } = self.discover();
        let listing_failures = errors.into_iter().map(|err| SourceItem {
            file: err.file().clone(),
            records: Err(err),
        });
        let parsed = files.into_iter().map(move |file| SourceItem {
            records: parse(self, &file),
            file,
        });
        Box::new(listing_failures.chain(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn bad_file_does_not_stop_enumeration() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"song_id":"S1","title":"T","duration":1.0,"year":2000,"artist_id":"A1","artist_name":"N"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("b.json"), "{ broken").unwrap();
        std::fs::write(
            dir.path().join("c.json"),
            r#"{"song_id":"S2","title":"T2","duration":2.0,"year":2001,"artist_id":"A1","artist_name":"N"}"#,
        )
        .unwrap();

        let tree = LocalFileTree::new(dir.path(), SourceFilter::default());
        let source = RecordSource::new(&tree);
        let items: Vec<_> = source.catalog().collect();

        assert_eq!(items.len(), 3);
        assert!(items[0].records.is_ok());
        assert!(items[1].records.is_err());
        assert_eq!(items[2].records.as_ref().unwrap()[0].song_id, "S2");
    }

    #[test]
    fn events_are_read_per_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("log.json"),
            "{\"page\":\"Home\",\"sessionId\":1,\"ts\":3}\n{\"page\":\"Login\",\"sessionId\":1,\"ts\":4}\n",
        )
        .unwrap();

        let tree = LocalFileTree::new(dir.path(), SourceFilter::default());
        let source = RecordSource::new(&tree);
        let items: Vec<_> = source.events().collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].records.as_ref().unwrap().len(), 2);
    }
}
