//! Enumeration of input files.

use super::error::{FileId, ParseError};
use regex::Regex;
use std::path::PathBuf;
use tracing::debug;
use walkdir::WalkDir;

/// Which files under a root count as input documents.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    file_name: FileNameRule,
}

/// The rule `DEFAULT_FILE_PATTERN` spells out as a regex.
pub const DEFAULT_FILE_PATTERN: &str = r"\.json$";
const DEFAULT_SUFFIX: &str = ".json";

#[derive(Debug, Clone, Default)]
enum FileNameRule {
    #[default]
    JsonSuffix,
    Pattern(Regex),
}

impl SourceFilter {
    pub fn new(file_name_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            file_name: FileNameRule::Pattern(Regex::new(file_name_pattern)?),
        })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        match &self.file_name {
            FileNameRule::JsonSuffix => file_name.ends_with(DEFAULT_SUFFIX),
            FileNameRule::Pattern(pattern) => pattern.is_match(file_name),
        }
    }
}

/// Files found under a root, plus the paths that could not be listed.
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<FileId>,
    pub errors: Vec<ParseError>,
}

/// A hierarchy of input documents: a local directory, or an object-store prefix.
pub trait FileTree {
    /// Human readable location of the tree root.
    fn location(&self) -> String;

    /// Every selected file under the root, in a stable order.
    fn discover(&self) -> Discovery;

    fn read(&self, file: &FileId) -> std::io::Result<String>;
}

pub struct LocalFileTree {
    root: PathBuf,
    filter: SourceFilter,
}

impl LocalFileTree {
    pub fn new(root: impl Into<PathBuf>, filter: SourceFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }
}

impl FileTree for LocalFileTree {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn discover(&self) -> Discovery {
        let mut discovery = Discovery::default();
        for entry in WalkDir::new(&self.root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let file = err
                        .path()
                        .map(FileId::from)
                        .unwrap_or_else(|| FileId::from(self.root.as_path()));
                    discovery.errors.push(ParseError::Unlisted {
                        file,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if self.filter.matches(&file_name) {
                discovery.files.push(FileId::from(entry.path()));
            } else {
                debug!("Skipping {}", entry.path().display());
            }
        }
        discovery
    }

    fn read(&self, file: &FileId) -> std::io::Result<String> {
        std::fs::read_to_string(file.as_str())
    }
}
