use std::collections::BTreeMap;
use std::path::PathBuf;

/// One `column=value` level of a partition path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKey {
    column: &'static str,
    value: String,
}

impl PartitionKey {
    pub fn new(column: &'static str, value: impl ToString) -> Self {
        Self {
            column,
            value: value.to_string(),
        }
    }

    /// The directory name, with the value URL-encoded.
    pub fn segment(&self) -> String {
        format!("{}={}", self.column, urlencoding::encode(&self.value))
    }
}

/// Rows grouped by partition directory, relative to the table directory.
pub(super) struct Partitions<'r, T> {
    groups: BTreeMap<PathBuf, Vec<&'r T>>,
}

impl<T> Default for Partitions<'_, T> {
    fn default() -> Self {
        Self {
            groups: BTreeMap::new(),
        }
    }
}

impl<'r, T> Partitions<'r, T> {
    pub fn push(&mut self, keys: &[PartitionKey], row: &'r T) {
        let dir: PathBuf = keys.iter().map(PartitionKey::segment).collect();
        self.groups.entry(dir).or_default().push(row);
    }

    /// Everything in the table directory itself.
    pub fn push_flat(&mut self, rows: &'r [T]) {
        self.groups.entry(PathBuf::new()).or_default().extend(rows);
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn into_groups(self) -> impl Iterator<Item = (PathBuf, Vec<&'r T>)> {
        self.groups.into_iter()
    }
}
