use serde::{Deserialize, Serialize};

use super::{Bounds, SortKey};

/// One namespace of an aggregate, stored as a single document.
///
/// Entries are kept sorted by `(key, id)` so range counts are two binary
/// searches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Partition {
    pub namespace: Option<String>,
    pub entries: Vec<(SortKey, String)>,
}

impl Partition {
    pub fn new(namespace: Option<&str>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            entries: Vec::new(),
        }
    }

    fn position(&self, key: SortKey, id: &str) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(k, i)| k.cmp(&key).then_with(|| i.as_str().cmp(id)))
    }

    /// Returns false if the entry was already present.
    pub fn insert(&mut self, key: SortKey, id: &str) -> bool {
        match self.position(key, id) {
            Ok(_) => false,
            Err(at) => {
                self.entries.insert(at, (key, id.to_string()));
                true
            }
        }
    }

    /// Returns false if the entry was not present.
    pub fn remove(&mut self, key: SortKey, id: &str) -> bool {
        match self.position(key, id) {
            Ok(at) => {
                self.entries.remove(at);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, key: SortKey, id: &str) -> bool {
        self.position(key, id).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index range of the entries whose key lies within `bounds`.
    fn span(&self, bounds: &Bounds) -> (usize, usize) {
        let start = match bounds.lower {
            None => 0,
            Some(b) if b.inclusive => self.entries.partition_point(|(k, _)| *k < b.key),
            Some(b) => self.entries.partition_point(|(k, _)| *k <= b.key),
        };
        let end = match bounds.upper {
            None => self.entries.len(),
            Some(b) if b.inclusive => self.entries.partition_point(|(k, _)| *k <= b.key),
            Some(b) => self.entries.partition_point(|(k, _)| *k < b.key),
        };
        (start, end.max(start))
    }

    pub fn count(&self, bounds: &Bounds) -> usize {
        let (start, end) = self.span(bounds);
        end - start
    }

    pub fn range(&self, bounds: &Bounds) -> &[(SortKey, String)] {
        let (start, end) = self.span(bounds);
        &self.entries[start..end]
    }
}
