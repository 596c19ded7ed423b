use std::sync::Arc;
use tracing::warn;

use super::{AggregateIndex, Bounds, EntryLocation, Reconciled, SortKey};
use crate::error::{CountsError, CountsResult};
use crate::metrics::AggregateMetrics;
use crate::store::DocumentStore;
use crate::types::Entity;

/// Extracts the namespace of a document. `None` means the global partition.
pub type NamespaceFn<T> = fn(&T) -> Option<String>;
/// Extracts the sort key of a document.
pub type SortKeyFn<T> = fn(&T) -> SortKey;

/// An [`AggregateIndex`] bound to one entity type through its extraction
/// functions.
pub struct TableAggregate<T: Entity> {
    index: AggregateIndex,
    namespace: NamespaceFn<T>,
    sort_key: SortKeyFn<T>,
}

impl<T: Entity> TableAggregate<T> {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        metrics: Arc<AggregateMetrics>,
        namespace: NamespaceFn<T>,
        sort_key: SortKeyFn<T>,
    ) -> Self {
        Self {
            index: AggregateIndex::new(name, store, metrics),
            namespace,
            sort_key,
        }
    }

    /// Global timeline of `T` keyed by creation time.
    pub fn timeline(
        name: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        metrics: Arc<AggregateMetrics>,
    ) -> Self {
        Self::new(name, store, metrics, |_| None, |doc| {
            SortKey::from(doc.created_at())
        })
    }

    pub fn index(&self) -> &AggregateIndex {
        &self.index
    }

    pub fn name(&self) -> &str {
        self.index.name()
    }

    /// Namespace and sort key the binding computes for `doc`.
    pub fn location_of(&self, doc: &T) -> EntryLocation {
        EntryLocation {
            namespace: (self.namespace)(doc),
            key: (self.sort_key)(doc),
        }
    }

    pub fn insert(&self, doc: &T) -> CountsResult<()> {
        let loc = self.location_of(doc);
        self.index.insert(doc.id(), loc.namespace.as_deref(), loc.key)
    }

    pub fn insert_if_not_exists(&self, doc: &T) -> CountsResult<bool> {
        let loc = self.location_of(doc);
        self.index
            .insert_if_not_exists(doc.id(), loc.namespace.as_deref(), loc.key)
    }

    /// Remove the entry for `doc.id()`. The stored location is used, not the
    /// one computed from `doc`.
    pub fn delete(&self, doc: &T) -> CountsResult<EntryLocation> {
        self.index.delete(doc.id())
    }

    /// Move the entry for `old` to where `new` belongs. Returns whether the
    /// entry moved.
    pub fn replace(&self, old: &T, new: &T) -> CountsResult<bool> {
        if old.id() != new.id() {
            return Err(CountsError::InvalidArgument(format!(
                "{}: replace of {} with a different document {}",
                self.name(),
                old.id(),
                new.id()
            )));
        }

        let claimed = self.location_of(old);
        if let Some(stored) = self.index.entry(old.id())? {
            if stored != claimed {
                warn!(
                    aggregate = %self.name(),
                    id = old.id(),
                    claimed = ?claimed,
                    stored = ?stored,
                    "Caller's old document disagrees with the stored entry, using the stored one"
                );
            }
        }

        let target = self.location_of(new);
        self.index
            .replace(new.id(), target.namespace.as_deref(), target.key)
    }

    pub fn reconcile(&self, doc: &T) -> CountsResult<Reconciled> {
        let loc = self.location_of(doc);
        self.index
            .reconcile(doc.id(), loc.namespace.as_deref(), loc.key)
    }

    /// Whether an entry exists for `id`.
    pub fn contains(&self, id: &str) -> CountsResult<bool> {
        Ok(self.index.entry(id)?.is_some())
    }

    pub fn count(&self, namespace: Option<&str>, bounds: &Bounds) -> CountsResult<usize> {
        self.index.count(namespace, bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Chapter;

    fn chapter(id: &str, series: &str, number: f64) -> Chapter {
        Chapter {
            id: id.to_string(),
            created_at: 1_700_000_000_000,
            series_id: series.to_string(),
            chapter_number: number,
            title: None,
            view_count: None,
        }
    }

    fn chapters_by_series() -> TableAggregate<Chapter> {
        TableAggregate::new(
            "chapters_by_series",
            Arc::new(MemoryStore::new()),
            Arc::new(AggregateMetrics::new()),
            |c| Some(c.series_id.clone()),
            |c| SortKey::Number(c.chapter_number),
        )
    }

    #[test]
    fn test_namespaced_counts() {
        let agg = chapters_by_series();

        agg.insert(&chapter("c1", "s1", 1.0)).unwrap();
        agg.insert(&chapter("c2", "s1", 2.0)).unwrap();
        agg.insert(&chapter("c3", "s1", 10.5)).unwrap();
        agg.insert(&chapter("c4", "s2", 1.0)).unwrap();

        assert_eq!(agg.count(Some("s1"), &Bounds::all()).unwrap(), 3);
        assert_eq!(agg.count(Some("s1"), &Bounds::between(1.0, 2.0)).unwrap(), 2);
        assert_eq!(agg.count(Some("s1"), &Bounds::exactly(10.5)).unwrap(), 1);
        assert_eq!(agg.count(None, &Bounds::all()).unwrap(), 4);
    }

    #[test]
    fn test_replace_with_stale_old_document() {
        let agg = chapters_by_series();
        let original = chapter("c1", "s1", 5.0);
        agg.insert(&original).unwrap();

        // Renumbered once already; the caller still holds the original.
        agg.replace(&original, &chapter("c1", "s1", 6.0)).unwrap();
        agg.replace(&original, &chapter("c1", "s1", 7.0)).unwrap();

        assert_eq!(agg.count(Some("s1"), &Bounds::all()).unwrap(), 1);
        assert_eq!(agg.count(Some("s1"), &Bounds::exactly(6.0)).unwrap(), 0);
        assert_eq!(agg.count(Some("s1"), &Bounds::exactly(7.0)).unwrap(), 1);
    }

    #[test]
    fn test_replace_requires_same_id() {
        let agg = chapters_by_series();
        agg.insert(&chapter("c1", "s1", 1.0)).unwrap();

        let result = agg.replace(&chapter("c1", "s1", 1.0), &chapter("c2", "s1", 2.0));
        assert!(matches!(result, Err(CountsError::InvalidArgument(_))));
    }

    #[test]
    fn test_delete_uses_stored_location() {
        let agg = chapters_by_series();
        agg.insert(&chapter("c1", "s1", 3.0)).unwrap();

        let location = agg.delete(&chapter("c1", "s1", 99.0)).unwrap();

        assert_eq!(location.key, SortKey::Number(3.0));
        assert_eq!(agg.count(Some("s1"), &Bounds::all()).unwrap(), 0);
        assert!(!agg.contains("c1").unwrap());
    }

    #[test]
    fn test_timeline() {
        let agg: TableAggregate<Chapter> = TableAggregate::timeline(
            "chapters.timeline",
            Arc::new(MemoryStore::new()),
            Arc::new(AggregateMetrics::new()),
        );
        let mut old = chapter("c1", "s1", 1.0);
        old.created_at = 1_000;
        let mut new = chapter("c2", "s1", 2.0);
        new.created_at = 5_000;

        agg.insert(&old).unwrap();
        agg.insert(&new).unwrap();

        assert_eq!(agg.count(None, &Bounds::at_least(5_000i64)).unwrap(), 1);
        assert_eq!(agg.count(None, &Bounds::all()).unwrap(), 2);
        assert_eq!(agg.location_of(&old).namespace, None);
    }
}
