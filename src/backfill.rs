//! Backfill and repair.
//!
//! Rebuilds the counting state from the documents, which are authoritative:
//! every live document gets its aggregate entries (inserted or moved back to
//! where its fields say), entries without a document are pruned, partition
//! entries that disagree with their location are swept, each kind's total
//! counter is moved onto the live document count and denormalized view
//! counts are refreshed from the view counters. Running it twice in a row
//! changes nothing the second time.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregate::Reconciled;
use crate::bindings::{Counted, CountingRegistry};
use crate::error::CountsResult;
use crate::store::scan_typed;
use crate::types::{
    Chapter, EntityKind, Favorite, Genre, Notification, Page, Series, User, Viewed,
};

/// What backfill did for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindReport {
    /// Live documents scanned
    pub scanned: usize,
    /// Aggregate entries created for documents that had none, or restored
    /// to a partition that had lost them
    pub created: usize,
    /// Aggregate entries moved to the location their document implies, and
    /// stale partition entries left at a previous location
    pub moved: usize,
    /// Aggregate entries removed because their document is gone
    pub pruned: usize,
    /// Amount added to the total counter (negative when it was too high)
    pub counter_adjustment: i64,
    /// Denormalized view counts rewritten
    pub views_synced: usize,
}

impl KindReport {
    pub fn changes(&self) -> usize {
        self.created
            + self.moved
            + self.pruned
            + self.views_synced
            + usize::from(self.counter_adjustment != 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub kinds: BTreeMap<EntityKind, KindReport>,
}

impl BackfillReport {
    pub fn get(&self, kind: EntityKind) -> KindReport {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }

    /// Whether the run found nothing to repair.
    pub fn is_clean(&self) -> bool {
        self.kinds.values().all(|r| r.changes() == 0)
    }
}

pub struct Backfill {
    registry: Arc<CountingRegistry>,
}

impl Backfill {
    pub fn new(registry: Arc<CountingRegistry>) -> Self {
        Self { registry }
    }

    pub fn run(&self) -> CountsResult<BackfillReport> {
        let mut report = BackfillReport::default();

        let mut series = self.backfill_kind::<Series>()?;
        series.views_synced = self.sync_views::<Series>()?;
        report.kinds.insert(EntityKind::Series, series);

        let mut chapters = self.backfill_kind::<Chapter>()?;
        chapters.views_synced = self.sync_views::<Chapter>()?;
        report.kinds.insert(EntityKind::Chapters, chapters);

        report.kinds.insert(EntityKind::Pages, self.backfill_kind::<Page>()?);
        report.kinds.insert(EntityKind::Users, self.backfill_kind::<User>()?);
        report
            .kinds
            .insert(EntityKind::Favorites, self.backfill_kind::<Favorite>()?);
        report.kinds.insert(EntityKind::Genres, self.backfill_kind::<Genre>()?);
        report
            .kinds
            .insert(EntityKind::Notifications, self.backfill_kind::<Notification>()?);

        for (kind, r) in &report.kinds {
            info!(
                operation = "backfill",
                kind = kind.collection(),
                scanned = r.scanned,
                created = r.created,
                moved = r.moved,
                pruned = r.pruned,
                counter_adjustment = r.counter_adjustment,
                views_synced = r.views_synced,
            );
        }
        Ok(report)
    }

    fn backfill_kind<T: Counted>(&self) -> CountsResult<KindReport> {
        let kind = T::KIND;
        let docs: Vec<T> = scan_typed(self.registry.store().as_ref(), kind.collection())?;
        let mut report = KindReport {
            scanned: docs.len(),
            ..Default::default()
        };

        for doc in &docs {
            for aggregate in T::aggregates(&self.registry) {
                match aggregate.reconcile(doc)? {
                    Reconciled::Inserted | Reconciled::Healed => report.created += 1,
                    Reconciled::Moved => report.moved += 1,
                    Reconciled::Unchanged => {}
                }
            }
        }

        let live: HashSet<&str> = docs.iter().map(|d| d.id()).collect();
        for index in self.registry.indexes_for(kind) {
            for id in index.entry_ids()? {
                if !live.contains(id.as_str()) {
                    warn!(
                        aggregate = %index.name(),
                        id = %id,
                        "Pruning entry whose document no longer exists"
                    );
                    index.delete(&id)?;
                    report.pruned += 1;
                }
            }

            let swept = index.sweep()?;
            report.pruned += swept.orphaned;
            report.moved += swept.misplaced;
        }

        // Summed directly: a negative total is exactly what this repairs.
        let counter = self.registry.counter();
        let current: i64 = counter.shard_values(kind.collection())?.iter().sum();
        let target = docs.len() as i64;
        if current != target {
            counter.add(kind.collection(), target - current)?;
            report.counter_adjustment = target - current;
        }

        Ok(report)
    }

    /// Refresh denormalized view counts. Documents that were never viewed and
    /// have no view count are left alone.
    fn sync_views<T: Viewed>(&self) -> CountsResult<usize> {
        let docs: Vec<T> = scan_typed(self.registry.store().as_ref(), T::KIND.collection())?;
        let mut synced = 0;
        for doc in &docs {
            let views = self.registry.views(doc.id())?;
            let stale = match doc.view_count() {
                Some(current) => current != views,
                None => views != 0,
            };
            if stale {
                self.registry.write_view_count::<T>(doc.id(), views)?;
                synced += 1;
            }
        }
        Ok(synced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Bounds;
    use crate::config::Config;
    use crate::metrics::Metrics;
    use crate::store::{put_typed, DocumentStore, MemoryStore};

    fn registry() -> Arc<CountingRegistry> {
        Arc::new(CountingRegistry::new(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(Metrics::new()),
        ))
    }

    fn genre(id: &str) -> Genre {
        Genre {
            id: id.to_string(),
            created_at: 10,
            name: id.to_string(),
            slug: id.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_backfill_empty_store_is_clean() {
        let report = Backfill::new(registry()).run().unwrap();
        assert_eq!(report.kinds.len(), 7);
        assert!(report.is_clean());
    }

    #[test]
    fn test_backfill_indexes_uncounted_documents() {
        let registry = registry();
        let store = registry.store().as_ref();
        put_typed(store, "genres", "g1", &genre("g1")).unwrap();
        put_typed(store, "genres", "g2", &genre("g2")).unwrap();

        let report = Backfill::new(Arc::clone(&registry)).run().unwrap();
        let genres = report.get(EntityKind::Genres);

        assert_eq!(genres.scanned, 2);
        assert_eq!(genres.created, 2);
        assert_eq!(genres.counter_adjustment, 2);
        assert_eq!(registry.total(EntityKind::Genres).unwrap(), 2);
        assert_eq!(
            registry.timeline(EntityKind::Genres).count(None, &Bounds::all()).unwrap(),
            2
        );
    }

    #[test]
    fn test_backfill_prunes_orphans_and_lowers_counter() {
        let registry = registry();
        registry.on_insert(&genre("gone")).unwrap();

        let report = Backfill::new(Arc::clone(&registry)).run().unwrap();
        let genres = report.get(EntityKind::Genres);

        assert_eq!(genres.pruned, 1);
        assert_eq!(genres.counter_adjustment, -1);
        assert_eq!(registry.total(EntityKind::Genres).unwrap(), 0);
    }

    #[test]
    fn test_backfill_twice_is_clean() {
        let registry = registry();
        put_typed(registry.store().as_ref(), "genres", "g1", &genre("g1")).unwrap();
        registry.on_insert(&genre("orphan")).unwrap();

        let backfill = Backfill::new(registry);
        assert!(!backfill.run().unwrap().is_clean());
        assert!(backfill.run().unwrap().is_clean());
    }

    #[test]
    fn test_backfill_sweeps_orphaned_partition_entries() {
        let registry = registry();
        registry.on_insert(&genre("gone")).unwrap();
        // Location removed but the partition entry and the count survive.
        registry
            .store()
            .delete("aggregate.genres_timeline.entries", "gone")
            .unwrap();

        let backfill = Backfill::new(Arc::clone(&registry));
        let genres = backfill.run().unwrap().get(EntityKind::Genres);

        assert_eq!(genres.pruned, 1);
        assert_eq!(
            registry.timeline(EntityKind::Genres).count(None, &Bounds::all()).unwrap(),
            0
        );
        assert!(backfill.run().unwrap().is_clean());
    }

    #[test]
    fn test_backfill_sweeps_misplaced_partition_entries() {
        let registry = registry();
        let g1 = genre("g1");
        put_typed(registry.store().as_ref(), "genres", "g1", &g1).unwrap();
        registry.on_insert(&g1).unwrap();
        // Location rewritten to where the document says, partition left at
        // the old key.
        registry
            .store()
            .put(
                "aggregate.genres_timeline.entries",
                "g1",
                serde_json::json!({"namespace": null, "key": 10.0}),
            )
            .unwrap();
        registry
            .store()
            .put(
                "aggregate.genres_timeline.partitions",
                "$global",
                serde_json::json!({"namespace": null, "entries": [[5.0, "g1"]]}),
            )
            .unwrap();

        let backfill = Backfill::new(Arc::clone(&registry));
        let genres = backfill.run().unwrap().get(EntityKind::Genres);

        assert_eq!(genres.created, 1);
        assert_eq!(genres.moved, 1);
        let timeline = registry.timeline(EntityKind::Genres);
        assert_eq!(timeline.count(None, &Bounds::all()).unwrap(), 1);
        assert_eq!(timeline.count(None, &Bounds::exactly(10i64)).unwrap(), 1);
        assert!(timeline.is_consistent("g1").unwrap());
        assert!(backfill.run().unwrap().is_clean());
    }

    #[test]
    fn test_backfill_syncs_view_counts() {
        let registry = registry();
        let series = Series {
            id: "srs_1".to_string(),
            created_at: 10,
            title: "Akira".to_string(),
            slug: "akira".to_string(),
            description: None,
            author: None,
            status: crate::types::SeriesStatus::Completed,
            genres: vec![],
            updated_at: 10,
            view_count: Some(99),
        };
        put_typed(registry.store().as_ref(), "series", "srs_1", &series).unwrap();
        registry.record_view("srs_1").unwrap();
        registry.record_view("srs_1").unwrap();

        let report = Backfill::new(Arc::clone(&registry)).run().unwrap();

        assert_eq!(report.get(EntityKind::Series).views_synced, 1);
        let stored: Series =
            crate::store::get_typed(registry.store().as_ref(), "series", "srs_1")
                .unwrap()
                .unwrap();
        assert_eq!(stored.view_count, Some(2));
    }
}
