//! The counting registry: every counter and aggregate the catalog keeps in
//! step with its documents, and the bindings that tie each entity type to
//! them.
//!
//! The registry is built once per process from the configuration and a
//! store handle and passed explicitly to the catalog, analytics and backfill.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregate::{AggregateIndex, SortKey, TableAggregate};
use crate::config::Config;
use crate::error::{CountsError, CountsResult};
use crate::metrics::Metrics;
use crate::sharded_counter::ShardedCounter;
use crate::store::{from_document, to_document, DocumentStore, Mutation};
use crate::types::{
    Chapter, Entity, EntityKind, Favorite, Genre, Notification, Page, Series, User, Viewed,
};

/// Collection for bookkeeping documents that are not entities.
pub const META: &str = "_meta";
const SEQUENCE_ID: &str = "sequence";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sequence {
    next: u64,
}

/// An entity type with counting bindings.
pub trait Counted: Entity {
    /// Every aggregate the type is bound to, its timeline first.
    fn aggregates(registry: &CountingRegistry) -> Vec<&TableAggregate<Self>>;
}

struct Timelines {
    series: TableAggregate<Series>,
    chapters: TableAggregate<Chapter>,
    pages: TableAggregate<Page>,
    users: TableAggregate<User>,
    favorites: TableAggregate<Favorite>,
    genres: TableAggregate<Genre>,
    notifications: TableAggregate<Notification>,
}

fn timeline_name(kind: EntityKind) -> String {
    format!("{}_timeline", kind)
}

pub struct CountingRegistry {
    config: Config,
    store: Arc<dyn DocumentStore>,
    metrics: Arc<Metrics>,
    counter: ShardedCounter,
    timelines: Timelines,
    chapters_by_series: TableAggregate<Chapter>,
    pages_by_chapter: TableAggregate<Page>,
}

impl CountingRegistry {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>, metrics: Arc<Metrics>) -> Self {
        let aggregate_metrics = Arc::clone(&metrics.aggregates);
        let timeline = |kind: EntityKind| {
            (
                timeline_name(kind),
                Arc::clone(&store),
                Arc::clone(&aggregate_metrics),
            )
        };

        macro_rules! timeline {
            ($kind:ident) => {{
                let (name, store, metrics) = timeline(EntityKind::$kind);
                TableAggregate::timeline(name, store, metrics)
            }};
        }

        let timelines = Timelines {
            series: timeline!(Series),
            chapters: timeline!(Chapters),
            pages: timeline!(Pages),
            users: timeline!(Users),
            favorites: timeline!(Favorites),
            genres: timeline!(Genres),
            notifications: timeline!(Notifications),
        };

        let chapters_by_series: TableAggregate<Chapter> = TableAggregate::new(
            "chapters_by_series",
            Arc::clone(&store),
            Arc::clone(&aggregate_metrics),
            |c: &Chapter| Some(c.series_id.clone()),
            |c: &Chapter| SortKey::Number(c.chapter_number),
        );
        let pages_by_chapter: TableAggregate<Page> = TableAggregate::new(
            "pages_by_chapter",
            Arc::clone(&store),
            Arc::clone(&aggregate_metrics),
            |p: &Page| Some(p.chapter_id.clone()),
            |p: &Page| SortKey::from(p.page_number),
        );

        let counter = ShardedCounter::new(
            Arc::clone(&store),
            config.counters.clone(),
            Arc::clone(&metrics.counters),
        );

        Self {
            config,
            store,
            metrics,
            counter,
            timelines,
            chapters_by_series,
            pages_by_chapter,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn counter(&self) -> &ShardedCounter {
        &self.counter
    }

    pub fn chapters_by_series(&self) -> &TableAggregate<Chapter> {
        &self.chapters_by_series
    }

    pub fn pages_by_chapter(&self) -> &TableAggregate<Page> {
        &self.pages_by_chapter
    }

    /// Creation-time timeline of one entity kind.
    pub fn timeline(&self, kind: EntityKind) -> &AggregateIndex {
        match kind {
            EntityKind::Series => self.timelines.series.index(),
            EntityKind::Chapters => self.timelines.chapters.index(),
            EntityKind::Pages => self.timelines.pages.index(),
            EntityKind::Users => self.timelines.users.index(),
            EntityKind::Favorites => self.timelines.favorites.index(),
            EntityKind::Genres => self.timelines.genres.index(),
            EntityKind::Notifications => self.timelines.notifications.index(),
        }
    }

    /// Every aggregate index over documents of `kind`.
    pub fn indexes_for(&self, kind: EntityKind) -> Vec<&AggregateIndex> {
        let mut indexes = vec![self.timeline(kind)];
        match kind {
            EntityKind::Chapters => indexes.push(self.chapters_by_series.index()),
            EntityKind::Pages => indexes.push(self.pages_by_chapter.index()),
            _ => {}
        }
        indexes
    }

    /// Allocate a new document id for `kind`, e.g. `chp_0000000042`.
    pub fn next_id(&self, kind: EntityKind) -> CountsResult<String> {
        let mut assigned = 0;
        self.store.update(META, SEQUENCE_ID, &mut |current| {
            let mut sequence = match current {
                Some(doc) => from_document::<Sequence>(doc)?,
                None => Sequence::default(),
            };
            sequence.next += 1;
            assigned = sequence.next;
            Ok(Mutation::Put(to_document(&sequence)?))
        })?;
        Ok(format!("{}_{:010}", kind.id_prefix(), assigned))
    }

    /// Apply every binding for a newly written document: one entry per
    /// aggregate and +1 on the kind's total. On failure the bindings already
    /// applied are undone before the error is returned.
    pub fn on_insert<T: Counted>(&self, doc: &T) -> CountsResult<()> {
        let aggregates = T::aggregates(self);

        for (done, aggregate) in aggregates.iter().enumerate() {
            if let Err(e) = aggregate.insert(doc) {
                self.undo_inserts(&aggregates[..done], doc);
                return Err(e);
            }
        }

        if let Err(e) = self.counter.increment(T::KIND.collection()) {
            self.undo_inserts(&aggregates, doc);
            return Err(e);
        }

        debug!(kind = T::KIND.collection(), id = doc.id(), "Counted insert");
        Ok(())
    }

    fn undo_inserts<T: Counted>(&self, applied: &[&TableAggregate<T>], doc: &T) {
        for aggregate in applied {
            if let Err(e) = aggregate.delete(doc) {
                warn!(
                    aggregate = %aggregate.name(),
                    id = doc.id(),
                    error = %e,
                    "Failed to undo aggregate insert"
                );
            }
        }
    }

    /// Move every entry of `old` to where `new` belongs.
    pub fn on_replace<T: Counted>(&self, old: &T, new: &T) -> CountsResult<()> {
        for aggregate in T::aggregates(self) {
            aggregate.replace(old, new)?;
        }
        Ok(())
    }

    /// Remove every binding of a document about to be deleted. Fails with
    /// `MissingEntry`, before changing anything, if any aggregate has no entry
    /// for it.
    pub fn on_delete<T: Counted>(&self, doc: &T) -> CountsResult<()> {
        let aggregates = T::aggregates(self);

        for aggregate in &aggregates {
            if !aggregate.contains(doc.id())? {
                return Err(CountsError::MissingEntry {
                    aggregate: aggregate.name().to_string(),
                    id: doc.id().to_string(),
                });
            }
        }
        for aggregate in &aggregates {
            aggregate.delete(doc)?;
        }
        self.counter.decrement(T::KIND.collection())?;

        debug!(kind = T::KIND.collection(), id = doc.id(), "Counted delete");
        Ok(())
    }

    /// Total counter of one kind.
    pub fn total(&self, kind: EntityKind) -> CountsResult<i64> {
        self.counter.count(kind.collection())
    }

    /// Count one view of `id` and return the new total.
    pub fn record_view(&self, id: &str) -> CountsResult<i64> {
        self.counter.increment(id)?;
        self.counter.count(id)
    }

    pub fn views(&self, id: &str) -> CountsResult<i64> {
        self.counter.count(id)
    }

    pub fn reset_views(&self, id: &str) -> CountsResult<()> {
        self.counter.reset(id)
    }

    /// Copy `total` into the document's `view_count`. A document deleted in
    /// the meantime is left alone.
    pub fn write_view_count<T: Viewed>(&self, id: &str, total: i64) -> CountsResult<()> {
        self.store
            .update(T::KIND.collection(), id, &mut |current| {
                let Some(doc) = current else {
                    return Ok(Mutation::Keep);
                };
                let mut entity: T = from_document(doc)?;
                if entity.view_count() == Some(total) {
                    return Ok(Mutation::Keep);
                }
                entity.set_view_count(total);
                Ok(Mutation::Put(to_document(&entity)?))
            })?;
        Ok(())
    }
}

impl Counted for Series {
    fn aggregates(registry: &CountingRegistry) -> Vec<&TableAggregate<Self>> {
        vec![&registry.timelines.series]
    }
}

impl Counted for Chapter {
    fn aggregates(registry: &CountingRegistry) -> Vec<&TableAggregate<Self>> {
        vec![&registry.timelines.chapters, &registry.chapters_by_series]
    }
}

impl Counted for Page {
    fn aggregates(registry: &CountingRegistry) -> Vec<&TableAggregate<Self>> {
        vec![&registry.timelines.pages, &registry.pages_by_chapter]
    }
}

impl Counted for User {
    fn aggregates(registry: &CountingRegistry) -> Vec<&TableAggregate<Self>> {
        vec![&registry.timelines.users]
    }
}

impl Counted for Favorite {
    fn aggregates(registry: &CountingRegistry) -> Vec<&TableAggregate<Self>> {
        vec![&registry.timelines.favorites]
    }
}

impl Counted for Genre {
    fn aggregates(registry: &CountingRegistry) -> Vec<&TableAggregate<Self>> {
        vec![&registry.timelines.genres]
    }
}

impl Counted for Notification {
    fn aggregates(registry: &CountingRegistry) -> Vec<&TableAggregate<Self>> {
        vec![&registry.timelines.notifications]
    }
}
