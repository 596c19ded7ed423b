//! Read-side queries over the counting state.

use moka::sync::Cache;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;
use tracing::{debug, trace};

use crate::aggregate::{Bounds, SortKey};
use crate::bindings::CountingRegistry;
use crate::clock::{Clock, MILLIS_PER_DAY};
use crate::error::CountsResult;
use crate::types::EntityKind;

/// Total and recent growth of one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub total: i64,
    /// Documents created inside the growth window.
    pub growth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub generated_at: i64,
    pub window_days: u64,
    pub kinds: BTreeMap<EntityKind, KindStats>,
    pub average_chapters_per_series: f64,
    pub average_pages_per_chapter: f64,
    pub average_favorites_per_series: f64,
}

impl Summary {
    pub fn stats(&self, kind: EntityKind) -> KindStats {
        self.kinds
            .get(&kind)
            .copied()
            .unwrap_or(KindStats { total: 0, growth: 0 })
    }
}

fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

pub struct Analytics {
    registry: Arc<CountingRegistry>,
    clock: Arc<dyn Clock>,
    /// Holds at most the latest summary. `None` when caching is disabled.
    cache: Option<Cache<(), Arc<Summary>>>,
}

impl Analytics {
    pub fn new(registry: Arc<CountingRegistry>, clock: Arc<dyn Clock>) -> Self {
        let ttl = registry.config().analytics.cache_ttl_secs;
        let cache = (ttl > 0).then(|| {
            Cache::builder()
                .max_capacity(1)
                .time_to_live(Duration::from_secs(ttl))
                .build()
        });
        Self {
            registry,
            clock,
            cache,
        }
    }

    fn window_millis(&self) -> i64 {
        self.registry.config().analytics.growth_window_days as i64 * MILLIS_PER_DAY
    }

    pub fn total(&self, kind: EntityKind) -> CountsResult<i64> {
        self.registry.total(kind)
    }

    /// Documents of `kind` created at or after `now - window`.
    pub fn growth(&self, kind: EntityKind, now: i64) -> CountsResult<usize> {
        let since = now.saturating_sub(self.window_millis());
        self.registry
            .timeline(kind)
            .count(None, &Bounds::at_least(SortKey::from(since)))
    }

    /// Summary as of `now`, always computed from the current counts.
    pub fn summary(&self, now: i64) -> CountsResult<Arc<Summary>> {
        Ok(Arc::new(self.compute_summary(now)?))
    }

    /// Summary as of the clock's current time. Served from cache while a
    /// previous summary is younger than the configured TTL.
    pub fn current_summary(&self) -> CountsResult<Arc<Summary>> {
        let Some(cache) = &self.cache else {
            return self.summary(self.clock.now_millis());
        };
        if let Some(hit) = cache.get(&()) {
            trace!(operation = "summary", cached = true);
            return Ok(hit);
        }
        let summary = self.summary(self.clock.now_millis())?;
        cache.insert((), Arc::clone(&summary));
        Ok(summary)
    }

    /// Drop the cached summary.
    pub fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    fn compute_summary(&self, now: i64) -> CountsResult<Summary> {
        let mut kinds = BTreeMap::new();
        for kind in EntityKind::iter() {
            kinds.insert(
                kind,
                KindStats {
                    total: self.total(kind)?,
                    growth: self.growth(kind, now)?,
                },
            );
        }

        let total = |kind: EntityKind| kinds.get(&kind).map(|s| s.total).unwrap_or(0);
        let series = total(EntityKind::Series);
        let chapters = total(EntityKind::Chapters);
        let summary = Summary {
            generated_at: now,
            window_days: self.registry.config().analytics.growth_window_days,
            average_chapters_per_series: ratio(chapters, series),
            average_pages_per_chapter: ratio(total(EntityKind::Pages), chapters),
            average_favorites_per_series: ratio(total(EntityKind::Favorites), series),
            kinds,
        };

        debug!(
            operation = "summary",
            series = series,
            chapters = chapters,
            generated_at = now,
        );
        Ok(summary)
    }

    pub fn chapters_in_series(&self, series_id: &str) -> CountsResult<usize> {
        self.registry
            .chapters_by_series()
            .count(Some(series_id), &Bounds::all())
    }

    /// Chapters of a series numbered within `[lower, upper]`.
    pub fn chapters_in_range(&self, series_id: &str, lower: f64, upper: f64) -> CountsResult<usize> {
        self.registry
            .chapters_by_series()
            .count(Some(series_id), &Bounds::between(lower, upper))
    }

    pub fn pages_in_chapter(&self, chapter_id: &str) -> CountsResult<usize> {
        self.registry
            .pages_by_chapter()
            .count(Some(chapter_id), &Bounds::all())
    }

    pub fn views(&self, id: &str) -> CountsResult<i64> {
        self.registry.views(id)
    }
}
