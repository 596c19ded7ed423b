//! Consolidated test helpers for manga-counts

use std::sync::Arc;
use tempfile::TempDir;

use manga_counts::aggregate::Bounds;
use manga_counts::store::scan_typed;
use manga_counts::types::{Chapter, Series};
use manga_counts::{App, Clock, Config, EntityKind, ManualClock, MemoryStore};

/// Fixed starting time for every test clock: 2023-11-14T22:13:20Z.
pub const T0: i64 = 1_700_000_000_000;

/// Config with the analytics cache disabled so every summary is fresh.
pub fn uncached_config() -> Config {
    let mut config = Config::default();
    config.analytics.cache_ttl_secs = 0;
    config
}

/// Standard test environment: an app over an empty store and a manual clock.
pub struct TestEnvironment {
    pub app: Arc<App>,
    pub clock: Arc<ManualClock>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(uncached_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(config: Config, store: Arc<MemoryStore>) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let app = App::with_store(config, store, Arc::clone(&clock) as Arc<dyn Clock>);
        Self {
            app: Arc::new(app),
            clock,
        }
    }

    pub fn total(&self, kind: EntityKind) -> i64 {
        self.app.registry.total(kind).unwrap()
    }

    pub fn timeline_count(&self, kind: EntityKind) -> usize {
        self.app
            .registry
            .timeline(kind)
            .count(None, &Bounds::all())
            .unwrap()
    }

    pub fn documents(&self, kind: EntityKind) -> usize {
        self.app.store.len(kind.collection())
    }

    /// Counters and aggregates agree with the documents.
    pub fn assert_consistent(&self) {
        for kind in [
            EntityKind::Series,
            EntityKind::Chapters,
            EntityKind::Pages,
            EntityKind::Users,
            EntityKind::Favorites,
            EntityKind::Genres,
            EntityKind::Notifications,
        ] {
            let docs = self.documents(kind);
            assert_eq!(self.total(kind), docs as i64, "{} counter", kind);
            assert_eq!(self.timeline_count(kind), docs, "{} timeline", kind);
        }

        let store = self.app.store.as_ref();
        let chapters: Vec<Chapter> = scan_typed(store, "chapters").unwrap();
        for series in scan_typed::<Series>(store, "series").unwrap() {
            let expected = chapters.iter().filter(|c| c.series_id == series.id).count();
            assert_eq!(
                self.app.analytics.chapters_in_series(&series.id).unwrap(),
                expected,
                "chapters of {}",
                series.id
            );
        }
    }
}

/// Environment whose store is persisted to a snapshot inside a temp dir.
pub fn setup_snapshot_environment() -> (TestEnvironment, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut config = uncached_config();
    config.store.snapshot_path = Some(temp_dir.path().join("store.json"));
    (TestEnvironment::with_config(config), temp_dir)
}
