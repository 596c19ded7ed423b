pub mod aggregate;
pub mod analytics;
pub mod backfill;
pub mod bindings;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod sharded_counter;
pub mod store;
pub mod types;

pub use aggregate::{AggregateIndex, Bound, Bounds, EntryLocation, SortKey, TableAggregate};
pub use analytics::{Analytics, KindStats, Summary};
pub use backfill::{Backfill, BackfillReport, KindReport};
pub use bindings::{Counted, CountingRegistry};
pub use catalog::Catalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CliArgs, Config};
pub use error::{CountsError, CountsResult};
pub use metrics::Metrics;
pub use sharded_counter::ShardedCounter;
pub use store::{DocumentStore, MemoryStore};
pub use types::EntityKind;

use std::sync::Arc;

/// Everything a process needs, wired together around one store.
pub struct App {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<Metrics>,
    pub registry: Arc<CountingRegistry>,
    pub catalog: Catalog,
    pub analytics: Analytics,
    pub backfill: Backfill,
}

impl App {
    /// Open the configured snapshot (or an empty in-memory store).
    pub fn open(config: Config) -> CountsResult<Self> {
        let store = match config.store.snapshot_path {
            Some(ref path) => MemoryStore::open(path)?,
            None => MemoryStore::new(),
        };
        Ok(Self::with_store(config, Arc::new(store), Arc::new(SystemClock)))
    }

    pub fn with_store(config: Config, store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        tracing::debug!(config = ?config, "Configuration loaded");

        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(CountingRegistry::new(
            config.clone(),
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::clone(&metrics),
        ));

        Self {
            catalog: Catalog::new(Arc::clone(&registry), Arc::clone(&clock)),
            analytics: Analytics::new(Arc::clone(&registry), clock),
            backfill: Backfill::new(Arc::clone(&registry)),
            config,
            store,
            metrics,
            registry,
        }
    }

    /// Write the store back to the snapshot file, if one is configured.
    pub fn save(&self) -> CountsResult<()> {
        if let Some(ref path) = self.config.store.snapshot_path {
            self.store.save(path)?;
        }
        Ok(())
    }
}
