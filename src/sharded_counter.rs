//! Sharded counter stored in the document store.
//!
//! A named counter is split into S shard documents. Writers pick one shard
//! per call, so concurrent increments of the same name mostly touch
//! different documents and never contend. Readers sum every shard.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::{CounterConfig, MAX_SHARDS};
use crate::error::{CountsError, CountsResult};
use crate::metrics::CounterMetrics;
use crate::store::{from_document, to_document, DocumentStore, Mutation};

/// Collection recording how many shards each name was allocated with.
pub const ALLOCATIONS: &str = "counter_allocations";
/// Collection holding the shard documents, id `{name}#{index}`.
pub const SHARDS: &str = "counter_shards";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Allocation {
    name: String,
    shards: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Shard {
    name: String,
    shard: usize,
    value: i64,
}

fn shard_id(name: &str, index: usize) -> String {
    format!("{}#{}", name, index)
}

/// Pick the next shard for this thread.
///
/// Round robin through a thread-local cursor. Each thread's cursor starts at a
/// different offset, so concurrent first writes from different threads do not
/// all land on shard 0.
#[inline]
fn next_shard(shards: usize) -> usize {
    static SEED: AtomicU64 = AtomicU64::new(0);
    thread_local! {
        static CURSOR: Cell<u64> =
            Cell::new(SEED.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed));
    }

    CURSOR.with(|c| {
        let val = c.get();
        c.set(val.wrapping_add(1));
        (val % shards as u64) as usize
    })
}

/// Counter keyed by an arbitrary name, backed by shard documents.
pub struct ShardedCounter {
    store: Arc<dyn DocumentStore>,
    config: CounterConfig,
    /// Allocations already confirmed in the store. They never change once
    /// written, so caching them saves a read on every write.
    allocations: DashMap<String, usize>,
    metrics: Arc<CounterMetrics>,
}

impl ShardedCounter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: CounterConfig,
        metrics: Arc<CounterMetrics>,
    ) -> Self {
        Self {
            store,
            config,
            allocations: DashMap::new(),
            metrics,
        }
    }

    /// Shard count a new name would be allocated with.
    pub fn shards_for(&self, name: &str) -> usize {
        self.config.shards_for(name).clamp(1, MAX_SHARDS)
    }

    /// Shard count the name actually has, or `None` if it was never written.
    pub fn allocation(&self, name: &str) -> CountsResult<Option<usize>> {
        if let Some(shards) = self.allocations.get(name) {
            return Ok(Some(*shards));
        }
        let Some(doc) = self.store.get(ALLOCATIONS, name)? else {
            return Ok(None);
        };
        let allocation: Allocation = from_document(&doc)?;
        self.allocations
            .insert(name.to_string(), allocation.shards);
        Ok(Some(allocation.shards))
    }

    /// Allocate shards for `name` if this is its first write. First write wins:
    /// a later configuration change does not alter an existing allocation.
    fn allocate(&self, name: &str) -> CountsResult<usize> {
        if let Some(shards) = self.allocation(name)? {
            return Ok(shards);
        }

        let wanted = self.shards_for(name);
        let doc = to_document(&Allocation {
            name: name.to_string(),
            shards: wanted,
        })?;
        let mut doc = Some(doc);
        let previous = self.store.update(ALLOCATIONS, name, &mut |current| {
            Ok(match current {
                Some(_) => Mutation::Keep,
                None => doc.take().map(Mutation::Put).unwrap_or(Mutation::Keep),
            })
        })?;

        let shards = match previous {
            Some(existing) => from_document::<Allocation>(&existing)?.shards,
            None => {
                self.metrics.record_allocation(name, wanted);
                wanted
            }
        };
        self.allocations.insert(name.to_string(), shards);
        Ok(shards)
    }

    fn apply(&self, name: &str, delta: i64) -> CountsResult<usize> {
        if name.is_empty() {
            return Err(CountsError::InvalidArgument(
                "counter name cannot be empty".into(),
            ));
        }

        let shards = self.allocate(name)?;
        let index = next_shard(shards);
        let id = shard_id(name, index);

        self.store.update(SHARDS, &id, &mut |current| {
            let value = match current {
                Some(doc) => from_document::<Shard>(doc)?.value,
                None => 0,
            };
            let value = value.checked_add(delta).ok_or_else(|| {
                CountsError::InvalidArgument(format!("counter {} overflowed", name))
            })?;
            Ok(Mutation::Put(to_document(&Shard {
                name: name.to_string(),
                shard: index,
                value,
            })?))
        })?;

        Ok(index)
    }

    pub fn increment(&self, name: &str) -> CountsResult<()> {
        self.increment_by(name, 1)
    }

    pub fn increment_by(&self, name: &str, amount: u64) -> CountsResult<()> {
        let delta = i64::try_from(amount)
            .map_err(|_| CountsError::InvalidArgument(format!("amount {} too large", amount)))?;
        let shard = self.apply(name, delta)?;
        self.metrics.record_increment(name, shard);
        Ok(())
    }

    pub fn decrement(&self, name: &str) -> CountsResult<()> {
        self.decrement_by(name, 1)
    }

    /// Subtract from one shard. Nothing stops the total going below zero here;
    /// a negative total is reported by [`ShardedCounter::count`].
    pub fn decrement_by(&self, name: &str, amount: u64) -> CountsResult<()> {
        let delta = i64::try_from(amount)
            .map_err(|_| CountsError::InvalidArgument(format!("amount {} too large", amount)))?;
        let shard = self.apply(name, -delta)?;
        self.metrics.record_decrement(name, shard);
        Ok(())
    }

    /// Signed adjustment, used by backfill to move a total onto its target.
    pub fn add(&self, name: &str, delta: i64) -> CountsResult<()> {
        if delta == 0 {
            return Ok(());
        }
        self.apply(name, delta)?;
        Ok(())
    }

    /// Values of every shard, in shard order. Empty for unseen names.
    pub fn shard_values(&self, name: &str) -> CountsResult<Vec<i64>> {
        let Some(shards) = self.allocation(name)? else {
            return Ok(Vec::new());
        };

        let mut values = Vec::with_capacity(shards);
        for index in 0..shards {
            let value = match self.store.get(SHARDS, &shard_id(name, index))? {
                Some(doc) => from_document::<Shard>(&doc)?.value,
                None => 0,
            };
            values.push(value);
        }
        self.metrics.record_read(shards);
        Ok(values)
    }

    /// Sum of every shard. Returns 0 for a name that was never written.
    ///
    /// A negative total means some decrement had no matching increment. It is
    /// returned as-is and logged; debug builds assert.
    pub fn count(&self, name: &str) -> CountsResult<i64> {
        let total: i64 = self.shard_values(name)?.iter().sum();
        if total < 0 {
            self.metrics.record_negative_total();
            error!(
                drift = true,
                counter = name,
                total = total,
                "Sharded counter total is negative"
            );
            debug_assert!(total >= 0, "counter {} has negative total {}", name, total);
        }
        Ok(total)
    }

    /// Zero every shard of `name`. Each shard is zeroed independently.
    pub fn reset(&self, name: &str) -> CountsResult<()> {
        let Some(shards) = self.allocation(name)? else {
            return Ok(());
        };

        for index in 0..shards {
            self.store
                .update(SHARDS, &shard_id(name, index), &mut |current| {
                    let Some(doc) = current else {
                        return Ok(Mutation::Keep);
                    };
                    let mut shard: Shard = from_document(doc)?;
                    if shard.value == 0 {
                        return Ok(Mutation::Keep);
                    }
                    shard.value = 0;
                    Ok(Mutation::Put(to_document(&shard)?))
                })?;
        }

        self.metrics.record_reset(name);
        debug!(counter = name, shards = shards, "Counter reset");
        Ok(())
    }
}
