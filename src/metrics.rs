use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, trace};

/// Metrics for sharded counter operations
#[derive(Debug, Default)]
pub struct CounterMetrics {
    /// Total number of increment calls
    pub increments: AtomicU64,
    /// Total number of decrement calls
    pub decrements: AtomicU64,
    /// Total number of reset calls
    pub resets: AtomicU64,
    /// Total number of count reads
    pub reads: AtomicU64,
    /// Shard documents read while serving counts
    pub shard_reads: AtomicU64,
    /// Counter names allocated for the first time
    pub allocations: AtomicU64,
    /// Count reads that observed a negative total
    pub negative_totals: AtomicU64,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_increment(&self, name: &str, shard: usize) {
        self.increments.fetch_add(1, Ordering::Relaxed);
        trace!(counter_op = "increment", name = name, shard = shard);
    }

    pub fn record_decrement(&self, name: &str, shard: usize) {
        self.decrements.fetch_add(1, Ordering::Relaxed);
        trace!(counter_op = "decrement", name = name, shard = shard);
    }

    pub fn record_reset(&self, name: &str) {
        self.resets.fetch_add(1, Ordering::Relaxed);
        trace!(counter_op = "reset", name = name);
    }

    pub fn record_read(&self, shards: usize) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.shard_reads.fetch_add(shards as u64, Ordering::Relaxed);
    }

    pub fn record_allocation(&self, name: &str, shards: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        trace!(counter_op = "allocate", name = name, shards = shards);
    }

    pub fn record_negative_total(&self) {
        self.negative_totals.fetch_add(1, Ordering::Relaxed);
    }

    /// Average number of shard documents read per count
    pub fn avg_shards_per_read(&self) -> f64 {
        let reads = self.reads.load(Ordering::Relaxed);
        if reads == 0 {
            return 0.0;
        }
        self.shard_reads.load(Ordering::Relaxed) as f64 / reads as f64
    }

    /// Log a summary of counter metrics
    pub fn log_summary(&self) {
        info!(
            operation = "counter_metrics_summary",
            increments = self.increments.load(Ordering::Relaxed),
            decrements = self.decrements.load(Ordering::Relaxed),
            resets = self.resets.load(Ordering::Relaxed),
            reads = self.reads.load(Ordering::Relaxed),
            avg_shards_per_read = self.avg_shards_per_read(),
            allocations = self.allocations.load(Ordering::Relaxed),
            negative_totals = self.negative_totals.load(Ordering::Relaxed),
        );
    }
}

/// Metrics for aggregate index operations
#[derive(Debug, Default)]
pub struct AggregateMetrics {
    pub inserts: AtomicU64,
    /// insert_if_not_exists calls that found the entry already present
    pub insert_skips: AtomicU64,
    pub deletes: AtomicU64,
    pub replaces: AtomicU64,
    pub counts: AtomicU64,
    /// Partitions found missing an entry that its location document recorded
    pub partition_heals: AtomicU64,
}

impl AggregateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&self, aggregate: &str) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        trace!(aggregate_op = "insert", aggregate = aggregate);
    }

    pub fn record_insert_skip(&self, aggregate: &str) {
        self.insert_skips.fetch_add(1, Ordering::Relaxed);
        trace!(aggregate_op = "insert_skip", aggregate = aggregate);
    }

    pub fn record_delete(&self, aggregate: &str) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        trace!(aggregate_op = "delete", aggregate = aggregate);
    }

    pub fn record_replace(&self, aggregate: &str) {
        self.replaces.fetch_add(1, Ordering::Relaxed);
        trace!(aggregate_op = "replace", aggregate = aggregate);
    }

    pub fn record_count(&self) {
        self.counts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partition_heal(&self) {
        self.partition_heals.fetch_add(1, Ordering::Relaxed);
    }

    /// Log a summary of aggregate metrics
    pub fn log_summary(&self) {
        info!(
            operation = "aggregate_metrics_summary",
            inserts = self.inserts.load(Ordering::Relaxed),
            insert_skips = self.insert_skips.load(Ordering::Relaxed),
            deletes = self.deletes.load(Ordering::Relaxed),
            replaces = self.replaces.load(Ordering::Relaxed),
            counts = self.counts.load(Ordering::Relaxed),
            partition_heals = self.partition_heals.load(Ordering::Relaxed),
        );
    }
}

/// Combined metrics for the counting layer
pub struct Metrics {
    pub counters: Arc<CounterMetrics>,
    pub aggregates: Arc<AggregateMetrics>,
    /// Mutations whose document write and counting update diverged
    pub drift_events: AtomicU64,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(CounterMetrics::new()),
            aggregates: Arc::new(AggregateMetrics::new()),
            drift_events: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a drift event. Logged at error level so it stands out; the
    /// counting state stays wrong until the next backfill.
    pub fn record_drift(&self, operation: &str, entity: &str, reason: &str) {
        self.drift_events.fetch_add(1, Ordering::Relaxed);
        error!(
            drift = true,
            operation = operation,
            entity = entity,
            reason = reason,
            "Counting state diverged from documents, run backfill to repair"
        );
    }

    pub fn drift_count(&self) -> u64 {
        self.drift_events.load(Ordering::Relaxed)
    }

    /// Log a complete metrics summary
    pub fn log_full_summary(&self) {
        info!(
            operation = "metrics_summary",
            uptime_secs = self.elapsed().as_secs_f64(),
            drift_events = self.drift_count(),
        );
        self.counters.log_summary();
        self.aggregates.log_summary();
    }

    /// Get elapsed time since metrics creation
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_metrics() {
        let metrics = CounterMetrics::new();

        metrics.record_increment("users", 0);
        metrics.record_increment("users", 1);
        metrics.record_decrement("users", 2);
        metrics.record_reset("c1");
        metrics.record_read(8);
        metrics.record_read(4);

        assert_eq!(metrics.increments.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.decrements.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.resets.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.avg_shards_per_read(), 6.0);
    }

    #[test]
    fn test_avg_shards_without_reads() {
        assert_eq!(CounterMetrics::new().avg_shards_per_read(), 0.0);
    }

    #[test]
    fn test_aggregate_metrics() {
        let metrics = AggregateMetrics::new();

        metrics.record_insert("chapters_by_series");
        metrics.record_insert_skip("chapters_by_series");
        metrics.record_replace("chapters_by_series");
        metrics.record_delete("chapters_by_series");
        metrics.record_partition_heal();

        assert_eq!(metrics.inserts.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.insert_skips.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.replaces.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.deletes.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.partition_heals.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_drift_events() {
        let metrics = Metrics::new();
        assert_eq!(metrics.drift_count(), 0);

        metrics.record_drift("create_chapter", "c1", "aggregate insert failed");
        assert_eq!(metrics.drift_count(), 1);
    }
}
