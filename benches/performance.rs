//! Performance benchmarks for manga-counts
//!
//! Run with: cargo bench
//!
//! These benchmarks measure:
//! - Sharded counter increments, single-threaded and contended
//! - Aggregate inserts into one namespace
//! - Range counts over partitions of different sizes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

use manga_counts::aggregate::{AggregateIndex, Bounds, SortKey};
use manga_counts::config::CounterConfig;
use manga_counts::metrics::{AggregateMetrics, CounterMetrics};
use manga_counts::{DocumentStore, MemoryStore, ShardedCounter};

fn create_counter() -> ShardedCounter {
    ShardedCounter::new(
        Arc::new(MemoryStore::new()),
        CounterConfig::default(),
        Arc::new(CounterMetrics::new()),
    )
}

fn create_index(name: &str) -> AggregateIndex {
    AggregateIndex::new(
        name,
        Arc::new(MemoryStore::new()) as Arc<dyn DocumentStore>,
        Arc::new(AggregateMetrics::new()),
    )
}

/// Benchmark counter increments with varying shard counts
fn bench_counter_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_increment");

    for shards in [1usize, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::new("shards", shards), shards, |b, &shards| {
            let mut config = CounterConfig::default();
            config.shards.insert("bench".to_string(), shards);
            let counter = ShardedCounter::new(
                Arc::new(MemoryStore::new()),
                config,
                Arc::new(CounterMetrics::new()),
            );
            b.iter(|| counter.increment(black_box("bench")).unwrap());
        });
    }

    group.finish();
}

/// Benchmark contended increments from several threads
fn bench_counter_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_contended");
    let per_thread = 250;

    for threads in [2usize, 8].iter() {
        group.throughput(Throughput::Elements((threads * per_thread) as u64));
        group.bench_with_input(
            BenchmarkId::new("threads", threads),
            threads,
            |b, &threads| {
                let counter = Arc::new(create_counter());
                b.iter(|| {
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let counter = Arc::clone(&counter);
                            thread::spawn(move || {
                                for _ in 0..per_thread {
                                    counter.increment("pages").unwrap();
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_counter_read(c: &mut Criterion) {
    let counter = create_counter();
    for _ in 0..1000 {
        counter.increment("chapters").unwrap();
    }

    c.bench_function("counter_read_16_shards", |b| {
        b.iter(|| black_box(counter.count("chapters").unwrap()));
    });
}

/// Benchmark inserting chapters into one series namespace
fn bench_aggregate_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_insert");

    for size in [100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("entries", size), size, |b, &size| {
            b.iter(|| {
                let index = create_index("chapters_by_series");
                for i in 0..size {
                    index
                        .insert(&format!("chp_{}", i), Some("srs_1"), SortKey::from(i as i64))
                        .unwrap();
                }
                black_box(index);
            });
        });
    }

    group.finish();
}

/// Benchmark range counts on partitions of increasing size
fn bench_aggregate_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_count");

    for size in [100, 1000, 10000].iter() {
        let index = create_index("timeline");
        for i in 0..*size {
            index
                .insert(&format!("id_{}", i), None, SortKey::from(i as i64))
                .unwrap();
        }
        let bounds = Bounds::at_least(SortKey::from((*size / 2) as i64));

        group.bench_with_input(BenchmarkId::new("entries", size), size, |b, _| {
            b.iter(|| black_box(index.count(None, &bounds).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_counter_increment,
    bench_counter_contended,
    bench_counter_read,
    bench_aggregate_insert,
    bench_aggregate_count
);
criterion_main!(benches);
