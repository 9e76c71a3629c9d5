//! Cache Operation Benchmarks
//!
//! Measures the hot paths of the tag-aware cache:
//! - Reads of ready and lazily computed entries
//! - Inserts that bind tags
//! - Tag invalidation of populated groups
//! - Async single-flight loads
//!
//! Uses criterion.rs for statistical analysis with warm-up runs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use tagcache_core::cache::{CacheConfig, Expiration, TagCache};
use tokio::runtime::Runtime;

fn cache() -> TagCache<u64> {
    TagCache::with_config(CacheConfig::new(Duration::from_secs(3600))).unwrap()
}

fn ttl() -> Expiration {
    Expiration::Sliding(Duration::from_secs(600))
}

fn bench_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("reads");
    let cache = cache();
    for key in 0..1_000u64 {
        cache.add(key, &[], ttl(), key * 2).unwrap();
    }

    group.throughput(Throughput::Elements(1));
    group.bench_function("try_get_hit", |b| {
        let mut key = 0u64;
        b.iter(|| {
            key = (key + 1) % 1_000;
            black_box(cache.try_get::<u64>(&key).unwrap())
        })
    });

    group.bench_function("try_get_miss", |b| {
        b.iter(|| black_box(cache.try_get::<u64>(&u64::MAX).unwrap()))
    });

    group.bench_function("get_or_add_hit", |b| {
        b.iter(|| black_box(cache.get_or_add(7, &[], ttl(), || Ok(0u64)).unwrap()))
    });

    group.finish();
}

fn bench_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("inserts");

    for tag_count in [0usize, 1, 4] {
        let tags: Vec<String> = (0..tag_count).map(|i| format!("tag-{}", i)).collect();
        let cache = cache();
        group.bench_with_input(BenchmarkId::new("add", tag_count), &tags, |b, tags| {
            let mut key = 0u64;
            b.iter(|| {
                key = (key + 1) % 10_000;
                cache.add(key, tags, ttl(), key).unwrap();
            })
        });
    }

    group.finish();
}

fn bench_tag_invalidation(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_invalidation");

    for size in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("remove_by_tag", size), &size, |b, &size| {
            let cache = cache();
            let tag = vec!["group".to_string()];
            b.iter(|| {
                for key in 0..size {
                    cache.add(key, &tag, ttl(), key).unwrap();
                }
                cache.remove_by_tag(&tag[0]);
            })
        });
    }

    group.finish();
}

fn bench_async_loads(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("async_loads");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("get_or_add_async_fresh", |b| {
        b.to_async(&rt).iter(|| async {
            let cache = cache();
            let mut handles = Vec::new();
            for _ in 0..16 {
                let cache = cache.clone();
                handles.push(tokio::spawn(async move {
                    cache
                        .get_or_add_async(1, &[], ttl(), || async { Ok(42u64) })
                        .await
                        .unwrap()
                }));
            }
            for handle in handles {
                black_box(handle.await.unwrap());
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_reads,
    bench_inserts,
    bench_tag_invalidation,
    bench_async_loads
);
criterion_main!(benches);
