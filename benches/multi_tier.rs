//! Backfill cost when an L2 layer answers and L1 is empty, adapted from the
//! teacher's `multi_tier` bench.

use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tiercache_bus::cache_stack::{CacheStack, Layer};
use tiercache_bus::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use tiercache_bus::drivers::MemoryDriver;
use tiercache_bus::driver::Driver;
use tiercache_bus::entry::Entry;
use tiercache_bus::tag_index::TagIndex;
use std::time::Duration;

fn bench_backfill(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let stack = rt.block_on(async {
        let l1 = Arc::new(MemoryDriver::new());
        let l2_driver = Arc::new(MemoryDriver::new());
        let entry = Entry::new(99u32, 0, 60_000, 300_000, vec![]);
        let bytes = serde_json::to_vec(&entry).unwrap();
        l2_driver.set("tier:key", &bytes, Duration::from_secs(300)).await.unwrap();

        let layer = Layer {
            driver: l2_driver,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
        };
        Arc::new(CacheStack::new(l1, vec![layer], Arc::new(TagIndex::new())))
    });

    c.bench_function("multi_tier_backfill", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = stack.get::<u32>("tier:key").await;
        });
    });
}

criterion_group!(benches, bench_backfill);
criterion_main!(benches);
