//! Shared test fixtures: in-memory drivers/transports so the suite never
//! needs a live Redis instance, per `SPEC_FULL.md` §1.1.

use std::collections::HashMap;
use std::sync::Arc;
use tiercache_bus::builder::CacheSystemBuilder;
use tiercache_bus::cache::Cache;
use tiercache_bus::cache_manager::CacheManager;
use tiercache_bus::cache_stack::{CacheStack, Layer};
use tiercache_bus::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use tiercache_bus::config::{CacheManagerConfig, LayerConfig, StoreConfig, StoreDrivers};
use tiercache_bus::drivers::MemoryDriver;
use tiercache_bus::driver::L2Driver;
use tiercache_bus::tag_index::TagIndex;

pub fn single_tier_cache() -> Arc<Cache> {
    let l1 = Arc::new(MemoryDriver::new());
    let stack = Arc::new(CacheStack::new(l1, Vec::new(), Arc::new(TagIndex::new())));
    Arc::new(Cache::new(stack))
}

pub fn two_tier_cache() -> Arc<Cache> {
    let l1 = Arc::new(MemoryDriver::new());
    let l2_driver: Arc<dyn L2Driver> = Arc::new(MemoryDriver::new());
    let layer = Layer { driver: l2_driver, breaker: CircuitBreaker::new(CircuitBreakerConfig::default()) };
    let stack = Arc::new(CacheStack::new(l1, vec![layer], Arc::new(TagIndex::new())));
    Arc::new(Cache::new(stack))
}

pub fn manager_with_one_store(cache: Arc<Cache>) -> Arc<CacheManager> {
    let mut caches = HashMap::new();
    caches.insert("default".to_string(), cache);
    Arc::new(CacheManager::new(caches, &CacheManagerConfig::default().with_default("default")).unwrap())
}

pub fn build_via_registry(l2_name: &str) -> HashMap<String, Arc<Cache>> {
    let l2: Arc<dyn L2Driver> = Arc::new(MemoryDriver::new());
    let config = CacheManagerConfig::default().with_store(
        "default",
        StoreConfig {
            drivers: StoreDrivers::Explicit(vec![LayerConfig {
                driver: l2_name.to_string(),
                circuit_breaker: CircuitBreakerConfig::default(),
            }]),
            ..StoreConfig::default()
        },
    );
    CacheSystemBuilder::new(config)
        .with_l2(l2_name, l2)
        .build()
        .unwrap()
}
