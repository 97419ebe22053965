//! Assembles concrete `CacheStack`/`Cache` instances from a
//! `CacheManagerConfig` and a registry of named drivers.
//!
//! Grounded on the teacher's `CacheSystemBuilder` (`with_l1`/`with_l2`/
//! `with_tier`/`build()`), generalized from "exactly one L1 + one L2" into
//! "one L1 driver plus an arbitrary ordered list of L2 drivers resolved by
//! name", and from `println!`-based status reporting to `tracing`.

use crate::cache::Cache;
use crate::cache_stack::{CacheStack, Layer};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{CacheManagerConfig, LayerConfig, StoreDrivers};
use crate::driver::{Driver, L2Driver};
use crate::error::ConfigError;
use crate::tag_index::TagIndex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct CacheSystemBuilder {
    l1: Option<Arc<dyn Driver>>,
    l2_drivers: HashMap<String, Arc<dyn L2Driver>>,
    config: CacheManagerConfig,
}

impl CacheSystemBuilder {
    pub fn new(config: CacheManagerConfig) -> Self {
        Self { l1: None, l2_drivers: HashMap::new(), config }
    }

    pub fn with_l1(mut self, driver: Arc<dyn Driver>) -> Self {
        self.l1 = Some(driver);
        self
    }

    pub fn with_l2(mut self, name: impl Into<String>, driver: Arc<dyn L2Driver>) -> Self {
        self.l2_drivers.insert(name.into(), driver);
        self
    }

    /// Resolves every configured store into a `Cache` backed by a
    /// `CacheStack`, using the shared L1 driver and whichever named L2
    /// drivers each store's config references.
    pub fn build(self) -> Result<HashMap<String, Arc<Cache>>, ConfigError> {
        let l1 = self.l1.unwrap_or_else(|| Arc::new(crate::drivers::MemoryDriver::new()));
        let mut caches = HashMap::new();

        for (name, store) in &self.config.stores {
            let layer_configs = match &store.drivers {
                StoreDrivers::Named(names) => names
                    .iter()
                    .map(|n| LayerConfig {
                        driver: n.clone(),
                        circuit_breaker: crate::circuit_breaker::CircuitBreakerConfig::default(),
                    })
                    .collect::<Vec<_>>(),
                StoreDrivers::Explicit(layers) => layers.clone(),
            };

            let mut layers = Vec::with_capacity(layer_configs.len());
            for lc in layer_configs {
                let driver = self
                    .l2_drivers
                    .get(&lc.driver)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownDriver(lc.driver.clone()))?;
                layers.push(Layer {
                    driver,
                    breaker: CircuitBreaker::new(lc.circuit_breaker),
                });
            }

            let stack = Arc::new(CacheStack::new(l1.clone(), layers, Arc::new(TagIndex::new())));
            info!(store = name, "built cache stack");
            caches.insert(name.clone(), Arc::new(Cache::new(stack)));
        }

        if caches.is_empty() {
            let stack = Arc::new(CacheStack::new(l1, Vec::new(), Arc::new(TagIndex::new())));
            caches.insert("default".to_string(), Arc::new(Cache::new(stack)));
        }

        Ok(caches)
    }
}
