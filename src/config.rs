//! Typed configuration, in the same builder-pattern spirit as the teacher's
//! `CacheSystemBuilder`, but expressed as plain structs rather than a
//! free-form map since Rust's type system makes a JS-style
//! `{ name: [...] | {...} }` union awkward.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry_queue::RetryQueueConfig;
use std::time::Duration;

#[derive(Clone)]
pub enum StoreDrivers {
    /// Plain list of driver names, resolved against the manager's registered
    /// drivers (mirrors spec.md's `[driverName, ...]` shorthand).
    Named(Vec<String>),
    /// Explicit per-layer configuration when uniform defaults aren't enough.
    Explicit(Vec<LayerConfig>),
}

#[derive(Clone)]
pub struct LayerConfig {
    pub driver: String,
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Clone)]
pub struct StoreConfig {
    pub drivers: StoreDrivers,
    pub stale_time: Duration,
    pub gc_time: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            drivers: StoreDrivers::Named(Vec::new()),
            stale_time: Duration::from_secs(60),
            gc_time: Duration::from_secs(300),
        }
    }
}

#[derive(Default, Clone)]
pub struct CacheManagerConfig {
    pub stores: Vec<(String, StoreConfig)>,
    pub default_store: Option<String>,
}

impl CacheManagerConfig {
    pub fn with_store(mut self, name: impl Into<String>, config: StoreConfig) -> Self {
        self.stores.push((name.into(), config));
        self
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default_store = Some(name.into());
        self
    }
}

#[derive(Clone)]
pub struct BusConfig {
    pub channel_prefix: String,
    pub compression_threshold_bytes: usize,
    pub integrity_key: Option<Vec<u8>>,
    pub retry: Option<RetryQueueConfig>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "cache".to_string(),
            compression_threshold_bytes: 1024,
            integrity_key: None,
            retry: Some(RetryQueueConfig::default()),
        }
    }
}
