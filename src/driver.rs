//! L1/L2 cache backend boundary.
//!
//! Standardized on `Vec<u8>` payloads end to end. The teacher's own repo
//! disagreed with itself here — `traits.rs`'s `CacheBackend` declared
//! `Vec<u8>`, but `backends/moka_cache.rs` actually implemented it over
//! `serde_json::Value` — so this is a deliberate fix, not a new design.

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Driver: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, keys: &[String]) -> anyhow::Result<usize>;
    async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
    async fn clear(&self) -> anyhow::Result<()>;
    async fn health_check(&self) -> bool;
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Extends [`Driver`] with the connection lifecycle and TTL introspection a
/// remote (L2+) backend needs, grounded on `traits.rs`'s `L2CacheBackend`.
#[async_trait]
pub trait L2Driver: Driver {
    async fn connect(&self) -> anyhow::Result<()>;
    async fn disconnect(&self) -> anyhow::Result<()>;
    async fn get_with_ttl(&self, key: &str) -> Option<(Vec<u8>, Option<Duration>)>;
    /// Pattern-based key scan, grounded on the teacher's
    /// `RedisCache::scan_keys`. Not every driver can support this; the
    /// default returns an empty result rather than forcing every backend to
    /// implement glob matching.
    async fn scan_keys(&self, _pattern: &str) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}
