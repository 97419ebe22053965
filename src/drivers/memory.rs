//! In-process L1 driver.
//!
//! Grounded on the teacher's `backends/dashmap_cache.rs`, which was already
//! the cleanest, most internally-consistent backend in that repo (unlike
//! `moka_cache.rs`, it never disagreed with `traits.rs` about payload type).
//! Freshness is owned centrally by `entry::Entry`/`CacheStack` now, so this
//! driver stays a dumb byte store with its own TTL only as a backstop against
//! unbounded growth, not as the source of truth for staleness.

use crate::driver::Driver;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Slot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct MemoryDriver {
    map: DashMap<String, Slot>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop entries whose backstop TTL has elapsed. Callers with their own
    /// eviction loop (e.g. `CacheStack`) can invoke this periodically; it is
    /// not run implicitly on every operation to keep `get`/`set` O(1).
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.map
            .retain(|_, slot| slot.expires_at.is_none_or(|at| at > now));
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let slot = self.map.get(key)?;
        if slot.expires_at.is_some_and(|at| at <= Instant::now()) {
            drop(slot);
            self.map.remove(key);
            return None;
        }
        Some(slot.value.clone())
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        let expires_at = if ttl.is_zero() { None } else { Some(Instant::now() + ttl) };
        self.map.insert(
            key.to_string(),
            Slot {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> anyhow::Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.map.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.map.clear();
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// `MemoryDriver` also works as a dependency-free L2 layer (e.g. in tests or
/// single-process deployments that still want the tiered-lookup/backfill
/// machinery), mirroring how the teacher ships `DashMapCache` as a
/// reference backend usable at either tier.
#[async_trait]
impl crate::driver::L2Driver for MemoryDriver {
    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_with_ttl(&self, key: &str) -> Option<(Vec<u8>, Option<Duration>)> {
        let slot = self.map.get(key)?;
        let remaining = slot.expires_at.map(|at| at.saturating_duration_since(Instant::now()));
        Some((slot.value.clone(), remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let d = MemoryDriver::new();
        d.set("k", b"v", Duration::from_secs(10)).await.unwrap();
        assert_eq!(d.get("k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn zero_ttl_means_no_expiry() {
        let d = MemoryDriver::new();
        d.set("k", b"v", Duration::ZERO).await.unwrap();
        assert_eq!(d.get("k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn delete_reports_count_of_keys_actually_removed() {
        let d = MemoryDriver::new();
        d.set("a", b"1", Duration::from_secs(10)).await.unwrap();
        let removed = d
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
