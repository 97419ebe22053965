//! Named caches plus optional cross-instance invalidation backplane.
//!
//! Grounded on `cache_manager.rs`'s `CacheManagerInner` (multiple named
//! tiers wrapped in one facade) and `start_invalidation_subscriber` (wiring
//! handler closures per message variant). `CacheStack` itself never
//! publishes anything — only `CacheManager`'s public mutation methods do,
//! after the local write/delete has already completed. The backplane
//! subscriber drains only L1 on receipt (via `Cache::delete_l1`/`clear_l1`)
//! since the publisher already drained every layer locally before
//! publishing; tag invalidation on receipt still runs the full
//! `invalidate_tags` because the TagIndex is per-instance and peers have no
//! other way to learn which of their own keys carry the tag. Never
//! republishing on receipt keeps this from looping back to the publisher
//! (see `DESIGN.md`'s Open Question 1).

use crate::backplane::{ClearMessage, InvalidateMessage, InvalidateTagsMessage};
use crate::cache::Cache;
use crate::codecs::JsonCodec;
use crate::config::CacheManagerConfig;
use crate::error::ConfigError;
use crate::message_bus::MessageBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct CacheManager {
    caches: HashMap<String, Arc<Cache>>,
    default_store: String,
    bus: Option<MessageBus<JsonCodec>>,
    channel_prefix: String,
}

impl CacheManager {
    pub fn new(
        caches: HashMap<String, Arc<Cache>>,
        config: &CacheManagerConfig,
    ) -> Result<Self, ConfigError> {
        let default_store = config
            .default_store
            .clone()
            .or_else(|| {
                if caches.len() == 1 {
                    caches.keys().next().cloned()
                } else {
                    None
                }
            })
            .ok_or(ConfigError::MissingDefaultStore)?;

        Ok(Self {
            caches,
            default_store,
            bus: None,
            channel_prefix: "cache".to_string(),
        })
    }

    pub fn with_backplane(mut self, bus: MessageBus<JsonCodec>, channel_prefix: impl Into<String>) -> Self {
        self.bus = Some(bus);
        self.channel_prefix = channel_prefix.into();
        self
    }

    pub fn store(&self, name: &str) -> Option<Arc<Cache>> {
        self.caches.get(name).cloned()
    }

    pub fn default(&self) -> Arc<Cache> {
        self.caches
            .get(&self.default_store)
            .expect("default_store always refers to a registered cache")
            .clone()
    }

    fn invalidate_channel(&self) -> String {
        format!("{}:invalidate", self.channel_prefix)
    }

    fn invalidate_tags_channel(&self) -> String {
        format!("{}:invalidate:tags", self.channel_prefix)
    }

    fn clear_channel(&self) -> String {
        format!("{}:clear", self.channel_prefix)
    }

    /// Subscribes to all three backplane channels, routing each message
    /// straight into the named cache's L1 — never back through this
    /// manager's publish-then-publish-again path.
    pub async fn connect_backplane(self: &Arc<Self>) -> anyhow::Result<()> {
        let Some(bus) = self.bus.clone() else { return Ok(()) };

        let manager = self.clone();
        bus.subscribe::<InvalidateMessage, _, _>(&self.invalidate_channel(), move |msg| {
            let manager = manager.clone();
            async move {
                if let Some(cache) = manager.store(&msg.store) {
                    cache.delete_l1(&msg.keys).await;
                } else {
                    warn!(store = %msg.store, "backplane invalidate for unknown store");
                }
                Ok(())
            }
        })
        .await?;

        let manager = self.clone();
        bus.subscribe::<InvalidateTagsMessage, _, _>(&self.invalidate_tags_channel(), move |msg| {
            let manager = manager.clone();
            async move {
                if let Some(cache) = manager.store(&msg.store) {
                    cache.invalidate_tags(&msg.tags).await;
                } else {
                    warn!(store = %msg.store, "backplane tag invalidation for unknown store");
                }
                Ok(())
            }
        })
        .await?;

        let manager = self.clone();
        bus.subscribe::<ClearMessage, _, _>(&self.clear_channel(), move |msg| {
            let manager = manager.clone();
            async move {
                if let Some(cache) = manager.store(&msg.store) {
                    cache.clear_l1().await;
                } else {
                    warn!(store = %msg.store, "backplane clear for unknown store");
                }
                Ok(())
            }
        })
        .await?;

        info!("cache manager subscribed to backplane channels");
        Ok(())
    }

    /// Delete from every layer of the named store's cache, then tell peers
    /// to drain it from their own L1.
    pub async fn delete(&self, store: &str, keys: &[String]) -> anyhow::Result<usize> {
        let cache = self.store(store).ok_or_else(|| ConfigError::UnknownDriver(store.to_string()))?;
        let count = cache.delete(keys).await;
        if let Some(bus) = &self.bus {
            let msg = InvalidateMessage { store: store.to_string(), keys: keys.to_vec() };
            if let Err(e) = bus.publish(&self.invalidate_channel(), &msg).await {
                warn!(error = %e, "failed to publish backplane invalidation");
            }
        }
        Ok(count)
    }

    pub async fn invalidate_tags(&self, store: &str, tags: &[String]) -> anyhow::Result<usize> {
        let cache = self.store(store).ok_or_else(|| ConfigError::UnknownDriver(store.to_string()))?;
        let count = cache.invalidate_tags(tags).await;
        if let Some(bus) = &self.bus {
            let msg = InvalidateTagsMessage { store: store.to_string(), tags: tags.to_vec() };
            if let Err(e) = bus.publish(&self.invalidate_tags_channel(), &msg).await {
                warn!(error = %e, "failed to publish backplane tag invalidation");
            }
        }
        Ok(count)
    }

    pub async fn clear(&self, store: &str) -> anyhow::Result<()> {
        let cache = self.store(store).ok_or_else(|| ConfigError::UnknownDriver(store.to_string()))?;
        cache.clear().await;
        if let Some(bus) = &self.bus {
            let msg = ClearMessage { store: store.to_string() };
            if let Err(e) = bus.publish(&self.clear_channel(), &msg).await {
                warn!(error = %e, "failed to publish backplane clear");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_stack::CacheStack;
    use crate::drivers::MemoryDriver;
    use crate::tag_index::TagIndex;
    use crate::transport::{MemoryTransport, Transport};

    async fn one_cache_manager() -> (Arc<CacheManager>, Arc<Cache>) {
        let l1 = Arc::new(MemoryDriver::new());
        let stack = Arc::new(CacheStack::new(l1, Vec::new(), Arc::new(TagIndex::new())));
        let cache = Arc::new(Cache::new(stack));
        let mut caches = HashMap::new();
        caches.insert("default".to_string(), cache.clone());
        let manager = Arc::new(
            CacheManager::new(caches, &CacheManagerConfig::default().with_default("default")).unwrap(),
        );
        (manager, cache)
    }

    #[tokio::test]
    async fn delete_without_a_backplane_just_deletes_locally() {
        let (manager, cache) = one_cache_manager().await;
        let opts = crate::cache::GetOrSetOptions::default();
        cache.set("k", 1u32, &opts).await.unwrap();
        let count = manager.delete("default", &["k".to_string()]).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(cache.get::<u32>("k").await, None);
    }

    #[tokio::test]
    async fn backplane_delete_receipt_only_drains_l1_on_the_peer() {
        use crate::cache_stack::Layer;
        use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
        use crate::driver::L2Driver;

        let transport = Arc::new(MemoryTransport::new());
        transport.connect().await.unwrap();
        let bus = MessageBus::new(transport, JsonCodec);

        let l1 = Arc::new(MemoryDriver::new());
        let l2: Arc<dyn L2Driver> = Arc::new(MemoryDriver::new());
        let layer = Layer { driver: l2, breaker: CircuitBreaker::new(CircuitBreakerConfig::default()) };
        let stack = Arc::new(CacheStack::new(l1, vec![layer], Arc::new(TagIndex::new())));
        let cache = Arc::new(Cache::new(stack));
        let opts = crate::cache::GetOrSetOptions::default();
        cache.set("k", 1u32, &opts).await.unwrap();

        let mut caches = HashMap::new();
        caches.insert("default".to_string(), cache.clone());
        let manager = Arc::new(
            CacheManager::new(caches, &CacheManagerConfig::default().with_default("default"))
                .unwrap()
                .with_backplane(bus, "cache"),
        );
        manager.connect_backplane().await.unwrap();

        manager.delete("default", &["k".to_string()]).await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // The publisher's own `delete` already drained L1 and L2 locally;
        // the receipt handler re-draining L1 is a harmless no-op here, not
        // a second publish (no publish loop).
        assert_eq!(cache.get::<u32>("k").await, None);
    }
}
