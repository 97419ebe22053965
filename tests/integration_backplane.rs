mod common;

use std::sync::Arc;
use tiercache_bus::cache::GetOrSetOptions;
use tiercache_bus::codecs::JsonCodec;
use tiercache_bus::message_bus::MessageBus;
use tiercache_bus::transport::{MemoryTransport, Transport};

/// Two cache managers sharing one in-process transport, simulating two
/// instances talking over the same backplane.
#[tokio::test]
async fn invalidation_on_one_peer_converges_to_the_other() {
    let transport = Arc::new(MemoryTransport::new());
    transport.connect().await.unwrap();

    let bus_a = MessageBus::new(transport.clone(), JsonCodec);
    let bus_b = MessageBus::new(transport.clone(), JsonCodec);

    let cache_a = common::single_tier_cache();
    let cache_b = common::single_tier_cache();

    let mut caches_a = std::collections::HashMap::new();
    caches_a.insert("default".to_string(), cache_a.clone());
    let manager_a = Arc::new(
        tiercache_bus::cache_manager::CacheManager::new(
            caches_a,
            &tiercache_bus::config::CacheManagerConfig::default().with_default("default"),
        )
        .unwrap()
        .with_backplane(bus_a, "cache"),
    );

    let mut caches_b = std::collections::HashMap::new();
    caches_b.insert("default".to_string(), cache_b.clone());
    let manager_b = Arc::new(
        tiercache_bus::cache_manager::CacheManager::new(
            caches_b,
            &tiercache_bus::config::CacheManagerConfig::default().with_default("default"),
        )
        .unwrap()
        .with_backplane(bus_b, "cache"),
    );

    manager_a.connect_backplane().await.unwrap();
    manager_b.connect_backplane().await.unwrap();

    let opts = GetOrSetOptions::default();
    cache_a.set("shared-key", 1u32, &opts).await.unwrap();
    cache_b.set("shared-key", 1u32, &opts).await.unwrap();

    manager_a.delete("default", &["shared-key".to_string()]).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(cache_a.get::<u32>("shared-key").await, None);
    assert_eq!(cache_b.get::<u32>("shared-key").await, None, "peer should converge via backplane");
}
