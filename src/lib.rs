//! Tiered cache engine fused with a typed pub/sub message bus that doubles
//! as the cache's cross-instance invalidation backplane.
//!
//! - L1 (in-process) + N remote L2 layers, each gated by its own circuit
//!   breaker, with stale-while-revalidate reads and tag-based invalidation.
//! - A codec + transport + middleware message bus (compression, HMAC
//!   integrity, retry-with-DLQ) that the cache manager rides to keep every
//!   peer's L1 coherent.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::collections::HashMap;
//! use tiercache_bus::{Cache, CacheStack, CacheManager, GetOrSetOptions};
//! use tiercache_bus::drivers::MemoryDriver;
//! use tiercache_bus::tag_index::TagIndex;
//! use tiercache_bus::config::CacheManagerConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let l1 = Arc::new(MemoryDriver::new());
//! let stack = Arc::new(CacheStack::new(l1, Vec::new(), Arc::new(TagIndex::new())));
//! let cache = Arc::new(Cache::new(stack));
//!
//! let mut stores = HashMap::new();
//! stores.insert("default".to_string(), cache.clone());
//! let manager = Arc::new(CacheManager::new(
//!     stores,
//!     &CacheManagerConfig::default().with_default("default"),
//! )?);
//!
//! let opts = GetOrSetOptions::default();
//! cache.set("user:1", serde_json::json!({"name": "Ada"}), &opts).await?;
//! let _ = manager.delete("default", &["user:1".to_string()]).await?;
//! # Ok(())
//! # }
//! ```

pub mod backplane;
pub mod builder;
pub mod cache;
pub mod cache_manager;
pub mod cache_stack;
pub mod circuit_breaker;
pub mod codecs;
pub mod config;
pub mod dedup;
pub mod driver;
pub mod drivers;
pub mod entry;
pub mod error;
pub mod message_bus;
pub mod middleware;
pub mod retry_queue;
pub mod tag_index;
pub mod transport;

pub use builder::CacheSystemBuilder;
pub use cache::{Cache, CacheEvents, GetOrSetOptions};
pub use cache_manager::CacheManager;
pub use cache_stack::{CacheStack, Layer};
pub use driver::{Driver, L2Driver};
pub use entry::Entry;
pub use error::{CacheError, CodecError, ConfigError, TransportError};
pub use message_bus::MessageBus;

pub use async_trait::async_trait;
