//! Tiered L1 + N-layer-L2 lookup, backfill, and breaker-gated writes.
//!
//! Grounded on `cache_manager.rs`'s `get_multi_tier`/`set_with_strategy`
//! tier-promotion loop, generalized from the teacher's hardcoded L1/L2 pair
//! (plus ad-hoc L3/L4 via `TierConfig`) into an ordered list of L2 layers
//! each gated by its own `CircuitBreaker`.

use crate::circuit_breaker::CircuitBreaker;
use crate::driver::{Driver, L2Driver};
use crate::entry::{Clock, Entry, SystemClock};
use crate::error::{CacheError, LayerError};
use crate::tag_index::SharedTagIndex;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct Layer {
    pub driver: Arc<dyn L2Driver>,
    pub breaker: CircuitBreaker,
}

pub struct GetResult<T> {
    pub entry: Option<Entry<T>>,
    pub source: Option<&'static str>,
    pub graced: bool,
}

pub struct CacheStack {
    l1: Arc<dyn Driver>,
    layers: Arc<Vec<Layer>>,
    tag_index: SharedTagIndex,
    clock: Arc<dyn Clock>,
    prefix: Option<String>,
}

impl CacheStack {
    pub fn new(l1: Arc<dyn Driver>, layers: Vec<Layer>, tag_index: SharedTagIndex) -> Self {
        Self::with_clock(l1, layers, tag_index, Arc::new(SystemClock))
    }

    pub fn with_clock(
        l1: Arc<dyn Driver>,
        layers: Vec<Layer>,
        tag_index: SharedTagIndex,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { l1, layers: Arc::new(layers), tag_index, clock, prefix: None }
    }

    /// Returns a new Stack sharing this one's drivers, TagIndex, and circuit
    /// breakers, with every key prefixed `parent:child`. Namespaces compose:
    /// calling `namespace` again on the result prefixes further.
    pub fn namespace(&self, child: &str) -> Self {
        let prefix = match &self.prefix {
            Some(parent) => format!("{parent}:{child}"),
            None => child.to_string(),
        };
        Self {
            l1: self.l1.clone(),
            layers: self.layers.clone(),
            tag_index: self.tag_index.clone(),
            clock: self.clock.clone(),
            prefix: Some(prefix),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }

    pub async fn get<T>(&self, key: &str) -> GetResult<T>
    where
        T: serde::de::DeserializeOwned + serde::Serialize + Clone + Send + Sync,
    {
        let key = self.namespaced(key);

        if let Some(bytes) = self.l1.get(&key).await {
            if let Ok(entry) = serde_json::from_slice::<Entry<T>>(&bytes) {
                let now = self.clock.now_ms();
                if !entry.is_collected(now) {
                    let graced = entry.is_stale(now);
                    return GetResult { entry: Some(entry), source: Some("l1"), graced };
                }
            }
        }

        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.breaker.is_open() {
                continue;
            }
            match layer.driver.get(&key).await {
                Some(bytes) => {
                    layer.breaker.record_success();
                    let Ok(entry) = serde_json::from_slice::<Entry<T>>(&bytes) else { continue };
                    let now = self.clock.now_ms();
                    if entry.is_collected(now) {
                        continue;
                    }
                    self.backfill(&key, &entry, idx).await;
                    let graced = entry.is_stale(now);
                    return GetResult { entry: Some(entry), source: Some("l2"), graced };
                }
                None => layer.breaker.record_success(),
            }
        }

        GetResult { entry: None, source: None, graced: false }
    }

    /// Write-through to L1 and every closed-breaker L2 layer. A single
    /// layer's failure opens its breaker and is swallowed; the write only
    /// fails if every layer (including L1) failed.
    pub async fn set<T>(&self, key: &str, entry: &Entry<T>) -> Result<(), CacheError>
    where
        T: serde::Serialize + Send + Sync,
    {
        let key = self.namespaced(key);
        if !entry.tags.is_empty() {
            self.tag_index.register(&key, &entry.tags);
        }
        let bytes = serde_json::to_vec(entry).map_err(|e| {
            CacheError::Codec(crate::error::CodecError::Encode(e.to_string()))
        })?;
        let ttl = ms_to_duration(entry.gc_at.saturating_sub(entry.created_at));

        let mut failures = Vec::new();
        let mut any_success = false;
        if let Err(e) = self.l1.set(&key, &bytes, ttl).await {
            failures.push(LayerError { layer: "l1".into(), source: e });
        } else {
            any_success = true;
        }

        let writes = self.layers.iter().map(|layer| {
            let bytes = bytes.clone();
            let key = key.clone();
            async move {
                if layer.breaker.is_open() {
                    return None;
                }
                match layer.driver.set(&key, &bytes, ttl).await {
                    Ok(()) => {
                        layer.breaker.record_success();
                        Some(Ok(()))
                    }
                    Err(e) => {
                        layer.breaker.record_failure();
                        warn!(layer = layer.driver.name(), error = %e, "layer write failed");
                        Some(Err(LayerError { layer: layer.driver.name().to_string(), source: e }))
                    }
                }
            }
        });
        for outcome in join_all(writes).await.into_iter().flatten() {
            match outcome {
                Ok(()) => any_success = true,
                Err(e) => failures.push(e),
            }
        }

        // A layer skipped because its breaker is open counts as unavailable,
        // not as a success; the write only succeeds overall if L1 or at
        // least one L2 layer actually accepted it.
        if !any_success {
            return Err(CacheError::AllLayersFailed(failures));
        }
        Ok(())
    }

    pub async fn delete(&self, keys: &[String]) -> usize {
        let prefixed: Vec<String> = keys.iter().map(|k| self.namespaced(k)).collect();
        self.delete_prefixed(&prefixed).await
    }

    async fn delete_prefixed(&self, keys: &[String]) -> usize {
        for key in keys {
            self.tag_index.unregister(key);
        }
        let l1_count = self.l1.delete(keys).await.unwrap_or(0);
        let mut max_count = l1_count;
        for layer in self.layers.iter() {
            if layer.breaker.is_open() {
                continue;
            }
            match layer.driver.delete(keys).await {
                Ok(count) => {
                    layer.breaker.record_success();
                    max_count = max_count.max(count);
                }
                Err(e) => {
                    layer.breaker.record_failure();
                    warn!(layer = layer.driver.name(), error = %e, "layer delete failed");
                }
            }
        }
        max_count
    }

    /// Drains only L1, leaving every L2 layer untouched and the TagIndex
    /// entry intact (the key is still resolvable through L2). Used by the
    /// invalidation backplane, whose publisher already drained L2 locally.
    pub async fn delete_l1(&self, keys: &[String]) -> usize {
        let prefixed: Vec<String> = keys.iter().map(|k| self.namespaced(k)).collect();
        self.l1.delete(&prefixed).await.unwrap_or(0)
    }

    pub async fn invalidate_tags(&self, tags: &[String]) -> usize {
        let keys = self.tag_index.invalidate(tags);
        if keys.is_empty() {
            return 0;
        }
        self.delete_prefixed(&keys).await
    }

    pub async fn has(&self, key: &str) -> bool {
        let key = self.namespaced(key);
        if self.l1.has(&key).await {
            return true;
        }
        for layer in self.layers.iter() {
            if !layer.breaker.is_open() && layer.driver.has(&key).await {
                return true;
            }
        }
        false
    }

    pub async fn clear(&self) {
        let _ = self.l1.clear().await;
        for layer in self.layers.iter() {
            let _ = layer.driver.clear().await;
        }
        self.tag_index.clear();
    }

    /// Drains only L1, per the same local-only contract as `delete_l1`.
    pub async fn clear_l1(&self) {
        let _ = self.l1.clear().await;
    }

    async fn backfill<T>(&self, key: &str, entry: &Entry<T>, found_at_layer: usize)
    where
        T: serde::Serialize + Send + Sync,
    {
        let Ok(bytes) = serde_json::to_vec(entry) else { return };
        let ttl = ms_to_duration(entry.gc_at.saturating_sub(entry.created_at));
        let _ = self.l1.set(key, &bytes, ttl).await;
        for layer in self.layers.iter().take(found_at_layer) {
            if layer.breaker.is_open() {
                continue;
            }
            if layer.driver.set(key, &bytes, ttl).await.is_err() {
                layer.breaker.record_failure();
            }
        }
    }
}

fn ms_to_duration(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
