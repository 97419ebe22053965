//! Single-flight coalescing so concurrent callers for the same key share one
//! in-flight computation.
//!
//! Grounded directly on `cache_manager.rs`'s `in_flight_requests: DashMap<String,
//! Arc<Mutex<()>>>` + `CleanupGuard` idiom, generalized into a standalone,
//! reusable component since both `Cache::get_or_set` and background SWR
//! refresh need the identical shape.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Coalescer {
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for Coalescer {
    fn default() -> Self {
        Self { in_flight: DashMap::new() }
    }
}

/// Removes the key's in-flight lock from the map once every holder has
/// released it, mirroring the teacher's `CleanupGuard` (an RAII `Drop` impl
/// that guarantees cleanup even if the producer panics or returns early).
struct CleanupGuard<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
}

impl<'a> Drop for CleanupGuard<'a> {
    fn drop(&mut self) {
        // Only remove if nobody else currently holds a reference beyond the
        // map's own (Arc::strong_count == 1 means this guard's drop is the
        // last one still pointing at the entry besides the map slot itself).
        if let Some(entry) = self.map.get(&self.key) {
            if Arc::strong_count(&entry) <= 2 {
                drop(entry);
                self.map.remove(&self.key);
            }
        }
    }
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `producer` for `key`, ensuring at most one producer is in flight
    /// per key at a time. Concurrent callers for the same key block on the
    /// same lock and each re-run `producer` once it is their turn — callers
    /// that want "compute once, fan out the result to all waiters" should
    /// check their own cache before calling `producer` inside the closure,
    /// exactly as `Cache::get_or_set` does.
    pub async fn run<T, F, Fut>(&self, key: &str, producer: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = CleanupGuard {
            map: &self.in_flight,
            key: key.to_string(),
        };
        let _permit = lock.lock().await;
        producer().await
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    #[tokio::test]
    async fn concurrent_callers_for_the_same_key_serialize_through_the_lock() {
        let coalescer = Arc::new(Coalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut set = JoinSet::new();

        for _ in 0..20 {
            let c = coalescer.clone();
            let calls = calls.clone();
            set.spawn(async move {
                c.run("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .await;
            });
        }
        while set.join_next().await.is_some() {}

        assert_eq!(calls.load(Ordering::SeqCst), 20);
        assert_eq!(coalescer.in_flight_count(), 0);
    }
}
