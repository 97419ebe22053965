//! Public cache API: stale-while-revalidate, loader retries, single-flight,
//! cancellation, and pluggable events.
//!
//! Grounded on `cache_manager.rs`'s `get_or_compute`, with loader retry
//! backoff lifted from `ninelives::backoff::Backoff`.

use crate::cache_stack::CacheStack;
use crate::dedup::Coalescer;
use crate::entry::{Clock, Entry, SystemClock};
use crate::retry_queue::Backoff;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

pub trait CacheEvents: Send + Sync {
    fn on_hit(&self, _key: &str) {}
    fn on_miss(&self, _key: &str) {}
    fn on_set(&self, _key: &str) {}
    fn on_error(&self, _key: &str, _error: &anyhow::Error) {}
}

/// Cooperative cancellation signal handed to a loader. A loader is free to
/// ignore it and run to completion (the result still populates the cache);
/// checking it lets a loader abort its own in-flight I/O early once a SWR
/// timeout has already returned the stale value to the caller.
#[derive(Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    fn pair() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// A token that is never cancelled, for loads that have nothing racing
    /// against them (misses, `fresh` reads, and the `timeout`-absent SWR
    /// branch).
    fn inert() -> Self {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

pub struct GetOrSetOptions {
    pub stale_after: Duration,
    pub gc_after: Duration,
    pub tags: Vec<String>,
    pub retries: u32,
    pub retry_backoff: Backoff,
    /// Skip the cache read entirely and go straight to the loader under
    /// single-flight, as though the key were a total miss.
    pub fresh: bool,
    /// Governs the stale-hit SWR branch: `Some(ZERO)` returns the stale
    /// value immediately and refreshes in the background; `Some(positive)`
    /// races the loader against that timer, returning whichever settles
    /// first and letting the loader continue in the background on timeout;
    /// `None` awaits the loader in the foreground.
    pub timeout: Option<Duration>,
}

impl Default for GetOrSetOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(60),
            gc_after: Duration::from_secs(300),
            tags: Vec::new(),
            retries: 0,
            retry_backoff: Backoff::Exponential { base_ms: 100, max_ms: Some(5_000) },
            fresh: false,
            timeout: Some(Duration::ZERO),
        }
    }
}

pub struct Cache {
    stack: Arc<CacheStack>,
    coalescer: Arc<Coalescer>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<dyn CacheEvents>>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl Cache {
    pub fn new(stack: Arc<CacheStack>) -> Self {
        Self::with_clock(stack, Arc::new(SystemClock))
    }

    pub fn with_clock(stack: Arc<CacheStack>, clock: Arc<dyn Clock>) -> Self {
        Self { stack, coalescer: Arc::new(Coalescer::new()), clock, events: None }
    }

    pub fn with_events(mut self, events: Arc<dyn CacheEvents>) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns a new Cache sharing this one's drivers, TagIndex, and circuit
    /// breakers (via the underlying Stack), with every key prefixed
    /// `parent:child`.
    pub fn namespace(&self, prefix: &str) -> Self {
        Self {
            stack: Arc::new(self.stack.namespace(prefix)),
            coalescer: Arc::new(Coalescer::new()),
            clock: self.clock.clone(),
            events: self.events.clone(),
        }
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned + serde::Serialize + Clone + Send + Sync,
    {
        let result = self.stack.get::<T>(key).await;
        match &result.entry {
            Some(_) => self.emit_hit(key),
            None => self.emit_miss(key),
        }
        result.entry.map(|e| e.value)
    }

    pub async fn set<T>(&self, key: &str, value: T, opts: &GetOrSetOptions) -> anyhow::Result<()>
    where
        T: serde::Serialize + Send + Sync,
    {
        let now = self.clock.now_ms();
        let entry = Entry::new(
            value,
            now,
            opts.stale_after.as_millis() as u64,
            opts.gc_after.as_millis() as u64,
            opts.tags.clone(),
        );
        self.stack.set(key, &entry).await?;
        self.emit_set(key);
        Ok(())
    }

    /// `get` then `delete`: returns the value that was there, if any, and
    /// removes it from every layer.
    pub async fn pull<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned + serde::Serialize + Clone + Send + Sync,
    {
        let value = self.get::<T>(key).await;
        self.delete(&[key.to_string()]).await;
        value
    }

    /// Rewrites the entry with `stale_at = now`, preserving `gc_at`, so the
    /// key triggers revalidation on its next read without being dropped
    /// outright. Returns `false` if there was nothing to expire.
    pub async fn expire<T>(&self, key: &str) -> bool
    where
        T: serde::de::DeserializeOwned + serde::Serialize + Clone + Send + Sync,
    {
        let result = self.stack.get::<T>(key).await;
        let Some(entry) = result.entry else { return false };
        let now = self.clock.now_ms();
        let expired = entry.expire(now);
        self.stack.set(key, &expired).await.is_ok()
    }

    /// Stale-while-revalidate read-through:
    /// - `opts.fresh` skips the cache read and loads under dedup.
    /// - A fresh hit returns immediately.
    /// - A stale hit runs SWR per `opts.timeout` (see `GetOrSetOptions`).
    /// - A true miss loads under dedup; loader failure propagates, since
    ///   there is no stale fallback.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        opts: &GetOrSetOptions,
    ) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned + serde::Serialize + Clone + Send + Sync + 'static,
        F: Fn(CancelToken) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        if opts.fresh {
            self.emit_miss(key);
            return self.load_and_store(key, loader, opts).await;
        }

        let result = self.stack.get::<T>(key).await;

        let Some(entry) = result.entry else {
            self.emit_miss(key);
            return self.load_and_store(key, loader, opts).await;
        };

        if !result.graced {
            self.emit_hit(key);
            return Ok(entry.value);
        }

        self.emit_hit(key);
        let stale_value = entry.value.clone();

        match opts.timeout {
            Some(timeout) if timeout.is_zero() => {
                self.spawn_background_refresh(key, loader, opts);
                Ok(stale_value)
            }
            Some(timeout) => {
                let (cancel_tx, cancel_rx) = CancelToken::pair();
                let stack = self.stack.clone();
                let clock = self.clock.clone();
                let coalescer = self.coalescer.clone();
                let events = self.events.clone();
                let key_owned = key.to_string();
                let opts_owned = clone_opts(opts);
                let mut handle = tokio::spawn(async move {
                    run_load_and_store(stack, clock, coalescer, key_owned, loader, opts_owned, cancel_rx, events)
                        .await
                });

                tokio::select! {
                    biased;
                    res = &mut handle => {
                        match res {
                            Ok(Ok(value)) => Ok(value),
                            _ => Ok(stale_value),
                        }
                    }
                    _ = tokio::time::sleep(timeout) => {
                        // The loader keeps running in the background to
                        // populate the cache; we only stop waiting on it.
                        // Flip the token so a cooperative loader can bail
                        // out of its own remaining retries/I-O early.
                        let _ = cancel_tx.send(true);
                        Ok(stale_value)
                    }
                }
            }
            None => {
                let stack = self.stack.clone();
                let clock = self.clock.clone();
                let coalescer = self.coalescer.clone();
                let events = self.events.clone();
                match run_load_and_store(
                    stack,
                    clock,
                    coalescer,
                    key.to_string(),
                    loader,
                    clone_opts(opts),
                    CancelToken::inert(),
                    events,
                )
                .await
                {
                    Ok(value) => Ok(value),
                    Err(_) => Ok(stale_value),
                }
            }
        }
    }

    fn spawn_background_refresh<T, F, Fut>(&self, key: &str, loader: F, opts: &GetOrSetOptions)
    where
        T: serde::de::DeserializeOwned + serde::Serialize + Clone + Send + Sync,
        F: Fn(CancelToken) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        let stack = self.stack.clone();
        let clock = self.clock.clone();
        let coalescer = self.coalescer.clone();
        let events = self.events.clone();
        let key_owned = key.to_string();
        let opts_owned = clone_opts(opts);
        tokio::spawn(async move {
            let _ = run_load_and_store(
                stack,
                clock,
                coalescer,
                key_owned,
                loader,
                opts_owned,
                CancelToken::inert(),
                events,
            )
            .await;
        });
    }

    async fn load_and_store<T, F, Fut>(&self, key: &str, loader: F, opts: &GetOrSetOptions) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned + serde::Serialize + Clone + Send + Sync,
        F: Fn(CancelToken) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        run_load_and_store(
            self.stack.clone(),
            self.clock.clone(),
            self.coalescer.clone(),
            key.to_string(),
            loader,
            clone_opts(opts),
            CancelToken::inert(),
            self.events.clone(),
        )
        .await
    }

    pub async fn delete(&self, keys: &[String]) -> usize {
        self.stack.delete(keys).await
    }

    /// Drains only L1, leaving every L2 layer untouched. Used by the
    /// invalidation backplane to avoid re-publishing what the publisher
    /// already did locally (see `cache_manager.rs`).
    pub async fn delete_l1(&self, keys: &[String]) -> usize {
        self.stack.delete_l1(keys).await
    }

    pub async fn invalidate_tags(&self, tags: &[String]) -> usize {
        self.stack.invalidate_tags(tags).await
    }

    pub async fn has(&self, key: &str) -> bool {
        self.stack.has(key).await
    }

    pub async fn clear(&self) {
        self.stack.clear().await;
    }

    /// Drains only L1, per the same local-only contract as `delete_l1`.
    pub async fn clear_l1(&self) {
        self.stack.clear_l1().await;
    }

    fn emit_hit(&self, key: &str) {
        if let Some(e) = &self.events {
            e.on_hit(key);
        }
    }

    fn emit_miss(&self, key: &str) {
        if let Some(e) = &self.events {
            e.on_miss(key);
        }
    }

    fn emit_set(&self, key: &str) {
        if let Some(e) = &self.events {
            e.on_set(key);
        }
    }
}

fn clone_opts(opts: &GetOrSetOptions) -> GetOrSetOptions {
    GetOrSetOptions {
        stale_after: opts.stale_after,
        gc_after: opts.gc_after,
        tags: opts.tags.clone(),
        retries: opts.retries,
        retry_backoff: opts.retry_backoff.clone(),
        fresh: opts.fresh,
        timeout: opts.timeout,
    }
}

/// Runs `loader` under single-flight for `key`: a waiter that loses the race
/// to acquire the per-key lock re-checks the cache once it's their turn and,
/// finding the entry the first caller just wrote, returns that instead of
/// re-running the loader. On success the entry is written through the
/// Stack; `events` observes the final outcome either way.
async fn run_load_and_store<T, F, Fut>(
    stack: Arc<CacheStack>,
    clock: Arc<dyn Clock>,
    coalescer: Arc<Coalescer>,
    key: String,
    loader: F,
    opts: GetOrSetOptions,
    cancel: CancelToken,
    events: Option<Arc<dyn CacheEvents>>,
) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + serde::Serialize + Clone + Send + Sync,
    F: Fn(CancelToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send,
{
    let stack_outer = stack.clone();
    let key_outer = key.clone();
    let result = coalescer
        .run(&key, move || async move {
            let stack = stack_outer;
            let key = key_outer;
            if let Some(entry) = stack.get::<T>(&key).await.entry {
                return Ok(entry.value);
            }
            let value = run_with_retries(&loader, opts.retries, &opts.retry_backoff, cancel).await?;
            let now = clock.now_ms();
            let fresh = Entry::new(
                value.clone(),
                now,
                opts.stale_after.as_millis() as u64,
                opts.gc_after.as_millis() as u64,
                opts.tags.clone(),
            );
            stack.set(&key, &fresh).await?;
            Ok(value)
        })
        .await;

    match &result {
        Ok(_) => {
            if let Some(e) = &events {
                e.on_set(&key);
            }
        }
        Err(err) => {
            debug!(key = %key, error = %err, "loader failed");
            if let Some(e) = &events {
                e.on_error(&key, err);
            }
        }
    }
    result
}

async fn run_with_retries<T, F, Fut>(
    loader: &F,
    retries: u32,
    backoff: &Backoff,
    cancel: CancelToken,
) -> anyhow::Result<T>
where
    F: Fn(CancelToken) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match loader(cancel.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= retries || cancel.is_cancelled() {
                    return Err(e);
                }
                tokio::time::sleep(backoff.delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}
