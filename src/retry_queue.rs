//! Scheduled, deduped, bounded queue for failed publishes.
//!
//! No teacher equivalent exists; the scheduling loop is grounded on the
//! teacher's subscriber self-rescheduling `tokio::spawn` loop in
//! `invalidation.rs` (tick, do work, sleep), adapted from "reconnect on
//! error" to "drain ready messages on a timer". Backoff shapes are grounded
//! on `ninelives::backoff::Backoff`, extended with `Fibonacci` and `Custom`.

use crate::transport::Transport;
use bytes::Bytes;
use futures_util::future::join_all;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

#[derive(Clone)]
pub enum Backoff {
    Constant { delay_ms: u64 },
    Linear { base_ms: u64 },
    Exponential { base_ms: u64, max_ms: Option<u64> },
    Fibonacci { base_ms: u64, max_ms: Option<u64> },
    /// Caller-supplied curve, for backoff shapes the built-in variants don't
    /// cover (jittered, capped-at-a-service-specific-ceiling, etc).
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = match self {
            Backoff::Constant { delay_ms } => *delay_ms,
            Backoff::Linear { base_ms } => base_ms.saturating_mul(u64::from(attempt.max(1))),
            Backoff::Exponential { base_ms, max_ms } => {
                let scaled = base_ms.saturating_mul(1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX));
                max_ms.map_or(scaled, |m| scaled.min(m))
            }
            Backoff::Fibonacci { base_ms, max_ms } => {
                let mut a: u64 = 1;
                let mut b: u64 = 1;
                for _ in 0..attempt {
                    let next = a.saturating_add(b);
                    a = b;
                    b = next;
                }
                let scaled = base_ms.saturating_mul(a);
                max_ms.map_or(scaled, |m| scaled.min(m))
            }
            Backoff::Custom(f) => return f(attempt),
        };
        Duration::from_millis(ms)
    }
}

pub type RetryHook = Arc<dyn Fn(&str, u32) + Send + Sync>;
pub type DeadLetterHook = Arc<dyn Fn(&str, &Bytes, &str, u32) + Send + Sync>;

#[derive(Clone)]
pub struct RetryQueueConfig {
    pub backoff: Backoff,
    pub max_attempts: u32,
    /// How often the self-rescheduling scheduler task wakes up to check for
    /// ready messages.
    pub interval_ms: u64,
    /// How many ready messages are retried concurrently per tick.
    pub concurrency: usize,
    pub max_queue_len: usize,
    pub dedup: bool,
    /// Fired before each retry attempt (after incrementing `attempts`).
    pub on_retry: Option<RetryHook>,
    /// Fired once a message exhausts `max_attempts`, just before it is
    /// dropped from the queue.
    pub on_dead_letter: Option<DeadLetterHook>,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::Exponential { base_ms: 200, max_ms: Some(30_000) },
            max_attempts: 5,
            interval_ms: 1_000,
            concurrency: 4,
            max_queue_len: 1_000,
            dedup: true,
            on_retry: None,
            on_dead_letter: None,
        }
    }
}

struct QueuedMessage {
    id: u64,
    channel: String,
    payload: Bytes,
    attempts: u32,
    next_retry_at_ms: u64,
    last_error: String,
}

pub struct RetryQueue {
    config: RetryQueueConfig,
    messages: Mutex<Vec<QueuedMessage>>,
    dropped: AtomicU64,
    dead_lettered: AtomicU64,
}

fn content_id(channel: &str, payload: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    channel.hash(&mut hasher);
    payload.hash(&mut hasher);
    hasher.finish()
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl RetryQueue {
    pub fn new(config: RetryQueueConfig) -> Self {
        Self {
            config,
            messages: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    pub async fn enqueue(&self, channel: String, payload: Bytes, last_error: String) {
        let id = content_id(&channel, &payload);
        let mut guard = self.messages.lock().await;

        if self.config.dedup && guard.iter().any(|m| m.id == id) {
            return;
        }
        if guard.len() >= self.config.max_queue_len {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(channel, "retry queue full, dropping message");
            return;
        }
        guard.push(QueuedMessage {
            id,
            channel,
            payload,
            attempts: 0,
            next_retry_at_ms: now_ms(),
            last_error,
        });
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn dead_lettered_count(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    /// Drain every message whose retry deadline has passed, processing them
    /// in settle-semantics batches of `concurrency` size. For each message:
    /// bump `attempts`, fire `on_retry`, then call `retry_fn`. Success drops
    /// the message; failure either reschedules it with the next backoff step
    /// or, once `max_attempts` is exhausted, fires `on_dead_letter` and drops
    /// it.
    pub async fn drain_ready<F, Fut>(&self, retry_fn: F)
    where
        F: Fn(String, Bytes) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        let now = now_ms();
        let ready: Vec<QueuedMessage> = {
            let mut guard = self.messages.lock().await;
            let mut ready = Vec::new();
            let mut i = 0;
            while i < guard.len() {
                if guard[i].next_retry_at_ms <= now {
                    ready.push(guard.remove(i));
                } else {
                    i += 1;
                }
            }
            ready
        };

        let concurrency = self.config.concurrency.max(1);
        for batch in chunk(ready, concurrency) {
            let outcomes = join_all(batch.into_iter().map(|mut msg| {
                let retry_fn = &retry_fn;
                async move {
                    msg.attempts += 1;
                    if let Some(hook) = &self.config.on_retry {
                        hook(&msg.channel, msg.attempts);
                    }
                    let result = retry_fn(msg.channel.clone(), msg.payload.clone()).await;
                    (msg, result)
                }
            }))
            .await;

            for (mut msg, result) in outcomes {
                match result {
                    Ok(()) => {
                        info!(channel = %msg.channel, attempts = msg.attempts, "retry queue publish succeeded");
                    }
                    Err(err) => {
                        msg.last_error = err.clone();
                        if msg.attempts >= self.config.max_attempts {
                            self.dead_lettered.fetch_add(1, Ordering::Relaxed);
                            if let Some(hook) = &self.config.on_dead_letter {
                                hook(&msg.channel, &msg.payload, &err, msg.attempts);
                            }
                        } else {
                            msg.next_retry_at_ms = now_ms() + self.config.backoff.delay(msg.attempts).as_millis() as u64;
                            self.messages.lock().await.push(msg);
                        }
                    }
                }
            }
        }
    }

    /// Spawns the self-rescheduling scheduler task that drains ready
    /// messages onto `transport` every `interval_ms`. The next tick is only
    /// scheduled after the current one completes, so a slow tick never
    /// stacks. `stop()` on the returned handle cancels pending ticks.
    pub fn spawn_scheduler<T>(self: Arc<Self>, transport: Arc<T>) -> SchedulerHandle
    where
        T: Transport + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let queue = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(Duration::from_millis(queue.config.interval_ms)) => {
                        let transport = transport.clone();
                        queue
                            .drain_ready(move |channel, payload| {
                                let transport = transport.clone();
                                async move { transport.publish(&channel, payload).await.map_err(|e| e.message) }
                            })
                            .await;
                    }
                }
            }
        });
        SchedulerHandle { shutdown: shutdown_tx }
    }
}

fn chunk(items: Vec<QueuedMessage>, size: usize) -> Vec<Vec<QueuedMessage>> {
    let mut chunks = Vec::new();
    let mut rest = items;
    while !rest.is_empty() {
        let tail = rest.split_off(size.min(rest.len()));
        chunks.push(rest);
        rest = tail;
    }
    chunks
}

/// Owns the scheduler task's lifetime. Dropping this without calling `stop`
/// leaves the task running; `stop` is the cooperative shutdown path used by
/// `disconnect()`.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub type SharedRetryQueue = Arc<RetryQueue>;
