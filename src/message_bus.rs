//! Codec-aware pub/sub with async handler dispatch, telemetry, and reconnect
//! wiring.
//!
//! Grounded structurally on the teacher's `InvalidationPublisher`/
//! `InvalidationSubscriber` pair, generalized from one hardcoded Redis
//! channel into N channels, each with its own ordered handler list, and from
//! sync fire-and-forget handlers into settled, awaited, individually
//! instrumented ones. `MessageBus` is a thin `Arc<Inner>` handle, cheap to
//! clone, so the reconnect callback registered with the transport can hold
//! its own reference without borrowing `self`.

use crate::codecs::Codec;
use crate::error::TransportError;
use crate::transport::{DynDispatcher, Transport};
use bytes::Bytes;
use futures_util::future::{join_all, BoxFuture};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Identifies one handler registered via `subscribe`, returned so it can
/// later be removed individually via `unsubscribe_handler` without
/// disturbing the other handlers on the same channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionId {
    channel: String,
    handler_id: u64,
}

pub type PublishHook = Arc<dyn Fn(PublishTelemetry) + Send + Sync>;
pub type SubscribeHook = Arc<dyn Fn(&str, usize) + Send + Sync>;
pub type HandlerExecutionHook = Arc<dyn Fn(&str, std::time::Duration, bool) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PublishTelemetry {
    pub channel: String,
    pub payload_size: usize,
    pub codec_used: &'static str,
    pub duration: Option<std::time::Duration>,
}

type HandlerFn = Arc<dyn Fn(Bytes) -> BoxFuture<'static, ()> + Send + Sync>;

struct HandlerEntry {
    id: u64,
    dispatcher: HandlerFn,
}

#[derive(Default)]
struct Subscription {
    handlers: Vec<HandlerEntry>,
}

struct Inner<C: Codec> {
    transport: Arc<dyn Transport>,
    codec: C,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    next_handler_id: AtomicU64,
    connected: AtomicBool,
    connect_lock: Mutex<()>,
    reconnect_registered: AtomicBool,
    auto_connect: AtomicBool,
    on_publish: RwLock<Option<PublishHook>>,
    on_subscribe: RwLock<Option<SubscribeHook>>,
    on_handler_execution: RwLock<Option<HandlerExecutionHook>>,
    on_handler_error: RwLock<Option<ErrorHook>>,
    on_error: RwLock<Option<ErrorHook>>,
}

pub struct MessageBus<C: Codec> {
    inner: Arc<Inner<C>>,
}

impl<C: Codec> Clone for MessageBus<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<C: Codec + Clone + Send + Sync + 'static> MessageBus<C> {
    pub fn new(transport: Arc<dyn Transport>, codec: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                codec,
                subscriptions: RwLock::new(HashMap::new()),
                next_handler_id: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                connect_lock: Mutex::new(()),
                reconnect_registered: AtomicBool::new(false),
                auto_connect: AtomicBool::new(false),
                on_publish: RwLock::new(None),
                on_subscribe: RwLock::new(None),
                on_handler_execution: RwLock::new(None),
                on_handler_error: RwLock::new(None),
                on_error: RwLock::new(None),
            }),
        }
    }

    /// When enabled, `publish`/`subscribe` transparently call `connect()`
    /// first if the bus is not yet connected.
    pub fn with_auto_connect(self, enabled: bool) -> Self {
        self.inner.auto_connect.store(enabled, Ordering::SeqCst);
        self
    }

    pub async fn on_publish(&self, hook: PublishHook) {
        *self.inner.on_publish.write().await = Some(hook);
    }

    pub async fn on_subscribe(&self, hook: SubscribeHook) {
        *self.inner.on_subscribe.write().await = Some(hook);
    }

    pub async fn on_handler_execution(&self, hook: HandlerExecutionHook) {
        *self.inner.on_handler_execution.write().await = Some(hook);
    }

    pub async fn on_handler_error(&self, hook: ErrorHook) {
        *self.inner.on_handler_error.write().await = Some(hook);
    }

    pub async fn on_error(&self, hook: ErrorHook) {
        *self.inner.on_error.write().await = Some(hook);
    }

    /// Idempotent: a no-op if already connected. Concurrent callers
    /// serialize behind the connect lock rather than each driving their own
    /// `transport.connect()`; whoever gets there first does the real work
    /// and everyone else observes `connected` already flipped.
    pub async fn connect(&self) -> Result<(), TransportError> {
        if self.inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.inner.connect_lock.lock().await;
        if self.inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.transport.connect().await?;
        self.inner.connected.store(true, Ordering::SeqCst);
        self.register_reconnect();

        let channels: Vec<String> = self.inner.subscriptions.read().await.keys().cloned().collect();
        for channel in channels {
            self.resubscribe(&channel).await?;
        }
        Ok(())
    }

    fn register_reconnect(&self) {
        if self.inner.reconnect_registered.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        self.inner.transport.on_reconnect(Arc::new(move || {
            let inner = inner.clone();
            let bus = MessageBus { inner };
            tokio::spawn(async move {
                let channels: Vec<String> = bus.inner.subscriptions.read().await.keys().cloned().collect();
                for channel in channels {
                    if let Err(e) = bus.resubscribe(&channel).await {
                        warn!(channel, error = %e, "failed to resubscribe after reconnect");
                    }
                }
            });
        }));
    }

    /// Unsubscribes every channel, then disconnects the transport. The
    /// subscription map is cleared so a subsequent `connect()` starts with a
    /// clean slate rather than immediately resubscribing stale channels.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let channels: Vec<String> = self.inner.subscriptions.read().await.keys().cloned().collect();
        for channel in &channels {
            if let Err(e) = self.inner.transport.unsubscribe(channel).await {
                warn!(channel, error = %e, "failed to unsubscribe during disconnect");
            }
        }
        self.inner.subscriptions.write().await.clear();
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.transport.disconnect().await
    }

    pub async fn publish<T: Serialize + ?Sized>(&self, channel: &str, value: &T) -> anyhow::Result<()> {
        if self.inner.auto_connect.load(Ordering::SeqCst) && !self.inner.connected.load(Ordering::SeqCst) {
            self.connect().await?;
        }

        let bytes = self.inner.codec.encode(value)?;
        let payload_size = bytes.len();
        self.emit_publish(PublishTelemetry {
            channel: channel.to_string(),
            payload_size,
            codec_used: self.inner.codec.name(),
            duration: None,
        })
        .await;

        let started = Instant::now();
        let result = self.inner.transport.publish(channel, Bytes::from(bytes)).await;
        match result {
            Ok(()) => {
                let duration = started.elapsed();
                self.emit_publish(PublishTelemetry {
                    channel: channel.to_string(),
                    payload_size,
                    codec_used: self.inner.codec.name(),
                    duration: Some(duration),
                })
                .await;
                debug!(channel, ?duration, "published message");
                Ok(())
            }
            Err(e) => {
                self.emit_error("publish", &e.message).await;
                Err(e.into())
            }
        }
    }

    async fn emit_publish(&self, telemetry: PublishTelemetry) {
        if let Some(hook) = self.inner.on_publish.read().await.as_ref() {
            hook(telemetry);
        }
    }

    async fn emit_error(&self, operation: &str, message: &str) {
        if let Some(hook) = self.inner.on_error.read().await.as_ref() {
            hook(operation, message);
        }
    }

    /// Register a typed handler for `channel`. Handlers may do async work;
    /// all handlers registered for a channel run concurrently with settle
    /// semantics on every message — one handler's error or panic never
    /// prevents its siblings from running. Each handler gets its own
    /// `on_handler_execution` telemetry event with a duration and
    /// success/error outcome; a rejection additionally fires the bus-level
    /// `on_handler_error`.
    pub async fn subscribe<T, F, Fut>(&self, channel: &str, handler: F) -> Result<SubscriptionId, TransportError>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.inner.auto_connect.load(Ordering::SeqCst) && !self.inner.connected.load(Ordering::SeqCst) {
            self.connect().await?;
        }

        let codec = self.inner.codec.clone();
        let channel_owned = channel.to_string();
        let on_handler_execution = self.inner.on_handler_execution.read().await.clone();
        let on_handler_error = self.inner.on_handler_error.read().await.clone();
        let handler = Arc::new(handler);

        let dispatcher: HandlerFn = Arc::new(move |bytes: Bytes| {
            let codec = codec.clone();
            let channel = channel_owned.clone();
            let handler = handler.clone();
            let on_handler_execution = on_handler_execution.clone();
            let on_handler_error = on_handler_error.clone();
            let fut: BoxFuture<'static, ()> = Box::pin(async move {
                let value = match codec.decode::<T>(&bytes) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(channel = %channel, "dropping message that failed to decode");
                        if let Some(hook) = &on_handler_error {
                            hook(&channel, &e.to_string());
                        }
                        return;
                    }
                };

                let started = Instant::now();
                let outcome = handler(value).await;
                let duration = started.elapsed();
                let success = outcome.is_ok();
                if let Some(hook) = &on_handler_execution {
                    hook(&channel, duration, success);
                }
                if let Err(e) = outcome {
                    warn!(channel = %channel, error = %e, "handler returned an error");
                    if let Some(hook) = &on_handler_error {
                        hook(&channel, &e.to_string());
                    }
                }
            });
            fut
        });

        let handler_id = self.inner.next_handler_id.fetch_add(1, Ordering::SeqCst);
        let handler_count = {
            let mut guard = self.inner.subscriptions.write().await;
            let entry = guard.entry(channel.to_string()).or_insert_with(Subscription::default);
            entry.handlers.push(HandlerEntry { id: handler_id, dispatcher });
            entry.handlers.len()
        };

        self.resubscribe(channel).await?;
        if let Some(hook) = self.inner.on_subscribe.read().await.as_ref() {
            hook(channel, handler_count);
        }
        Ok(SubscriptionId { channel: channel.to_string(), handler_id })
    }

    /// Removes every handler for `channel` and unsubscribes from the
    /// transport.
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.inner.subscriptions.write().await.remove(channel);
        self.inner.transport.unsubscribe(channel).await
    }

    /// Removes a single handler previously returned by `subscribe`. If it
    /// was the last handler on its channel, the channel is unsubscribed from
    /// the transport too; otherwise the remaining handlers keep dispatching.
    pub async fn unsubscribe_handler(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        let now_empty = {
            let mut guard = self.inner.subscriptions.write().await;
            let Some(sub) = guard.get_mut(&id.channel) else { return Ok(()) };
            sub.handlers.retain(|h| h.id != id.handler_id);
            let empty = sub.handlers.is_empty();
            if empty {
                guard.remove(&id.channel);
            }
            empty
        };

        if now_empty {
            self.inner.transport.unsubscribe(&id.channel).await
        } else {
            self.resubscribe(&id.channel).await
        }
    }

    async fn resubscribe(&self, channel: &str) -> Result<(), TransportError> {
        let handlers: Option<Vec<HandlerFn>> = {
            let guard = self.inner.subscriptions.read().await;
            guard.get(channel).map(|s| s.handlers.iter().map(|h| h.dispatcher.clone()).collect())
        };
        let Some(handlers) = handlers else { return Ok(()) };

        let fanout: DynDispatcher = Arc::new(move |bytes: Bytes| {
            let handlers = handlers.clone();
            tokio::spawn(async move {
                join_all(handlers.iter().map(|h| h(bytes.clone()))).await;
            });
        });
        self.inner.transport.subscribe(channel, fanout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::JsonCodec;
    use crate::transport::MemoryTransport;
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[tokio::test]
    async fn publish_reaches_subscribed_handler() {
        let transport = Arc::new(MemoryTransport::new());
        let bus = MessageBus::new(transport, JsonCodec);
        bus.connect().await.unwrap();

        let sum = Arc::new(AtomicUsize::new(0));
        let s = sum.clone();
        bus.subscribe::<Ping, _, _>("pings", move |p: Ping| {
            let s = s.clone();
            async move {
                s.fetch_add(p.n as usize, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        bus.publish("pings", &Ping { n: 7 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sum.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn both_handlers_run_even_when_one_errors() {
        let transport = Arc::new(MemoryTransport::new());
        let bus = MessageBus::new(transport, JsonCodec);
        bus.connect().await.unwrap();

        let ok_calls = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        bus.on_handler_error(Arc::new(move |channel: &str, msg: &str| {
            e.try_lock().unwrap().push((channel.to_string(), msg.to_string()));
        }))
        .await;

        bus.subscribe::<Ping, _, _>("pings", move |_p: Ping| async move {
            Err(anyhow::anyhow!("boom"))
        })
        .await
        .unwrap();

        let c = ok_calls.clone();
        bus.subscribe::<Ping, _, _>("pings", move |_p: Ping| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        bus.publish("pings", &Ping { n: 1 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(ok_calls.load(Ordering::SeqCst), 1, "the failing handler did not block the other");
        assert_eq!(errors.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn disconnect_clears_subscriptions_so_reconnect_starts_clean() {
        let transport = Arc::new(MemoryTransport::new());
        let bus = MessageBus::new(transport, JsonCodec);
        bus.connect().await.unwrap();
        bus.subscribe::<Ping, _, _>("pings", |_p: Ping| async move { Ok(()) }).await.unwrap();

        bus.disconnect().await.unwrap();
        assert!(bus.inner.subscriptions.read().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_connect_calls_only_connect_once() {
        let transport = Arc::new(MemoryTransport::new());
        let bus = MessageBus::new(transport, JsonCodec);

        let (r1, r2) = tokio::join!(bus.connect(), bus.connect());
        r1.unwrap();
        r2.unwrap();
        assert!(bus.inner.connected.load(Ordering::SeqCst));
    }
}
