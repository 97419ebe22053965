//! Redis pub/sub transport.
//!
//! Grounded directly on the teacher's `invalidation.rs`: `InvalidationPublisher`
//! becomes the publish half (a cloneable `ConnectionManager`), and
//! `InvalidationSubscriber`'s `run_subscriber_loop`/reconnect-with-backoff
//! becomes `subscribe`'s background task, generalized from one hardcoded
//! channel to an arbitrary, growing set of channels.

use super::{DynDispatcher, ReconnectCallback, Transport};
use crate::error::{ErrorCode, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

pub struct RedisTransport {
    url: String,
    conn: RwLock<Option<ConnectionManager>>,
    handlers: Arc<DashMap<String, Vec<DynDispatcher>>>,
    shutdown_tx: broadcast::Sender<()>,
    reconnect_cbs: RwLock<Vec<ReconnectCallback>>,
}

impl RedisTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            url: url.into(),
            conn: RwLock::new(None),
            handlers: Arc::new(DashMap::new()),
            shutdown_tx,
            reconnect_cbs: RwLock::new(Vec::new()),
        }
    }

    async fn run_subscriber_loop(
        url: String,
        handlers: Arc<DashMap<String, Vec<DynDispatcher>>>,
        mut shutdown_rx: broadcast::Receiver<()>,
        reconnected: ReconnectCallback,
    ) {
        loop {
            let client = match redis::Client::open(url.as_str()) {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "failed to open redis client for subscriber loop");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
            };
            let pubsub = match client.get_async_pubsub().await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "redis pubsub connect failed, retrying");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
            };
            let mut pubsub = pubsub;
            let channels: Vec<String> = handlers.iter().map(|e| e.key().clone()).collect();
            for channel in &channels {
                if let Err(e) = pubsub.subscribe(channel).await {
                    warn!(channel, error = %e, "resubscribe failed");
                }
            }
            reconnected();
            info!(channels = channels.len(), "redis transport (re)subscribed");

            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        match msg {
                            Some(msg) => {
                                let channel: String = msg.get_channel_name().to_string();
                                let payload: Vec<u8> = match msg.get_payload() {
                                    Ok(p) => p,
                                    Err(e) => { debug!(error = %e, "failed reading payload"); continue; }
                                };
                                if let Some(hs) = handlers.get(&channel) {
                                    for h in hs.iter() {
                                        h(Bytes::from(payload.clone()));
                                    }
                                }
                            }
                            None => break,
                        }
                    }
                    _ = shutdown_rx.recv() => return,
                }
            }
            warn!("redis subscriber stream ended, reconnecting");
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
    }
}

#[async_trait]
impl Transport for RedisTransport {
    fn name(&self) -> &str {
        "redis"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let client = redis::Client::open(self.url.as_str()).map_err(|e| {
            TransportError::new(ErrorCode::ConnectionFailed, "invalid redis url", false).with_source(e)
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            TransportError::new(ErrorCode::ConnectionFailed, "redis connect failed", true).with_source(e)
        })?;
        *self.conn.write().await = Some(conn);

        let handlers = self.handlers.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let url = self.url.clone();
        let reconnect_cbs = self.reconnect_cbs.read().await.clone();
        let notify = Arc::new(move || {
            for cb in &reconnect_cbs {
                cb();
            }
        });
        tokio::spawn(Self::run_subscriber_loop(url, handlers, shutdown_rx, notify));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let _ = self.shutdown_tx.send(());
        *self.conn.write().await = None;
        Ok(())
    }

    async fn publish(&self, channel: &str, data: Bytes) -> Result<(), TransportError> {
        let guard = self.conn.read().await;
        let conn = guard.as_ref().ok_or_else(|| {
            TransportError::new(ErrorCode::NotReady, "transport not connected", true)
        })?;
        let mut conn = conn.clone();
        redis::AsyncCommands::publish::<_, _, ()>(&mut conn, channel, data.to_vec())
            .await
            .map_err(|e| {
                TransportError::new(ErrorCode::PublishFailed, "redis publish failed", true)
                    .with_source(e)
            })
    }

    async fn subscribe(&self, channel: &str, handler: DynDispatcher) -> Result<(), TransportError> {
        self.handlers.entry(channel.to_string()).or_default().push(handler);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.handlers.remove(channel);
        Ok(())
    }

    fn on_reconnect(&self, cb: ReconnectCallback) {
        // best-effort: registered callbacks are picked up on the next connect()
        if let Ok(mut guard) = self.reconnect_cbs.try_write() {
            guard.push(cb);
        }
    }
}
