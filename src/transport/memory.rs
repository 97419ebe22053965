//! In-process transport for single-binary deployments and tests.
//!
//! Grounded on the `tokio::sync::broadcast`-based shutdown signaling the
//! teacher's `InvalidationSubscriber` already uses, generalized into the
//! actual message path rather than just a shutdown channel.

use super::{DynDispatcher, Transport};
use crate::error::{ErrorCode, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct MemoryTransport {
    channels: DashMap<String, Vec<DynDispatcher>>,
    connected: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            channels: DashMap::new(),
            connected: AtomicBool::new(false),
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn publish(&self, channel: &str, data: Bytes) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::new(
                ErrorCode::NotReady,
                "transport not connected",
                true,
            ));
        }
        if let Some(handlers) = self.channels.get(channel) {
            for handler in handlers.iter() {
                handler(data.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: DynDispatcher) -> Result<(), TransportError> {
        self.channels.entry(channel.to_string()).or_default().push(handler);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.channels.remove(channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber_on_the_channel() {
        let t = MemoryTransport::new();
        t.connect().await.unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        t.subscribe("ch", Arc::new(move |_| { c1.fetch_add(1, Ordering::SeqCst); }))
            .await
            .unwrap();
        let c2 = count.clone();
        t.subscribe("ch", Arc::new(move |_| { c2.fetch_add(1, Ordering::SeqCst); }))
            .await
            .unwrap();

        t.publish("ch", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn publish_before_connect_fails() {
        let t = MemoryTransport::new();
        let err = t.publish("ch", Bytes::from_static(b"hi")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotReady);
    }
}
