//! Publish-side retry-with-DLQ wrapper.
//!
//! Grounded on the teacher's reconnect-with-backoff idiom in
//! `invalidation.rs`, generalized from "retry a subscribe loop" to "retry a
//! failed publish by handing it to a `RetryQueue`". This middleware owns the
//! queue's scheduler task: it starts draining as soon as a queue is
//! attached and stops on `disconnect()`, so enqueued messages don't sit
//! there forever unless something external calls `drain_ready`.

use crate::error::TransportError;
use crate::retry_queue::{RetryQueue, SchedulerHandle};
use crate::transport::{DynDispatcher, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub struct RetryMiddleware<T: Transport> {
    inner: Arc<T>,
    queue: Option<Arc<RetryQueue>>,
    scheduler: Option<SchedulerHandle>,
}

impl<T: Transport + 'static> RetryMiddleware<T> {
    pub fn new(inner: Arc<T>, queue: Option<Arc<RetryQueue>>) -> Self {
        let scheduler = queue.as_ref().map(|q| q.clone().spawn_scheduler(inner.clone()));
        Self { inner, queue, scheduler }
    }
}

#[async_trait]
impl<T: Transport + 'static> Transport for RetryMiddleware<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    /// Stops the retry queue's scheduler task in addition to disconnecting
    /// the wrapped transport, per the cancellation contract that a
    /// disconnect cancels pending retry-queue ticks.
    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop();
        }
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, data: Bytes) -> Result<(), TransportError> {
        match self.inner.publish(channel, data.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(queue) = &self.queue {
                    queue.enqueue(channel.to_string(), data, e.message.clone()).await;
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn subscribe(&self, channel: &str, handler: DynDispatcher) -> Result<(), TransportError> {
        self.inner.subscribe(channel, handler).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.inner.unsubscribe(channel).await
    }

    fn on_reconnect(&self, cb: crate::transport::ReconnectCallback) {
        self.inner.on_reconnect(cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry_queue::{Backoff, RetryQueueConfig};
    use crate::transport::MemoryTransport;

    #[tokio::test]
    async fn failed_publish_is_captured_by_the_retry_queue_instead_of_erroring() {
        let base = Arc::new(MemoryTransport::new());
        // deliberately not connected, so publish fails
        let queue = Arc::new(RetryQueue::new(RetryQueueConfig {
            backoff: Backoff::Constant { delay_ms: 10 },
            max_attempts: 3,
            max_queue_len: 100,
            dedup: false,
            ..Default::default()
        }));
        let mw = RetryMiddleware::new(base, Some(queue.clone()));

        mw.publish("ch", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn the_owned_scheduler_drains_the_queue_once_the_transport_can_publish() {
        let base = Arc::new(MemoryTransport::new());
        let queue = Arc::new(RetryQueue::new(RetryQueueConfig {
            backoff: Backoff::Constant { delay_ms: 0 },
            interval_ms: 10,
            max_attempts: 3,
            dedup: false,
            ..Default::default()
        }));
        let mw = RetryMiddleware::new(base.clone(), Some(queue.clone()));

        // Base isn't connected yet: publish fails and lands in the queue.
        mw.publish("ch", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(queue.len().await, 1);

        base.connect().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(queue.len().await, 0, "the scheduler drained it without any test-side ticking");
    }
}
