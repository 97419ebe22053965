//! Threshold-based gzip compression, prepending a 1-byte marker frame.
//!
//! No teacher equivalent; grounded on the `flate2` dependency carried by the
//! `harborgrid-justin-caddy` example repo, which reaches for `flate2` for
//! exactly this kind of frame compression.

use crate::error::{ErrorCode, TransportError};
use crate::transport::{DynDispatcher, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;
use std::sync::Arc;

const MARKER_UNCOMPRESSED: u8 = 0;
const MARKER_GZIP: u8 = 1;
/// Only emit the compressed form when it actually shrinks the payload by at
/// least this fraction.
const MIN_SAVINGS_RATIO: f64 = 0.10;

pub struct CompressionMiddleware<T: Transport> {
    inner: Arc<T>,
    threshold_bytes: usize,
}

impl<T: Transport> CompressionMiddleware<T> {
    pub fn new(inner: Arc<T>, threshold_bytes: usize) -> Self {
        Self { inner, threshold_bytes }
    }

    fn encode_frame(&self, data: &[u8]) -> Vec<u8> {
        if data.len() < self.threshold_bytes {
            return prefix(MARKER_UNCOMPRESSED, data);
        }
        let mut encoder = GzEncoder::new(data, Compression::default());
        let mut compressed = Vec::new();
        if encoder.read_to_end(&mut compressed).is_err() {
            return prefix(MARKER_UNCOMPRESSED, data);
        }
        if (compressed.len() as f64) <= (data.len() as f64) * (1.0 - MIN_SAVINGS_RATIO) {
            prefix(MARKER_GZIP, &compressed)
        } else {
            prefix(MARKER_UNCOMPRESSED, data)
        }
    }

    fn decode_frame(data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let (marker, body) = data.split_first().ok_or_else(|| {
            TransportError::new(ErrorCode::TransportError, "empty compression frame", false)
        })?;
        match *marker {
            MARKER_UNCOMPRESSED => Ok(body.to_vec()),
            MARKER_GZIP => {
                let mut decoder = GzDecoder::new(body);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out).map_err(|e| {
                    TransportError::new(ErrorCode::TransportError, "gzip decode failed", false)
                        .with_source(e)
                })?;
                Ok(out)
            }
            other => Err(TransportError::new(
                ErrorCode::TransportError,
                format!("unknown compression marker {other}"),
                false,
            )),
        }
    }
}

fn prefix(marker: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(marker);
    out.extend_from_slice(body);
    out
}

#[async_trait]
impl<T: Transport + 'static> Transport for CompressionMiddleware<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, data: Bytes) -> Result<(), TransportError> {
        let framed = self.encode_frame(&data);
        self.inner.publish(channel, Bytes::from(framed)).await
    }

    async fn subscribe(&self, channel: &str, handler: DynDispatcher) -> Result<(), TransportError> {
        let wrapped: DynDispatcher = Arc::new(move |data: Bytes| match Self::decode_frame(&data) {
            Ok(decoded) => handler(Bytes::from(decoded)),
            Err(e) => tracing::warn!(error = %e, "dropping frame that failed to decompress"),
        });
        self.inner.subscribe(channel, wrapped).await
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
    use crate::transport::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn small_payloads_stay_uncompressed_but_still_round_trip() {
        let base = Arc::new(MemoryTransport::new());
        base.connect().await.unwrap();
        let mw = CompressionMiddleware::new(base, 1024);

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let r = received.clone();
        mw.subscribe("ch", Arc::new(move |b: Bytes| r.lock().unwrap().push(b.to_vec())))
            .await
            .unwrap();
        mw.publish("ch", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(received.lock().unwrap()[0], b"hi");
    }

    #[tokio::test]
    async fn large_compressible_payloads_round_trip_through_gzip() {
        let base = Arc::new(MemoryTransport::new());
        base.connect().await.unwrap();
        let mw = CompressionMiddleware::new(base, 16);

        let count = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let r = received.clone();
        let c = count.clone();
        mw.subscribe("ch", Arc::new(move |b: Bytes| {
            r.lock().unwrap().push(b.to_vec());
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .await
        .unwrap();

        let payload = vec![b'a'; 4096];
        mw.publish("ch", Bytes::from(payload.clone())).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(received.lock().unwrap()[0], payload);
    }
}
