//! Typed error taxonomy shared by the cache and bus halves of the crate.
//!
//! The teacher crate declared `thiserror` as a dependency but never used it,
//! routing everything through `anyhow::Error` instead. This module gives the
//! internals real typed errors and keeps `anyhow` only at the outermost
//! public-facing boundary (`CacheManager`, `MessageBus`), matching how the
//! teacher's own public functions return `anyhow::Result<T>`.

use std::fmt;

/// Machine-readable classification for [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ConnectionFailed,
    NotReady,
    PublishFailed,
    SubscribeFailed,
    UnsubscribeFailed,
    TransportError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::ConnectionFailed => "connection_failed",
            ErrorCode::NotReady => "not_ready",
            ErrorCode::PublishFailed => "publish_failed",
            ErrorCode::SubscribeFailed => "subscribe_failed",
            ErrorCode::UnsubscribeFailed => "unsubscribe_failed",
            ErrorCode::TransportError => "transport_error",
        };
        f.write_str(s)
    }
}

/// Error surfaced by a [`crate::transport::Transport`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("transport error ({code}): {message}")]
pub struct TransportError {
    pub code: ErrorCode,
    pub message: String,
    /// Whether the caller should retry the operation (vs. treat it as terminal).
    pub retryable: bool,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl TransportError {
    pub fn new(code: ErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Distinct from [`CodecError`] so signature-verification failures are never
/// silently coerced into a generic decode error; callers can route it to
/// security-specific telemetry.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("frame too short to carry a signature ({len} bytes)")]
    FrameTooShort { len: usize },
    #[error("signature verification failed")]
    Mismatch,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown driver: {0}")]
    UnknownDriver(String),
    #[error("no default store configured and more than one store exists")]
    MissingDefaultStore,
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
}

/// A single layer's failure, captured for aggregation by [`CacheError::AllLayersFailed`].
#[derive(Debug, thiserror::Error)]
#[error("layer '{layer}' failed: {source}")]
pub struct LayerError {
    pub layer: String,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug)]
pub enum CacheError {
    AllLayersFailed(Vec<LayerError>),
    Config(ConfigError),
    Codec(CodecError),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::AllLayersFailed(layers) => {
                write!(f, "all {} layer(s) failed to write", layers.len())
            }
            CacheError::Config(e) => write!(f, "{e}"),
            CacheError::Codec(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::AllLayersFailed(_) => None,
            CacheError::Config(e) => Some(e),
            CacheError::Codec(e) => Some(e),
        }
    }
}

impl From<ConfigError> for CacheError {
    fn from(e: ConfigError) -> Self {
        CacheError::Config(e)
    }
}

impl From<CodecError> for CacheError {
    fn from(e: CodecError) -> Self {
        CacheError::Codec(e)
    }
}
