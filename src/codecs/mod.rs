//! Pluggable serialization for cache entries and bus payloads.

mod json;

#[cfg(feature = "binary-codec")]
mod binary;

pub use json::JsonCodec;

#[cfg(feature = "binary-codec")]
pub use binary::BinaryCodec;

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Grounded on `traits.rs`'s `CacheCodec`, generalized to return typed
/// errors instead of `anyhow::Result`.
pub trait Codec: Send + Sync + Debug {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
    fn name(&self) -> &'static str;
}
