use super::Codec;
use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Compact binary codec, grounded on the teacher's `codecs/postcard.rs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        postcard::to_allocvec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        postcard::from_bytes(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "postcard"
    }
}
