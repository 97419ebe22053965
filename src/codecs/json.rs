use super::Codec;
use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn round_trips_a_struct() {
        let codec = JsonCodec;
        let bytes = codec.encode(&Point { x: 1, y: 2 }).unwrap();
        let decoded: Point = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, Point { x: 1, y: 2 });
    }

    #[test]
    fn decode_error_is_typed() {
        let codec = JsonCodec;
        let err = codec.decode::<Point>(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
