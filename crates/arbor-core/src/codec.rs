//! Codec seam.
//!
//! Every structure the core hashes, signs, MACs or seals goes through
//! [`encode`]. The byte layout belongs to the codec; the core only ever
//! treats the output as opaque input to cryptographic functions.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::CodecError;

/// Encode a value to its canonical byte string.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode a value from bytes produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        epoch: u64,
        payload: Vec<u8>,
        tag: Option<u16>,
    }

    #[test]
    fn encode_is_deterministic() {
        let sample = Sample { epoch: 3, payload: vec![1, 2, 3], tag: Some(7) };
        assert_eq!(encode(&sample).unwrap(), encode(&sample).unwrap());
    }

    #[test]
    fn decode_inverts_encode() {
        let sample = Sample { epoch: u64::MAX, payload: vec![], tag: None };
        let bytes = encode(&sample).unwrap();
        assert_eq!(decode::<Sample>(&bytes).unwrap(), sample);
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = decode::<Sample>(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }
}
