//! `ciborium` glue shared by every record type.

use crate::error::{CodecError, CodecResult};
use ciborium::de::Error as DeError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;

/// Encode a value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be represented in CBOR.
pub fn to_cbor<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Decode a value from CBOR bytes.
///
/// The whole input must be consumed by exactly one value.
///
/// # Errors
///
/// Returns an error if the bytes are truncated, malformed, do not match the
/// shape of `T`, or carry trailing data.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let mut reader = bytes;
    let value = ciborium::de::from_reader(&mut reader).map_err(|e| match e {
        DeError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => CodecError::UnexpectedEof,
        DeError::Io(io) => CodecError::decoding_failed(io.to_string()),
        DeError::Syntax(offset) => {
            CodecError::decoding_failed(format!("syntax error at offset {offset}"))
        }
        DeError::Semantic(_, message) => CodecError::decoding_failed(message),
        DeError::RecursionLimitExceeded => {
            CodecError::decoding_failed("recursion limit exceeded")
        }
    })?;

    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: reader.len(),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        size: i64,
        tags: Vec<String>,
        extra: BTreeMap<String, u64>,
        flag: bool,
    }

    fn sample() -> Sample {
        Sample {
            name: "a.txt".into(),
            size: 12,
            tags: vec!["x".into()],
            extra: BTreeMap::from([("k".to_string(), 1)]),
            flag: true,
        }
    }

    #[test]
    fn roundtrip_struct() {
        let bytes = to_cbor(&sample()).unwrap();
        let decoded: Sample = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn roundtrip_zero_values() {
        let value = Sample {
            name: String::new(),
            size: 0,
            tags: Vec::new(),
            extra: BTreeMap::new(),
            flag: false,
        };
        let bytes = to_cbor(&value).unwrap();
        assert_eq!(from_cbor::<Sample>(&bytes).unwrap(), value);
    }

    #[test]
    fn empty_input_is_eof() {
        let result = from_cbor::<Sample>(&[]);
        assert_eq!(result, Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn truncated_input_fails() {
        let bytes = to_cbor(&sample()).unwrap();
        for cut in 1..bytes.len() {
            assert!(from_cbor::<Sample>(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = to_cbor(&sample()).unwrap();
        bytes.push(0x00);
        assert_eq!(
            from_cbor::<Sample>(&bytes),
            Err(CodecError::TrailingBytes { remaining: 1 })
        );
    }

    #[test]
    fn wrong_shape_rejected() {
        let bytes = to_cbor(&42u64).unwrap();
        assert!(matches!(
            from_cbor::<Sample>(&bytes),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            name in ".{0,16}",
            size in any::<i64>(),
            tags in proptest::collection::vec(".{0,8}", 0..4),
            extra in proptest::collection::btree_map(".{0,8}", any::<u64>(), 0..4),
            flag in any::<bool>(),
        ) {
            let value = Sample { name, size, tags, extra, flag };
            let bytes = to_cbor(&value).unwrap();
            prop_assert_eq!(from_cbor::<Sample>(&bytes).unwrap(), value);
        }
    }
}
