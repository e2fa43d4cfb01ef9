//! Payload serialization.
//!
//! The source serializes with an in-language pickle, which does not
//! round-trip across languages or even across incompatible pickle
//! protocol versions. This crate uses a stable, self-describing envelope
//! instead: one tag byte identifying the payload format, followed by the
//! encoded payload — so a future second format (say, a binary one for
//! large payloads) can be added without breaking entries written under the
//! first.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

const TAG_JSON: u8 = 1;

/// Encode `value` as a tagged, self-describing byte payload suitable for a
/// store `SET`.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(TAG_JSON);
    out.extend(payload);
    Ok(out)
}

/// Decode a payload previously produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (tag, payload) = bytes
        .split_first()
        .ok_or_else(|| CacheError::Serialization("empty payload".to_string()))?;
    match *tag {
        TAG_JSON => serde_json::from_slice(payload).map_err(|e| CacheError::Serialization(e.to_string())),
        other => Err(CacheError::Serialization(format!("unknown payload tag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn round_trips_a_struct() {
        let value = Sample { name: "totals".to_string(), count: 42 };
        let bytes = encode(&value).unwrap();
        let decoded: Sample = decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn round_trips_a_scalar() {
        let bytes = encode(&1_700_000_000_i64).unwrap();
        let decoded: i64 = decode(&bytes).unwrap();
        assert_eq!(decoded, 1_700_000_000);
    }

    #[test]
    fn rejects_empty_payload() {
        let result: Result<i64> = decode(&[]);
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[test]
    fn rejects_unknown_tag() {
        let result: Result<i64> = decode(&[0xFF, 1, 2, 3]);
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
