//! Canonicalization & hashing primitives.
//!
//! Canonical JSON is the deterministic serialization used everywhere a hash
//! or MAC is taken: object keys are sorted lexicographically, array order is
//! preserved, and there is no insignificant whitespace. `null`/absent
//! optional fields are omitted rather than serialized as `null`, matching
//! how `serde_json` already skips `#[serde(skip_serializing_if = "Option::is_none")]`
//! fields — canonicalization only has to re-sort what serde already produced.

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Render `value` as canonical JSON: a compact string with object keys
/// sorted by byte order and no insignificant whitespace.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;
    let sorted = sort_value(json);
    serde_json::to_string(&sorted).map_err(|e| CoreError::EncodingError(e.to_string()))
}

fn sort_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, sort_value(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_value).collect()),
        other => other,
    }
}

/// Lowercase hex-encoded SHA-256 digest of the UTF-8 encoding of `s`.
pub fn sha256_hex(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    hex::encode(digest)
}

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex-encoded HMAC-SHA-256 of `message`, keyed by `key`.
pub fn hmac_sha256_hex(key: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of two hex MAC strings.
///
/// Short-circuiting on length is safe since the length of a hex-encoded
/// MAC is public (fixed by the algorithm), only the content is secret.
pub fn mac_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Round `usdc` to the nearest integer number of micro-USDC
/// (`usdc * 1_000_000`). Rejects non-finite, non-positive, or
/// zero-rounding input.
pub fn to_micro_usdc(usdc: f64) -> Result<u64> {
    if !usdc.is_finite() || usdc <= 0.0 {
        return Err(CoreError::InvalidAmount(usdc));
    }
    let micro = (usdc * 1_000_000.0).round();
    if micro < 1.0 {
        return Err(CoreError::InvalidAmount(usdc));
    }
    Ok(micro as u64)
}

/// Format a micro-USDC integer as a fixed-decimal USDC string with exactly
/// six fractional digits (e.g. `250_000` -> `"0.250000"`).
pub fn format_usdc(micro: u64) -> String {
    format!("{}.{:06}", micro / 1_000_000, micro % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_sorts_keys_regardless_of_input_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
        assert_eq!(canonicalize(&a).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_preserves_array_order() {
        let v = json!({"items": [3, 1, 2]});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"items":[3,1,2]}"#);
    }

    #[test]
    fn canonical_omits_null_fields() {
        let v = json!({"a": 1, "b": null});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn canonical_sorts_nested_objects() {
        let v = json!({"outer": {"z": 1, "a": 2}});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"outer":{"a":2,"z":1}}"#);
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hmac_is_keyed() {
        let a = hmac_sha256_hex("key1", "message");
        let b = hmac_sha256_hex("key2", "message");
        assert_ne!(a, b);
    }

    #[test]
    fn mac_eq_detects_mismatch() {
        assert!(mac_eq("abcd", "abcd"));
        assert!(!mac_eq("abcd", "abce"));
        assert!(!mac_eq("abc", "abcd"));
    }

    #[test]
    fn to_micro_usdc_rounds_and_rejects_invalid() {
        assert_eq!(to_micro_usdc(0.25).unwrap(), 250_000);
        assert!(to_micro_usdc(0.0).is_err());
        assert!(to_micro_usdc(-1.0).is_err());
        assert!(to_micro_usdc(f64::NAN).is_err());
        assert!(to_micro_usdc(0.0000001).is_err());
    }

    #[test]
    fn format_usdc_has_six_fractional_digits() {
        assert_eq!(format_usdc(250_000), "0.250000");
        assert_eq!(format_usdc(5_000_000), "5.000000");
    }
}
