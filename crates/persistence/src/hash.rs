//! Deterministic identity hashing for vault-pattern keys.
//!
//! Hub and link primary keys ([`HashKey`]) and satellite change-detection
//! digests ([`HashDiff`]) are SHA-256 digests over the canonical string forms
//! of an ordered list of [`KeyPart`]s joined with `|`.
//!
//! # Join contract
//!
//! Because these digests are primary keys, two logically different inputs must
//! never produce the same joined string:
//!
//! - `\` and `|` inside text components are escaped as `\\` and `\|`.
//! - An absent component is encoded as the reserved token `\N`, which no
//!   escaped text can produce. Absent components are never dropped.
//!
//! Components without `|`, `\` or absent values therefore hash exactly like a
//! plain `|` join of their string forms.
//!
//! Scalars use the string forms keys were originally issued with: booleans
//! are `True` / `False`, and floats always show a fraction or an exponent
//! (`3.0`, `0.5`, `1e+16`, `1.5e-05`).
//!
//! ```
//! use onevault_persistence::hash::{compute_hash_key, KeyPart};
//!
//! let a = compute_hash_key(["tenant-001"]).unwrap();
//! let b = compute_hash_key(["tenant-001"]).unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a.as_bytes().len(), 32);
//!
//! let with_gap = compute_hash_key([KeyPart::from("a"), KeyPart::Null, KeyPart::from("b")]).unwrap();
//! let without = compute_hash_key(["a", "b"]).unwrap();
//! assert_ne!(with_gap, without);
//! ```

use std::borrow::Cow;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{HashError, HashResult};

/// Name of the digest algorithm, as reported to external callers.
pub const HASH_ALGORITHM: &str = "SHA-256";

/// Separator between components in the joined input.
pub const COMPONENT_DELIMITER: char = '|';

/// Reserved token standing in for an absent component.
pub const NULL_TOKEN: &str = "\\N";

/// Width of every digest produced by this module, in bytes.
pub const DIGEST_LEN: usize = 32;

/// Renders a finite float in shortest round-trip form.
///
/// Magnitudes below `1e-4` or from `1e16` up use an exponent with an explicit
/// sign and at least two digits; integral values keep a trailing `.0`.
fn float_repr(value: f64) -> String {
    let scientific = format!("{:e}", value);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if value != 0.0 && !(-4..16).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// One component of a hash input.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart<'a> {
    /// Text, hashed as its UTF-8 bytes (after escaping).
    Text(Cow<'a, str>),
    /// Signed integer in decimal.
    Int(i64),
    /// Unsigned integer in decimal.
    UInt(u64),
    /// Finite float in shortest round-trip form, always with a fraction or
    /// exponent.
    Float(f64),
    /// Boolean as `True` / `False`.
    Bool(bool),
    /// Raw bytes as lowercase hex (e.g. a parent hash key).
    Bytes(Cow<'a, [u8]>),
    /// An absent value.
    Null,
}

impl KeyPart<'_> {
    /// Writes the canonical form of this component into `out`.
    fn write_canonical(&self, index: usize, out: &mut String) -> HashResult<()> {
        match self {
            KeyPart::Text(text) => {
                for ch in text.chars() {
                    if ch == '\\' || ch == COMPONENT_DELIMITER {
                        out.push('\\');
                    }
                    out.push(ch);
                }
            }
            KeyPart::Int(value) => out.push_str(&value.to_string()),
            KeyPart::UInt(value) => out.push_str(&value.to_string()),
            KeyPart::Float(value) => {
                if !value.is_finite() {
                    return Err(HashError::Encoding {
                        index,
                        reason: format!("non-finite float {}", value),
                    });
                }
                out.push_str(&float_repr(*value));
            }
            KeyPart::Bool(value) => out.push_str(if *value { "True" } else { "False" }),
            KeyPart::Bytes(bytes) => out.push_str(&hex::encode(bytes)),
            KeyPart::Null => out.push_str(NULL_TOKEN),
        }
        Ok(())
    }

    /// Converts a JSON scalar into a component.
    ///
    /// Arrays and objects have no canonical scalar form and are rejected.
    pub fn from_json(index: usize, value: &serde_json::Value) -> HashResult<KeyPart<'_>> {
        use serde_json::Value;

        match value {
            Value::Null => Ok(KeyPart::Null),
            Value::Bool(b) => Ok(KeyPart::Bool(*b)),
            Value::String(s) => Ok(KeyPart::Text(Cow::Borrowed(s))),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(KeyPart::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(KeyPart::UInt(u))
                } else if let Some(f) = n.as_f64() {
                    Ok(KeyPart::Float(f))
                } else {
                    Err(HashError::Encoding {
                        index,
                        reason: format!("unrepresentable number {}", n),
                    })
                }
            }
            Value::Array(_) | Value::Object(_) => Err(HashError::Encoding {
                index,
                reason: "only scalar values can be hashed".to_string(),
            }),
        }
    }
}

impl<'a> From<&'a str> for KeyPart<'a> {
    fn from(value: &'a str) -> Self {
        KeyPart::Text(Cow::Borrowed(value))
    }
}

impl<'a> From<&'a String> for KeyPart<'a> {
    fn from(value: &'a String) -> Self {
        KeyPart::Text(Cow::Borrowed(value.as_str()))
    }
}

impl From<String> for KeyPart<'static> {
    fn from(value: String) -> Self {
        KeyPart::Text(Cow::Owned(value))
    }
}

impl From<i64> for KeyPart<'static> {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<i32> for KeyPart<'static> {
    fn from(value: i32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<u64> for KeyPart<'static> {
    fn from(value: u64) -> Self {
        KeyPart::UInt(value)
    }
}

impl From<u32> for KeyPart<'static> {
    fn from(value: u32) -> Self {
        KeyPart::UInt(u64::from(value))
    }
}

impl From<f64> for KeyPart<'static> {
    fn from(value: f64) -> Self {
        KeyPart::Float(value)
    }
}

impl From<bool> for KeyPart<'static> {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

impl<'a> From<&'a [u8]> for KeyPart<'a> {
    fn from(value: &'a [u8]) -> Self {
        KeyPart::Bytes(Cow::Borrowed(value))
    }
}

impl<'a> From<&'a HashKey> for KeyPart<'a> {
    fn from(value: &'a HashKey) -> Self {
        KeyPart::Bytes(Cow::Borrowed(value.as_bytes()))
    }
}

impl<'a> From<&'a DateTime<Utc>> for KeyPart<'a> {
    fn from(value: &'a DateTime<Utc>) -> Self {
        KeyPart::Text(Cow::Owned(value.to_rfc3339()))
    }
}

impl<'a, T> From<Option<T>> for KeyPart<'a>
where
    T: Into<KeyPart<'a>>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(KeyPart::Null, Into::into)
    }
}

macro_rules! digest_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; DIGEST_LEN]);

        impl $name {
            /// Wraps raw digest bytes.
            pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
                Self(bytes)
            }

            /// Returns the digest bytes.
            pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
                &self.0
            }

            /// Returns the digest as lowercase hex.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Returns the digest as standard base64.
            pub fn to_base64(&self) -> String {
                BASE64.encode(self.0)
            }

            /// Parses a digest from hex.
            pub fn from_hex(value: &str) -> Result<Self, hex::FromHexError> {
                let mut bytes = [0u8; DIGEST_LEN];
                hex::decode_to_slice(value, &mut bytes)?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                Self::from_hex(&value).map_err(serde::de::Error::custom)
            }
        }
    };
}

digest_type!(
    /// A hub or link hash key: the primary key of a vault-pattern record.
    HashKey
);

digest_type!(
    /// A satellite hash diff used for change detection.
    HashDiff
);

/// Builds the canonical joined input for a list of components.
pub fn canonical_input<'a, I, P>(parts: I) -> HashResult<String>
where
    I: IntoIterator<Item = P>,
    P: Into<KeyPart<'a>>,
{
    let mut joined = String::new();
    let mut count = 0usize;
    for (index, part) in parts.into_iter().enumerate() {
        if index > 0 {
            joined.push(COMPONENT_DELIMITER);
        }
        part.into().write_canonical(index, &mut joined)?;
        count += 1;
    }
    if count == 0 {
        return Err(HashError::EmptyInput);
    }
    Ok(joined)
}

fn digest<'a, I, P>(parts: I) -> HashResult<[u8; DIGEST_LEN]>
where
    I: IntoIterator<Item = P>,
    P: Into<KeyPart<'a>>,
{
    let joined = canonical_input(parts)?;
    Ok(Sha256::digest(joined.as_bytes()).into())
}

/// Computes a hub or link hash key from ordered business-key components.
pub fn compute_hash_key<'a, I, P>(parts: I) -> HashResult<HashKey>
where
    I: IntoIterator<Item = P>,
    P: Into<KeyPart<'a>>,
{
    digest(parts).map(HashKey)
}

/// Computes a satellite hash diff from ordered descriptive attributes.
///
/// Uses the same join contract as [`compute_hash_key`]; absent attributes are
/// encoded, not skipped, so clearing a field is observed as a change.
pub fn compute_hash_diff<'a, I, P>(parts: I) -> HashResult<HashDiff>
where
    I: IntoIterator<Item = P>,
    P: Into<KeyPart<'a>>,
{
    digest(parts).map(HashDiff)
}

/// Result of hashing a list of externally supplied scalar values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashResponse {
    /// Digest as lowercase hex.
    pub hash_hex: String,
    /// Digest as standard base64.
    pub hash_base64: String,
    /// The input values, echoed back.
    pub input_values: Vec<serde_json::Value>,
    /// Digest algorithm name.
    pub algorithm: String,
    /// When the digest was computed.
    pub computed_at: DateTime<Utc>,
}

/// Hashes a list of JSON scalars into a hash key, for callers that need a
/// vault-pattern key without constructing a record.
pub fn hash_values(values: &[serde_json::Value]) -> HashResult<HashResponse> {
    let parts = values
        .iter()
        .enumerate()
        .map(|(index, value)| KeyPart::from_json(index, value))
        .collect::<HashResult<Vec<_>>>()?;
    let key = compute_hash_key(parts)?;

    Ok(HashResponse {
        hash_hex: key.to_hex(),
        hash_base64: key.to_base64(),
        input_values: values.to_vec(),
        algorithm: HASH_ALGORITHM.to_string(),
        computed_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_key_is_deterministic() {
        let first = compute_hash_key(["tenant-001"]).unwrap();
        let second = compute_hash_key(["tenant-001"]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_known_digest_for_plain_join() {
        // sha256("tenant-001|acme")
        let key = compute_hash_key(["tenant-001", "acme"]).unwrap();
        let expected: [u8; 32] = Sha256::digest(b"tenant-001|acme").into();
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn test_order_matters() {
        let ab = compute_hash_key(["a", "b"]).unwrap();
        let ba = compute_hash_key(["b", "a"]).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_digest_width_is_fixed() {
        let short = compute_hash_key(["x"]).unwrap();
        let long_input = "y".repeat(100_000);
        let long = compute_hash_key([long_input.as_str()]).unwrap();
        assert_eq!(short.as_bytes().len(), DIGEST_LEN);
        assert_eq!(long.as_bytes().len(), DIGEST_LEN);
    }

    #[test]
    fn test_empty_component_is_distinct() {
        let two = compute_hash_key(["a", "b"]).unwrap();
        let three = compute_hash_key(["a", "", "b"]).unwrap();
        assert_ne!(two, three);
    }

    #[test]
    fn test_null_is_encoded_not_dropped() {
        let with_null =
            compute_hash_diff([KeyPart::from("a"), KeyPart::Null, KeyPart::from("b")]).unwrap();
        let without = compute_hash_diff(["a", "b"]).unwrap();
        assert_ne!(with_null, without);

        let with_empty = compute_hash_diff(["a", "", "b"]).unwrap();
        assert_ne!(with_null, with_empty);
    }

    #[test]
    fn test_null_token_cannot_be_forged_by_text() {
        let null = compute_hash_key([KeyPart::Null]).unwrap();
        let text = compute_hash_key([NULL_TOKEN]).unwrap();
        assert_ne!(null, text);
    }

    #[test]
    fn test_delimiter_inside_text_does_not_collide() {
        let joined = compute_hash_key(["a|b"]).unwrap();
        let split = compute_hash_key(["a", "b"]).unwrap();
        assert_ne!(joined, split);

        let escaped = canonical_input(["a|b", "c\\"]).unwrap();
        assert_eq!(escaped, "a\\|b|c\\\\");
    }

    #[test]
    fn test_option_conversion() {
        let some: Option<&str> = Some("x");
        let none: Option<&str> = None;
        assert_eq!(canonical_input([some]).unwrap(), "x");
        assert_eq!(canonical_input([none]).unwrap(), NULL_TOKEN);
    }

    #[test]
    fn test_scalar_canonical_forms() {
        let input = canonical_input([
            KeyPart::from(42i64),
            KeyPart::from(7u32),
            KeyPart::from(1.5f64),
            KeyPart::from(true),
            KeyPart::from(&[0xabu8, 0x01][..]),
        ])
        .unwrap();
        assert_eq!(input, "42|7|1.5|True|ab01");
    }

    #[test]
    fn test_float_forms() {
        assert_eq!(float_repr(3.0), "3.0");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(9999999999999998.0), "9999999999999998.0");
        assert_eq!(float_repr(2.5e300), "2.5e+300");

        let from_json = hash_values(&[json!(3.0), json!(false)]).unwrap();
        let direct = compute_hash_key([KeyPart::from("3.0"), KeyPart::from("False")]).unwrap();
        assert_eq!(from_json.hash_hex, direct.to_hex());
    }

    #[test]
    fn test_non_finite_float_is_encoding_error() {
        let err = compute_hash_key([KeyPart::from("a"), KeyPart::from(f64::NAN)]).unwrap_err();
        assert!(matches!(err, HashError::Encoding { index: 1, .. }));
    }

    #[test]
    fn test_empty_input_rejected() {
        let parts: Vec<KeyPart<'_>> = Vec::new();
        assert_eq!(compute_hash_key(parts).unwrap_err(), HashError::EmptyInput);
    }

    #[test]
    fn test_hex_roundtrip_and_serde() {
        let key = compute_hash_key(["acme"]).unwrap();
        assert_eq!(HashKey::from_hex(&key.to_hex()).unwrap(), key);

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_hex()));
        let parsed: HashKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_hash_values_endpoint_surface() {
        let response = hash_values(&[json!("tenant-001"), json!(3), json!(null)]).unwrap();
        assert_eq!(response.algorithm, "SHA-256");
        assert_eq!(response.hash_hex.len(), 64);
        assert_eq!(response.input_values.len(), 3);

        let direct =
            compute_hash_key([KeyPart::from("tenant-001"), KeyPart::Int(3), KeyPart::Null])
                .unwrap();
        assert_eq!(response.hash_hex, direct.to_hex());
        assert_eq!(response.hash_base64, direct.to_base64());
    }

    #[test]
    fn test_hash_values_rejects_non_scalars_and_empty() {
        assert!(matches!(
            hash_values(&[json!({"a": 1})]),
            Err(HashError::Encoding { index: 0, .. })
        ));
        assert_eq!(hash_values(&[]).unwrap_err(), HashError::EmptyInput);
    }
}
