//! Byte/string codecs used across the protocol.
//!
//! Wire rules (contract):
//!   - base64 uses the STANDARD alphabet with `=` padding
//!   - hex is lowercase without separators
//!
//! Round-trip laws: `from_b64(to_b64(x)) == x`, `from_hex(to_hex(x)) == x`,
//! empty input round-trips to itself.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::CryptoError;

pub fn to_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn from_b64(s: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD.decode(s).map_err(CryptoError::Base64Decode)
}

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(s).map_err(CryptoError::HexDecode)
}

/// Join byte views into one contiguous buffer (DH output concatenation).
pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(len);
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

pub fn to_array32(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))
}

pub fn to_array64(bytes: &[u8]) -> Result<[u8; 64], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("expected 64 bytes, got {}", bytes.len())))
}

/// Serde adapter: `[u8; 32]` as padded standard-alphabet base64.
pub mod b64_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_b64(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = super::from_b64(&s).map_err(serde::de::Error::custom)?;
        super::to_array32(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `[u8; 64]` as padded standard-alphabet base64
/// (Ed25519 signatures).
pub mod b64_array64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_b64(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = super::from_b64(&s).map_err(serde::de::Error::custom)?;
        super::to_array64(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Option<[u8; 32]>` as optional base64.
pub mod b64_array_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_some(&super::to_b64(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(None),
            Some(s) => {
                let bytes = super::from_b64(&s).map_err(serde::de::Error::custom)?;
                Ok(Some(
                    super::to_array32(&bytes).map_err(serde::de::Error::custom)?,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b64_roundtrip() {
        let data = vec![0u8, 1, 2, 254, 255];
        let encoded = to_b64(&data);
        assert_eq!(from_b64(&encoded).unwrap(), data);
    }

    #[test]
    fn b64_uses_standard_alphabet_with_padding() {
        // 0xfb 0xff encodes to "+/8=" in the standard alphabet
        assert_eq!(to_b64(&[0xfb, 0xff]), "+/8=");
    }

    #[test]
    fn hex_roundtrip_lowercase() {
        let data = vec![0xAB, 0xCD, 0x01];
        let encoded = to_hex(&data);
        assert_eq!(encoded, "abcd01");
        assert_eq!(from_hex(&encoded).unwrap(), data);
    }

    #[test]
    fn empty_input_roundtrips() {
        assert_eq!(from_b64(&to_b64(&[])).unwrap(), Vec::<u8>::new());
        assert_eq!(from_hex(&to_hex(&[])).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn concat_joins_views() {
        assert_eq!(concat(&[&[1, 2], &[], &[3]]), vec![1, 2, 3]);
    }

    #[test]
    fn array_views_reject_wrong_length() {
        assert!(to_array32(&[0u8; 31]).is_err());
        assert!(to_array64(&[0u8; 65]).is_err());
        assert!(to_array32(&[7u8; 32]).is_ok());
    }
}
