//! Serialization edge: SPKI public-key encoding and base64 for JSON payloads.
//!
//! Public keys leave the crate as DER `SubjectPublicKeyInfo` (RFC 8410), so a
//! host can hand them to any standard crypto provider. Inside the crate keys
//! stay as fixed 32-byte arrays.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Length of an RFC 8410 SPKI document for a 32-byte curve25519-family key.
pub const SPKI_LENGTH: usize = 44;

const SPKI_HEADER_LENGTH: usize = SPKI_LENGTH - 32;

// SEQUENCE { SEQUENCE { OID }, BIT STRING (0 unused bits) }
const X25519_SPKI_HEADER: [u8; SPKI_HEADER_LENGTH] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00,
];
const ED25519_SPKI_HEADER: [u8; SPKI_HEADER_LENGTH] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Algorithm identifier carried in an SPKI document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    X25519,
    Ed25519,
}

impl KeyAlgorithm {
    fn header(self) -> &'static [u8; SPKI_HEADER_LENGTH] {
        match self {
            KeyAlgorithm::X25519 => &X25519_SPKI_HEADER,
            KeyAlgorithm::Ed25519 => &ED25519_SPKI_HEADER,
        }
    }
}

/// Wraps a raw public key in an SPKI document.
#[must_use]
pub fn to_spki(algorithm: KeyAlgorithm, raw: &[u8; 32]) -> [u8; SPKI_LENGTH] {
    let mut out = [0u8; SPKI_LENGTH];
    out[..SPKI_HEADER_LENGTH].copy_from_slice(algorithm.header());
    out[SPKI_HEADER_LENGTH..].copy_from_slice(raw);
    out
}

/// Extracts the raw public key from an SPKI document of the expected algorithm.
pub fn from_spki(algorithm: KeyAlgorithm, der: &[u8]) -> Result<[u8; 32]> {
    if der.len() != SPKI_LENGTH {
        return Err(Error::InvalidEncoding(format!(
            "SPKI length {} (expected {SPKI_LENGTH})",
            der.len()
        )));
    }
    if der[..SPKI_HEADER_LENGTH] != algorithm.header()[..] {
        return Err(Error::InvalidEncoding(format!(
            "SPKI is not an {algorithm:?} key"
        )));
    }
    der[SPKI_HEADER_LENGTH..]
        .try_into()
        .map_err(|_| Error::InvalidPublicKey)
}

/// Standard-alphabet base64 with padding.
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(text.trim())?)
}

/// Decodes base64 into a fixed-size array.
pub fn decode_base64_array<const N: usize>(text: &str) -> Result<[u8; N]> {
    let bytes = decode_base64(text)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| Error::InvalidEncoding(format!("expected {N} bytes, got {len}")))
}

/// `#[serde(with = "base64_bytes")]` for `Vec<u8>` fields.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode_base64(&text).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "base64_array")]` for `[u8; N]` fields.
pub mod base64_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode_base64_array(&text).map_err(serde::de::Error::custom)
    }
}
