//! Error types for session establishment, ratcheting and key storage.

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad class of a failure, so callers can branch without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Key material could not be trusted. Never retried automatically.
    Trust,
    /// Session or handshake state does not allow the operation.
    Protocol,
    /// Storage or key derivation is unavailable.
    Resource,
    /// Malformed input at the serialization boundary.
    Encoding,
}

/// Errors that can occur during protocol operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Signed pre-key signature does not verify against the bundle's signing key
    #[error("invalid bundle signature")]
    InvalidBundleSignature,

    /// Identity key in a handshake does not match the expected peer identity
    #[error("handshake identity key does not match the expected peer identity")]
    IdentityMismatch,

    /// Checksum over decrypted key material does not match
    #[error("key material checksum mismatch")]
    ChecksumMismatch,

    /// Referenced one-time pre-key is missing from the local pool
    #[error("one-time pre-key {index} already consumed or unknown")]
    PreKeyAlreadyConsumed { index: u32 },

    /// No cached key for an old or duplicated message
    #[error("message key not found for message {message_number}")]
    MessageKeyNotFound { message_number: u32 },

    /// AEAD authentication failed
    #[error("decryption failed")]
    DecryptionFailed,

    /// Gap in a receiving chain exceeds the skipped-key limit
    #[error("too many skipped messages ({requested}, limit {limit})")]
    TooManySkippedMessages { requested: u32, limit: usize },

    /// A message counter would wrap around
    #[error("message counter exhausted")]
    CounterExhausted,

    /// No session exists for the peer
    #[error("no session for peer {peer}")]
    SessionNotFound { peer: String },

    /// Neither the primary store nor the backup could be recovered
    #[error("stored keys are unrecoverable")]
    KeysUnrecoverable,

    /// Backup artifact could not be decrypted with the supplied secret
    #[error("backup decryption failed")]
    BackupDecryptionFailed,

    /// Password-based key derivation failed
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Storage backend failure
    #[error("storage error on {key}: {reason}")]
    Storage { key: String, reason: String },

    /// Invalid public key encoding
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Invalid secret key encoding
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// Structurally invalid key material
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Base64 or SPKI decoding failed
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal cryptographic error
    #[error("cryptographic error")]
    CryptoError,

    /// Serialization failed
    #[error("serialization error")]
    SerializationError,

    /// Deserialization failed
    #[error("deserialization error")]
    DeserializationError,
}

impl Error {
    /// Returns the category this error belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidBundleSignature | Error::IdentityMismatch | Error::ChecksumMismatch => {
                ErrorCategory::Trust
            }
            Error::PreKeyAlreadyConsumed { .. }
            | Error::MessageKeyNotFound { .. }
            | Error::DecryptionFailed
            | Error::TooManySkippedMessages { .. }
            | Error::CounterExhausted
            | Error::SessionNotFound { .. } => ErrorCategory::Protocol,
            Error::KeysUnrecoverable
            | Error::BackupDecryptionFailed
            | Error::KeyDerivation(_)
            | Error::Storage { .. }
            | Error::InvalidConfig(_)
            | Error::CryptoError => ErrorCategory::Resource,
            Error::InvalidPublicKey
            | Error::InvalidSecretKey
            | Error::InvalidKeyMaterial(_)
            | Error::InvalidEncoding(_)
            | Error::SerializationError
            | Error::DeserializationError => ErrorCategory::Encoding,
        }
    }

    pub(crate) fn storage(key: &str, reason: impl std::fmt::Display) -> Self {
        Error::Storage {
            key: key.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        Error::InvalidBundleSignature
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(_: bincode::error::EncodeError) -> Self {
        Error::SerializationError
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(_: bincode::error::DecodeError) -> Self {
        Error::DeserializationError
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Error::DeserializationError
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::InvalidEncoding(e.to_string())
    }
}

impl From<argon2::Error> for Error {
    fn from(e: argon2::Error) -> Self {
        Error::KeyDerivation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(Error::InvalidBundleSignature.category(), ErrorCategory::Trust);
        assert_eq!(Error::ChecksumMismatch.category(), ErrorCategory::Trust);
        assert_eq!(
            Error::MessageKeyNotFound { message_number: 3 }.category(),
            ErrorCategory::Protocol
        );
        assert_eq!(Error::DecryptionFailed.category(), ErrorCategory::Protocol);
        assert_eq!(Error::KeysUnrecoverable.category(), ErrorCategory::Resource);
        assert_eq!(
            Error::InvalidEncoding("x".into()).category(),
            ErrorCategory::Encoding
        );
    }

    #[test]
    fn test_display_carries_context() {
        let err = Error::PreKeyAlreadyConsumed { index: 7 };
        assert_eq!(err.to_string(), "one-time pre-key 7 already consumed or unknown");

        let err = Error::storage("alice/keys", "disk full");
        assert_eq!(err.to_string(), "storage error on alice/keys: disk full");
    }
}
