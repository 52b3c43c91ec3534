//! Cryptographic primitives for the handshake, the ratchet and key storage.
//!
//! Everything above this module is primitive-agnostic: it sees only
//! [`SymmetricKey`], [`DhOutput`] and the functions below.

use crate::config::KdfParams;
use crate::error::{Error, Result};
use crate::keys::DhOutput;

use hkdf::Hkdf;
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

const X3DH_INFO: &[u8] = b"relay-ratchet/x3dh/v1";
const SEED_INFO: &[u8] = b"relay-ratchet/ratchet-seed/v1";
const ROOT_INFO: &[u8] = b"relay-ratchet/root/v1";
const MESSAGE_INFO: &[u8] = b"relay-ratchet/message";
const CHAIN_ADVANCE_INFO: &[u8] = b"chain_advance";

pub const KEY_SIZE_32: usize = 32;
pub const KEY_SIZE_64: usize = 64;
pub const TAG_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12;
pub const CHECKSUM_SIZE: usize = 32;

/// 256-bit symmetric key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE_32]);

impl SymmetricKey {
    /// Creates a symmetric key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(bytes)
    }

    /// Returns the key as a byte array reference.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// Splits a 64-byte HKDF output into two keys and wipes the buffer.
fn split_pair(mut output: [u8; KEY_SIZE_64]) -> (SymmetricKey, SymmetricKey) {
    let mut first = [0u8; KEY_SIZE_32];
    let mut second = [0u8; KEY_SIZE_32];
    first.copy_from_slice(&output[..KEY_SIZE_32]);
    second.copy_from_slice(&output[KEY_SIZE_32..]);
    output.zeroize();
    (SymmetricKey(first), SymmetricKey(second))
}

/// Derives the handshake master secret.
///
/// Computes `SK = HKDF(F || DH1 || DH2 || DH3 || [DH4])` with a zero salt,
/// where `F = 0xFF^32` separates the input from any other use of the curve.
/// The fourth DH output is present only when a one-time pre-key was used.
///
/// # Panics
///
/// Never panics in practice. The internal `expect()` is only a safeguard
/// for the HKDF expand operation with a fixed 32-byte output length,
/// which is always valid.
#[must_use]
pub fn derive_master_secret(
    dh1: &DhOutput,
    dh2: &DhOutput,
    dh3: &DhOutput,
    dh4: Option<&DhOutput>,
) -> SymmetricKey {
    const F: [u8; 32] = [0xFF; 32];

    let mut ikm = [0u8; 32 + 32 * 4];
    let mut len = 0;

    for part in [&F, dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes()] {
        ikm[len..len + 32].copy_from_slice(part);
        len += 32;
    }

    if let Some(dh4) = dh4 {
        ikm[len..len + 32].copy_from_slice(dh4.as_bytes());
        len += 32;
    }

    let salt = [0u8; 32];
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), &ikm[..len]);

    let mut output = [0u8; KEY_SIZE_32];
    // SAFETY: 32-byte output is always valid for HKDF-SHA256
    hkdf.expand(X3DH_INFO, &mut output)
        .expect("32-byte HKDF output is always valid");

    ikm.zeroize();
    SymmetricKey(output)
}

/// Seeds a ratchet session from the master secret.
///
/// Returns `(root_key, initial_chain_key)`. The initiator sends on the
/// initial chain, the responder receives on it.
///
/// # Panics
///
/// Never panics in practice; see [`derive_master_secret`].
#[must_use]
pub fn kdf_seed(master_secret: &SymmetricKey) -> (SymmetricKey, SymmetricKey) {
    let salt = [0u8; 32];
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), master_secret.as_bytes());

    let mut output = [0u8; KEY_SIZE_64];
    // SAFETY: 64-byte output is always valid for HKDF-SHA256
    hkdf.expand(SEED_INFO, &mut output)
        .expect("64-byte HKDF output is always valid");

    split_pair(output)
}

/// Root KDF for a DH ratchet step.
///
/// Computes `(RK', CK) = HKDF(salt = RK, ikm = DH_out)`. Used whenever a new
/// ratchet public key is seen, and once by the responder during seeding.
///
/// # Panics
///
/// Never panics in practice; see [`derive_master_secret`].
#[must_use]
pub fn kdf_root(root_key: &SymmetricKey, dh_output: &DhOutput) -> (SymmetricKey, SymmetricKey) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key.as_bytes()), dh_output.as_bytes());

    let mut output = [0u8; KEY_SIZE_64];
    // SAFETY: 64-byte output is always valid for HKDF-SHA256
    hkdf.expand(ROOT_INFO, &mut output)
        .expect("64-byte HKDF output is always valid");

    split_pair(output)
}

/// Chain KDF for the symmetric ratchet.
///
/// - `MK = HKDF(CK, info = "relay-ratchet/message" || be32(n))`
/// - `CK' = HKDF(CK, info = "chain_advance")`
///
/// Returns `(new_chain_key, message_key)`.
///
/// # Panics
///
/// Never panics in practice; see [`derive_master_secret`].
#[must_use]
pub fn kdf_chain(chain_key: &SymmetricKey, message_number: u32) -> (SymmetricKey, SymmetricKey) {
    let hkdf = Hkdf::<Sha256>::new(None, chain_key.as_bytes());

    let mut info = [0u8; MESSAGE_INFO.len() + 4];
    info[..MESSAGE_INFO.len()].copy_from_slice(MESSAGE_INFO);
    info[MESSAGE_INFO.len()..].copy_from_slice(&message_number.to_be_bytes());

    let mut message_key = [0u8; KEY_SIZE_32];
    // SAFETY: 32-byte output is always valid for HKDF-SHA256
    hkdf.expand(&info, &mut message_key)
        .expect("32-byte HKDF output is always valid");

    let mut next_chain = [0u8; KEY_SIZE_32];
    hkdf.expand(CHAIN_ADVANCE_INFO, &mut next_chain)
        .expect("32-byte HKDF output is always valid");

    (SymmetricKey(next_chain), SymmetricKey(message_key))
}

/// Derives a key from a low-entropy secret with Argon2id.
pub fn derive_password_key(
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<SymmetricKey> {
    use argon2::{Algorithm, Argon2, Params, Version};

    params.validate()?;
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE_32),
    )?;
    let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE_32];
    hasher.hash_password_into(secret, salt, &mut key)?;
    Ok(SymmetricKey(key))
}

/// SHA-256 digest used as an integrity checksum.
#[must_use]
pub fn checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    Sha256::digest(data).into()
}

/// Compares two checksums in constant time.
#[must_use]
pub fn checksums_match(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Fills a fresh random AEAD nonce.
pub fn random_nonce<R: CryptoRngCore>(rng: &mut R) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts a message using ChaCha20-Poly1305 AEAD.
///
/// # Security Requirements
/// - Nonce must be unique per (key, message) pair
/// - Associated data is authenticated but not encrypted
/// - Returns ciphertext with appended 16-byte authentication tag
///
/// # Errors
/// Returns `Error::CryptoError` if encryption fails (should not occur in practice).
pub fn encrypt(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    use chacha20poly1305::{
        aead::{Aead, Payload},
        ChaCha20Poly1305, Key, KeyInit, Nonce,
    };

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let payload = Payload {
        msg: plaintext,
        aad: associated_data,
    };

    cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| Error::CryptoError)
}

/// Decrypts a message using ChaCha20-Poly1305 AEAD.
///
/// Verifies the authentication tag in constant time before decryption.
/// No plaintext is returned unless the tag verifies.
///
/// # Errors
/// Returns `Error::DecryptionFailed` if the key, nonce, ciphertext or
/// associated data differ from what was used during encryption.
pub fn decrypt(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    use chacha20poly1305::{
        aead::{Aead, Payload},
        ChaCha20Poly1305, Key, KeyInit, Nonce,
    };

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let payload = Payload {
        msg: ciphertext,
        aad: associated_data,
    };

    cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| Error::DecryptionFailed)
}
