//! Long-term key material and the publishable pre-key bundle.
//!
//! [`KeyBundleManager`] exclusively owns the identity key, the signing key,
//! the signed pre-key and the one-time pre-key pool. It never persists
//! anything itself: [`KeyBundleManager::to_stored`] hands the private
//! material to the key manager as a [`StoredKeyBundle`].
//!
//! ## Signed pre-key binding
//!
//! ```text
//! signature = Sign(signing_key, LABEL || SPKI(identity_key) || SPKI(signed_prekey))
//! ```
//!
//! The identity key is part of the signed message, so substituting either
//! the identity key or the signed pre-key in a published bundle breaks the
//! signature.

use crate::config::BundleConfig;
use crate::encoding::base64_array;
use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPair, PublicKey, SecretKey, SigningKeyPair, SigningPublicKey, SIGNATURE_LENGTH};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SIGNED_PREKEY_LABEL: &[u8] = b"relay-ratchet/signed-prekey/v1";

/// Current layout version of [`StoredKeyBundle`].
pub const STORED_BUNDLE_VERSION: u8 = 1;

fn signed_prekey_message(identity_key: &PublicKey, signed_prekey: &PublicKey) -> Vec<u8> {
    let mut message = Vec::with_capacity(SIGNED_PREKEY_LABEL.len() + 88);
    message.extend_from_slice(SIGNED_PREKEY_LABEL);
    message.extend_from_slice(&identity_key.to_spki());
    message.extend_from_slice(&signed_prekey.to_spki());
    message
}

/// Public half of a one-time pre-key, as published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKeyPublic {
    pub id: u32,
    pub key: PublicKey,
}

/// Pre-key bundle published for peers to start sessions with us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyBundle {
    /// Long-term X25519 identity key
    pub identity_key: PublicKey,

    /// Ed25519 key that signs the signed pre-key
    pub signing_key: SigningPublicKey,

    /// Medium-term X25519 signed pre-key
    pub signed_pre_key: PublicKey,

    #[serde(with = "base64_array")]
    pub signed_pre_key_signature: [u8; SIGNATURE_LENGTH],

    /// Available one-time pre-keys, oldest first
    pub one_time_pre_keys: Vec<OneTimePreKeyPublic>,
}

impl PublicKeyBundle {
    /// Verifies the signed pre-key signature against the bundle's signing key.
    ///
    /// # Returns
    /// - `Ok(())` if signature is valid
    /// - `Err(Error::InvalidBundleSignature)` if verification fails
    pub fn verify_signature(&self) -> Result<()> {
        let message = signed_prekey_message(&self.identity_key, &self.signed_pre_key);
        self.signing_key
            .verify(&message, &self.signed_pre_key_signature)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|_| Error::SerializationError)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

struct OneTimePreKey {
    id: u32,
    secret: SecretKey,
}

struct SignedPreKey {
    secret: SecretKey,
    signature: [u8; SIGNATURE_LENGTH],
}

impl SignedPreKey {
    fn generate<R: CryptoRngCore>(
        rng: &mut R,
        identity: &IdentityKeyPair,
        signing: &SigningKeyPair,
    ) -> Self {
        let secret = SecretKey::generate(rng);
        let signature = signing.sign(&signed_prekey_message(
            identity.public_key(),
            &secret.public_key(),
        ));
        Self { secret, signature }
    }
}

/// Owner of all long-term and pre-key material for one local user.
pub struct KeyBundleManager {
    identity: IdentityKeyPair,
    signing: SigningKeyPair,
    signed_prekey: SignedPreKey,
    one_time_prekeys: Vec<OneTimePreKey>,
    next_one_time_prekey_id: u32,
}

impl KeyBundleManager {
    /// Generates fresh key material and returns the bundle to publish.
    pub fn initialize<R: CryptoRngCore>(
        rng: &mut R,
        config: &BundleConfig,
    ) -> Result<(Self, PublicKeyBundle)> {
        let identity = IdentityKeyPair::generate(rng);
        let signing = SigningKeyPair::generate(rng);
        let signed_prekey = SignedPreKey::generate(rng, &identity, &signing);

        let mut manager = Self {
            identity,
            signing,
            signed_prekey,
            one_time_prekeys: Vec::new(),
            next_one_time_prekey_id: 0,
        };
        manager.replenish_one_time_prekeys(rng, config.one_time_prekey_count)?;

        tracing::debug!(
            one_time_prekeys = manager.one_time_prekeys.len(),
            "generated key bundle"
        );

        let bundle = manager.public_bundle();
        Ok((manager, bundle))
    }

    /// Returns the current public bundle for publication.
    #[must_use]
    pub fn public_bundle(&self) -> PublicKeyBundle {
        PublicKeyBundle {
            identity_key: *self.identity.public_key(),
            signing_key: *self.signing.public_key(),
            signed_pre_key: self.signed_prekey.secret.public_key(),
            signed_pre_key_signature: self.signed_prekey.signature,
            one_time_pre_keys: self
                .one_time_prekeys
                .iter()
                .map(|opk| OneTimePreKeyPublic {
                    id: opk.id,
                    key: opk.secret.public_key(),
                })
                .collect(),
        }
    }

    /// Appends `count` new one-time pre-keys with fresh ids.
    pub fn replenish_one_time_prekeys<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        count: u32,
    ) -> Result<()> {
        for _ in 0..count {
            let id = self.next_one_time_prekey_id;
            self.next_one_time_prekey_id = id.checked_add(1).ok_or(Error::CounterExhausted)?;
            self.one_time_prekeys.push(OneTimePreKey {
                id,
                secret: SecretKey::generate(rng),
            });
        }
        Ok(())
    }

    /// Replaces the signed pre-key. Established sessions are unaffected.
    pub fn rotate_signed_prekey<R: CryptoRngCore>(&mut self, rng: &mut R) {
        self.signed_prekey = SignedPreKey::generate(rng, &self.identity, &self.signing);
        tracing::info!("rotated signed pre-key");
    }

    /// Removes and returns the one-time pre-key with `id`.
    pub fn take_one_time_prekey(&mut self, id: u32) -> Result<SecretKey> {
        let position = self
            .one_time_prekeys
            .iter()
            .position(|opk| opk.id == id)
            .ok_or(Error::PreKeyAlreadyConsumed { index: id })?;
        Ok(self.one_time_prekeys.remove(position).secret)
    }

    pub(crate) fn one_time_prekey(&self, id: u32) -> Option<&SecretKey> {
        self.one_time_prekeys
            .iter()
            .find(|opk| opk.id == id)
            .map(|opk| &opk.secret)
    }

    /// Number of unconsumed one-time pre-keys.
    #[must_use]
    pub fn one_time_prekey_count(&self) -> usize {
        self.one_time_prekeys.len()
    }

    /// Whether the pool has dropped below `threshold`.
    #[must_use]
    pub fn needs_replenishment(&self, threshold: u32) -> bool {
        self.one_time_prekeys.len() < threshold as usize
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    pub(crate) fn signed_prekey_secret(&self) -> &SecretKey {
        &self.signed_prekey.secret
    }

    /// Exports all private material for encrypted storage.
    #[must_use]
    pub fn to_stored(&self) -> StoredKeyBundle {
        StoredKeyBundle {
            version: STORED_BUNDLE_VERSION,
            identity_secret: self.identity.secret_key().to_bytes(),
            signing_secret: self.signing.to_bytes(),
            signing_public: self.signing.public_key().to_bytes(),
            signed_prekey_secret: self.signed_prekey.secret.to_bytes(),
            signed_prekey_signature: self.signed_prekey.signature,
            one_time_prekeys: self
                .one_time_prekeys
                .iter()
                .map(|opk| StoredOneTimePreKey {
                    id: opk.id,
                    secret: opk.secret.to_bytes(),
                })
                .collect(),
            next_one_time_prekey_id: self.next_one_time_prekey_id,
        }
    }

    /// Restores a manager from stored material after validating it.
    pub fn from_stored(stored: &StoredKeyBundle) -> Result<Self> {
        stored.validate()?;

        let identity = IdentityKeyPair::from_secret(SecretKey::from_bytes(stored.identity_secret));
        let signing = SigningKeyPair::from_bytes(&stored.signing_secret);
        let signed_prekey = SignedPreKey {
            secret: SecretKey::from_bytes(stored.signed_prekey_secret),
            signature: stored.signed_prekey_signature,
        };
        let one_time_prekeys = stored
            .one_time_prekeys
            .iter()
            .map(|opk| OneTimePreKey {
                id: opk.id,
                secret: SecretKey::from_bytes(opk.secret),
            })
            .collect();

        Ok(Self {
            identity,
            signing,
            signed_prekey,
            one_time_prekeys,
            next_one_time_prekey_id: stored.next_one_time_prekey_id,
        })
    }
}

impl std::fmt::Debug for KeyBundleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBundleManager")
            .field("identity", self.identity.public_key())
            .field("one_time_prekeys", &self.one_time_prekeys.len())
            .field("next_one_time_prekey_id", &self.next_one_time_prekey_id)
            .finish_non_exhaustive()
    }
}

/// Stored form of a one-time pre-key.
#[derive(Clone, PartialEq, Eq, Zeroize, bincode::Encode, bincode::Decode)]
pub struct StoredOneTimePreKey {
    pub id: u32,
    pub secret: [u8; 32],
}

/// Private serialization of everything a [`KeyBundleManager`] owns.
///
/// Only ever written to storage after encryption by the key manager.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, bincode::Encode, bincode::Decode)]
pub struct StoredKeyBundle {
    pub version: u8,
    pub identity_secret: [u8; 32],
    pub signing_secret: [u8; 32],
    pub signing_public: [u8; 32],
    pub signed_prekey_secret: [u8; 32],
    pub signed_prekey_signature: [u8; SIGNATURE_LENGTH],
    pub one_time_prekeys: Vec<StoredOneTimePreKey>,
    pub next_one_time_prekey_id: u32,
}

impl StoredKeyBundle {
    /// Structural integrity check.
    ///
    /// Confirms the layout version, that every secret is non-zero, that the
    /// signing seed reproduces the stored public signing key, that the signed
    /// pre-key signature verifies, and that one-time pre-key ids are unique
    /// and below the next-id counter.
    pub fn validate(&self) -> Result<()> {
        if self.version != STORED_BUNDLE_VERSION {
            return Err(Error::InvalidKeyMaterial(format!(
                "unsupported bundle version {}",
                self.version
            )));
        }

        let secrets = [
            &self.identity_secret,
            &self.signing_secret,
            &self.signed_prekey_secret,
        ];
        if secrets.iter().any(|s| s.iter().all(|b| *b == 0)) {
            return Err(Error::InvalidSecretKey);
        }

        let signing = SigningKeyPair::from_bytes(&self.signing_secret);
        let stored_public = SigningPublicKey::from_bytes(&self.signing_public)?;
        if *signing.public_key() != stored_public {
            return Err(Error::InvalidKeyMaterial(
                "signing key does not match its public half".into(),
            ));
        }

        let identity_public = SecretKey::from_bytes(self.identity_secret).public_key();
        let signed_prekey_public = SecretKey::from_bytes(self.signed_prekey_secret).public_key();
        stored_public
            .verify(
                &signed_prekey_message(&identity_public, &signed_prekey_public),
                &self.signed_prekey_signature,
            )
            .map_err(|_| Error::InvalidKeyMaterial("signed pre-key signature invalid".into()))?;

        let mut seen = HashSet::with_capacity(self.one_time_prekeys.len());
        for opk in &self.one_time_prekeys {
            if opk.id >= self.next_one_time_prekey_id || !seen.insert(opk.id) {
                return Err(Error::InvalidKeyMaterial(format!(
                    "one-time pre-key id {} is duplicated or out of range",
                    opk.id
                )));
            }
            if opk.secret.iter().all(|b| *b == 0) {
                return Err(Error::InvalidSecretKey);
            }
        }

        Ok(())
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (bundle, read) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
        if read != bytes.len() {
            return Err(Error::DeserializationError);
        }
        Ok(bundle)
    }
}

impl std::fmt::Debug for StoredKeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKeyBundle")
            .field("version", &self.version)
            .field("one_time_prekeys", &self.one_time_prekeys.len())
            .field("next_one_time_prekey_id", &self.next_one_time_prekey_id)
            .finish_non_exhaustive()
    }
}
