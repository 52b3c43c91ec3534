//! X3DH-style asynchronous session establishment.
//!
//! ## Protocol Flow
//!
//! 1. **Responder (Bob)** publishes a [`PublicKeyBundle`]: identity key,
//!    signing key, signed pre-key with signature, and one-time pre-keys.
//!
//! 2. **Initiator (Alice)** fetches the bundle, verifies the signature and
//!    performs:
//!    - DH1 = `DH(IK_A, SPK_B)`
//!    - DH2 = `DH(EK_A, IK_B)`
//!    - DH3 = `DH(EK_A, SPK_B)`
//!    - DH4 = `DH(EK_A, OPK_B)` [if OPK available]
//!    - SK = KDF(DH1 || DH2 || DH3 || DH4)
//!
//! 3. **Responder (Bob)** receives the [`HandshakeMessage`] and computes the
//!    same SK with the roles mirrored.
//!
//! Both sides end with a [`Role`] ready to seed a ratchet session.

use crate::bundle::{KeyBundleManager, PublicKeyBundle};
use crate::crypto::{derive_master_secret, SymmetricKey};
use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPair, PublicKey, SecretKey};
use crate::ratchet::Role;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

/// First message from initiator to responder, carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeMessage {
    /// Initiator's ephemeral public key
    pub ephemeral_public_key: PublicKey,

    /// Id of the responder's one-time pre-key that was used, if any
    pub used_one_time_pre_key_index: Option<u32>,

    /// Initiator's identity public key
    pub identity_key: PublicKey,
}

impl HandshakeMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|_| Error::SerializationError)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Result of the initiator's side of the handshake.
#[derive(Debug)]
pub struct InitiatorResult {
    /// Shared secret derived from the DH operations
    pub master_secret: SymmetricKey,

    /// Message to send to the responder
    pub handshake: HandshakeMessage,

    /// `IK_A || IK_B`, bound into every message of the session
    pub associated_data: Vec<u8>,

    /// Ratchet role; the ephemeral key becomes the first sending ratchet key
    pub role: Role,
}

/// Result of the responder's side of the handshake.
#[derive(Debug)]
pub struct ResponderResult {
    /// Shared secret matching the initiator's derivation
    pub master_secret: SymmetricKey,

    /// `IK_A || IK_B`, bound into every message of the session
    pub associated_data: Vec<u8>,

    /// Ratchet role tracking the initiator's ephemeral key
    pub role: Role,
}

fn associated_data(initiator: &PublicKey, responder: &PublicKey) -> Vec<u8> {
    let mut ad = Vec::with_capacity(2 * PublicKey::SIZE);
    ad.extend_from_slice(initiator.as_bytes());
    ad.extend_from_slice(responder.as_bytes());
    ad
}

/// Initiates a session from a peer's published bundle.
///
/// Verifies the bundle signature before any DH is computed, then performs
/// 3 or 4 Diffie-Hellman operations depending on whether the bundle offers
/// a one-time pre-key. The first offered one-time pre-key is used.
pub fn initiate<R: CryptoRngCore>(
    rng: &mut R,
    own_identity: &IdentityKeyPair,
    peer_bundle: &PublicKeyBundle,
) -> Result<InitiatorResult> {
    peer_bundle.verify_signature()?;

    let ephemeral = SecretKey::generate(rng);

    // DH1 = DH(IK_A, SPK_B)
    let dh1 = own_identity
        .secret_key()
        .diffie_hellman(&peer_bundle.signed_pre_key)?;

    // DH2 = DH(EK_A, IK_B)
    let dh2 = ephemeral.diffie_hellman(&peer_bundle.identity_key)?;

    // DH3 = DH(EK_A, SPK_B)
    let dh3 = ephemeral.diffie_hellman(&peer_bundle.signed_pre_key)?;

    // DH4 = DH(EK_A, OPK_B) if one-time prekey available
    let (dh4, used_one_time_pre_key_index) = match peer_bundle.one_time_pre_keys.first() {
        Some(opk) => (Some(ephemeral.diffie_hellman(&opk.key)?), Some(opk.id)),
        None => (None, None),
    };

    let master_secret = derive_master_secret(&dh1, &dh2, &dh3, dh4.as_ref());

    let handshake = HandshakeMessage {
        ephemeral_public_key: ephemeral.public_key(),
        used_one_time_pre_key_index,
        identity_key: *own_identity.public_key(),
    };

    Ok(InitiatorResult {
        master_secret,
        handshake,
        associated_data: associated_data(own_identity.public_key(), &peer_bundle.identity_key),
        role: Role::Initiator {
            sending_ratchet: ephemeral,
        },
    })
}

/// Responds to a handshake using the local key bundle.
///
/// The referenced one-time pre-key is removed from the pool only once the
/// shared secret has been computed.
pub fn respond(
    keys: &mut KeyBundleManager,
    handshake: &HandshakeMessage,
    peer_identity_key: &PublicKey,
) -> Result<ResponderResult> {
    if handshake.identity_key != *peer_identity_key {
        return Err(Error::IdentityMismatch);
    }

    let opk = match handshake.used_one_time_pre_key_index {
        Some(index) => Some(
            keys.one_time_prekey(index)
                .ok_or(Error::PreKeyAlreadyConsumed { index })?,
        ),
        None => None,
    };

    let signed_prekey = keys.signed_prekey_secret();

    // DH1 = DH(SPK_B, IK_A)
    let dh1 = signed_prekey.diffie_hellman(peer_identity_key)?;

    // DH2 = DH(IK_B, EK_A)
    let dh2 = keys
        .identity()
        .secret_key()
        .diffie_hellman(&handshake.ephemeral_public_key)?;

    // DH3 = DH(SPK_B, EK_A)
    let dh3 = signed_prekey.diffie_hellman(&handshake.ephemeral_public_key)?;

    // DH4 = DH(OPK_B, EK_A) if one-time prekey was used
    let dh4 = opk
        .map(|opk| opk.diffie_hellman(&handshake.ephemeral_public_key))
        .transpose()?;

    let master_secret = derive_master_secret(&dh1, &dh2, &dh3, dh4.as_ref());

    if let Some(index) = handshake.used_one_time_pre_key_index {
        keys.take_one_time_prekey(index)?;
    }

    Ok(ResponderResult {
        master_secret,
        associated_data: associated_data(peer_identity_key, keys.identity().public_key()),
        role: Role::Responder {
            peer_ratchet_key: handshake.ephemeral_public_key,
        },
    })
}
