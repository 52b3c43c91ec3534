//! Double Ratchet engine.
//!
//! Provides:
//! - Forward secrecy: every message has its own key, dropped after one use
//! - Break-in recovery: a new DH ratchet step on every change of direction
//! - Out-of-order delivery via a bounded skipped-key cache
//!
//! ## State
//!
//! Each session maintains:
//! - Root key (RK): updated on every DH ratchet step
//! - Sending chain (`CK_s`) with its ratchet key pair and counter
//! - Receiving chain (`CK_r`) with the peer's ratchet key and counter
//!
//! Decryption never mutates the session until the AEAD tag has verified;
//! every chain advance and DH step is staged first and committed afterwards.

use crate::config::RatchetConfig;
use crate::crypto::{self, kdf_chain, kdf_root, kdf_seed, SymmetricKey, NONCE_SIZE};
use crate::encoding::{base64_array, base64_bytes};
use crate::error::{Error, Result};
use crate::keys::{PublicKey, SecretKey};
use crate::skipped::SkippedKeyCache;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Which side of the handshake a session was established from.
///
/// Each variant carries only the key material that side starts with.
pub enum Role {
    /// Started the handshake. The handshake's ephemeral key is the first
    /// sending ratchet key, so the responder can decrypt immediately.
    Initiator { sending_ratchet: SecretKey },
    /// Answered the handshake. Tracks the initiator's ephemeral key as the
    /// first receiving ratchet key.
    Responder { peer_ratchet_key: PublicKey },
}

impl std::fmt::Debug for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator { sending_ratchet } => f
                .debug_struct("Initiator")
                .field("sending_ratchet", &sending_ratchet.public_key())
                .finish(),
            Role::Responder { peer_ratchet_key } => f
                .debug_struct("Responder")
                .field("peer_ratchet_key", peer_ratchet_key)
                .finish(),
        }
    }
}

/// Encrypted message as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// AEAD ciphertext with appended tag
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,

    /// Random 96-bit nonce
    #[serde(with = "base64_array")]
    pub iv: [u8; NONCE_SIZE],

    /// Sender's current ratchet public key
    pub ratchet_public_key: PublicKey,

    /// Position in the sender's current chain, starting at 0
    pub message_number: u32,

    /// Length of the sender's previous sending chain
    pub chain_length: u32,
}

impl Envelope {
    /// Header bytes authenticated alongside the ciphertext.
    ///
    /// Format: `ratchet_public_key (32) || message_number (4, BE) || chain_length (4, BE)`
    fn header_bytes(&self) -> [u8; 40] {
        let mut bytes = [0u8; 40];
        bytes[..32].copy_from_slice(self.ratchet_public_key.as_bytes());
        bytes[32..36].copy_from_slice(&self.message_number.to_be_bytes());
        bytes[36..].copy_from_slice(&self.chain_length.to_be_bytes());
        bytes
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|_| Error::SerializationError)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Clone)]
struct SendingChain {
    ratchet: SecretKey,
    chain_key: SymmetricKey,
    message_number: u32,
}

#[derive(Clone)]
struct ReceivingChain {
    ratchet_key: PublicKey,
    chain_key: SymmetricKey,
    message_number: u32,
}

impl ReceivingChain {
    /// Advances the chain to `until`, collecting the skipped message keys.
    fn skip_to(
        &mut self,
        until: u32,
        limit: usize,
        out: &mut Vec<(PublicKey, u32, SymmetricKey)>,
    ) -> Result<()> {
        if until <= self.message_number {
            return Ok(());
        }

        let gap = until - self.message_number;
        if gap as usize + out.len() > limit {
            return Err(Error::TooManySkippedMessages {
                requested: gap,
                limit,
            });
        }

        for n in self.message_number..until {
            let (next_chain, message_key) = kdf_chain(&self.chain_key, n);
            out.push((self.ratchet_key, n, message_key));
            self.chain_key = next_chain;
        }
        self.message_number = until;
        Ok(())
    }
}

/// Per-peer Double Ratchet session state.
pub struct RatchetState {
    root_key: SymmetricKey,
    sending: SendingChain,
    receiving: Option<ReceivingChain>,
    previous_sending_chain_length: u32,
    skipped: SkippedKeyCache,
    retired_ratchet_keys: VecDeque<PublicKey>,
    associated_data: Vec<u8>,
    config: RatchetConfig,
}

impl RatchetState {
    /// Seeds a session from the handshake's master secret.
    ///
    /// `(RK, CK) = HKDF(master_secret)`. The initiator sends on `CK`; the
    /// responder receives on it and immediately derives its own sending
    /// chain with a fresh ratchet key pair.
    pub fn seed<R: CryptoRngCore>(
        rng: &mut R,
        master_secret: &SymmetricKey,
        role: Role,
        associated_data: Vec<u8>,
        config: RatchetConfig,
    ) -> Result<Self> {
        let (root_key, initial_chain) = kdf_seed(master_secret);

        let (root_key, sending, receiving) = match role {
            Role::Initiator { sending_ratchet } => (
                root_key,
                SendingChain {
                    ratchet: sending_ratchet,
                    chain_key: initial_chain,
                    message_number: 0,
                },
                None,
            ),
            Role::Responder { peer_ratchet_key } => {
                let ratchet = SecretKey::generate(rng);
                let dh_output = ratchet.diffie_hellman(&peer_ratchet_key)?;
                let (root_key, sending_chain) = kdf_root(&root_key, &dh_output);
                (
                    root_key,
                    SendingChain {
                        ratchet,
                        chain_key: sending_chain,
                        message_number: 0,
                    },
                    Some(ReceivingChain {
                        ratchet_key: peer_ratchet_key,
                        chain_key: initial_chain,
                        message_number: 0,
                    }),
                )
            }
        };

        Ok(Self {
            root_key,
            sending,
            receiving,
            previous_sending_chain_length: 0,
            skipped: SkippedKeyCache::new(config.max_skipped_keys),
            retired_ratchet_keys: VecDeque::new(),
            associated_data,
            config,
        })
    }

    /// Encrypts `plaintext` under a fresh message key.
    ///
    /// The sending chain advances only if encryption succeeds.
    pub fn encrypt<R: CryptoRngCore>(&mut self, rng: &mut R, plaintext: &[u8]) -> Result<Envelope> {
        let message_number = self.sending.message_number;
        let next_number = message_number
            .checked_add(1)
            .ok_or(Error::CounterExhausted)?;

        let (next_chain, message_key) = kdf_chain(&self.sending.chain_key, message_number);

        let mut envelope = Envelope {
            ciphertext: Vec::new(),
            iv: crypto::random_nonce(rng),
            ratchet_public_key: self.sending.ratchet.public_key(),
            message_number,
            chain_length: self.previous_sending_chain_length,
        };
        let ad = self.message_ad(&envelope);
        envelope.ciphertext = crypto::encrypt(&message_key, &envelope.iv, plaintext, &ad)?;

        self.sending.chain_key = next_chain;
        self.sending.message_number = next_number;

        Ok(envelope)
    }

    /// Decrypts an envelope from the peer.
    ///
    /// # Errors
    /// - `MessageKeyNotFound` for a duplicate or a message whose key is gone
    /// - `TooManySkippedMessages` if the gap exceeds the cache bound
    /// - `DecryptionFailed` if authentication fails; the state is unchanged
    pub fn decrypt<R: CryptoRngCore>(&mut self, rng: &mut R, envelope: &Envelope) -> Result<Vec<u8>> {
        let ratchet_key = envelope.ratchet_public_key;
        let message_number = envelope.message_number;

        if let Some(message_key) = self.skipped.get(&ratchet_key, message_number) {
            let plaintext = self.open(envelope, message_key)?;
            self.skipped.remove(&ratchet_key, message_number);
            return Ok(plaintext);
        }

        let current = self.receiving.as_ref().map(|chain| chain.ratchet_key);
        let is_current = current == Some(ratchet_key);

        if is_current {
            if let Some(chain) = &self.receiving {
                if message_number < chain.message_number {
                    return Err(Error::MessageKeyNotFound { message_number });
                }
            }
        } else if self.retired_ratchet_keys.contains(&ratchet_key) {
            return Err(Error::MessageKeyNotFound { message_number });
        }

        let next_number = message_number
            .checked_add(1)
            .ok_or(Error::CounterExhausted)?;
        let limit = self.config.max_skipped_keys;
        let mut new_skipped = Vec::new();

        let step = if is_current {
            None
        } else {
            Some(self.stage_dh_ratchet(rng, envelope, &mut new_skipped)?)
        };

        let mut receiving = match (&step, &self.receiving) {
            (Some(step), _) => step.receiving.clone(),
            (None, Some(chain)) => chain.clone(),
            (None, None) => return Err(Error::CryptoError),
        };
        receiving.skip_to(message_number, limit, &mut new_skipped)?;

        let (next_chain, message_key) = kdf_chain(&receiving.chain_key, message_number);
        let plaintext = self.open(envelope, &message_key)?;

        // Authenticated: commit staged state
        receiving.chain_key = next_chain;
        receiving.message_number = next_number;

        if let Some(step) = step {
            if let Some(old) = self.receiving.take() {
                self.retire(old.ratchet_key);
            }
            self.root_key = step.root_key;
            self.previous_sending_chain_length = self.sending.message_number;
            self.sending = step.sending;
            tracing::debug!(
                previous_chain_length = self.previous_sending_chain_length,
                "performed DH ratchet step"
            );
        }
        self.receiving = Some(receiving);

        let mut evicted = 0;
        for (key, n, message_key) in new_skipped {
            evicted += self.skipped.insert(key, n, message_key);
        }
        if evicted > 0 {
            tracing::warn!(evicted, "skipped-key cache full, evicted oldest keys");
        }

        Ok(plaintext)
    }

    /// Computes a DH ratchet step for a new peer ratchet key without
    /// touching `self`.
    fn stage_dh_ratchet<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        envelope: &Envelope,
        new_skipped: &mut Vec<(PublicKey, u32, SymmetricKey)>,
    ) -> Result<StagedStep> {
        // Keep keys for messages still in flight on the old chain
        if let Some(chain) = &self.receiving {
            let mut old = chain.clone();
            old.skip_to(envelope.chain_length, self.config.max_skipped_keys, new_skipped)?;
        }

        let peer = envelope.ratchet_public_key;

        let dh_output = self.sending.ratchet.diffie_hellman(&peer)?;
        let (root_key, receiving_chain) = kdf_root(&self.root_key, &dh_output);

        let ratchet = SecretKey::generate(rng);
        let dh_output = ratchet.diffie_hellman(&peer)?;
        let (root_key, sending_chain) = kdf_root(&root_key, &dh_output);

        Ok(StagedStep {
            root_key,
            receiving: ReceivingChain {
                ratchet_key: peer,
                chain_key: receiving_chain,
                message_number: 0,
            },
            sending: SendingChain {
                ratchet,
                chain_key: sending_chain,
                message_number: 0,
            },
        })
    }

    fn retire(&mut self, ratchet_key: PublicKey) {
        self.retired_ratchet_keys.push_back(ratchet_key);
        while self.retired_ratchet_keys.len() > self.config.max_retired_chains {
            self.retired_ratchet_keys.pop_front();
        }
    }

    fn message_ad(&self, envelope: &Envelope) -> Vec<u8> {
        let mut ad = Vec::with_capacity(self.associated_data.len() + 40);
        ad.extend_from_slice(&self.associated_data);
        ad.extend_from_slice(&envelope.header_bytes());
        ad
    }

    fn open(&self, envelope: &Envelope, message_key: &SymmetricKey) -> Result<Vec<u8>> {
        let ad = self.message_ad(envelope);
        crypto::decrypt(message_key, &envelope.iv, &envelope.ciphertext, &ad)
            .map_err(|_| Error::DecryptionFailed)
    }

    /// Number of messages sent on the current sending chain.
    #[must_use]
    pub fn sending_message_number(&self) -> u32 {
        self.sending.message_number
    }

    /// Next expected message number on the current receiving chain.
    #[must_use]
    pub fn receiving_message_number(&self) -> u32 {
        self.receiving.as_ref().map_or(0, |chain| chain.message_number)
    }

    /// Public half of the current sending ratchet key.
    #[must_use]
    pub fn local_ratchet_public_key(&self) -> PublicKey {
        self.sending.ratchet.public_key()
    }

    /// Peer's current ratchet key, if anything has been received yet.
    #[must_use]
    pub fn receiving_ratchet_public_key(&self) -> Option<PublicKey> {
        self.receiving.as_ref().map(|chain| chain.ratchet_key)
    }

    /// Number of cached keys for messages not yet received.
    #[must_use]
    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }
}

struct StagedStep {
    root_key: SymmetricKey,
    receiving: ReceivingChain,
    sending: SendingChain,
}

impl std::fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetState")
            .field("sending_message_number", &self.sending.message_number)
            .field("receiving_message_number", &self.receiving_message_number())
            .field("previous_sending_chain_length", &self.previous_sending_chain_length)
            .field("skipped_keys", &self.skipped.len())
            .finish_non_exhaustive()
    }
}
