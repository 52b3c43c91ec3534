//! Per-peer session directory.
//!
//! [`SessionStore`] owns one [`RatchetState`] per peer. Each state sits
//! behind its own mutex, so operations on one peer serialize while different
//! peers proceed in parallel.
//!
//! [`SessionManager`] ties the local key bundle to the store and exposes the
//! conversation-level operations: establish, accept, encrypt, decrypt.

use crate::bundle::{KeyBundleManager, PublicKeyBundle};
use crate::config::RatchetConfig;
use crate::error::{Error, Result};
use crate::keys::PublicKey;
use crate::ratchet::{Envelope, RatchetState};
use crate::x3dh::{self, HandshakeMessage};
use parking_lot::{Mutex, RwLock};
use rand_core::CryptoRngCore;
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque identifier the host application uses for a peer.
pub type PeerId = String;

/// Shared handle to one peer's ratchet state.
pub type SessionHandle = Arc<Mutex<RatchetState>>;

/// Map of peer id to ratchet state.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<PeerId, SessionHandle>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a session, returning `true` if one already existed for `peer`.
    pub fn insert(&self, peer: &str, state: RatchetState) -> bool {
        self.sessions
            .write()
            .insert(peer.to_owned(), Arc::new(Mutex::new(state)))
            .is_some()
    }

    /// Returns a handle to the peer's session.
    ///
    /// The store lock is released before the handle is returned; callers
    /// lock only the per-peer mutex.
    pub fn get(&self, peer: &str) -> Result<SessionHandle> {
        self.sessions
            .read()
            .get(peer)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound {
                peer: peer.to_owned(),
            })
    }

    pub fn remove(&self, peer: &str) -> bool {
        self.sessions.write().remove(peer).is_some()
    }

    #[must_use]
    pub fn contains(&self, peer: &str) -> bool {
        self.sessions.read().contains_key(peer)
    }

    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        self.sessions.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .finish()
    }
}

/// Conversation-level API over the local key bundle and the session store.
pub struct SessionManager {
    keys: Mutex<KeyBundleManager>,
    sessions: SessionStore,
    config: RatchetConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(keys: KeyBundleManager, config: RatchetConfig) -> Self {
        Self {
            keys: Mutex::new(keys),
            sessions: SessionStore::new(),
            config,
        }
    }

    /// Current public bundle for publication.
    #[must_use]
    pub fn public_bundle(&self) -> PublicKeyBundle {
        self.keys.lock().public_bundle()
    }

    /// Own identity public key.
    #[must_use]
    pub fn identity_key(&self) -> PublicKey {
        *self.keys.lock().identity().public_key()
    }

    /// Runs `f` with exclusive access to the key bundle, e.g. to replenish
    /// or persist it.
    pub fn with_key_bundle<T>(&self, f: impl FnOnce(&mut KeyBundleManager) -> T) -> T {
        f(&mut self.keys.lock())
    }

    /// Starts a conversation with `peer` from their published bundle.
    ///
    /// Returns the handshake message to deliver to the peer. An existing
    /// session with `peer` is replaced.
    pub fn initialize_conversation<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        peer: &str,
        bundle: &PublicKeyBundle,
    ) -> Result<HandshakeMessage> {
        let identity = self.keys.lock().identity().clone();
        let result = x3dh::initiate(rng, &identity, bundle)?;

        let state = RatchetState::seed(
            rng,
            &result.master_secret,
            result.role,
            result.associated_data,
            self.config,
        )?;
        self.store(peer, state);

        tracing::info!(
            peer = %peer,
            one_time_prekey = ?result.handshake.used_one_time_pre_key_index,
            "initiated session"
        );
        Ok(result.handshake)
    }

    /// Accepts a conversation started by `peer`.
    ///
    /// `peer_identity_key` must match the identity key carried in the
    /// handshake; the consumed one-time pre-key is removed from the bundle.
    pub fn accept_conversation<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        peer: &str,
        handshake: &HandshakeMessage,
        peer_identity_key: &PublicKey,
    ) -> Result<()> {
        let result = {
            let mut keys = self.keys.lock();
            x3dh::respond(&mut keys, handshake, peer_identity_key)?
        };

        let state = RatchetState::seed(
            rng,
            &result.master_secret,
            result.role,
            result.associated_data,
            self.config,
        )?;
        self.store(peer, state);

        tracing::info!(
            peer = %peer,
            one_time_prekey = ?handshake.used_one_time_pre_key_index,
            "accepted session"
        );
        Ok(())
    }

    pub fn encrypt<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        peer: &str,
        plaintext: &[u8],
    ) -> Result<Envelope> {
        let session = self.sessions.get(peer)?;
        let mut state = session.lock();
        state.encrypt(rng, plaintext)
    }

    pub fn decrypt<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        peer: &str,
        envelope: &Envelope,
    ) -> Result<Vec<u8>> {
        let session = self.sessions.get(peer)?;
        let mut state = session.lock();
        state.decrypt(rng, envelope).inspect_err(|e| {
            tracing::debug!(peer = %peer, error = %e, "decrypt rejected");
        })
    }

    #[must_use]
    pub fn has_session(&self, peer: &str) -> bool {
        self.sessions.contains(peer)
    }

    /// Drops the session with `peer`. Returns `false` if there was none.
    pub fn remove_session(&self, peer: &str) -> bool {
        let removed = self.sessions.remove(peer);
        if removed {
            tracing::info!(peer = %peer, "removed session");
        }
        removed
    }

    /// Read access to the session store.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn store(&self, peer: &str, state: RatchetState) {
        if self.sessions.insert(peer, state) {
            tracing::warn!(peer = %peer, "replaced existing session");
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
