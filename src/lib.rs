//! End-to-end encrypted messaging core.
//!
//! This crate establishes pairwise sessions with an X3DH-style handshake and
//! protects every message with the Double Ratchet. Long-term key material is
//! kept in a [`KeyBundleManager`] and persisted encrypted at rest through a
//! [`KeyManager`].
//!
//! # Security Properties
//!
//! ## Forward Secrecy
//! Each message is encrypted under its own key, derived from a symmetric
//! chain and dropped after one use. Compromising the current state does not
//! reveal earlier messages.
//!
//! ## Break-in Recovery
//! A new Diffie-Hellman ratchet step runs whenever the direction of the
//! conversation changes, so an attacker who learned a chain key loses access
//! after the next round trip.
//!
//! ## Bundle Trust
//! A published bundle is only used after its signed pre-key signature
//! verifies against the bundle's Ed25519 signing key. Identity and signing
//! keys are separate key pairs; the signing key never takes part in ECDH.
//!
//! ## Asynchronous Operation
//! Peers can start a session from a bundle fetched while the owner is
//! offline. One-time pre-keys are consumed on first use.
//!
//! # Threat Model
//!
//! **Assumed adversary capabilities:**
//! - Active network attacker (inject, modify, reorder, replay, drop messages)
//! - Read access to the at-rest key store
//!
//! **Security assumptions:**
//! - X25519 ECDH and Ed25519 signatures provide computational security
//! - HKDF-SHA256 and Argon2id are secure key derivation functions
//! - ChaCha20-Poly1305 is a secure AEAD cipher
//! - Random number generator is cryptographically secure
//!
//! # Protocol Flow
//!
//! ```rust
//! use rand_core::OsRng;
//! use relay_ratchet::{BundleConfig, KeyBundleManager, RatchetConfig, SessionManager};
//!
//! // Each side owns a key bundle and publishes its public half
//! let (alice_keys, _) = KeyBundleManager::initialize(&mut OsRng, &BundleConfig::default()).unwrap();
//! let (bob_keys, _) = KeyBundleManager::initialize(&mut OsRng, &BundleConfig::default()).unwrap();
//! let alice = SessionManager::new(alice_keys, RatchetConfig::default());
//! let bob = SessionManager::new(bob_keys, RatchetConfig::default());
//!
//! // Alice starts a conversation from Bob's bundle
//! let handshake = alice
//!     .initialize_conversation(&mut OsRng, "bob", &bob.public_bundle())
//!     .unwrap();
//!
//! // Bob accepts once the handshake arrives
//! bob.accept_conversation(&mut OsRng, "alice", &handshake, &alice.identity_key())
//!     .unwrap();
//!
//! let envelope = alice.encrypt(&mut OsRng, "bob", b"Hello Bob!").unwrap();
//! assert_eq!(bob.decrypt(&mut OsRng, "alice", &envelope).unwrap(), b"Hello Bob!");
//!
//! let reply = bob.encrypt(&mut OsRng, "alice", b"Hello Alice!").unwrap();
//! assert_eq!(alice.decrypt(&mut OsRng, "bob", &reply).unwrap(), b"Hello Alice!");
//! ```
//!
//! # Persistence
//!
//! ```rust
//! use rand_core::OsRng;
//! use relay_ratchet::{InMemoryKeyValueStore, KdfParams, KeyBundleManager, KeyManager, ProtocolConfig};
//!
//! let config = ProtocolConfig {
//!     kdf: KdfParams { memory_kib: 64, iterations: 1, parallelism: 1 },
//!     ..ProtocolConfig::default()
//! };
//! let store = InMemoryKeyValueStore::new();
//!
//! let (keys, _) = KeyBundleManager::initialize(&mut OsRng, &config.bundle).unwrap();
//! let (manager, existing) =
//!     KeyManager::initialize(store.clone(), config.clone(), b"user secret", "alice").unwrap();
//! assert!(existing.is_none());
//! manager.store_keys(&keys.to_stored()).unwrap();
//!
//! // After a restart
//! let (_, restored) = KeyManager::initialize(store, config, b"user secret", "alice").unwrap();
//! let keys = KeyBundleManager::from_stored(&restored.unwrap()).unwrap();
//! assert_eq!(keys.one_time_prekey_count(), 10);
//! ```
//!
//! # Modules
//!
//! - [`bundle`]: Identity, signing and pre-key material
//! - [`x3dh`]: Session establishment handshake
//! - [`ratchet`]: Double Ratchet for forward-secure messaging
//! - [`session`]: Per-peer session directory
//! - [`key_manager`]: Encrypted persistence and backups
//! - [`store`]: Key-value storage backends
//! - [`crypto`]: Cryptographic primitives (KDF, AEAD encryption)
//! - [`keys`]: Key types with automatic zeroization
//! - [`encoding`]: SPKI and base64 at the serialization boundary
//! - [`config`]: Tunable limits
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unreachable_pub)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_fields_in_debug,
    clippy::module_name_repetitions
)]

pub mod bundle;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod key_manager;
pub mod keys;
pub mod ratchet;
pub mod session;
mod skipped;
pub mod store;
pub mod x3dh;

// Re-export main types
pub use bundle::{KeyBundleManager, PublicKeyBundle, StoredKeyBundle};
pub use config::{BundleConfig, KdfParams, ProtocolConfig, RatchetConfig};
pub use error::{Error, ErrorCategory, Result};
pub use key_manager::{BackupArtifact, KeyManager};
pub use keys::{IdentityKeyPair, PublicKey, SecretKey, SigningKeyPair, SigningPublicKey};
pub use ratchet::{Envelope, RatchetState, Role};
pub use session::{PeerId, SessionManager, SessionStore};
pub use store::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
pub use x3dh::{HandshakeMessage, InitiatorResult, ResponderResult};
