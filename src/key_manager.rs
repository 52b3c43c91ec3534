//! Encrypted persistence and backup of the local key bundle.
//!
//! ## Records
//!
//! For a user `u` the manager keeps two records in its [`KeyValueStore`]:
//!
//! - `u/keys`: `version (1) || nonce (12) || AEAD(bundle)`
//! - `u/keys.backup`: `version (1) || nonce (12) || AEAD(sha256(bundle) || bundle)`
//!
//! Both are sealed with ChaCha20-Poly1305 under a storage key derived from
//! the user secret with Argon2id. The record name is the associated data, so
//! a record copied to another slot does not decrypt.
//!
//! ## Backups
//!
//! [`KeyManager::export_keys_for_backup`] produces a self-describing
//! [`BackupArtifact`] protected by a separate backup secret. The artifact
//! carries its own random salt and KDF parameters, so it can be imported on
//! a fresh install.

use crate::bundle::{KeyBundleManager, StoredKeyBundle};
use crate::config::{KdfParams, ProtocolConfig};
use crate::crypto::{self, SymmetricKey, CHECKSUM_SIZE, NONCE_SIZE};
use crate::encoding::{base64_array, base64_bytes};
use crate::error::{Error, Result};
use crate::store::KeyValueStore;
use parking_lot::Mutex;
use rand_core::{CryptoRngCore, OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Algorithm tag carried in every backup artifact.
pub const BACKUP_ALGORITHM: &str = "argon2id+chacha20poly1305";

/// Salt length for both storage and backup key derivation.
pub const SALT_SIZE: usize = 16;

const RECORD_VERSION: u8 = 1;
const RECORD_HEADER_SIZE: usize = 1 + NONCE_SIZE;
const STORAGE_SALT_LABEL: &[u8] = b"relay-ratchet/storage-salt/v1";

/// Password-protected export of a [`StoredKeyBundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupArtifact {
    #[serde(with = "base64_bytes")]
    pub encrypted_data: Vec<u8>,
    #[serde(with = "base64_array")]
    pub iv: [u8; NONCE_SIZE],
    pub algorithm: String,
    pub kdf_iterations: u32,
    pub kdf_memory_kib: u32,
    pub kdf_parallelism: u32,
    #[serde(with = "base64_array")]
    pub salt: [u8; SALT_SIZE],
}

impl BackupArtifact {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|_| Error::SerializationError)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.kdf_memory_kib,
            iterations: self.kdf_iterations,
            parallelism: self.kdf_parallelism,
        }
    }
}

/// Deterministic per-user salt for the storage key.
fn storage_salt(user_id: &str) -> [u8; SALT_SIZE] {
    let digest = Sha256::new()
        .chain_update(STORAGE_SALT_LABEL)
        .chain_update(user_id.as_bytes())
        .finalize();
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&digest[..SALT_SIZE]);
    salt
}

/// Owns the storage key and all reads and writes of key records for one user.
pub struct KeyManager<S: KeyValueStore> {
    store: S,
    storage_key: SymmetricKey,
    user_id: String,
    config: ProtocolConfig,
    /// Serializes every storage access
    lock: Mutex<()>,
}

impl<S: KeyValueStore> KeyManager<S> {
    /// Derives the storage key for `user_id` and loads any existing keys.
    ///
    /// Returns `None` alongside the manager on first run.
    ///
    /// # Errors
    /// - `InvalidConfig` if `config` does not validate
    /// - `KeysUnrecoverable` if records exist but none can be decrypted
    pub fn initialize(
        store: S,
        config: ProtocolConfig,
        user_secret: &[u8],
        user_id: &str,
    ) -> Result<(Self, Option<StoredKeyBundle>)> {
        config.validate()?;
        let storage_key = crypto::derive_password_key(user_secret, &storage_salt(user_id), &config.kdf)?;

        let manager = Self {
            store,
            storage_key,
            user_id: user_id.to_owned(),
            config,
            lock: Mutex::new(()),
        };

        let loaded = manager.load_keys()?;
        tracing::info!(user = %manager.user_id, found = loaded.is_some(), "key manager initialized");
        Ok((manager, loaded))
    }

    fn primary_key(&self) -> String {
        format!("{}/keys", self.user_id)
    }

    fn backup_key(&self) -> String {
        format!("{}/keys.backup", self.user_id)
    }

    /// Encrypts and writes `bundle` to both the primary and the backup record.
    pub fn store_keys(&self, bundle: &StoredKeyBundle) -> Result<()> {
        let _guard = self.lock.lock();
        self.write_records(bundle)
    }

    fn write_records(&self, bundle: &StoredKeyBundle) -> Result<()> {
        let bytes = Zeroizing::new(bundle.to_bytes()?);

        let primary_key = self.primary_key();
        let primary = self.seal(&primary_key, &bytes)?;

        let mut backup_plaintext = Zeroizing::new(Vec::with_capacity(CHECKSUM_SIZE + bytes.len()));
        backup_plaintext.extend_from_slice(&crypto::checksum(&bytes));
        backup_plaintext.extend_from_slice(&bytes);
        let backup_key = self.backup_key();
        let backup = self.seal(&backup_key, &backup_plaintext)?;

        self.store.put(&primary_key, &primary)?;
        self.store.put(&backup_key, &backup)?;

        tracing::debug!(
            user = %self.user_id,
            one_time_prekeys = bundle.one_time_prekeys.len(),
            "stored keys"
        );
        Ok(())
    }

    /// Loads the stored bundle, falling back to the backup record.
    ///
    /// A record that cannot be read counts as failed, and the next one is
    /// tried. A bundle recovered from the backup is rewritten as the primary
    /// on a best-effort basis.
    ///
    /// # Errors
    /// `KeysUnrecoverable` if records exist or cannot be read but neither
    /// yields a valid bundle.
    pub fn load_keys(&self) -> Result<Option<StoredKeyBundle>> {
        let _guard = self.lock.lock();

        let primary_key = self.primary_key();
        let backup_key = self.backup_key();
        let primary = self.read_record(&primary_key);
        let backup = self.read_record(&backup_key);

        if matches!((&primary, &backup), (Ok(None), Ok(None))) {
            return Ok(None);
        }

        if let Ok(Some(record)) = &primary {
            match self.open_primary(&primary_key, record) {
                Ok(bundle) => return Ok(Some(bundle)),
                Err(e) => {
                    tracing::warn!(user = %self.user_id, error = %e, "primary key record unreadable");
                }
            }
        }

        if let Ok(Some(record)) = &backup {
            match self.open_backup(&backup_key, record) {
                Ok(bundle) => {
                    tracing::warn!(user = %self.user_id, "recovered keys from backup record");
                    if let Err(e) = self.write_records(&bundle) {
                        tracing::warn!(
                            user = %self.user_id,
                            error = %e,
                            "failed to rewrite key records after recovery"
                        );
                    }
                    return Ok(Some(bundle));
                }
                Err(e) => {
                    tracing::warn!(user = %self.user_id, error = %e, "backup key record unreadable");
                }
            }
        }

        Err(Error::KeysUnrecoverable)
    }

    fn read_record(&self, record_key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(record_key).inspect_err(|e| {
            tracing::warn!(user = %self.user_id, record = record_key, error = %e, "key record read failed");
        })
    }

    fn open_primary(&self, record_key: &str, record: &[u8]) -> Result<StoredKeyBundle> {
        let plaintext = self.open(record_key, record)?;
        let bundle = StoredKeyBundle::from_bytes(&plaintext)?;
        self.verify_key_integrity(&bundle)?;
        Ok(bundle)
    }

    fn open_backup(&self, record_key: &str, record: &[u8]) -> Result<StoredKeyBundle> {
        let plaintext = self.open(record_key, record)?;
        let bundle = split_checksummed(&plaintext)?;
        self.verify_key_integrity(&bundle)?;
        Ok(bundle)
    }

    fn seal(&self, record_key: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = crypto::random_nonce(&mut OsRng);
        let ciphertext = crypto::encrypt(&self.storage_key, &nonce, plaintext, record_key.as_bytes())?;

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + ciphertext.len());
        record.push(RECORD_VERSION);
        record.extend_from_slice(&nonce);
        record.extend_from_slice(&ciphertext);
        Ok(record)
    }

    fn open(&self, record_key: &str, record: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if record.len() < RECORD_HEADER_SIZE || record[0] != RECORD_VERSION {
            return Err(Error::storage(record_key, "malformed record"));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&record[1..RECORD_HEADER_SIZE]);

        let plaintext = crypto::decrypt(
            &self.storage_key,
            &nonce,
            &record[RECORD_HEADER_SIZE..],
            record_key.as_bytes(),
        )?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Exports `bundle` protected by `backup_secret`.
    ///
    /// The backup key is independent of the storage key: it uses a fresh
    /// random salt and the configured KDF parameters, both recorded in the
    /// artifact.
    pub fn export_keys_for_backup(
        &self,
        bundle: &StoredKeyBundle,
        backup_secret: &[u8],
    ) -> Result<BackupArtifact> {
        self.verify_key_integrity(bundle)?;

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let params = self.config.kdf;
        let key = crypto::derive_password_key(backup_secret, &salt, &params)?;

        let bytes = Zeroizing::new(bundle.to_bytes()?);
        let mut plaintext = Zeroizing::new(Vec::with_capacity(CHECKSUM_SIZE + bytes.len()));
        plaintext.extend_from_slice(&crypto::checksum(&bytes));
        plaintext.extend_from_slice(&bytes);

        let iv = crypto::random_nonce(&mut OsRng);
        let encrypted_data = crypto::encrypt(&key, &iv, &plaintext, BACKUP_ALGORITHM.as_bytes())?;

        tracing::info!(user = %self.user_id, "exported key backup");
        Ok(BackupArtifact {
            encrypted_data,
            iv,
            algorithm: BACKUP_ALGORITHM.to_owned(),
            kdf_iterations: params.iterations,
            kdf_memory_kib: params.memory_kib,
            kdf_parallelism: params.parallelism,
            salt,
        })
    }

    /// Decrypts and verifies a backup artifact.
    ///
    /// # Errors
    /// - `BackupDecryptionFailed` for a wrong secret or tampered artifact
    /// - `ChecksumMismatch` if the embedded checksum does not match
    /// - `InvalidConfig` if the artifact's KDF parameters are out of range
    pub fn import_keys_from_backup(
        &self,
        artifact: &BackupArtifact,
        backup_secret: &[u8],
    ) -> Result<StoredKeyBundle> {
        if artifact.algorithm != BACKUP_ALGORITHM {
            return Err(Error::InvalidEncoding(format!(
                "unsupported backup algorithm {}",
                artifact.algorithm
            )));
        }

        let key = crypto::derive_password_key(backup_secret, &artifact.salt, &artifact.kdf_params())?;
        let plaintext = crypto::decrypt(
            &key,
            &artifact.iv,
            &artifact.encrypted_data,
            BACKUP_ALGORITHM.as_bytes(),
        )
        .map(Zeroizing::new)
        .map_err(|_| Error::BackupDecryptionFailed)?;

        let bundle = split_checksummed(&plaintext)?;
        self.verify_key_integrity(&bundle)?;

        tracing::info!(user = %self.user_id, "imported key backup");
        Ok(bundle)
    }

    /// Structural check run before any loaded or imported bundle is returned.
    pub fn verify_key_integrity(&self, bundle: &StoredKeyBundle) -> Result<()> {
        bundle.validate()
    }

    /// Deletes both records. A later [`load_keys`](Self::load_keys) returns `None`.
    pub fn clear_keys(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.store.delete(&self.primary_key())?;
        self.store.delete(&self.backup_key())?;
        tracing::info!(user = %self.user_id, "cleared stored keys");
        Ok(())
    }

    /// Tops up the one-time pre-key pool when it falls below the low
    /// watermark, then persists the bundle.
    ///
    /// Returns whether new pre-keys were generated.
    pub fn replenish_if_low<R: CryptoRngCore>(
        &self,
        manager: &mut KeyBundleManager,
        rng: &mut R,
    ) -> Result<bool> {
        let bundle_config = self.config.bundle;
        if !manager.needs_replenishment(bundle_config.low_watermark) {
            return Ok(false);
        }

        manager.replenish_one_time_prekeys(rng, bundle_config.replenish_count)?;
        self.store_keys(&manager.to_stored())?;
        tracing::info!(
            user = %self.user_id,
            added = bundle_config.replenish_count,
            pool = manager.one_time_prekey_count(),
            "replenished one-time pre-keys"
        );
        Ok(true)
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }
}

impl<S: KeyValueStore> std::fmt::Debug for KeyManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Splits `checksum || bundle` and verifies the checksum in constant time.
fn split_checksummed(plaintext: &[u8]) -> Result<StoredKeyBundle> {
    if plaintext.len() < CHECKSUM_SIZE {
        return Err(Error::ChecksumMismatch);
    }
    let (expected, bytes) = plaintext.split_at(CHECKSUM_SIZE);
    if !crypto::checksums_match(expected, &crypto::checksum(bytes)) {
        return Err(Error::ChecksumMismatch);
    }
    StoredKeyBundle::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BundleConfig;
    use crate::store::InMemoryKeyValueStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const SECRET: &[u8] = b"correct horse battery staple";

    fn fast_config() -> ProtocolConfig {
        ProtocolConfig {
            kdf: KdfParams {
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
            },
            ..ProtocolConfig::default()
        }
    }

    fn bundle() -> (KeyBundleManager, StoredKeyBundle) {
        let (manager, _) = KeyBundleManager::initialize(&mut OsRng, &BundleConfig::default()).unwrap();
        let stored = manager.to_stored();
        (manager, stored)
    }

    fn key_manager(store: &InMemoryKeyValueStore) -> KeyManager<InMemoryKeyValueStore> {
        let (manager, _) = KeyManager::initialize(store.clone(), fast_config(), SECRET, "alice").unwrap();
        manager
    }

    #[test]
    fn test_first_run_has_no_keys() {
        let store = InMemoryKeyValueStore::new();
        let (_, loaded) = KeyManager::initialize(store, fast_config(), SECRET, "alice").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_store_and_reload() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        key_manager(&store).store_keys(&stored).unwrap();
        assert_eq!(store.len(), 2);

        let (_, loaded) = KeyManager::initialize(store, fast_config(), SECRET, "alice").unwrap();
        assert_eq!(loaded.unwrap(), stored);
    }

    #[test]
    fn test_records_are_encrypted() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        key_manager(&store).store_keys(&stored).unwrap();

        let record = store.get("alice/keys").unwrap().unwrap();
        assert!(!record
            .windows(32)
            .any(|window| window == stored.identity_secret));
    }

    #[test]
    fn test_wrong_user_secret_is_unrecoverable() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        key_manager(&store).store_keys(&stored).unwrap();

        let result = KeyManager::initialize(store, fast_config(), b"wrong", "alice");
        assert_eq!(result.unwrap_err(), Error::KeysUnrecoverable);
    }

    #[test]
    fn test_corrupt_primary_falls_back_to_backup() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);
        manager.store_keys(&stored).unwrap();

        let mut record = store.get("alice/keys").unwrap().unwrap();
        let last = record.len() - 1;
        record[last] ^= 0xFF;
        store.put("alice/keys", &record).unwrap();

        assert_eq!(manager.load_keys().unwrap().unwrap(), stored);

        // Primary was rewritten from the backup
        store.delete("alice/keys.backup").unwrap();
        assert_eq!(manager.load_keys().unwrap().unwrap(), stored);
    }

    #[test]
    fn test_missing_primary_falls_back_to_backup() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);
        manager.store_keys(&stored).unwrap();

        store.delete("alice/keys").unwrap();
        assert_eq!(manager.load_keys().unwrap().unwrap(), stored);
    }

    #[test]
    fn test_both_records_corrupt() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);
        manager.store_keys(&stored).unwrap();

        store.put("alice/keys", b"garbage").unwrap();
        store.put("alice/keys.backup", &[1u8; 64]).unwrap();

        assert_eq!(manager.load_keys().unwrap_err(), Error::KeysUnrecoverable);
    }

    /// Store that fails reads of chosen records and, optionally, all writes.
    #[derive(Clone, Default)]
    struct FailingStore {
        inner: InMemoryKeyValueStore,
        failing_reads: Arc<Mutex<Vec<String>>>,
        read_only: Arc<AtomicBool>,
    }

    impl FailingStore {
        fn fail_reads_of(&self, key: &str) {
            self.failing_reads.lock().push(key.to_owned());
        }

        fn set_read_only(&self) {
            self.read_only.store(true, Ordering::SeqCst);
        }
    }

    impl KeyValueStore for FailingStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            if self.failing_reads.lock().iter().any(|k| k == key) {
                return Err(Error::storage(key, "EIO"));
            }
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &[u8]) -> Result<()> {
            if self.read_only.load(Ordering::SeqCst) {
                return Err(Error::storage(key, "read-only filesystem"));
            }
            self.inner.put(key, value)
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key)
        }
    }

    fn failing_manager(store: &FailingStore, stored: &StoredKeyBundle) -> KeyManager<FailingStore> {
        let (manager, _) = KeyManager::initialize(store.clone(), fast_config(), SECRET, "alice").unwrap();
        manager.store_keys(stored).unwrap();
        manager
    }

    #[test]
    fn test_unreadable_primary_falls_back_to_backup() {
        let store = FailingStore::default();
        let (_, stored) = bundle();
        let manager = failing_manager(&store, &stored);

        store.fail_reads_of("alice/keys");
        assert_eq!(manager.load_keys().unwrap().unwrap(), stored);
    }

    #[test]
    fn test_unreadable_backup_does_not_mask_primary() {
        let store = FailingStore::default();
        let (_, stored) = bundle();
        let manager = failing_manager(&store, &stored);

        store.fail_reads_of("alice/keys.backup");
        assert_eq!(manager.load_keys().unwrap().unwrap(), stored);
    }

    #[test]
    fn test_both_records_unreadable() {
        let store = FailingStore::default();
        let (_, stored) = bundle();
        let manager = failing_manager(&store, &stored);

        store.fail_reads_of("alice/keys");
        store.fail_reads_of("alice/keys.backup");
        assert_eq!(manager.load_keys().unwrap_err(), Error::KeysUnrecoverable);
    }

    #[test]
    fn test_unreadable_primary_without_backup_is_unrecoverable() {
        let store = FailingStore::default();
        let (_, stored) = bundle();
        let manager = failing_manager(&store, &stored);

        store.inner.delete("alice/keys.backup").unwrap();
        store.fail_reads_of("alice/keys");
        assert_eq!(manager.load_keys().unwrap_err(), Error::KeysUnrecoverable);
    }

    #[test]
    fn test_recovery_survives_failed_rewrite() {
        let store = FailingStore::default();
        let (_, stored) = bundle();
        let manager = failing_manager(&store, &stored);

        store.inner.put("alice/keys", b"garbage").unwrap();
        store.set_read_only();

        assert_eq!(manager.load_keys().unwrap().unwrap(), stored);
        // The primary could not be rewritten
        assert_eq!(store.inner.get("alice/keys").unwrap().unwrap(), b"garbage");
    }

    #[test]
    fn test_records_bound_to_slot() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);
        manager.store_keys(&stored).unwrap();

        let backup = store.get("alice/keys.backup").unwrap().unwrap();
        store.put("alice/keys", &backup).unwrap();
        store.delete("alice/keys.backup").unwrap();

        assert_eq!(manager.load_keys().unwrap_err(), Error::KeysUnrecoverable);
    }

    #[test]
    fn test_clear_keys() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);
        manager.store_keys(&stored).unwrap();

        manager.clear_keys().unwrap();
        assert!(store.is_empty());
        assert!(manager.load_keys().unwrap().is_none());
    }

    #[test]
    fn test_users_are_isolated() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        key_manager(&store).store_keys(&stored).unwrap();

        let (_, loaded) = KeyManager::initialize(store, fast_config(), SECRET, "bob").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_backup_round_trip_is_bit_identical() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);

        let artifact = manager.export_keys_for_backup(&stored, b"backup pass").unwrap();
        assert_eq!(artifact.algorithm, BACKUP_ALGORITHM);

        let json = artifact.to_json().unwrap();
        let parsed = BackupArtifact::from_json(&json).unwrap();
        let restored = manager.import_keys_from_backup(&parsed, b"backup pass").unwrap();

        assert_eq!(restored.to_bytes().unwrap(), stored.to_bytes().unwrap());
    }

    #[test]
    fn test_backup_wrong_secret() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);

        let artifact = manager.export_keys_for_backup(&stored, b"backup pass").unwrap();
        assert_eq!(
            manager.import_keys_from_backup(&artifact, b"guess").unwrap_err(),
            Error::BackupDecryptionFailed
        );
    }

    #[test]
    fn test_backup_checksum_mismatch() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);

        // Artifact whose embedded checksum does not cover the bundle
        let salt = [7u8; SALT_SIZE];
        let params = fast_config().kdf;
        let key = crypto::derive_password_key(b"pass", &salt, &params).unwrap();
        let mut plaintext = vec![0u8; CHECKSUM_SIZE];
        plaintext.extend_from_slice(&stored.to_bytes().unwrap());
        let iv = [3u8; NONCE_SIZE];

        let artifact = BackupArtifact {
            encrypted_data: crypto::encrypt(&key, &iv, &plaintext, BACKUP_ALGORITHM.as_bytes()).unwrap(),
            iv,
            algorithm: BACKUP_ALGORITHM.into(),
            kdf_iterations: params.iterations,
            kdf_memory_kib: params.memory_kib,
            kdf_parallelism: params.parallelism,
            salt,
        };

        assert_eq!(
            manager.import_keys_from_backup(&artifact, b"pass").unwrap_err(),
            Error::ChecksumMismatch
        );
    }

    #[test]
    fn test_backup_rejects_unknown_algorithm() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);

        let mut artifact = manager.export_keys_for_backup(&stored, b"p").unwrap();
        artifact.algorithm = "pbkdf2+aes-gcm".into();
        assert!(matches!(
            manager.import_keys_from_backup(&artifact, b"p"),
            Err(Error::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_backup_rejects_excessive_kdf_memory() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);

        let mut artifact = manager.export_keys_for_backup(&stored, b"p").unwrap();
        artifact.kdf_memory_kib = u32::MAX;
        assert!(matches!(
            manager.import_keys_from_backup(&artifact, b"p"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_backup_rejects_excessive_kdf_iterations() {
        let store = InMemoryKeyValueStore::new();
        let (_, stored) = bundle();
        let manager = key_manager(&store);

        let mut artifact = manager.export_keys_for_backup(&stored, b"p").unwrap();
        artifact.kdf_iterations = u32::MAX;
        assert!(matches!(
            manager.import_keys_from_backup(&artifact, b"p"),
            Err(Error::InvalidConfig(_))
        ));

        artifact.kdf_iterations = 1;
        artifact.kdf_parallelism = u32::MAX;
        assert!(matches!(
            manager.import_keys_from_backup(&artifact, b"p"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_restored_bundle_rebuilds_manager() {
        let store = InMemoryKeyValueStore::new();
        let (original, stored) = bundle();
        let manager = key_manager(&store);

        let artifact = manager.export_keys_for_backup(&stored, b"p").unwrap();
        let restored = manager.import_keys_from_backup(&artifact, b"p").unwrap();
        let rebuilt = KeyBundleManager::from_stored(&restored).unwrap();

        assert_eq!(rebuilt.public_bundle(), original.public_bundle());
    }

    #[test]
    fn test_replenish_if_low() {
        let store = InMemoryKeyValueStore::new();
        let manager = key_manager(&store);
        let (mut keys, _) = bundle();

        assert!(!manager.replenish_if_low(&mut keys, &mut OsRng).unwrap());

        for id in 0..6 {
            keys.take_one_time_prekey(id).unwrap();
        }
        assert_eq!(keys.one_time_prekey_count(), 4);

        assert!(manager.replenish_if_low(&mut keys, &mut OsRng).unwrap());
        assert_eq!(keys.one_time_prekey_count(), 9);

        let persisted = manager.load_keys().unwrap().unwrap();
        assert_eq!(persisted.one_time_prekeys.len(), 9);
        assert_eq!(persisted.next_one_time_prekey_id, 15);
    }

    #[test]
    fn test_storage_salt_depends_on_user() {
        assert_ne!(storage_salt("alice"), storage_salt("bob"));
        assert_eq!(storage_salt("alice"), storage_salt("alice"));
    }
}
