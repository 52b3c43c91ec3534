//! Complete example of bundle publication, session setup, messaging and
//! key persistence.
//!
//! Run with `RUST_LOG=debug` to see the protocol's tracing output.

use rand_core::OsRng;
use relay_ratchet::{
    BundleConfig, InMemoryKeyValueStore, KdfParams, KeyBundleManager, KeyManager, ProtocolConfig,
    PublicKeyBundle, Result, SessionManager,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== relay-ratchet complete example ===\n");

    let config = ProtocolConfig {
        // Cheap parameters so the demo runs instantly
        kdf: KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
        ..ProtocolConfig::default()
    };

    println!("1. Generating key bundles...");
    let (alice_keys, _) = KeyBundleManager::initialize(&mut OsRng, &BundleConfig::default())?;
    let (bob_keys, _) = KeyBundleManager::initialize(&mut OsRng, &config.bundle)?;
    let alice = SessionManager::new(alice_keys, config.ratchet);
    let bob = SessionManager::new(bob_keys, config.ratchet);
    println!("   ✓ Alice and Bob have identity, signing and pre-keys\n");

    println!("2. Bob publishes his bundle...");
    let published = bob.public_bundle().to_json()?;
    println!("   ✓ {} bytes of JSON", published.len());
    let bob_bundle = PublicKeyBundle::from_json(&published)?;
    println!(
        "   - One-time pre-keys offered: {}\n",
        bob_bundle.one_time_pre_keys.len()
    );

    println!("3. Alice starts a conversation...");
    let handshake = alice.initialize_conversation(&mut OsRng, "bob", &bob_bundle)?;
    println!("   ✓ Bundle signature verified");
    println!(
        "   ✓ Used one-time pre-key: {:?}\n",
        handshake.used_one_time_pre_key_index
    );

    println!("4. Bob accepts...");
    bob.accept_conversation(&mut OsRng, "alice", &handshake, &alice.identity_key())?;
    println!(
        "   ✓ Session established, {} one-time pre-keys left\n",
        bob.with_key_bundle(|keys| keys.one_time_prekey_count())
    );

    println!("5. Exchanging messages...");
    for text in ["Hello Bob!", "Are you there?"] {
        let envelope = alice.encrypt(&mut OsRng, "bob", text.as_bytes())?;
        let plaintext = bob.decrypt(&mut OsRng, "alice", &envelope)?;
        println!(
            "   Alice → Bob  #{}: {}",
            envelope.message_number,
            String::from_utf8_lossy(&plaintext)
        );
    }
    let reply = bob.encrypt(&mut OsRng, "alice", b"Loud and clear.")?;
    let plaintext = alice.decrypt(&mut OsRng, "bob", &reply)?;
    println!(
        "   Bob → Alice  #{}: {}\n",
        reply.message_number,
        String::from_utf8_lossy(&plaintext)
    );

    println!("6. Replaying Bob's reply...");
    match alice.decrypt(&mut OsRng, "bob", &reply) {
        Ok(_) => println!("   ✗ replay accepted"),
        Err(e) => println!("   ✓ rejected: {e}\n"),
    }

    println!("7. Bob persists and replenishes his keys...");
    let store = InMemoryKeyValueStore::new();
    let (key_manager, existing) =
        KeyManager::initialize(store.clone(), config.clone(), b"bob's device pin", "bob")?;
    assert!(existing.is_none());
    bob.with_key_bundle(|keys| key_manager.store_keys(&keys.to_stored()))?;
    let replenished =
        bob.with_key_bundle(|keys| key_manager.replenish_if_low(keys, &mut OsRng))?;
    println!("   ✓ Stored {} records (replenished: {replenished})", store.len());

    let artifact = bob.with_key_bundle(|keys| {
        key_manager.export_keys_for_backup(&keys.to_stored(), b"correct horse battery staple")
    })?;
    println!("   ✓ Backup artifact: {} bytes of JSON\n", artifact.to_json()?.len());

    println!("8. Restarting Bob's device...");
    let (_, restored) = KeyManager::initialize(store, config, b"bob's device pin", "bob")?;
    let restored = KeyBundleManager::from_stored(&restored.ok_or(relay_ratchet::Error::KeysUnrecoverable)?)?;
    println!(
        "   ✓ Restored identity matches: {}",
        restored.identity().public_key() == &bob.identity_key()
    );

    println!("\n=== Done ===");
    Ok(())
}
