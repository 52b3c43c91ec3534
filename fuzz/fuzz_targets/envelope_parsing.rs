//! Fuzz target for envelope parsing and decryption
//!
//! Arbitrary JSON must never panic the parser, and a parsed envelope fed to
//! a live session must be rejected without corrupting it.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rand_core::OsRng;
use relay_ratchet::config::{BundleConfig, RatchetConfig};
use relay_ratchet::keys::IdentityKeyPair;
use relay_ratchet::ratchet::{Envelope, RatchetState};
use relay_ratchet::x3dh::{initiate, respond};
use relay_ratchet::KeyBundleManager;

fn session_pair() -> (RatchetState, RatchetState) {
    let alice_identity = IdentityKeyPair::generate(&mut OsRng);
    let config = BundleConfig {
        one_time_prekey_count: 0,
        ..BundleConfig::default()
    };
    let (mut bob_keys, bundle) = KeyBundleManager::initialize(&mut OsRng, &config).unwrap();

    let init = initiate(&mut OsRng, &alice_identity, &bundle).unwrap();
    let resp = respond(&mut bob_keys, &init.handshake, alice_identity.public_key()).unwrap();

    let alice = RatchetState::seed(
        &mut OsRng,
        &init.master_secret,
        init.role,
        init.associated_data,
        RatchetConfig::default(),
    )
    .unwrap();
    let bob = RatchetState::seed(
        &mut OsRng,
        &resp.master_secret,
        resp.role,
        resp.associated_data,
        RatchetConfig::default(),
    )
    .unwrap();
    (alice, bob)
}

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(envelope) = Envelope::from_json(json) else {
        return;
    };

    // Re-encoding is stable
    let reparsed = Envelope::from_json(&envelope.to_json().unwrap()).unwrap();
    assert_eq!(reparsed, envelope);

    // Forged envelopes are rejected and leave the session usable
    let (mut alice, mut bob) = session_pair();
    assert!(bob.decrypt(&mut OsRng, &envelope).is_err());

    let genuine = alice.encrypt(&mut OsRng, b"still works").unwrap();
    assert_eq!(bob.decrypt(&mut OsRng, &genuine).unwrap(), b"still works");
});
