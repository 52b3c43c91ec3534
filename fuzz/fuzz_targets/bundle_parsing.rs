#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_ratchet::encoding::SPKI_LENGTH;
use relay_ratchet::keys::{PublicKey, SigningPublicKey};
use relay_ratchet::PublicKeyBundle;

fuzz_target!(|data: &[u8]| {
    // Raw SPKI decoding must never panic
    if data.len() >= SPKI_LENGTH {
        let _ = PublicKey::from_spki(&data[..SPKI_LENGTH]);
        let _ = SigningPublicKey::from_spki(&data[..SPKI_LENGTH]);
    }

    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };

    // Verification should not panic, and a forged bundle should not verify
    if let Ok(bundle) = PublicKeyBundle::from_json(json) {
        let _ = bundle.verify_signature();

        let reparsed = PublicKeyBundle::from_json(&bundle.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, bundle);
    }
});
