//! Fuzz target for encryption/decryption with corrupted inputs
//!
//! Ensures decryption failures don't cause panics or memory unsafety

#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_ratchet::crypto::{decrypt, encrypt, SymmetricKey, NONCE_SIZE};

fuzz_target!(|data: &[u8]| {
    if data.len() < 32 + NONCE_SIZE + 1 {
        return;
    }

    let key = SymmetricKey::from_bytes(data[..32].try_into().unwrap());
    let nonce: [u8; NONCE_SIZE] = data[32..32 + NONCE_SIZE].try_into().unwrap();
    let plaintext = &data[32 + NONCE_SIZE..];

    let ciphertext = encrypt(&key, &nonce, plaintext, b"ad").unwrap();
    let decrypted = decrypt(&key, &nonce, &ciphertext, b"ad").unwrap();
    assert_eq!(decrypted, plaintext);

    // Any single-bit corruption must fail authentication
    let mut corrupted = ciphertext.clone();
    let index = usize::from(data[0]) % corrupted.len();
    corrupted[index] ^= 1;
    assert!(decrypt(&key, &nonce, &corrupted, b"ad").is_err());

    // Wrong associated data must fail
    assert!(decrypt(&key, &nonce, &ciphertext, b"wrong").is_err());
});
