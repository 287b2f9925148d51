//! Fuzz target for handshake credential verification.
//!
//! Arbitrary token bytes against a fixed issuer key: verification must
//! reject cleanly (wrong length, expired, bad signature) and never panic.

#![no_main]

use ed25519_dalek::SigningKey;
use libfuzzer_sys::fuzz_target;
use parley_core::{CredentialVerifier, Ed25519Verifier};

fuzz_target!(|input: (Vec<u8>, u64)| {
    let (token, now_secs) = input;

    let issuer = SigningKey::from_bytes(&[7u8; 32]);
    let verifier = Ed25519Verifier::new(issuer.verifying_key());

    let _ = verifier.verify(&token, now_secs);
});
