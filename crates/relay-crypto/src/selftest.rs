//! Known-answer self-test run once at startup, before the relay binds its
//! socket. Mirrors the digest self-check a kernel-side crypto module runs
//! before trusting its own primitives.

use crate::aead::{xchacha20poly1305_decrypt, xchacha20poly1305_encrypt};
use crate::hash::sha256;
use crate::sign::{verify, Keypair};

#[derive(Debug, thiserror::Error)]
pub enum SelfTestError {
    #[error("sha256 known-answer mismatch")]
    Sha256,
    #[error("xchacha20poly1305 roundtrip failed")]
    Aead,
    #[error("ed25519 sign/verify roundtrip failed")]
    Sign,
}

/// Exercises every primitive against a fixed known-answer vector.
/// Must pass before the relay process does anything else.
pub fn self_test() -> Result<(), SelfTestError> {
    let digest = sha256(b"test");
    if hex::encode(digest) != "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08" {
        return Err(SelfTestError::Sha256);
    }

    let key = [0x11u8; 32];
    let nonce = [0x22u8; 24];
    let ad = b"relay-selftest";
    let ciphertext = xchacha20poly1305_encrypt(&key, &nonce, ad, b"known-answer");
    match xchacha20poly1305_decrypt(&key, &nonce, ad, &ciphertext) {
        Ok(plaintext) if plaintext == b"known-answer" => {}
        _ => return Err(SelfTestError::Aead),
    }

    let keypair = Keypair::from_seed(&[0x33u8; 32]);
    let signature = keypair.sign(b"known-answer");
    if !verify(&keypair.public_key(), b"known-answer", &signature) {
        return Err(SelfTestError::Sign);
    }

    Ok(())
}
