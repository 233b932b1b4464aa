use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum AeadError {
    #[error("authentication failed")]
    AuthFailed,
}

/// Encrypts `plaintext` under `key`/`nonce`, authenticating `ad` alongside it.
/// Returns ciphertext with the 16-byte Poly1305 tag appended.
pub fn xchacha20poly1305_encrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ad: &[u8],
    plaintext: &[u8],
) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: ad })
        .expect("xchacha20poly1305 encryption does not fail for valid inputs")
}

/// Decrypts and authenticates `ciphertext` (plaintext || tag).
///
/// On tag mismatch returns `Err` with no partial plaintext exposed; the
/// underlying crate performs the tag comparison in constant time.
pub fn xchacha20poly1305_decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad: ad })
        .map_err(|_| AeadError::AuthFailed)
}
