//! Cryptographic primitives for the relay: hashing, AEAD, and signing.
//!
//! Every primitive is a thin, direct wrapper around a single well-known
//! crate. Nothing here implements its own cryptography.

pub mod aead;
pub mod hash;
pub mod selftest;
pub mod sign;

pub use aead::{xchacha20poly1305_decrypt, xchacha20poly1305_encrypt, AeadError, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use hash::sha256;
pub use selftest::{self_test, SelfTestError};
pub use sign::{verify, Keypair, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE};
