use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SECRET_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

/// An Ed25519 keypair used to sign neighbor pings and backend route tokens.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generates a fresh random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Rebuilds a keypair from a 32-byte seed, e.g. loaded from configuration.
    pub fn from_seed(seed: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verifies an Ed25519 signature against a raw 32-byte public key.
///
/// Returns `false` on a malformed public key or signature as well as on a
/// genuine verification failure; callers only need the yes/no answer.
pub fn verify(public_key: &[u8; PUBLIC_KEY_SIZE], message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(signature);
    verifying_key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let keypair = Keypair::generate();
        let message = b"route-token-fields";
        let signature = keypair.sign(message);
        assert!(verify(&keypair.public_key(), message, &signature));
    }

    #[test]
    fn tampered_message_fails() {
        let keypair = Keypair::generate();
        let signature = keypair.sign(b"original");
        assert!(!verify(&keypair.public_key(), b"tampered", &signature));
    }

    #[test]
    fn wrong_key_fails() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let signature = a.sign(b"message");
        assert!(!verify(&b.public_key(), b"message", &signature));
    }

    #[test]
    fn deterministic_from_seed() {
        let seed = [42u8; SECRET_KEY_SIZE];
        let a = Keypair::from_seed(&seed);
        let b = Keypair::from_seed(&seed);
        assert_eq!(a.public_key(), b.public_key());
    }
}
