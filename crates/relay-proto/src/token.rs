//! Route tokens: the backend-issued, per-hop descriptor that installs a
//! session. Sealed with a symmetric key shared out-of-band between the
//! backend and this relay (the relay's `--private-key`), and separately
//! signed by the backend's Ed25519 key so a relay that holds the shared
//! secret can still tell a genuine backend issuance from anything else
//! encrypted under that key.

use relay_crypto::{xchacha20poly1305_decrypt, xchacha20poly1305_encrypt, KEY_SIZE, NONCE_SIZE, SIGNATURE_SIZE, TAG_SIZE};

use crate::address::{Address, ENCODED_SIZE as ADDRESS_SIZE};
use crate::wire::{Reader, Writer};

pub const SESSION_PRIVATE_KEY_SIZE: usize = 32;

const TOKEN_PLAINTEXT_SIZE: usize = 8 // session_id
    + 8 // expire_timestamp
    + ADDRESS_SIZE // next_address
    + ADDRESS_SIZE // prev_address
    + SESSION_PRIVATE_KEY_SIZE // session_private_key
    + 4 // envelope_up_kbps
    + 4 // envelope_down_kbps
    + SIGNATURE_SIZE; // backend signature over the fields above

const TOKEN_CIPHERTEXT_SIZE: usize = TOKEN_PLAINTEXT_SIZE + TAG_SIZE;

/// Total on-wire size of a sealed route token: nonce prefix plus ciphertext.
pub const SESSION_TOKEN_SIZE: usize = NONCE_SIZE + TOKEN_CIPHERTEXT_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTokenFields {
    pub session_id: u64,
    pub expire_timestamp: u64,
    pub next_address: Address,
    pub prev_address: Address,
    pub session_private_key: [u8; SESSION_PRIVATE_KEY_SIZE],
    pub envelope_up_kbps: u32,
    pub envelope_down_kbps: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has the wrong length")]
    WrongSize,
    #[error("token failed to decrypt")]
    DecryptFailed,
    #[error("token signature does not verify")]
    SignatureInvalid,
    #[error("token already expired")]
    Expired,
}

impl RouteTokenFields {
    fn encode_unsigned(&self, w: &mut Writer) {
        w.u64(self.session_id);
        w.u64(self.expire_timestamp);
        self.next_address.encode(w);
        self.prev_address.encode(w);
        w.bytes(&self.session_private_key);
        w.u32(self.envelope_up_kbps);
        w.u32(self.envelope_down_kbps);
    }

    fn decode_unsigned(r: &mut Reader) -> Result<Self, TokenError> {
        let session_id = r.u64().map_err(|_| TokenError::WrongSize)?;
        let expire_timestamp = r.u64().map_err(|_| TokenError::WrongSize)?;
        let next_address = Address::decode(r).map_err(|_| TokenError::WrongSize)?;
        let prev_address = Address::decode(r).map_err(|_| TokenError::WrongSize)?;
        let session_private_key = r.array().map_err(|_| TokenError::WrongSize)?;
        let envelope_up_kbps = r.u32().map_err(|_| TokenError::WrongSize)?;
        let envelope_down_kbps = r.u32().map_err(|_| TokenError::WrongSize)?;
        Ok(RouteTokenFields {
            session_id,
            expire_timestamp,
            next_address,
            prev_address,
            session_private_key,
            envelope_up_kbps,
            envelope_down_kbps,
        })
    }

    /// Seals these fields for one relay hop: signs with the backend's
    /// signing key, then encrypts under the shared per-relay key using a
    /// random nonce prefixed to the wire output.
    pub fn seal(
        &self,
        relay_shared_key: &[u8; KEY_SIZE],
        backend_keypair: &relay_crypto::Keypair,
        nonce: [u8; NONCE_SIZE],
    ) -> Vec<u8> {
        let mut fields_w = Writer::new();
        self.encode_unsigned(&mut fields_w);
        let fields_bytes = fields_w.into_bytes();
        let signature = backend_keypair.sign(&fields_bytes);

        let mut plaintext_w = Writer::new();
        plaintext_w.bytes(&fields_bytes);
        plaintext_w.bytes(&signature);
        let plaintext = plaintext_w.into_bytes();
        debug_assert_eq!(plaintext.len(), TOKEN_PLAINTEXT_SIZE);

        let ciphertext = xchacha20poly1305_encrypt(relay_shared_key, &nonce, b"route-token", &plaintext);

        let mut out = Vec::with_capacity(SESSION_TOKEN_SIZE);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Opens a sealed token: decrypts with the relay's shared key, verifies
    /// the backend signature, and checks the expiry against `now`.
    pub fn open(
        token: &[u8],
        relay_shared_key: &[u8; KEY_SIZE],
        backend_public_key: &[u8; relay_crypto::PUBLIC_KEY_SIZE],
        now: u64,
    ) -> Result<Self, TokenError> {
        if token.len() != SESSION_TOKEN_SIZE {
            return Err(TokenError::WrongSize);
        }
        let nonce: [u8; NONCE_SIZE] = token[..NONCE_SIZE].try_into().unwrap();
        let ciphertext = &token[NONCE_SIZE..];

        let plaintext = xchacha20poly1305_decrypt(relay_shared_key, &nonce, b"route-token", ciphertext)
            .map_err(|_| TokenError::DecryptFailed)?;
        if plaintext.len() != TOKEN_PLAINTEXT_SIZE {
            return Err(TokenError::WrongSize);
        }

        let fields_bytes = &plaintext[..TOKEN_PLAINTEXT_SIZE - SIGNATURE_SIZE];
        let signature: [u8; SIGNATURE_SIZE] = plaintext[TOKEN_PLAINTEXT_SIZE - SIGNATURE_SIZE..].try_into().unwrap();
        if !relay_crypto::verify(backend_public_key, fields_bytes, &signature) {
            return Err(TokenError::SignatureInvalid);
        }

        let mut r = Reader::new(fields_bytes);
        let fields = Self::decode_unsigned(&mut r)?;
        if fields.expire_timestamp <= now {
            return Err(TokenError::Expired);
        }
        Ok(fields)
    }
}
