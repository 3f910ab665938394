//! Password-derived keys and the AES-256-GCM body cipher.
//!
//! # Body Format
//!
//! ```text
//! [nonce: 12 bytes][ciphertext][tag: 16 bytes]
//! ```
//!
//! A fresh random nonce is drawn for every message. Decryption verifies the
//! tag before anything is returned; a mismatch fails the whole receive.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use openssl::hash::MessageDigest;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::constants::{KDF_ITERATIONS, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{NetError, NetResult};
use crate::middleware::Middleware;

/// A 256-bit key that is wiped from memory on drop.
pub type SymmetricKey = Zeroizing<[u8; KEY_SIZE]>;

/// Derive the shared key from an operator-supplied password and salt.
///
/// PBKDF2-HMAC-SHA256 with [`KDF_ITERATIONS`] rounds. Deterministic: the
/// same inputs always produce the same key on every peer.
pub fn derive_key(password: &str, salt: &str) -> NetResult<SymmetricKey> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    openssl::pkcs5::pbkdf2_hmac(
        password.as_bytes(),
        salt.as_bytes(),
        KDF_ITERATIONS,
        MessageDigest::sha256(),
        key.as_mut_slice(),
    )?;
    Ok(key)
}

/// Generate a random key (used for handshake session keys).
pub fn random_key() -> SymmetricKey {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    rand::rng().fill_bytes(key.as_mut_slice());
    key
}

/// AES-256-GCM middleware layer keyed for one connection.
pub struct SessionCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

impl SessionCipher {
    /// Build a cipher from a 256-bit key.
    pub fn new(key: &[u8; KEY_SIZE]) -> NetResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| NetError::crypto(format!("Invalid key length: {e}")))?;
        Ok(Self { cipher })
    }

    /// Encrypt with a random nonce, returning `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> NetResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| NetError::crypto(format!("Encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Verify and decrypt `nonce || ciphertext || tag`.
    pub fn open(&self, body: &[u8]) -> NetResult<Vec<u8>> {
        if body.len() < NONCE_SIZE + TAG_SIZE {
            return Err(NetError::crypto(format!(
                "Ciphertext too short: {} bytes",
                body.len()
            )));
        }
        let (nonce_bytes, ciphertext) = body.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| NetError::crypto(format!("Decryption failed: {e}")))
    }
}

impl Middleware for SessionCipher {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn encode(&self, data: Vec<u8>) -> NetResult<Vec<u8>> {
        self.seal(&data)
    }

    fn decode(&self, data: Vec<u8>) -> NetResult<Vec<u8>> {
        self.open(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_inputs_derive_same_key() {
        let a = derive_key("p", "s").unwrap();
        let b = derive_key("p", "s").unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_different_salt_derives_different_key() {
        let a = derive_key("p", "s").unwrap();
        let b = derive_key("p", "t").unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_different_password_derives_different_key() {
        let a = derive_key("p", "s").unwrap();
        let b = derive_key("q", "s").unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = SessionCipher::new(&[42u8; KEY_SIZE]).unwrap();
        let sealed = cipher.seal(b"Hello, encrypted world!").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 23 + TAG_SIZE);
        assert_eq!(cipher.open(&sealed).unwrap(), b"Hello, encrypted world!");
    }

    #[test]
    fn test_nonce_is_fresh_per_message() {
        let cipher = SessionCipher::new(&[1u8; KEY_SIZE]).unwrap();
        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SessionCipher::new(&[1u8; KEY_SIZE])
            .unwrap()
            .seal(b"secret")
            .unwrap();
        let err = SessionCipher::new(&[2u8; KEY_SIZE])
            .unwrap()
            .open(&sealed)
            .unwrap_err();
        assert!(matches!(err, NetError::Crypto(_)));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let cipher = SessionCipher::new(&[3u8; KEY_SIZE]).unwrap();
        let mut sealed = cipher.seal(b"integrity").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(cipher.open(&sealed).is_err());
    }

    #[test]
    fn test_short_body_fails() {
        let cipher = SessionCipher::new(&[3u8; KEY_SIZE]).unwrap();
        assert!(cipher.open(&[0u8; NONCE_SIZE]).is_err());
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let cipher = SessionCipher::new(&[9u8; KEY_SIZE]).unwrap();
        let sealed = cipher.seal(b"").unwrap();
        assert!(cipher.open(&sealed).unwrap().is_empty());
    }
}
