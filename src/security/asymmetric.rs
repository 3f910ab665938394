//! RSA-OAEP handshake that establishes a per-connection session key.
//!
//! # Handshake Envelope
//!
//! ```text
//! [magic "CMDH"][version u8][RSA-OAEP-SHA256(session key, 32 bytes)]
//! ```
//!
//! The initiating peer (the bot) draws a random session key, seals it to the
//! host's public key and sends the envelope as the first frame. The host
//! opens it with its private key. Both sides then install a
//! [`SessionCipher`](super::SessionCipher) keyed by that session key.
//! Nothing is ever retried: a bad envelope closes the connection.

use std::path::Path;

use openssl::encrypt::{Decrypter, Encrypter};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Padding;
use openssl::x509::X509;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::symmetric::SymmetricKey;
use crate::constants::{HANDSHAKE_MAGIC, HANDSHAKE_VERSION, KEY_SIZE};
use crate::error::{NetError, NetResult};

/// Long-lived key material for asymmetric connections.
///
/// The host holds its own public key (certificate) and the matching private
/// key. A bot only needs the host's public key.
#[derive(Clone)]
pub struct AsymmetricKeys {
    public_key: PKey<Public>,
    private_key: Option<PKey<Private>>,
}

impl std::fmt::Debug for AsymmetricKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsymmetricKeys")
            .field("fingerprint", &self.fingerprint())
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}

impl AsymmetricKeys {
    /// Build key material from PEM bytes.
    ///
    /// `public_pem` may be an X.509 certificate or a bare public key. When a
    /// private key is given it must belong to the same keypair.
    pub fn from_pem(public_pem: &[u8], private_pem: Option<&[u8]>) -> NetResult<Self> {
        let public_key = parse_public_key(public_pem)?;
        let private_key = private_pem
            .map(|pem| {
                let zeroized = Zeroizing::new(pem.to_vec());
                PKey::private_key_from_pem(&zeroized)
            })
            .transpose()?;

        if let Some(private_key) = &private_key {
            if !private_key.public_eq(&public_key) {
                return Err(NetError::crypto(
                    "Private key does not match the public key",
                ));
            }
        }

        Ok(Self {
            public_key,
            private_key,
        })
    }

    /// Read PEM files from disk.
    pub fn from_files(public_path: &Path, private_path: Option<&Path>) -> NetResult<Self> {
        let public_pem = read_pem(public_path)?;
        let private_pem = private_path.map(read_pem).transpose()?;
        Self::from_pem(&public_pem, private_pem.as_deref().map(|p| p.as_slice()))
    }

    /// Whether this side can answer a handshake.
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// SHA-256 over the DER public key, hex encoded.
    pub fn fingerprint(&self) -> String {
        match self.public_key.public_key_to_der() {
            Ok(der) => Sha256::digest(der)
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect(),
            Err(_) => String::from("unavailable"),
        }
    }

    /// Draw a session key and seal it into a handshake envelope.
    ///
    /// Returns the envelope to send and the session key to install.
    pub fn initiate(&self) -> NetResult<(Vec<u8>, SymmetricKey)> {
        let session_key = super::symmetric::random_key();

        let mut encrypter = Encrypter::new(&self.public_key)?;
        encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
        encrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
        encrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;

        let mut sealed = vec![0u8; encrypter.encrypt_len(session_key.as_slice())?];
        let n = encrypter.encrypt(session_key.as_slice(), &mut sealed)?;
        sealed.truncate(n);

        let mut envelope = Vec::with_capacity(HANDSHAKE_MAGIC.len() + 1 + sealed.len());
        envelope.extend_from_slice(HANDSHAKE_MAGIC);
        envelope.push(HANDSHAKE_VERSION);
        envelope.extend_from_slice(&sealed);
        Ok((envelope, session_key))
    }

    /// Open a handshake envelope with the private key.
    pub fn respond(&self, envelope: &[u8]) -> NetResult<SymmetricKey> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or_else(|| NetError::crypto("No private key to answer the handshake"))?;

        let sealed = envelope
            .strip_prefix(HANDSHAKE_MAGIC.as_slice())
            .and_then(|rest| rest.split_first())
            .filter(|(version, _)| **version == HANDSHAKE_VERSION)
            .map(|(_, sealed)| sealed)
            .ok_or_else(|| NetError::crypto("Malformed handshake envelope"))?;

        let mut decrypter = Decrypter::new(private_key)?;
        decrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
        decrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
        decrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;

        let mut opened = Zeroizing::new(vec![0u8; decrypter.decrypt_len(sealed)?]);
        let n = decrypter
            .decrypt(sealed, &mut opened)
            .map_err(|e| NetError::crypto(format!("Handshake decrypt failed: {e}")))?;

        let bytes = opened.get(..n).filter(|b| b.len() == KEY_SIZE).ok_or_else(|| {
            NetError::crypto(format!("Handshake session key has wrong length: {n}"))
        })?;
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(key)
    }
}

fn parse_public_key(pem: &[u8]) -> NetResult<PKey<Public>> {
    match X509::from_pem(pem) {
        Ok(cert) => Ok(cert.public_key()?),
        Err(_) => PKey::public_key_from_pem(pem)
            .map_err(|e| NetError::crypto(format!("Invalid public key or certificate: {e}"))),
    }
}

fn read_pem(path: &Path) -> NetResult<Zeroizing<Vec<u8>>> {
    std::fs::read(path)
        .map(Zeroizing::new)
        .map_err(|e| NetError::crypto(format!("Failed to read {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::keygen::generate_keypair;

    fn host_and_bot_keys() -> (AsymmetricKeys, AsymmetricKeys) {
        let pair = generate_keypair().unwrap();
        let host =
            AsymmetricKeys::from_pem(&pair.certificate_pem, Some(pair.private_key_pem.as_slice())).unwrap();
        let bot = AsymmetricKeys::from_pem(&pair.certificate_pem, None).unwrap();
        (host, bot)
    }

    #[test]
    fn test_handshake_roundtrip() {
        let (host, bot) = host_and_bot_keys();
        let (envelope, bot_key) = bot.initiate().unwrap();
        let host_key = host.respond(&envelope).unwrap();
        assert_eq!(*bot_key, *host_key);
    }

    #[test]
    fn test_session_key_differs_per_handshake() {
        let (_, bot) = host_and_bot_keys();
        let (_, first) = bot.initiate().unwrap();
        let (_, second) = bot.initiate().unwrap();
        assert_ne!(*first, *second);
    }

    #[test]
    fn test_foreign_public_key_fails() {
        let (host, _) = host_and_bot_keys();
        let (_, foreign_bot) = host_and_bot_keys();
        let (envelope, _) = foreign_bot.initiate().unwrap();
        let err = host.respond(&envelope).unwrap_err();
        assert!(matches!(err, NetError::Crypto(_)));
    }

    #[test]
    fn test_malformed_envelope_fails() {
        let (host, _) = host_and_bot_keys();
        assert!(host.respond(b"not a handshake").is_err());
        assert!(host.respond(b"CMDH").is_err());

        let mut wrong_version = HANDSHAKE_MAGIC.to_vec();
        wrong_version.push(HANDSHAKE_VERSION + 1);
        wrong_version.extend_from_slice(&[0u8; 256]);
        assert!(host.respond(&wrong_version).is_err());
    }

    #[test]
    fn test_bot_cannot_respond() {
        let (_, bot) = host_and_bot_keys();
        let (envelope, _) = bot.initiate().unwrap();
        assert!(bot.respond(&envelope).is_err());
    }

    #[test]
    fn test_mismatched_private_key_rejected() {
        let a = generate_keypair().unwrap();
        let b = generate_keypair().unwrap();
        let err = AsymmetricKeys::from_pem(&a.certificate_pem, Some(b.private_key_pem.as_slice()))
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_bare_public_key_accepted() {
        let pair = generate_keypair().unwrap();
        let cert = X509::from_pem(&pair.certificate_pem).unwrap();
        let spki = cert.public_key().unwrap().public_key_to_pem().unwrap();
        let from_cert = AsymmetricKeys::from_pem(&pair.certificate_pem, None).unwrap();
        let from_spki = AsymmetricKeys::from_pem(&spki, None).unwrap();
        assert_eq!(from_cert.fingerprint(), from_spki.fingerprint());
    }
}
