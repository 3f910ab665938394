//! Keypair bootstrap for asymmetric mode.
//!
//! Generates an RSA key and a self-signed X.509 certificate. The host is
//! started with both files; bots receive only the certificate.

use std::fs;
use std::path::Path;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509NameBuilder, X509};
use zeroize::Zeroizing;

use crate::constants::{CERT_VALIDITY_DAYS, RSA_KEY_BITS};
use crate::error::{NetError, NetResult};

/// PEM-encoded certificate and private key.
pub struct GeneratedKeypair {
    /// Self-signed X.509 certificate carrying the public key.
    pub certificate_pem: Vec<u8>,
    /// PKCS#8 private key.
    pub private_key_pem: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for GeneratedKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKeypair")
            .field("certificate_len", &self.certificate_pem.len())
            .finish_non_exhaustive()
    }
}

/// Generate an RSA keypair and a self-signed certificate for it.
pub fn generate_keypair() -> NetResult<GeneratedKeypair> {
    let rsa = Rsa::generate(RSA_KEY_BITS)?;
    let pkey = PKey::from_rsa(rsa)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", "cmdnet")?;
    let name = name.build();

    let serial = {
        let mut bn = BigNum::new()?;
        bn.rand(159, MsbOption::MAYBE_ZERO, false)?;
        bn.to_asn1_integer()?
    };

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&pkey)?;
    let not_before = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now(CERT_VALIDITY_DAYS)?;
    builder.set_not_after(&not_after)?;
    builder.sign(&pkey, MessageDigest::sha256())?;
    let cert = builder.build();

    Ok(GeneratedKeypair {
        certificate_pem: cert.to_pem()?,
        private_key_pem: Zeroizing::new(pkey.private_key_to_pem_pkcs8()?),
    })
}

/// Generate a keypair and write it to disk.
///
/// The private key file is restricted to the owner (0600) on Unix.
pub fn write_keypair(public_out: &Path, private_out: &Path) -> NetResult<GeneratedKeypair> {
    let pair = generate_keypair()?;

    write_file(public_out, &pair.certificate_pem)?;
    write_file(private_out, &pair.private_key_pem)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(private_out, perms).map_err(|e| {
            NetError::crypto(format!(
                "Failed to restrict {}: {e}",
                private_out.display()
            ))
        })?;
    }

    log::info!(
        "[Keygen] Wrote certificate to {} and private key to {}",
        public_out.display(),
        private_out.display()
    );
    Ok(pair)
}

fn write_file(path: &Path, contents: &[u8]) -> NetResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| NetError::crypto(format!("Failed to create {}: {e}", parent.display())))?;
    }
    fs::write(path, contents)
        .map_err(|e| NetError::crypto(format!("Failed to write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::AsymmetricKeys;

    #[test]
    fn test_generated_pair_loads() {
        let pair = generate_keypair().unwrap();
        assert!(pair.certificate_pem.starts_with(b"-----BEGIN CERTIFICATE-----"));
        let keys =
            AsymmetricKeys::from_pem(&pair.certificate_pem, Some(pair.private_key_pem.as_slice())).unwrap();
        assert!(keys.has_private_key());
    }

    #[test]
    fn test_write_keypair_to_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cert = tmp.path().join("keys/host.pem");
        let key = tmp.path().join("keys/host.key");

        write_keypair(&cert, &key).unwrap();

        let keys = AsymmetricKeys::from_files(&cert, Some(key.as_path())).unwrap();
        assert!(keys.has_private_key());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&key).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
