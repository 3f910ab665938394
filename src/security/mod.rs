//! Security contexts for connections.
//!
//! A connection's security is chosen once, at construction, from one of
//! three mutually exclusive credential sets:
//!
//! | Credentials            | Mode         | Key                                  |
//! |------------------------|--------------|--------------------------------------|
//! | password + salt        | `Symmetric`  | PBKDF2 key derived once              |
//! | public (+private) key  | `Asymmetric` | RSA-OAEP handshake, per-connection   |
//! | nothing                | `None`       | plaintext JSON bodies                |
//!
//! Both encrypted modes end up installing the same AES-256-GCM
//! [`SessionCipher`] in the connection's middleware pipeline; they differ
//! only in where the key comes from.

pub mod asymmetric;
pub mod keygen;
pub mod symmetric;

use std::path::PathBuf;

pub use asymmetric::AsymmetricKeys;
pub use symmetric::{derive_key, SessionCipher, SymmetricKey};

use crate::error::{NetError, NetResult};

/// Operator-supplied credentials, before any key derivation.
#[derive(Clone, Default)]
pub enum Credentials {
    /// No encryption.
    #[default]
    None,
    /// Shared password and salt, known to both peers out of band.
    Password {
        /// Password text.
        password: String,
        /// Salt text.
        salt: String,
    },
    /// PEM files: the host's certificate, plus its private key on the host.
    KeyPair {
        /// Certificate or public key file.
        public_key: PathBuf,
        /// Private key file (host side only).
        private_key: Option<PathBuf>,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "Credentials::None"),
            Self::Password { .. } => write!(f, "Credentials::Password {{ .. }}"),
            Self::KeyPair {
                public_key,
                private_key,
            } => f
                .debug_struct("Credentials::KeyPair")
                .field("public_key", public_key)
                .field("private_key", private_key)
                .finish(),
        }
    }
}

impl Credentials {
    /// Select credentials from optional command-line values.
    ///
    /// Exactly one complete set may be given. Partial or overlapping sets are
    /// rejected rather than silently falling back to no security.
    pub fn from_options(
        password: Option<String>,
        salt: Option<String>,
        public_key: Option<PathBuf>,
        private_key: Option<PathBuf>,
    ) -> NetResult<Self> {
        let symmetric = password.is_some() || salt.is_some();
        let asymmetric = public_key.is_some() || private_key.is_some();

        match (password, salt, public_key, private_key) {
            _ if symmetric && asymmetric => Err(NetError::protocol(
                "password/salt and public/private key are mutually exclusive",
            )),
            (Some(password), Some(salt), None, None) => Ok(Self::Password { password, salt }),
            (Some(_), None, _, _) | (None, Some(_), _, _) => Err(NetError::protocol(
                "password and salt must be given together",
            )),
            (None, None, Some(public_key), private_key) => Ok(Self::KeyPair {
                public_key,
                private_key,
            }),
            (None, None, None, Some(_)) => Err(NetError::protocol(
                "a private key requires its public key",
            )),
            _ => Ok(Self::None),
        }
    }
}

/// Which security strategy a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// Plaintext bodies.
    None,
    /// Password-derived AES-GCM key.
    Symmetric,
    /// RSA handshake, then AES-GCM with a per-connection key.
    Asymmetric,
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Symmetric => write!(f, "symmetric"),
            Self::Asymmetric => write!(f, "asymmetric"),
        }
    }
}

/// Resolved key material, shared by every connection of one host or bot.
pub enum Security {
    /// Plaintext bodies.
    None,
    /// Key derived once from password and salt.
    Symmetric(SymmetricKey),
    /// Long-lived keys used to negotiate per-connection session keys.
    Asymmetric(AsymmetricKeys),
}

impl std::fmt::Debug for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "Security::None"),
            Self::Symmetric(_) => write!(f, "Security::Symmetric(..)"),
            Self::Asymmetric(keys) => f.debug_tuple("Security::Asymmetric").field(keys).finish(),
        }
    }
}

impl Security {
    /// Derive or load key material for the given credentials.
    pub fn from_credentials(credentials: &Credentials) -> NetResult<Self> {
        match credentials {
            Credentials::None => Ok(Self::None),
            Credentials::Password { password, salt } => {
                Ok(Self::Symmetric(derive_key(password, salt)?))
            }
            Credentials::KeyPair {
                public_key,
                private_key,
            } => Ok(Self::Asymmetric(AsymmetricKeys::from_files(
                public_key,
                private_key.as_deref(),
            )?)),
        }
    }

    /// [`Security::from_credentials`] on a blocking thread.
    ///
    /// Password derivation runs 600 000 PBKDF2 iterations and must stay off
    /// the async workers.
    pub async fn derive(credentials: &Credentials) -> NetResult<Self> {
        let credentials = credentials.clone();
        tokio::task::spawn_blocking(move || Self::from_credentials(&credentials))
            .await
            .map_err(|e| NetError::crypto(format!("Key derivation task failed: {e}")))?
    }

    /// Symmetric security from a password and salt.
    pub fn symmetric(password: &str, salt: &str) -> NetResult<Self> {
        Ok(Self::Symmetric(derive_key(password, salt)?))
    }

    /// The strategy this context implements.
    pub fn mode(&self) -> SecurityMode {
        match self {
            Self::None => SecurityMode::None,
            Self::Symmetric(_) => SecurityMode::Symmetric,
            Self::Asymmetric(_) => SecurityMode::Asymmetric,
        }
    }
}
