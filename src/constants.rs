//! Application-wide constants for cmdnet.
//!
//! Centralizes wire-format sizes, cryptographic parameters and the default
//! timeouts so the transport, host and bot layers agree on them.
//!
//! # Categories
//!
//! - **Network**: Default listen/connect address
//! - **Framing**: Header width and body limits
//! - **Crypto**: Key derivation and handshake parameters
//! - **Timeouts**: Per-connection and per-command limits

use std::time::Duration;

// ============================================================================
// Network
// ============================================================================

/// Hostname used when neither the config file nor the command line names one.
pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";

/// Port used when neither the config file nor the command line names one.
pub const DEFAULT_PORT: u16 = 7070;

// ============================================================================
// Framing
// ============================================================================

/// Width of the little-endian `u32` length header that precedes every body.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum frame body size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Read buffer size for a single socket read.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

// ============================================================================
// Crypto
// ============================================================================

/// PBKDF2-HMAC-SHA256 iteration count for password-derived keys.
///
/// Fixed so that both peers derive the same key from the same password and
/// salt. Changing it is a wire-incompatible change.
pub const KDF_ITERATIONS: usize = 600_000;

/// AES-256 key length in bytes (derived keys and handshake session keys).
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce length (96 bits).
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_SIZE: usize = 16;

/// Magic prefix of the asymmetric handshake envelope.
pub const HANDSHAKE_MAGIC: &[u8; 4] = b"CMDH";

/// Handshake envelope format version.
pub const HANDSHAKE_VERSION: u8 = 1;

/// RSA modulus size for generated keypairs.
pub const RSA_KEY_BITS: u32 = 2048;

/// Validity of generated self-signed certificates.
pub const CERT_VALIDITY_DAYS: u32 = 36_500;

// ============================================================================
// Timeouts
// ============================================================================

/// Inactivity timeout applied to every accepted bot connection.
///
/// Each individual send or receive on the host side must complete within
/// this window, otherwise the bot is considered gone.
pub const BOT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Wall-clock limit for one shell command on the bot.
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(60);

/// Limit for receiving the asymmetric handshake frame from a new peer.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a transient accept error before accepting again.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
