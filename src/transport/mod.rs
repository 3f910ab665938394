//! Framed, optionally encrypted message channel over TCP.
//!
//! # Architecture
//!
//! ```text
//! Bot process                              Host process
//! ┌──────────────────┐                    ┌──────────────────────┐
//! │ Connection       │                    │ Listener             │
//! │  role: Initiator │   TCP stream of    │  accept()            │
//! │  Pipeline        │◄──────────────────►│ Connection           │
//! │   [gzip?][aes]   │   length-prefixed  │  role: Accepted      │
//! │  FrameDecoder    │   frames           │  Pipeline, Decoder   │
//! └──────────────────┘                    └──────────────────────┘
//! ```
//!
//! # Wire Protocol
//!
//! `[u32 LE length][body]`; see [`framing`] for the codec and
//! [`crate::security`] for what the body contains in each mode.

pub mod connection;
pub mod framing;

pub use connection::{Connection, Listener, Role};
pub use framing::{FrameDecoder, FrameStats};

use std::net::SocketAddr;

/// A peer or local endpoint as `(host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// IP address or hostname.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Address {
    /// Build an address from parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        assert_eq!(Address::new("127.0.0.1", 7070).to_string(), "127.0.0.1:7070");
        assert_eq!(Address::new("::1", 80).to_string(), "[::1]:80");
    }

    #[test]
    fn test_address_from_socket_addr() {
        let addr: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        assert_eq!(Address::from(addr), Address::new("10.0.0.2", 4000));
    }
}
