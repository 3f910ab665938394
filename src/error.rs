//! Error type shared by the transport, security and dispatch layers.
//!
//! Errors fall into two families:
//!
//! - **Fatal** (`Transport`, `Closed`, `TimedOut`, `Crypto`): the one
//!   connection they occurred on is unusable and gets closed and removed
//!   from its registry.
//! - **Recoverable** (`Protocol`, `Execution`): reported as a response
//!   string or to the operator; the connection stays open.

use std::io;

/// Errors produced by connections, security contexts and the dispatcher.
#[derive(Debug, Clone)]
pub enum NetError {
    /// Socket I/O failure, short frame, or peer disconnect.
    Transport(String),
    /// Operation attempted on a connection that is already closed.
    Closed,
    /// A send, receive or handshake exceeded its timeout.
    TimedOut,
    /// Authentication tag mismatch, key error, or handshake failure.
    Crypto(String),
    /// Malformed or incomplete application message.
    Protocol(String),
    /// Command or script failure on the bot.
    Execution(String),
}

impl NetError {
    /// Whether this error makes the connection it happened on unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Closed | Self::TimedOut | Self::Crypto(_)
        )
    }

    /// Shorthand for a transport error with a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Shorthand for a crypto error with a message.
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    /// Shorthand for a protocol error with a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl std::fmt::Display for NetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::Closed => write!(f, "Connection closed"),
            Self::TimedOut => write!(f, "Operation timed out"),
            Self::Crypto(msg) => write!(f, "Crypto error: {msg}"),
            Self::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            Self::Execution(msg) => write!(f, "Execution error: {msg}"),
        }
    }
}

impl std::error::Error for NetError {}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::TimedOut,
            _ => Self::Transport(err.to_string()),
        }
    }
}

impl From<openssl::error::ErrorStack> for NetError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for NetError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::TimedOut
    }
}

/// Result alias for cmdnet operations.
pub type NetResult<T> = Result<T, NetError>;
