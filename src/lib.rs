//! cmdnet - host/bot command fabric over an encrypted, length-framed channel.
//!
//! A host process listens for bots, keeps a registry of them, and broadcasts
//! command requests to the bots an operator has placed in its session. Each
//! bot executes the request locally (Lua or a shell command) and answers.
//!
//! # Architecture
//!
//! - **Transport** - length-prefixed frames over TCP, one [`Connection`] per socket
//! - **Security** - none, password-derived AES-GCM, or an RSA handshake
//!   that installs a per-connection AES-GCM key
//! - **Middleware** - reversible body transforms (cipher, compression)
//! - **Host** - listener, accept loop, per-host bot registry
//! - **Session** - process-wide host registry and sequential broadcast
//! - **Bot** - request → execute → respond loop
//!
//! # Modules
//!
//! - [`transport`] - Framing and the connection type
//! - [`security`] - Credentials, key derivation, handshake, keygen
//! - [`host`] - Accept loop and bot records
//! - [`session`] - Operator actions over all hosts
//! - [`bot`] - Bot dispatcher and command execution
//! - [`console`] - Interactive operator console
//! - [`config`] - Configuration loading

pub mod bot;
pub mod config;
pub mod console;
pub mod constants;
pub mod error;
pub mod host;
pub mod message;
pub mod middleware;
pub mod registry;
pub mod security;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use bot::{Bot, BotOptions};
pub use config::Config;
pub use error::{NetError, NetResult};
pub use host::{Host, HostOptions};
pub use message::{Message, Request, Response};
pub use security::{Credentials, Security, SecurityMode};
pub use session::Controller;
pub use transport::{Address, Connection};
