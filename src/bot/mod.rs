//! Bot side: one connection, one request → execute → respond loop.

pub mod execute;

pub use execute::Executor;

use std::time::Duration;

use crate::constants::SHELL_TIMEOUT;
use crate::error::{NetError, NetResult};
use crate::message::{Message, Request, Response};
use crate::security::Security;
use crate::transport::{Address, Connection};

/// Prefix of every error string a bot sends back.
pub const ERROR_PREFIX: &str = "[BOT] ERROR ::";

/// Format an error as a response string.
pub fn error_response(err: &NetError) -> String {
    format!("{ERROR_PREFIX} {err}")
}

/// Bot behavior knobs.
#[derive(Debug, Clone, Copy)]
pub struct BotOptions {
    /// Shell commands are killed after this long.
    pub shell_timeout: Duration,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            shell_timeout: SHELL_TIMEOUT,
        }
    }
}

/// A connected bot.
#[derive(Debug)]
pub struct Bot {
    conn: Connection,
    executor: Executor,
}

impl Bot {
    /// Connect to a host.
    pub async fn connect(address: &Address, security: &Security, options: BotOptions) -> NetResult<Self> {
        let conn = Connection::connect(address, security).await?;
        log::info!("[Bot] Connected to {address} ({} mode)", conn.mode());
        Ok(Self::from_connection(conn, options))
    }

    /// Serve requests over an already established connection.
    pub fn from_connection(conn: Connection, options: BotOptions) -> Self {
        Self {
            conn,
            executor: Executor::new(options.shell_timeout),
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Serve requests until the connection fails.
    ///
    /// Only transport and crypto failures end the loop; they are returned
    /// to the caller. Malformed requests, failed commands and responses too
    /// large for one frame are answered with an error string.
    pub async fn run(&mut self) -> NetResult<()> {
        loop {
            let response = match self.conn.recv().await {
                Ok(message) => self.handle(&message).await,
                Err(e) if e.is_fatal() => {
                    log::error!("[Bot] Connection lost: {e}");
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("[Bot] Unreadable request: {e}");
                    error_response(&e)
                }
            };
            match self.conn.send(&Response::new(response)).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // Oversized output: answer with the error instead.
                    log::warn!("[Bot] Response not sent: {e}");
                    self.conn.send(&Response::new(error_response(&e))).await?;
                }
            }
        }
    }

    /// Validate and execute one request, always producing response text.
    pub async fn handle(&self, message: &Message) -> String {
        let request = match Request::from_message(message) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("[Bot] Rejected request: {e}");
                return error_response(&e);
            }
        };

        log::debug!("[Bot] Executing (run={}): {}", request.run, request.request);
        match self.executor.execute(&request).await {
            Ok(output) => output,
            Err(e) => {
                log::debug!("[Bot] Command failed: {e}");
                error_response(&e)
            }
        }
    }
}
