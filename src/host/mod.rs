//! Listening host: accept loop and per-host bot registry.
//!
//! # Lifecycle
//!
//! ```text
//! Host::start ──► bind Listener ──► insert into host registry ──► spawn accept_loop
//!
//! accept_loop (one task per listener)
//!   ├─ peer accepted ──► spawn establish (handshake, io timeout, insert bot)
//!   ├─ transient error ──► pause, keep accepting
//!   └─ cancelled / fatal error ──► teardown (deferred guard)
//!
//! teardown: drain + seal bots, close each, remove host from the registry
//! ```
//!
//! Teardown runs from a `scopeguard` in the accept loop, so it happens on
//! every exit path including panics, and from [`Host::close`]. It is
//! idempotent.

pub mod record;

pub use record::{toggle_session, BotRecord, Exchange, SessionOutcome};

use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::constants::{ACCEPT_RETRY_DELAY, BOT_INACTIVITY_TIMEOUT, HANDSHAKE_TIMEOUT};
use crate::error::NetResult;
use crate::registry::{generate_id, Registry};
use crate::security::{Security, SecurityMode};
use crate::transport::{Address, Connection, Listener, Role};

/// Timeouts applied to every bot a host accepts.
#[derive(Debug, Clone, Copy)]
pub struct HostOptions {
    /// Per-operation I/O timeout on each bot connection.
    pub bot_timeout: Duration,
    /// Limit for receiving the asymmetric handshake envelope.
    pub handshake_timeout: Duration,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            bot_timeout: BOT_INACTIVITY_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// A listening host and the bots connected to it.
#[derive(Debug)]
pub struct Host {
    id: String,
    address: Address,
    mode: SecurityMode,
    options: HostOptions,
    bots: Registry<BotRecord>,
    shutdown: CancellationToken,
    hosts: Weak<Registry<Host>>,
}

impl Host {
    /// Bind `address`, register the host in `hosts` and start its accept loop.
    ///
    /// Must be called from within a tokio runtime. Every accepted bot uses
    /// `security`, the same configuration the host was started with.
    pub async fn start(
        address: &Address,
        security: Security,
        options: HostOptions,
        hosts: &Arc<Registry<Host>>,
    ) -> NetResult<Arc<Self>> {
        let listener = Listener::bind(address).await?;
        let host = Arc::new(Self {
            id: generate_id(),
            address: listener.local_address().clone(),
            mode: security.mode(),
            options,
            bots: Registry::new(),
            shutdown: CancellationToken::new(),
            hosts: Arc::downgrade(hosts),
        });

        hosts.insert(host.id.clone(), Arc::clone(&host));
        log::info!(
            "[Host] {} listening on {} ({} mode)",
            host.id,
            host.address,
            host.mode
        );

        tokio::spawn(Arc::clone(&host).accept_loop(listener, Arc::new(security)));
        Ok(host)
    }

    async fn accept_loop(self: Arc<Self>, listener: Listener, security: Arc<Security>) {
        let host = Arc::clone(&self);
        scopeguard::defer! {
            host.teardown();
        }
        // Declared after the guard so the socket is closed before teardown runs.
        let listener = listener;

        loop {
            let accepted = tokio::select! {
                () = self.shutdown.cancelled() => {
                    log::info!("[Accept] {} stopped", self.id);
                    break;
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    log::debug!("[Accept] {} accepted {peer}", self.id);
                    self.spawn_establish(stream, peer, Arc::clone(&security));
                }
                Err(e) => match retry_delay(&e) {
                    Some(delay) => {
                        log::warn!("[Accept] {} transient accept error: {e}", self.id);
                        tokio::select! {
                            () = self.shutdown.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        log::error!("[Accept] {} listener failed: {e}", self.id);
                        break;
                    }
                },
            }
        }
    }

    /// Handshake on a separate task so one slow peer never stalls accepting.
    fn spawn_establish(self: &Arc<Self>, stream: TcpStream, peer: Address, security: Arc<Security>) {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let established = tokio::select! {
                () = host.shutdown.cancelled() => return,
                result = Connection::accept(stream, &security, host.options.handshake_timeout) => result,
            };

            let mut conn = match established {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("[Accept] {} rejected {peer}: {e}", host.id);
                    return;
                }
            };
            conn.set_io_timeout(Some(host.options.bot_timeout));

            let bot_id = generate_id();
            let record = Arc::new(BotRecord::new(bot_id.clone(), conn));
            if host.bots.insert(bot_id.clone(), Arc::clone(&record)) {
                log::info!("[Accept] {} bot {bot_id} connected from {peer}", host.id);
            } else {
                log::info!("[Accept] {} closed, dropping {peer}", host.id);
                record.close();
            }
        });
    }

    /// Stop accepting, close every bot and unregister the host.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.teardown();
    }

    fn teardown(&self) {
        for bot in self.bots.drain() {
            bot.close();
            log::info!("[Host] {} closed bot {}", self.id, bot.id());
        }
        if let Some(hosts) = self.hosts.upgrade() {
            if hosts.remove(&self.id).is_some() {
                log::info!("[Host] {} closed", self.id);
            }
        }
    }

    /// Close and unregister one bot. Returns `false` if it is not ours.
    pub fn close_bot(&self, bot_id: &str) -> bool {
        match self.bots.remove(bot_id) {
            Some(bot) => {
                bot.close();
                log::info!("[Host] {} closed bot {bot_id}", self.id);
                true
            }
            None => false,
        }
    }

    /// Host id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Address actually bound.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Security mode shared by this host's connections.
    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// This host's bots.
    pub fn bots(&self) -> &Registry<BotRecord> {
        &self.bots
    }

    /// Whether the host has been stopped.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// `(field, value)` rows describing this host.
    pub fn details(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("local", self.address.to_string()),
            ("role", Role::Listener.to_string()),
            ("mode", self.mode.to_string()),
            ("bots", self.bots.len().to_string()),
            (
                "bot timeout",
                format!("{}s", self.options.bot_timeout.as_secs()),
            ),
        ]
    }
}

/// How long to wait before accepting again, or `None` if the listener is
/// unusable.
fn retry_delay(err: &io::Error) -> Option<Duration> {
    is_transient(err).then_some(ACCEPT_RETRY_DELAY)
}

/// Accept errors caused by one peer rather than the listening socket.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || err.raw_os_error().is_some_and(is_fd_exhaustion)
}

// EMFILE / ENFILE clear up once other connections close.
fn is_fd_exhaustion(code: i32) -> bool {
    code == 23 || code == 24
}
