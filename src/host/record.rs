//! Host-side record of one connected bot.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{NetError, NetResult};
use crate::message::{Message, Request, Response};
use crate::security::SecurityMode;
use crate::transport::{Address, Connection, FrameStats};

/// Result of toggling a bot's session membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Flag went from false to true.
    Joined,
    /// Flag went from true to false.
    Removed,
    /// Join requested but the flag was already true.
    AlreadyInSession,
    /// Removal requested but the flag was already false.
    NotInSession,
}

/// Join (`remove == false`) or leave (`remove == true`) a session.
///
/// The flag only ever changes on `Joined` and `Removed`.
pub fn toggle_session(flag: &AtomicBool, remove: bool) -> SessionOutcome {
    let (from, to) = if remove { (true, false) } else { (false, true) };
    match flag.compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) if remove => SessionOutcome::Removed,
        Ok(_) => SessionOutcome::Joined,
        Err(_) if remove => SessionOutcome::NotInSession,
        Err(_) => SessionOutcome::AlreadyInSession,
    }
}

/// One request/response round with a bot.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// The bot's `response` text.
    pub response: String,
    /// Frame carrying the request.
    pub sent: FrameStats,
    /// Frame carrying the response.
    pub received: FrameStats,
}

/// A connected bot, as seen by its host.
///
/// Created once the connection is established, destroyed (removed from its
/// host's map) on close or on a fatal connection error.
#[derive(Debug)]
pub struct BotRecord {
    id: String,
    address: Address,
    local: Address,
    mode: SecurityMode,
    middleware: Vec<&'static str>,
    conn: Mutex<Connection>,
    in_session: AtomicBool,
    closed: CancellationToken,
}

impl BotRecord {
    /// Wrap an established connection.
    pub fn new(id: String, conn: Connection) -> Self {
        Self {
            id,
            address: conn.address().clone(),
            local: conn.local_address().clone(),
            mode: conn.mode(),
            middleware: conn.middleware(),
            conn: Mutex::new(conn),
            in_session: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Bot id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The bot's remote address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Security mode of the connection.
    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Whether broadcast commands reach this bot.
    pub fn in_session(&self) -> bool {
        self.in_session.load(Ordering::Acquire)
    }

    /// Join or leave the broadcast session.
    pub fn toggle_session(&self, remove: bool) -> SessionOutcome {
        toggle_session(&self.in_session, remove)
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close the connection.
    ///
    /// If an exchange is in flight it is interrupted and closes the
    /// connection itself when it unwinds.
    pub fn close(&self) {
        self.closed.cancel();
        if let Ok(mut conn) = self.conn.try_lock() {
            conn.close();
        }
    }

    /// Send `request` and wait for the bot's response.
    pub async fn exchange(&self, request: &Request) -> NetResult<Exchange> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        let mut conn = self.conn.lock().await;
        let result = tokio::select! {
            () = self.closed.cancelled() => Err(NetError::Closed),
            result = round_trip(&mut conn, request) => result,
        };
        if self.is_closed() {
            conn.close();
        }
        result
    }

    /// `(field, value)` rows describing this bot.
    pub fn details(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("remote", self.address.to_string()),
            ("local", self.local.to_string()),
            ("role", "accepted".to_string()),
            ("mode", self.mode.to_string()),
            ("middleware", self.middleware.join(", ")),
            ("in session", self.in_session().to_string()),
        ]
    }
}

async fn round_trip(conn: &mut Connection, request: &Request) -> NetResult<Exchange> {
    let sent = conn.send(request).await?;
    let mut received = FrameStats::for_body(0);
    let reply: Message = conn.recv_with(|stats| received = *stats).await?;
    let Response { response } = Response::from_message(&reply)?;
    Ok(Exchange {
        response,
        sent,
        received,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_twice_reports_already_in_session() {
        let flag = AtomicBool::new(false);
        assert_eq!(toggle_session(&flag, false), SessionOutcome::Joined);
        assert_eq!(toggle_session(&flag, false), SessionOutcome::AlreadyInSession);
        assert!(flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_remove_twice_reports_not_in_session() {
        let flag = AtomicBool::new(true);
        assert_eq!(toggle_session(&flag, true), SessionOutcome::Removed);
        assert_eq!(toggle_session(&flag, true), SessionOutcome::NotInSession);
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_remove_when_never_joined() {
        let flag = AtomicBool::new(false);
        assert_eq!(toggle_session(&flag, true), SessionOutcome::NotInSession);
        assert!(!flag.load(Ordering::Acquire));
    }
}
