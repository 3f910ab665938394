//! Operator-side orchestration over every running host.
//!
//! [`Controller`] owns the process-wide host registry and implements the
//! operator actions: starting hosts, inspecting and closing hosts or bots,
//! toggling session membership, and broadcasting a request to the session.
//!
//! # Dispatch
//!
//! Broadcast is strictly sequential. Hosts are visited in the order they
//! were started, and each host's in-session bots in the order they
//! connected. Each bot gets the request and its response is awaited before
//! the next bot is contacted, so one slow bot delays the rest of the round.
//!
//! A fatal error on one bot closes that bot and removes it from its host;
//! the round then continues with the next bot. Recoverable errors (a reply
//! without a `response` field) are reported and leave the bot connected.

use std::sync::Arc;

use crate::error::{NetError, NetResult};
use crate::host::{BotRecord, Exchange, Host, HostOptions, SessionOutcome};
use crate::message::Request;
use crate::registry::Registry;
use crate::security::{Credentials, Security};
use crate::transport::Address;

/// Something an operator id can name.
#[derive(Debug, Clone)]
pub enum Target {
    /// A listening host.
    Host(Arc<Host>),
    /// A bot and the host it belongs to.
    Bot {
        /// Owning host.
        host: Arc<Host>,
        /// The bot.
        bot: Arc<BotRecord>,
    },
}

/// What `close` did for one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// A host and all of its bots were closed.
    HostClosed(String),
    /// A single bot was closed.
    BotClosed(String),
    /// Nothing matched.
    NotFound(String),
}

/// What `session` did for one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// The id as given.
    pub id: String,
    /// `None` when no bot has this id.
    pub outcome: Option<SessionOutcome>,
}

/// Result of dispatching to one bot.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// Host the bot belongs to.
    pub host_id: String,
    /// The bot.
    pub bot_id: String,
    /// The exchange, or why it failed.
    pub outcome: NetResult<Exchange>,
    /// Whether the bot was closed and removed because of a fatal error.
    pub removed: bool,
}

/// Process-wide host registry plus the operator actions over it.
#[derive(Debug, Default)]
pub struct Controller {
    hosts: Arc<Registry<Host>>,
    options: HostOptions,
}

impl Controller {
    /// Controller whose hosts use `options` for their bots.
    pub fn new(options: HostOptions) -> Self {
        Self {
            hosts: Arc::new(Registry::new()),
            options,
        }
    }

    /// The host registry.
    pub fn hosts(&self) -> &Arc<Registry<Host>> {
        &self.hosts
    }

    /// Start a host listening on `address`.
    pub async fn listen(&self, address: &Address, credentials: &Credentials) -> NetResult<Arc<Host>> {
        let security = Security::derive(credentials).await?;
        if let Security::Asymmetric(keys) = &security {
            if !keys.has_private_key() {
                return Err(NetError::crypto("A host needs its private key"));
            }
        }
        Host::start(address, security, self.options, &self.hosts).await
    }

    /// Resolve an id to a host or a bot.
    pub fn find(&self, id: &str) -> Option<Target> {
        if let Some(host) = self.hosts.get(id) {
            return Some(Target::Host(host));
        }
        self.hosts.snapshot().into_iter().find_map(|host| {
            host.bots()
                .get(id)
                .map(|bot| Target::Bot { host: Arc::clone(&host), bot })
        })
    }

    /// Close each id: a host closes with all of its bots.
    ///
    /// Ids are handled in the order given. A bot whose host was closed
    /// earlier in the same call is reported as not found.
    pub fn close(&self, ids: &[String]) -> Vec<CloseOutcome> {
        ids.iter()
            .map(|id| match self.find(id) {
                Some(Target::Host(host)) => {
                    host.close();
                    CloseOutcome::HostClosed(id.clone())
                }
                Some(Target::Bot { host, bot }) => {
                    if host.close_bot(bot.id()) {
                        CloseOutcome::BotClosed(id.clone())
                    } else {
                        CloseOutcome::NotFound(id.clone())
                    }
                }
                None => CloseOutcome::NotFound(id.clone()),
            })
            .collect()
    }

    /// Close every host.
    pub fn close_all(&self) {
        for host in self.hosts.snapshot() {
            host.close();
        }
    }

    /// Join (or with `remove`, leave) the session for each bot id.
    pub fn session(&self, ids: &[String], remove: bool) -> Vec<SessionReport> {
        ids.iter()
            .map(|id| {
                let outcome = match self.find(id) {
                    Some(Target::Bot { bot, .. }) => Some(bot.toggle_session(remove)),
                    _ => None,
                };
                SessionReport {
                    id: id.clone(),
                    outcome,
                }
            })
            .collect()
    }

    /// Every in-session bot, in dispatch order.
    pub fn session_bots(&self) -> Vec<(Arc<Host>, Arc<BotRecord>)> {
        self.hosts
            .snapshot()
            .into_iter()
            .flat_map(|host| {
                host.bots()
                    .snapshot()
                    .into_iter()
                    .filter(|bot| bot.in_session())
                    .map(move |bot| (Arc::clone(&host), bot))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Send `request` to every in-session bot, one at a time.
    ///
    /// `on_report` sees each bot's result as soon as it is known. Returns the
    /// number of bots contacted.
    pub async fn dispatch<F>(&self, request: &Request, mut on_report: F) -> usize
    where
        F: FnMut(&DispatchReport),
    {
        let targets = self.session_bots();
        for (host, bot) in &targets {
            let outcome = bot.exchange(request).await;
            let removed = match &outcome {
                Err(e) if e.is_fatal() => {
                    log::warn!("[Dispatch] Bot {} failed: {e}", bot.id());
                    host.close_bot(bot.id());
                    true
                }
                Err(e) => {
                    log::warn!("[Dispatch] Bot {} sent a bad reply: {e}", bot.id());
                    false
                }
                Ok(_) => false,
            };
            on_report(&DispatchReport {
                host_id: host.id().to_string(),
                bot_id: bot.id().to_string(),
                outcome,
                removed,
            });
        }
        targets.len()
    }
}

/// Split a comma-separated id list, dropping blanks.
pub fn parse_ids(ids: &str) -> Vec<String> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}
