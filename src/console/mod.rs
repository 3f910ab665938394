//! Interactive operator console for the `host` subcommand.
//!
//! Each input line is either a command from the table below, parsed with
//! clap in multicall mode, or a free-form command broadcast to every bot in
//! the session.
//!
//! | Command                                                    | Action                         |
//! |------------------------------------------------------------|--------------------------------|
//! | `exit`                                                     | close all hosts and quit       |
//! | `cls`                                                      | clear the screen               |
//! | `list`                                                     | table of hosts and bots        |
//! | `listen --hostname --port --password --salt --pubk --privk`| start a host                   |
//! | `who --id <id>`                                            | connection details             |
//! | `close --id <id>[,<id>...]`                                | close hosts and/or bots        |
//! | `session --id <id>[,<id>...] [--remove]`                   | join or leave the session      |
//! | `<anything else> [--run] [--history] [--filepath <path>]`  | broadcast to the session       |

pub mod table;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::host::SessionOutcome;
use crate::message::Request;
use crate::security::Credentials;
use crate::session::{parse_ids, CloseOutcome, Controller, DispatchReport, Target};
use crate::transport::{Address, FrameStats};

const INFO: (&str, &str) = ("\x1b[34m", "[*]");
const SUCCESS: (&str, &str) = ("\x1b[32m", "[+]");
const WARNING: (&str, &str) = ("\x1b[33m", "[!]");
const DANGER: (&str, &str) = ("\x1b[31m", "[-]");
const RESET: &str = "\x1b[39m";

/// Prefix of operator-visible errors on the host side.
pub const ERROR_PREFIX: &str = "[HOST] ERROR ::";

#[derive(Debug, Parser)]
#[command(multicall = true)]
struct OperatorLine {
    #[command(subcommand)]
    command: OperatorCommand,
}

#[derive(Debug, Subcommand)]
enum OperatorCommand {
    /// Close every host and leave.
    Exit,
    /// Clear the screen.
    Cls,
    /// List hosts and their bots.
    List,
    /// Start a host.
    Listen {
        /// Address to bind.
        #[arg(long)]
        hostname: Option<String>,
        /// Port to bind (0 picks a free port).
        #[arg(long)]
        port: Option<u16>,
        /// Shared password (symmetric mode).
        #[arg(long, requires = "salt")]
        password: Option<String>,
        /// Shared salt (symmetric mode).
        #[arg(long, requires = "password")]
        salt: Option<String>,
        /// Host certificate (asymmetric mode).
        #[arg(long, requires = "privk")]
        pubk: Option<PathBuf>,
        /// Host private key (asymmetric mode).
        #[arg(long, requires = "pubk")]
        privk: Option<PathBuf>,
    },
    /// Show connection details for a host or bot.
    Who {
        /// Host or bot id.
        #[arg(long)]
        id: String,
    },
    /// Close hosts (with their bots) or single bots.
    Close {
        /// Comma-separated ids.
        #[arg(long)]
        id: String,
    },
    /// Join bots to, or remove them from, the session.
    Session {
        /// Comma-separated bot ids.
        #[arg(long)]
        id: String,
        /// Leave instead of join.
        #[arg(long)]
        remove: bool,
    },
}

/// Trailing flags of a free-form command.
#[derive(Debug, Parser)]
#[command(no_binary_name = true)]
struct DispatchFlags {
    /// Run as Lua instead of a shell command.
    #[arg(long)]
    run: bool,
    /// Print frame sizes for each exchange.
    #[arg(long)]
    history: bool,
    /// Send this file's contents instead of the typed command.
    #[arg(long)]
    filepath: Option<PathBuf>,
}

const DISPATCH_FLAGS: [&str; 3] = ["--run", "--history", "--filepath"];

/// Whether the console keeps reading after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// Stop the console.
    Exit,
}

/// Operator console writing to `W`.
#[derive(Debug)]
pub struct Console<W: Write> {
    controller: Controller,
    out: W,
    color: bool,
    default_address: Address,
}

impl<W: Write> Console<W> {
    /// Console over `controller`.
    ///
    /// `default_address` fills in `listen` when `--hostname` or `--port` is
    /// omitted. `color` enables ANSI colored prefixes.
    pub fn new(controller: Controller, out: W, default_address: Address, color: bool) -> Self {
        Self {
            controller,
            out,
            color,
            default_address,
        }
    }

    /// The controller behind this console.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// The output sink.
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Read commands from stdin until `exit` or end of input.
    pub async fn run(&mut self) -> Result<()> {
        self.write_line(WARNING, "cmdnet host console. Type a command, or `help`.")?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            write!(self.out, ">>> ")?;
            self.out.flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            match self.execute(&line).await {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => {
                    log::warn!("[Host] Command failed: {e:#}");
                    writeln!(self.out, "{ERROR_PREFIX} {e:#}")?;
                }
            }
        }

        self.controller.close_all();
        writeln!(self.out, "May we meet in another process...")?;
        Ok(())
    }

    /// Execute one input line.
    pub async fn execute(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        let Some(first) = line.split_whitespace().next() else {
            return Ok(Flow::Continue);
        };

        let is_table_command = first == "help"
            || OperatorLine::command()
                .get_subcommands()
                .any(|c| c.get_name() == first);
        if !is_table_command {
            self.broadcast(line).await?;
            return Ok(Flow::Continue);
        }

        let parsed = match OperatorLine::try_parse_from(split_words(line)) {
            Ok(parsed) => parsed,
            Err(e) => {
                write!(self.out, "{}", e.render())?;
                return Ok(Flow::Continue);
            }
        };

        match parsed.command {
            OperatorCommand::Exit => return Ok(Flow::Exit),
            OperatorCommand::Cls => {
                write!(self.out, "\x1b[2J\x1b[H")?;
            }
            OperatorCommand::List => self.list()?,
            OperatorCommand::Listen {
                hostname,
                port,
                password,
                salt,
                pubk,
                privk,
            } => {
                let address = Address::new(
                    hostname.unwrap_or_else(|| self.default_address.host.clone()),
                    port.unwrap_or(self.default_address.port),
                );
                let credentials = Credentials::from_options(password, salt, pubk, privk)?;
                match self.controller.listen(&address, &credentials).await {
                    Ok(host) => {
                        let text = format!(
                            "HOST STARTED :: {} on {} ({} mode)",
                            host.id(),
                            host.address(),
                            host.mode()
                        );
                        self.write_line(SUCCESS, &text)?;
                    }
                    Err(e) => self.write_line(DANGER, &format!("HOST NOT STARTED :: {e}"))?,
                }
            }
            OperatorCommand::Who { id } => self.who(&id)?,
            OperatorCommand::Close { id } => {
                for outcome in self.controller.close(&parse_ids(&id)) {
                    match outcome {
                        CloseOutcome::HostClosed(id) => {
                            self.write_line(SUCCESS, &format!("HOST CLOSED :: {id}"))?;
                        }
                        CloseOutcome::BotClosed(id) => {
                            self.write_line(SUCCESS, &format!("BOT CLOSED :: {id}"))?;
                        }
                        CloseOutcome::NotFound(id) => {
                            self.write_line(DANGER, &format!("NO MATCHING ID FOUND :: {id}"))?;
                        }
                    }
                }
            }
            OperatorCommand::Session { id, remove } => {
                for report in self.controller.session(&parse_ids(&id), remove) {
                    let (style, label) = match report.outcome {
                        Some(SessionOutcome::Joined) => (SUCCESS, "BOT JOINED SESSION"),
                        Some(SessionOutcome::Removed) => (SUCCESS, "BOT REMOVED FROM SESSION"),
                        Some(SessionOutcome::AlreadyInSession) => {
                            (WARNING, "BOT ALREADY IN SESSION")
                        }
                        Some(SessionOutcome::NotInSession) => (WARNING, "BOT NOT IN SESSION"),
                        None => (DANGER, "BOT NOT FOUND"),
                    };
                    self.write_line(style, &format!("{label} :: {}", report.id))?;
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn list(&mut self) -> Result<()> {
        let hosts = self.controller.hosts().snapshot();
        if hosts.is_empty() {
            return self.write_line(WARNING, "NO HOSTS RUNNING");
        }

        let mut rows = Vec::new();
        for host in &hosts {
            rows.push(vec![
                host.id().to_string(),
                "host".to_string(),
                host.address().host.clone(),
                host.address().port.to_string(),
                host.mode().to_string(),
                String::new(),
            ]);
            for bot in host.bots().snapshot() {
                rows.push(vec![
                    bot.id().to_string(),
                    "bot".to_string(),
                    bot.address().host.clone(),
                    bot.address().port.to_string(),
                    bot.mode().to_string(),
                    bot.in_session().to_string(),
                ]);
            }
        }
        let rendered = table::render(
            &["ID", "KIND", "HOST", "PORT", "MODE", "IN SESSION"],
            &rows,
        );
        write!(self.out, "{rendered}")?;
        Ok(())
    }

    fn who(&mut self, id: &str) -> Result<()> {
        let details = match self.controller.find(id) {
            Some(Target::Host(host)) => host.details(),
            Some(Target::Bot { host, bot }) => {
                let mut details = bot.details();
                details.push(("host", host.id().to_string()));
                details
            }
            None => return self.write_line(WARNING, &format!("NO MATCHING ID FOUND :: {id}")),
        };
        let rows: Vec<Vec<String>> = details
            .into_iter()
            .map(|(field, value)| vec![field.to_string(), value])
            .collect();
        write!(self.out, "{}", table::render(&["FIELD", "VALUE"], &rows))?;
        Ok(())
    }

    async fn broadcast(&mut self, line: &str) -> Result<()> {
        let (command, flags) = split_dispatch_flags(line);
        let flags = DispatchFlags::try_parse_from(split_words(flags))?;

        let command = match &flags.filepath {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
            None => command.to_string(),
        };

        let targets = self.controller.session_bots().len();
        if targets == 0 {
            return self.write_line(WARNING, "NO BOTS IN SESSION");
        }
        self.write_line(INFO, &format!("DISPATCHING TO {targets} BOT(S)"))?;

        let request = Request::new(command, flags.run);
        let color = self.color;
        let history = flags.history;
        let out = &mut self.out;
        let mut write_error = None;
        self.controller
            .dispatch(&request, |report| {
                if let Err(e) = write_report(out, color, history, report) {
                    write_error.get_or_insert(e);
                }
            })
            .await;

        match write_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn write_line(&mut self, style: (&str, &str), text: &str) -> Result<()> {
        write_styled(&mut self.out, self.color, style, text)?;
        Ok(())
    }
}

fn write_styled<W: Write>(
    out: &mut W,
    color: bool,
    (ansi, label): (&str, &str),
    text: &str,
) -> std::io::Result<()> {
    if color {
        writeln!(out, "{ansi}{label}{RESET} {text}")
    } else {
        writeln!(out, "{label} {text}")
    }
}

fn write_report<W: Write>(
    out: &mut W,
    color: bool,
    history: bool,
    report: &DispatchReport,
) -> std::io::Result<()> {
    match &report.outcome {
        Ok(exchange) => {
            if history {
                write!(out, "{}", stats_table(&exchange.sent, &exchange.received))?;
            }
            if exchange.response.is_empty() {
                write_styled(out, color, WARNING, &format!("Empty Response :: {}", report.bot_id))
            } else {
                writeln!(out, "{}", exchange.response)
            }
        }
        Err(e) => {
            writeln!(out, "{ERROR_PREFIX} {} :: {e}", report.bot_id)?;
            if report.removed {
                write_styled(out, color, DANGER, &format!("BOT CLOSED :: {}", report.bot_id))?;
            }
            Ok(())
        }
    }
}

fn stats_table(sent: &FrameStats, received: &FrameStats) -> String {
    let row = |direction: &str, stats: &FrameStats| {
        vec![
            direction.to_string(),
            stats.header_size.to_string(),
            stats.body_size.to_string(),
            stats.total_size.to_string(),
        ]
    };
    table::render(
        &["DIRECTION", "HEADER SIZE", "BODY SIZE", "MESSAGE SIZE"],
        &[row("sent", sent), row("received", received)],
    )
}

/// Split a free-form line into the command text and its trailing flags.
///
/// The command ends at the first whitespace-delimited dispatch flag.
fn split_dispatch_flags(line: &str) -> (&str, &str) {
    let mut cut = line.len();
    for flag in DISPATCH_FLAGS {
        for (idx, _) in line.match_indices(flag) {
            let end = idx + flag.len();
            let starts_word = idx == 0 || line[..idx].ends_with(char::is_whitespace);
            let ends_word = end == line.len() || line[end..].starts_with(char::is_whitespace);
            if starts_word && ends_word {
                cut = cut.min(idx);
                break;
            }
        }
    }
    (line[..cut].trim(), line[cut..].trim())
}

/// Whitespace word split honoring single and double quotes.
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = None;

    for ch in line.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(ch);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}
