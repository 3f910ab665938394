//! cmdnet binary entry point.
//!
//! - `cmdnet host`   - operator console; start hosts with `listen`
//! - `cmdnet bot`    - connect to a host and serve its requests
//! - `cmdnet keygen` - write a certificate and private key for asymmetric mode

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cmdnet::console::Console;
use cmdnet::security::keygen;
use cmdnet::{Bot, Config, Controller, Credentials, Security};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "cmdnet", version)]
#[command(about = "Host/bot command fabric over an encrypted TCP channel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the operator console
    Host {
        /// Default bind address for `listen`
        #[arg(long)]
        hostname: Option<String>,
        /// Default bind port for `listen`
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect to a host and execute its requests
    Bot {
        /// Host address
        #[arg(long)]
        hostname: Option<String>,
        /// Host port
        #[arg(long)]
        port: Option<u16>,
        /// Shared password (symmetric mode)
        #[arg(long, requires = "salt", conflicts_with = "pubk")]
        password: Option<String>,
        /// Shared salt (symmetric mode)
        #[arg(long, requires = "password")]
        salt: Option<String>,
        /// Host certificate or public key (asymmetric mode)
        #[arg(long)]
        pubk: Option<PathBuf>,
        /// Shell command timeout in seconds
        #[arg(long)]
        shell_timeout: Option<u64>,
    },
    /// Generate a certificate and private key for asymmetric mode
    Keygen {
        /// Where to write the certificate (give this to bots)
        #[arg(long)]
        pubk_out: PathBuf,
        /// Where to write the private key (keep on the host)
        #[arg(long)]
        privk_out: PathBuf,
    },
}

fn init_logging(to_file: bool) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if to_file {
        // The console owns stdout; keep log lines out of it.
        let log_path = Config::log_path()?;
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log_file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file at {}", log_path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

async fn run_host(config: Config) -> Result<()> {
    let controller = Controller::new(config.host_options());
    let color = cfg!(unix) && std::io::stdout().is_terminal();
    let mut console = Console::new(controller, std::io::stdout(), config.address(), color);
    console.run().await
}

async fn run_bot(config: Config, credentials: &Credentials) -> Result<()> {
    let security = Security::derive(credentials).await?;
    let address = config.address();
    let mut bot = Bot::connect(&address, &security, config.bot_options())
        .await
        .with_context(|| format!("Failed to connect to {address}"))?;
    bot.run().await.context("Connection to host lost")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Commands::Host { .. }))?;

    let mut config = Config::load()?;

    match cli.command {
        Commands::Host { hostname, port } => {
            if let Some(hostname) = hostname {
                config.hostname = hostname;
            }
            if let Some(port) = port {
                config.port = port;
            }
            log::info!("[Host] Console starting, default address {}", config.address());
            run_host(config).await?;
        }
        Commands::Bot {
            hostname,
            port,
            password,
            salt,
            pubk,
            shell_timeout,
        } => {
            if let Some(hostname) = hostname {
                config.hostname = hostname;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(secs) = shell_timeout {
                config.shell_timeout = secs;
            }
            let credentials = Credentials::from_options(password, salt, pubk, None)?;
            run_bot(config, &credentials).await?;
        }
        Commands::Keygen {
            pubk_out,
            privk_out,
        } => {
            let pair = keygen::write_keypair(&pubk_out, &privk_out)?;
            println!(
                "Wrote certificate to {} ({} bytes) and private key to {}",
                pubk_out.display(),
                pair.certificate_pem.len(),
                privk_out.display()
            );
        }
    }

    Ok(())
}
