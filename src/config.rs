//! Configuration loading and persistence.
//!
//! Settings come from, in increasing priority: built-in defaults,
//! `<config dir>/config.json`, `CMDNET_*` environment variables, and finally
//! command-line flags (applied by the binary).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bot::BotOptions;
use crate::constants::{
    BOT_INACTIVITY_TIMEOUT, DEFAULT_HOSTNAME, DEFAULT_PORT, HANDSHAKE_TIMEOUT, SHELL_TIMEOUT,
};
use crate::host::HostOptions;
use crate::transport::Address;

/// Configuration shared by the `host` and `bot` subcommands.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Default address hosts bind and bots dial.
    pub hostname: String,
    /// Default port.
    pub port: u16,
    /// Per-operation timeout on each bot connection, in seconds.
    pub bot_timeout: u64,
    /// Shell command timeout on the bot, in seconds.
    pub shell_timeout: u64,
    /// Time a host waits for an asymmetric handshake, in seconds.
    pub handshake_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            port: DEFAULT_PORT,
            bot_timeout: BOT_INACTIVITY_TIMEOUT.as_secs(),
            shell_timeout: SHELL_TIMEOUT.as_secs(),
            handshake_timeout: HANDSHAKE_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Configuration directory.
    ///
    /// `CMDNET_CONFIG_DIR` overrides the platform config directory
    /// (e.g. `~/.config/cmdnet` on Linux). Not created here.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("CMDNET_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("cmdnet"))
    }

    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a config file. Missing fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply `CMDNET_*` overrides looked up through `var`.
    ///
    /// Unparseable numbers are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(hostname) = var("CMDNET_HOSTNAME") {
            self.hostname = hostname;
        }
        override_number(&var, "CMDNET_PORT", &mut self.port);
        override_number(&var, "CMDNET_BOT_TIMEOUT", &mut self.bot_timeout);
        override_number(&var, "CMDNET_SHELL_TIMEOUT", &mut self.shell_timeout);
        override_number(&var, "CMDNET_HANDSHAKE_TIMEOUT", &mut self.handshake_timeout);
    }

    /// Log file used by the `host` subcommand.
    ///
    /// `CMDNET_LOG_FILE` wins over `<config dir>/cmdnet.log`.
    pub fn log_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("CMDNET_LOG_FILE") {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::config_dir()?.join("cmdnet.log"))
    }

    /// Default address.
    pub fn address(&self) -> Address {
        Address::new(self.hostname.clone(), self.port)
    }

    /// Timeouts for hosts started by the console.
    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            bot_timeout: Duration::from_secs(self.bot_timeout),
            handshake_timeout: Duration::from_secs(self.handshake_timeout),
        }
    }

    /// Options for a bot process.
    pub fn bot_options(&self) -> BotOptions {
        BotOptions {
            shell_timeout: Duration::from_secs(self.shell_timeout),
        }
    }
}

fn override_number<F, T>(var: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = var(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => log::warn!("Ignoring {key}={raw}: not a valid number"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.address(), Address::new("127.0.0.1", 7070));
        assert_eq!(config.host_options().bot_timeout, Duration::from_secs(120));
        assert_eq!(config.bot_options().shell_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"port": 9000}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.hostname, DEFAULT_HOSTNAME);
        assert_eq!(config.shell_timeout, 60);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CMDNET_HOSTNAME", "0.0.0.0"),
            ("CMDNET_PORT", "8080"),
            ("CMDNET_SHELL_TIMEOUT", "5"),
            ("CMDNET_BOT_TIMEOUT", "soon"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.hostname, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.shell_timeout, 5);
        assert_eq!(config.bot_timeout, 120);
    }
}
