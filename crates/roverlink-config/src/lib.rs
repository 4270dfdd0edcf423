//! Saved network configuration for roverlink tools.
//!
//! A TOML file at the platform config location holds the default
//! interface and an ordered list of saved network credentials. Loading
//! goes through figment (defaults, then file, then `ROVERLINK_*`
//! environment overrides); a malformed file is a fatal startup error,
//! surfaced with its parse diagnostic rather than silently ignored.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use roverlink_core::{CoreError, CredentialStore, NetworkCredential};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Interface used when `--interface` is omitted. Falls back to USB
    /// auto-detection when unset.
    pub default_interface: Option<String>,

    /// Saved network credentials, unique by (ssid, interface).
    #[serde(default)]
    pub networks: Vec<NetworkEntry>,
}

/// One saved network. Passwords are stored in plaintext, so the config
/// file should carry user-only permissions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkEntry {
    pub ssid: String,
    pub password: String,
    /// Preferred interface for this network, if pinned.
    #[serde(default)]
    pub interface: Option<String>,
}

impl Config {
    /// Find the entry for `ssid`, preferring one pinned to `interface`
    /// over an unpinned one.
    pub fn find_network(&self, ssid: &str, interface: &str) -> Option<&NetworkEntry> {
        self.networks
            .iter()
            .find(|n| n.ssid == ssid && n.interface.as_deref() == Some(interface))
            .or_else(|| {
                self.networks
                    .iter()
                    .find(|n| n.ssid == ssid && n.interface.is_none())
            })
    }

    /// Insert or replace the entry keyed by (ssid, interface).
    pub fn upsert_network(&mut self, entry: NetworkEntry) {
        self.networks
            .retain(|n| !(n.ssid == entry.ssid && n.interface == entry.interface));
        self.networks.push(entry);
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "roverlink", "roverlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("roverlink");
    p
}

// ── Config loading / saving ─────────────────────────────────────────

/// Load configuration from `path` plus `ROVERLINK_*` environment
/// overrides.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ROVERLINK_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load from the canonical path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Serialize `cfg` as pretty TOML to `path`, creating parent dirs.
pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "config saved");
    Ok(())
}

/// Save to the canonical path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

// ── CredentialStore implementation ──────────────────────────────────

/// File-backed credential store handed to the connection engine.
///
/// Reads load the file on demand; saves rewrite it. Saves are
/// serialized with `connect` by the engine, so no file locking is
/// needed.
#[derive(Debug, Clone)]
pub struct SavedNetworks {
    path: PathBuf,
}

impl SavedNetworks {
    /// Store at the canonical config path.
    pub fn new() -> Self {
        Self {
            path: config_path(),
        }
    }

    /// Store at an explicit path (tests, portable setups).
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for SavedNetworks {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for SavedNetworks {
    fn find(&self, ssid: &str, interface: &str) -> Result<Option<NetworkCredential>, CoreError> {
        let config =
            load_config_from(&self.path).map_err(|e| CoreError::Store(e.to_string()))?;
        Ok(config.find_network(ssid, interface).map(|entry| {
            NetworkCredential {
                ssid: entry.ssid.clone(),
                password: entry.password.clone(),
                interface: entry.interface.clone(),
            }
        }))
    }

    fn save(&self, credential: &NetworkCredential) -> Result<(), CoreError> {
        let mut config =
            load_config_from(&self.path).map_err(|e| CoreError::Store(e.to_string()))?;
        config.upsert_network(NetworkEntry {
            ssid: credential.ssid.clone(),
            password: credential.password.clone(),
            interface: credential.interface.clone(),
        });
        save_config_to(&self.path, &config).map_err(|e| CoreError::Store(e.to_string()))
    }
}
