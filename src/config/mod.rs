//! Configuration management for Netherworld
//!
//! Each bot is described by one JSON file passed on the command line. A bare
//! file name is also looked up under `./config/` and then `~/.netherworld/`.
//! Environment variables override a handful of deployment-specific values
//! after the file is parsed.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{NetherError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the Netherworld configuration directory path (~/.netherworld)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".netherworld")
    }

    /// Find the file a command-line config argument refers to.
    ///
    /// The argument is used as-is when it exists. Otherwise a bare file name
    /// is tried under `./config/` and then under [`Config::dir`].
    pub fn resolve_path(arg: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(arg);
        if direct.is_file() {
            return Some(direct);
        }
        if direct.components().count() != 1 {
            return None;
        }
        [PathBuf::from("config").join(arg), Self::dir().join(arg)]
            .into_iter()
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration from a command-line argument with environment
    /// overrides.
    pub fn load(arg: &str) -> Result<Self> {
        let path = Self::resolve_path(arg)
            .ok_or_else(|| NetherError::Config(format!("config file '{}' not found", arg)))?;
        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Recognized: `NETHERWORLD_BACKEND_URL`, `NETHERWORLD_BACKEND_TIMEOUT_SECS`,
    /// `NETHERWORLD_DISCORD_TOKEN`, `NETHERWORLD_MEMORY_CYCLER`,
    /// `NETHERWORLD_DEVICE`, `NETHERWORLD_LOG_LEVEL`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NETHERWORLD_BACKEND_URL") {
            self.backend_settings.url = val;
        }
        if let Ok(val) = std::env::var("NETHERWORLD_BACKEND_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.backend_settings.timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("NETHERWORLD_DISCORD_TOKEN") {
            self.provider_settings.token = val;
        }
        if let Ok(val) = std::env::var("NETHERWORLD_MEMORY_CYCLER") {
            match val.parse() {
                Ok(policy) => self.netherworld_settings.memory_cycler = policy,
                Err(e) => tracing::warn!("Ignoring NETHERWORLD_MEMORY_CYCLER: {}", e),
            }
        }
        if let Ok(val) = std::env::var("NETHERWORLD_DEVICE") {
            self.netherworld_settings.device = val;
        }
        if let Ok(val) = std::env::var("NETHERWORLD_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// The text that heads every transcript (prompt + example conversation).
    pub fn preamble(&self) -> String {
        self.input_settings.preamble()
    }

    /// Context window size in tokens (`0` when unset).
    pub fn max_length(&self) -> usize {
        self.generation_settings
            .syntax_settings
            .max_length
            .unwrap_or(0)
    }

    /// Backend request timeout, `None` when disabled.
    pub fn backend_timeout(&self) -> Option<std::time::Duration> {
        match self.backend_settings.timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}
