//! Configuration loading and management.
//!
//! Loads configuration from `./mentorhub.toml` (or `$MENTORHUB_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level configuration loaded from TOML.
///
/// Path: `./mentorhub.toml` or `$MENTORHUB_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Filesystem paths for persistent state.
    pub paths: PathsConfig,
    /// Messaging engine limits.
    pub messaging: MessagingConfig,
}

impl AppConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$MENTORHUB_CONFIG_PATH` or `./mentorhub.toml`.
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: AppConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(AppConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config file path.
    ///
    /// Checks `$MENTORHUB_CONFIG_PATH` first, then `./mentorhub.toml`.
    fn config_path() -> PathBuf {
        std::env::var("MENTORHUB_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("mentorhub.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("MENTORHUB_DATABASE_PATH") {
            self.paths.database = v;
        }
        if let Some(v) = env("MENTORHUB_LOGS_DIR") {
            self.paths.logs_dir = v;
        }
        if let Some(v) = env("MENTORHUB_MAX_SUBJECT_LEN") {
            match v.parse() {
                Ok(n) => self.messaging.max_subject_len = n,
                Err(_) => tracing::warn!(
                    var = "MENTORHUB_MAX_SUBJECT_LEN",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("MENTORHUB_MAX_BODY_LEN") {
            match v.parse() {
                Ok(n) => self.messaging.max_body_len = n,
                Err(_) => tracing::warn!(
                    var = "MENTORHUB_MAX_BODY_LEN",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Parse a TOML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML cannot be parsed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

/// Filesystem paths for persistent state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SQLite database file path.
    pub database: String,
    /// Directory for rotated JSON log files.
    pub logs_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = directories::ProjectDirs::from("org", "mentorhub", "mentorhub")
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            database: base.join("mentorhub.db").to_string_lossy().into_owned(),
            logs_dir: base.join("logs").to_string_lossy().into_owned(),
        }
    }
}

/// Messaging engine limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Maximum subject length in characters.
    pub max_subject_len: usize,
    /// Maximum body length in characters.
    pub max_body_len: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_subject_len: 200,
            max_body_len: 16 * 1024,
        }
    }
}
