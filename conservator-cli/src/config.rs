use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use conservator_core::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use conservator_core::{DEFAULT_BASE_URL, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EMAIL_VAR: &str = "CONSERVATOR_EMAIL";
pub const API_KEY_VAR: &str = "CONSERVATOR_API_KEY";
pub const URL_VAR: &str = "CONSERVATOR_URL";
pub const MAX_RETRIES_VAR: &str = "CONSERVATOR_MAX_RETRIES";
pub const RETRY_DELAY_MS_VAR: &str = "CONSERVATOR_RETRY_DELAY_MS";

const CONFIG_DIR: &str = "conservator-cli";
const CONFIG_FILENAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration directory is unavailable")]
    MissingConfigDir,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no API key: pass --token, set CONSERVATOR_API_KEY or run `conservator config save`")]
    MissingKey,
}

/// Account settings. Unset fields fall through to the next source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "CONSERVATOR_EMAIL", default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "CONSERVATOR_API_KEY", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "CONSERVATOR_URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            email: read(EMAIL_VAR),
            key: read(API_KEY_VAR),
            url: read(URL_VAR),
        }
    }

    /// Fields set in `higher` win over fields set in `self`.
    pub fn overlay(self, higher: Config) -> Config {
        Config {
            email: higher.email.or(self.email),
            key: higher.key.or(self.key),
            url: higher.url.or(self.url),
        }
    }

    pub fn base_url(&self) -> &str {
        self.url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn require_key(&self) -> Result<&str, ConfigError> {
        self.key.as_deref().ok_or(ConfigError::MissingKey)
    }

    /// The key with everything but its last four characters hidden. Keys of
    /// four characters or fewer are hidden entirely.
    pub fn masked_key(&self) -> Option<String> {
        let chars: Vec<char> = self.key.as_deref()?.chars().collect();
        let hidden = match chars.len() {
            len if len > 4 => len - 4,
            len => len,
        };
        Some(
            std::iter::repeat_n('*', hidden)
                .chain(chars[hidden..].iter().copied())
                .collect(),
        )
    }
}

/// Reads and writes the JSON config file.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new_default() -> Result<Self, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::MissingConfigDir)?;
        Ok(Self::at(dir.join(CONFIG_DIR).join(CONFIG_FILENAME)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file yields an empty config.
    pub fn load(&self) -> Result<Config, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    /// Returns whether a file was removed.
    pub fn delete(&self) -> Result<bool, ConfigError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

pub fn retry_policy_from_env() -> RetryPolicy {
    retry_policy_from_lookup(|name| std::env::var(name).ok())
}

/// Non-positive or unparsable values fall back to the defaults.
pub fn retry_policy_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> RetryPolicy {
    let read = |name: &str| {
        lookup(name)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|value| *value > 0)
    };
    let max_retries = read(MAX_RETRIES_VAR)
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(DEFAULT_MAX_RETRIES);
    let retry_delay = read(RETRY_DELAY_MS_VAR)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_RETRY_DELAY);
    RetryPolicy::new(max_retries, retry_delay)
}
