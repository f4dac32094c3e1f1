//! `AppConfig`, read from a RON file with environment overrides.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stacky_core::{ChatConfig, ChatMode, RetryHistoryPolicy, RetryPolicy};
use stacky_engine::{EngineConfig, HttpSettings, DEFAULT_QUOTA_BYTES};
use thiserror::Error;

pub const CONFIG_ENV: &str = "STACKY_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    #[default]
    Reply,
    Returns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HistoryPolicy {
    #[default]
    SnapshotAtSend,
    Latest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: Mode,
    pub reply_base_url: String,
    pub returns_base_url: String,
    pub storage_dir: PathBuf,
    pub storage_quota_bytes: usize,
    /// Keep storage in memory only; nothing survives a restart.
    pub ephemeral: bool,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub history_policy: HistoryPolicy,
    pub customer_info: BTreeMap<String, String>,
    pub log_level: String,
    pub log_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        let http = HttpSettings::default();
        let retry = RetryPolicy::default();
        Self {
            mode: Mode::Reply,
            reply_base_url: "http://127.0.0.1:3000".to_string(),
            returns_base_url: "http://127.0.0.1:4000/dev/customer-returns".to_string(),
            storage_dir: PathBuf::from(".stacky"),
            storage_quota_bytes: DEFAULT_QUOTA_BYTES,
            ephemeral: false,
            connect_timeout_secs: http.connect_timeout.as_secs(),
            request_timeout_secs: http.request_timeout.as_secs(),
            max_retries: retry.max_retries,
            retry_base_delay_ms: u64::try_from(retry.base_delay.as_millis()).unwrap_or(1000),
            history_policy: HistoryPolicy::SnapshotAtSend,
            customer_info: BTreeMap::new(),
            log_level: "info".to_string(),
            log_file: PathBuf::from(stacky_logging::DEFAULT_LOG_FILE),
        }
    }
}

impl AppConfig {
    /// Reads `path` (defaults when `None`), then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_overrides(|name| std::env::var(name).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(url) = non_empty("STACKY_REPLY_URL") {
            self.reply_base_url = url;
        }
        if let Some(url) = non_empty("STACKY_RETURNS_URL") {
            self.returns_base_url = url;
        }
        if let Some(dir) = non_empty("STACKY_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            mode: match self.mode {
                Mode::Reply => ChatMode::Reply,
                Mode::Returns => ChatMode::Returns,
            },
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            },
            history_policy: match self.history_policy {
                HistoryPolicy::SnapshotAtSend => RetryHistoryPolicy::SnapshotAtSend,
                HistoryPolicy::Latest => RetryHistoryPolicy::Latest,
            },
            customer_info: self.customer_info.clone(),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            reply_base_url: self.reply_base_url.clone(),
            returns_base_url: self.returns_base_url.clone(),
            http: HttpSettings {
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                request_timeout: Duration::from_secs(self.request_timeout_secs),
            },
        }
    }
}

/// First CLI argument, else `STACKY_CONFIG`.
pub fn config_path(args: &[String], env_value: Option<String>) -> Option<PathBuf> {
    args.get(1)
        .cloned()
        .or(env_value)
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from)
}
