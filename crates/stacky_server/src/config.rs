use std::net::SocketAddr;

use thiserror::Error;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid STACKY_BIND address '{value}': {source}")]
    Bind {
        value: String,
        source: std::net::AddrParseError,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    /// Unset or empty disables debug login entirely.
    pub debug_password: Option<String>,
    pub bind: SocketAddr,
    pub model: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let bind_raw = non_empty("STACKY_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse().map_err(|source| ConfigError::Bind {
            value: bind_raw.clone(),
            source,
        })?;
        Ok(Self {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: non_empty("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            debug_password: non_empty("DEBUG_PASSWORD"),
            bind,
            model: DEFAULT_MODEL.to_string(),
        })
    }
}
