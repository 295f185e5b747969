//! Runtime configuration for the conversation server.
//!
//! Values come from `EUREKA_*` environment variables; anything unset keeps its default.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::errors::{ChatError, ChatResult};
use crate::llm::openai::{DEFAULT_BASE_URL, OpenAiConfig};

/// Listening port.
pub const PORT_ENV: &str = "EUREKA_PORT";
/// `SQLite` database file.
pub const DB_PATH_ENV: &str = "EUREKA_DB_PATH";
/// Upstream base URL.
pub const UPSTREAM_BASE_URL_ENV: &str = "EUREKA_UPSTREAM_BASE_URL";
/// Upstream connect timeout, in seconds.
pub const UPSTREAM_CONNECT_TIMEOUT_ENV: &str = "EUREKA_UPSTREAM_CONNECT_TIMEOUT_SECS";
/// Upstream idle read timeout, in seconds.
pub const UPSTREAM_TIMEOUT_ENV: &str = "EUREKA_UPSTREAM_TIMEOUT_SECS";
/// Browser origin allowed by CORS.
pub const FRONTEND_ADDR_ENV: &str = "EUREKA_FRONTEND_ADDR";
/// Header carrying the authenticated user id.
pub const IDENTITY_HEADER_ENV: &str = "EUREKA_IDENTITY_HEADER";
/// Frames buffered between the relay and a slow client.
pub const STREAM_BUFFER_ENV: &str = "EUREKA_STREAM_BUFFER";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Completion provider settings.
    pub upstream: UpstreamConfig,
}

impl AppConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> ChatResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a variable cannot be parsed or the result is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ChatResult<Self> {
        let mut config = Self::default();
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(port) = read(PORT_ENV) {
            config.server.port = parse_number(PORT_ENV, &port)?;
        }
        if let Some(addr) = read(FRONTEND_ADDR_ENV) {
            config.server.frontend_addr = Some(addr.trim().to_string());
        }
        if let Some(header) = read(IDENTITY_HEADER_ENV) {
            config.server.identity_header = header.trim().to_ascii_lowercase();
        }
        if let Some(buffer) = read(STREAM_BUFFER_ENV) {
            config.server.stream_buffer = parse_number(STREAM_BUFFER_ENV, &buffer)?;
        }
        if let Some(path) = read(DB_PATH_ENV) {
            config.storage.db_path = PathBuf::from(path);
        }
        if let Some(base_url) = read(UPSTREAM_BASE_URL_ENV) {
            config.upstream.base_url = base_url.trim().to_string();
        }
        if let Some(secs) = read(UPSTREAM_CONNECT_TIMEOUT_ENV) {
            config.upstream.connect_timeout_secs = parse_number(UPSTREAM_CONNECT_TIMEOUT_ENV, &secs)?;
        }
        if let Some(secs) = read(UPSTREAM_TIMEOUT_ENV) {
            config.upstream.timeout_secs = parse_number(UPSTREAM_TIMEOUT_ENV, &secs)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.server.stream_buffer == 0 {
            return Err(ChatError::InvalidConfig(
                "server.stream_buffer must be > 0".to_string(),
            ));
        }

        if self.server.identity_header.is_empty() {
            return Err(ChatError::InvalidConfig(
                "server.identity_header must not be empty".to_string(),
            ));
        }

        if self.upstream.connect_timeout_secs == 0 || self.upstream.timeout_secs == 0 {
            return Err(ChatError::InvalidConfig(
                "upstream timeouts must be > 0".to_string(),
            ));
        }

        Url::parse(&self.upstream.base_url)?;

        if let Some(addr) = &self.server.frontend_addr {
            Url::parse(addr)?;
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> ChatResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ChatError::InvalidConfig(format!("{key} is not a valid number: {raw}")))
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port bound on all interfaces.
    pub port: u16,
    /// Exact browser origin allowed with credentials; any origin when unset.
    pub frontend_addr: Option<String>,
    /// Trusted header set by the session layer.
    pub identity_header: String,
    /// Capacity of the per-request frame channel.
    pub stream_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            frontend_addr: None,
            identity_header: "x-user-id".to_string(),
            stream_buffer: 32,
        }
    }
}

/// Storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("eureka.sqlite3"),
        }
    }
}

/// Completion provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// OpenAI-compatible base URL.
    pub base_url: String,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Idle read timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_secs: 10,
            timeout_secs: 120,
        }
    }
}

impl UpstreamConfig {
    /// Adapter settings.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    pub fn openai(&self) -> ChatResult<OpenAiConfig> {
        let mut config = OpenAiConfig::new(Url::parse(&self.base_url)?);
        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        config.read_timeout = Duration::from_secs(self.timeout_secs);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.identity_header, "x-user-id");
        assert!(config.server.frontend_addr.is_none());
        assert_eq!(config.upstream.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            (PORT_ENV, "8080"),
            (DB_PATH_ENV, "/tmp/chat.db"),
            (UPSTREAM_BASE_URL_ENV, "http://localhost:11434/v1"),
            (UPSTREAM_TIMEOUT_ENV, "30"),
            (FRONTEND_ADDR_ENV, "http://localhost:5173"),
            (IDENTITY_HEADER_ENV, "X-Forwarded-User"),
            (STREAM_BUFFER_ENV, "4"),
        ]))
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.db_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(config.server.identity_header, "x-forwarded-user");
        assert_eq!(config.server.stream_buffer, 4);
        let openai = config.upstream.openai().unwrap();
        assert_eq!(openai.read_timeout, Duration::from_secs(30));
        assert_eq!(
            openai.endpoint().unwrap().as_str(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[(PORT_ENV, "eighty")])),
            Err(ChatError::InvalidConfig(_))
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[(STREAM_BUFFER_ENV, "0")])),
            Err(ChatError::InvalidConfig(_))
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[(UPSTREAM_BASE_URL_ENV, "not a url")])),
            Err(ChatError::Url(_))
        ));
    }
}
