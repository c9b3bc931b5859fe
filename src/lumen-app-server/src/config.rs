//! Server configuration.

use std::time::Duration;

use lumen_ollama::DEFAULT_OLLAMA_URL;
use lumen_protocol::DEFAULT_MAX_LINE_BYTES;
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:3001").
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Inference server connection.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Streaming relay tuning.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// CORS origins (empty = allow all).
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream: UpstreamConfig::default(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
            cors_origins: vec![],
            max_body_size: default_max_body_size(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file.
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LUMEN_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        // OLLAMA_HOST is what the Ollama CLI itself reads; the Lumen-specific
        // variable wins when both are set.
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            config.upstream.base_url = normalize_upstream_url(&host);
        }

        if let Ok(url) = std::env::var("LUMEN_UPSTREAM_URL") {
            config.upstream.base_url = normalize_upstream_url(&url);
        }

        if let Ok(level) = std::env::var("LUMEN_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Get shutdown timeout as Duration.
    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// Accept `host:port` as well as full URLs.
pub fn normalize_upstream_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Inference server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the Ollama server.
    #[serde(default = "default_upstream_url")]
    pub base_url: String,
    /// TCP connect timeout in seconds. Generation itself is not time-limited.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_upstream_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_url(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// Get connect timeout as Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

/// Streaming relay tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Longest upstream line accepted before the stream is aborted.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Frames buffered between the upstream reader and the response body.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json or pretty).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
