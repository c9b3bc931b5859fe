//! Application state management.

use std::time::{Duration, Instant};

use lumen_ollama::OllamaClient;

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};

/// Application state shared across request handlers.
///
/// The relay keeps no per-request state here; every chat request owns its
/// upstream connection for its whole lifetime.
pub struct AppState {
    /// Server configuration.
    pub config: ServerConfig,
    /// Inference server client.
    pub ollama: OllamaClient,
    /// Start time.
    start_time: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("start_time", &self.start_time)
            .finish()
    }
}

impl AppState {
    /// Create new application state.
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        let ollama = OllamaClient::new(
            config.upstream.base_url.clone(),
            config.upstream.connect_timeout_duration(),
        )
        .map_err(|e| AppError::Internal(format!("Failed to create upstream client: {e}")))?;

        Ok(Self {
            config,
            ollama,
            start_time: Instant::now(),
        })
    }

    /// Get uptime duration.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
