//! Client configuration.

use std::time::Duration;

/// Environment variable overriding [`ClientConfig::ws_url`].
pub const ENV_WS_URL: &str = "CLASSGRAPH_WS_URL";
/// Environment variable overriding [`ClientConfig::backend_url`].
pub const ENV_BACKEND_URL: &str = "CLASSGRAPH_BACKEND_URL";
/// Environment variable providing [`ClientConfig::token`].
pub const ENV_TOKEN: &str = "CLASSGRAPH_TOKEN";

/// Everything a sync client needs to know about its surroundings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Realtime endpoint (`ws://` or `wss://`).
    pub ws_url: String,
    /// Base URL of the diagram REST API.
    pub backend_url: String,
    /// Bearer token for both the realtime channel and the REST API.
    pub token: Option<String>,
    /// Wait between a lost connection and the next attempt.
    pub reconnect_delay: Duration,
    /// Local timeout for text-prompt generation.
    pub prompt_timeout: Duration,
    /// Local timeout for image generation.
    pub image_timeout: Duration,
    /// How long a removal notification suppresses repeats for the same id.
    pub debounce_window: Duration,
    /// Echo-suppression window after a bulk load finishes.
    pub settle_window: Duration,
    /// Longest image side sent for generation, in pixels.
    pub max_image_dimension: u32,
    /// JPEG quality (1-100) for images sent for generation.
    pub jpeg_quality: u8,
    /// Runtime housekeeping interval (outbound release, timeouts, reconnect).
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:4000".to_string(),
            backend_url: "http://localhost:3000".to_string(),
            token: None,
            reconnect_delay: Duration::from_secs(2),
            prompt_timeout: Duration::from_secs(30),
            image_timeout: Duration::from_secs(90),
            debounce_window: Duration::from_secs(1),
            settle_window: Duration::from_millis(100),
            max_image_dimension: 1024,
            jpeg_quality: 80,
            tick_interval: Duration::from_millis(50),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `CLASSGRAPH_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup. Empty values are ignored.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_WS_URL) {
            self.ws_url = url;
        }
        if let Some(url) = get(ENV_BACKEND_URL) {
            self.backend_url = url;
        }
        if let Some(token) = get(ENV_TOKEN) {
            self.token = Some(token);
        }
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}
