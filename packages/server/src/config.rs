//! Server configuration.

use std::time::Duration;

/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default bind port (the conventional inspector port).
pub const DEFAULT_PORT: u16 = 9229;

/// Configuration for a [`SocketServer`](crate::SocketServer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host name or address to bind. Names resolving to several addresses get
    /// one listening socket each.
    pub host: String,
    /// Port to bind; `0` picks any free port.
    pub port: u16,
    /// `description` field of every discovery entry
    pub target_description: String,
    /// `type` field of every discovery entry
    pub target_type: String,
    /// Frontend URL prefix; the WebSocket address is appended as `ws=` parameter
    pub frontend_url: String,
    /// Printed after the listening banner
    pub help_url: String,
    /// How long a graceful close waits for the peer's Close frame
    pub close_timeout: Duration,
}

impl ServerConfig {
    /// Create a configuration for `host:port` with every other field defaulted.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Override the graceful close timeout.
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            target_description: "debugport instance".to_string(),
            target_type: "node".to_string(),
            frontend_url: "devtools://devtools/bundled/js_app.html?experiments=true&v8only=true"
                .to_string(),
            help_url: "https://nodejs.org/en/docs/inspector".to_string(),
            close_timeout: Duration::from_secs(1),
        }
    }
}
