//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ualink_cache::CacheConfig;
use ualink_session::SessionConfig;

/// Timeouts for the request/response channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// How long a request may wait for its response, in milliseconds.
    /// Default: 60 000.
    pub request_timeout_ms: u64,
    /// How long opening a connection may take, in milliseconds.
    /// Default: 10 000.
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Everything a [`UaClient`](crate::UaClient) can be configured with.
///
/// Loadable from any serde format; sections left out take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub session: SessionConfig,
    pub cache: CacheConfig,
    pub transport: TransportConfig,
}
