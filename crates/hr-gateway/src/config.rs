//! Gateway endpoint configuration.

use std::time::Duration;

use serde::Deserialize;

/// Where the gateway lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

pub(crate) fn default_base_url() -> String {
    "http://127.0.0.1:8788".into()
}

pub(crate) fn default_timeout_ms() -> u64 {
    15_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}
