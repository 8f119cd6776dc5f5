//! Cloud provider speaking the OpenAI chat completion API.
//!
//! Works with any OpenAI-compatible endpoint; the default points at the
//! Gemini compatibility layer.

use std::time::Duration;

use async_trait::async_trait;
use hr_protocol::{ChatCompletion, ChatRequest};
use serde::Deserialize;

use super::CloudProvider;
use crate::error::{CloudError, CloudResult};

pub const ENV_CLOUD_BASE_URL: &str = "HYBRID_CLOUD_BASE_URL";
pub const ENV_CLOUD_API_KEY: &str = "HYBRID_CLOUD_API_KEY";
pub const ENV_CLOUD_MODEL: &str = "HYBRID_CLOUD_MODEL";
pub const ENV_CLOUD_TIMEOUT_SECS: &str = "HYBRID_CLOUD_TIMEOUT_SECS";

/// Default wait before retrying after a 429 without a usable Retry-After.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Configuration for the OpenAI-compatible cloud provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CloudConfig {
    /// API base URL; `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token. Required at request time.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model used when the request doesn't name one.
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".into()
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CloudConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply non-blank overrides on top of `self`.
    pub fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            base_url: read(ENV_CLOUD_BASE_URL).unwrap_or(self.base_url),
            api_key: read(ENV_CLOUD_API_KEY).or(self.api_key),
            model: read(ENV_CLOUD_MODEL).unwrap_or(self.model),
            timeout_secs: read(ENV_CLOUD_TIMEOUT_SECS)
                .and_then(|raw| raw.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(self.timeout_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// OpenAI-compatible chat completion provider.
pub struct OpenAiCompatProvider {
    http: reqwest::Client,
    config: CloudConfig,
}

impl OpenAiCompatProvider {
    pub fn new(config: CloudConfig) -> Self {
        Self::with_http_client(reqwest::Client::new(), config)
    }

    /// Reuse an existing connection pool.
    pub fn with_http_client(http: reqwest::Client, config: CloudConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CloudProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn complete(&self, request: &ChatRequest) -> CloudResult<ChatCompletion> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| CloudError::NotConfigured(format!("set {ENV_CLOUD_API_KEY}")))?;

        let mut body = request.clone();
        if body.model.trim().is_empty() {
            body.model = self.config.model.clone();
        }

        tracing::debug!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "sending cloud chat completion request"
        );

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(api_key)
            .timeout(self.config.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CloudError::Timeout
                } else {
                    CloudError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                let retry_after_ms = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .map_or(DEFAULT_RETRY_AFTER_MS, |secs| secs.saturating_mul(1000));
                tracing::warn!(retry_after_ms, "cloud provider rate limited");
                return Err(CloudError::RateLimited { retry_after_ms });
            }

            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(CloudError::AuthFailed(text));
            }
            return Err(CloudError::RequestFailed(format!("HTTP {status}: {text}")));
        }

        let completion: ChatCompletion = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CloudError::Timeout
            } else {
                CloudError::InvalidResponse(format!("failed to parse response: {e}"))
            }
        })?;

        tracing::debug!(
            model = %completion.model,
            tool_calls = completion.tool_call_count(),
            "cloud chat completion received"
        );
        Ok(completion)
    }
}
