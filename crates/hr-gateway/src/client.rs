//! HTTP client for the local inference gateway.

use hr_protocol::{ChatMessage, FunctionSpec, LocalInferenceResult, ToolSpec};
use serde::Serialize;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::response::parse_response;
use crate::window::{GatewayMessage, build_window};

/// Inputs for one `/infer` call.
#[derive(Debug, Clone, Copy)]
pub struct InferParams<'a> {
    /// Full chat history; windowed before sending.
    pub messages: &'a [ChatMessage],
    /// Tools offered in the request. Only function tools are forwarded.
    pub tools: &'a [ToolSpec],
    pub system_instruction: Option<&'a str>,
    pub temperature: Option<f64>,
    pub force_tools: Option<bool>,
    pub max_tokens: Option<u32>,
}

/// `/infer` request body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InferRequest<'a> {
    messages: Vec<GatewayMessage>,
    tools: Vec<&'a FunctionSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    force_tools: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl<'a> From<&InferParams<'a>> for InferRequest<'a> {
    fn from(params: &InferParams<'a>) -> Self {
        Self {
            messages: build_window(params.messages),
            tools: params
                .tools
                .iter()
                .filter(|tool| tool.is_function())
                .map(|tool| &tool.function)
                .collect(),
            system_instruction: params.system_instruction,
            temperature: params.temperature,
            force_tools: params.force_tools,
            max_tokens: params.max_tokens,
        }
    }
}

/// Client for the local inference gateway.
///
/// Stateless apart from the pooled `reqwest::Client`; safe to share across
/// concurrent requests.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_http_client(reqwest::Client::new(), config)
    }

    /// Reuse an existing connection pool.
    pub fn with_http_client(http: reqwest::Client, config: GatewayConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn map_send_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }
        } else {
            GatewayError::Transport(err.to_string())
        }
    }

    /// Run one local inference.
    ///
    /// Timeouts and connection failures surface as [`GatewayError::Timeout`]
    /// / [`GatewayError::Transport`], non-2xx replies as
    /// [`GatewayError::Status`], and a body that isn't JSON as
    /// [`GatewayError::Decode`]. Any JSON body is normalized leniently.
    pub async fn infer(&self, params: &InferParams<'_>) -> GatewayResult<LocalInferenceResult> {
        let url = self.config.endpoint("infer");
        let body = InferRequest::from(params);

        tracing::debug!(
            url = %url,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "sending local inference request"
        );

        let response = self
            .http
            .post(&url)
            .timeout(self.config.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "gateway returned non-2xx");
            return Err(GatewayError::Status {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let json: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| GatewayError::Decode(e.to_string()))?;

        let result = parse_response(&json);
        tracing::debug!(
            calls = result.function_calls.len(),
            confidence = result.confidence,
            latency_ms = result.latency_ms(),
            "local inference response parsed"
        );
        Ok(result)
    }

    /// Probe `GET /health`. Any 2xx is healthy; every failure is `false`.
    pub async fn check_health(&self) -> bool {
        let url = self.config.endpoint("health");
        match self
            .http
            .get(&url)
            .timeout(self.config.timeout())
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "gateway health check failed");
                false
            }
        }
    }
}
