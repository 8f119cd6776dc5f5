//! Shared test harness for E2E routing tests.
//!
//! Wires a real `RoutingEngine` (gateway client + OpenAI-compatible cloud
//! provider) to two wiremock servers so every scenario crosses the HTTP
//! boundary on both sides.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use hr_protocol::{ChatMessage, ChatRequest, ToolSpec};
use hr_router::policy::{CLOUD_MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION, Policy};
use hr_router::{CloudConfig, OpenAiCompatProvider, RouteResult, RoutedCompletion, RoutingEngine};

/// End-to-end harness: mocked gateway, mocked cloud, real engine.
pub struct TestHarness {
    /// Stand-in for the local inference gateway (`/infer`, `/health`).
    pub gateway: MockServer,
    /// Stand-in for the cloud `/v1/chat/completions` endpoint.
    pub cloud: MockServer,
    pub engine: RoutingEngine,
}

impl TestHarness {
    /// Harness with default policy pointed at the mock gateway.
    pub async fn new() -> Self {
        Self::with_policy(|policy| policy).await
    }

    /// Harness with a policy adjusted by `adjust`. The gateway URL is
    /// always the mock server.
    pub async fn with_policy(adjust: impl FnOnce(Policy) -> Policy) -> Self {
        let gateway = MockServer::start().await;
        let cloud = MockServer::start().await;

        let policy = adjust(Policy {
            gateway_url: gateway.uri(),
            gateway_timeout_ms: 2000,
            ..Policy::default()
        });
        let provider = OpenAiCompatProvider::new(CloudConfig {
            base_url: format!("{}/v1", cloud.uri()),
            api_key: Some("test-key".into()),
            model: "gemini-2.5-flash".into(),
            timeout_secs: 5,
        });
        let engine = RoutingEngine::new(policy, Arc::new(provider));

        Self {
            gateway,
            cloud,
            engine,
        }
    }

    /// Answer `/infer` calls carrying `instruction` with `calls` at `confidence`.
    pub async fn mount_local(&self, instruction: &str, calls: Value, confidence: f64, times: u64) {
        Mock::given(method("POST"))
            .and(path("/infer"))
            .and(body_partial_json(json!({"systemInstruction": instruction})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "functionCalls": calls,
                "confidence": confidence,
                "totalTimeInMs": 85
            })))
            .expect(times)
            .mount(&self.gateway)
            .await;
    }

    /// Fail the test if the gateway sees any `/infer` call.
    pub async fn forbid_local(&self) {
        Mock::given(method("POST"))
            .and(path("/infer"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&self.gateway)
            .await;
    }

    /// Answer the first cloud call with `tool_calls` tool calls.
    pub async fn mount_cloud(&self, tool_calls: usize, times: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(cloud_body("chatcmpl-cloud", tool_calls)))
            .expect(times)
            .mount(&self.cloud)
            .await;
    }

    /// Answer the cloud multi-intent repair call, which takes precedence
    /// over [`mount_cloud`](Self::mount_cloud).
    pub async fn mount_cloud_repair(&self, response: ResponseTemplate, times: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains(CLOUD_MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION))
            .respond_with(response)
            .with_priority(1)
            .expect(times)
            .mount(&self.cloud)
            .await;
    }

    pub async fn route(&self, request: &ChatRequest) -> RouteResult<RoutedCompletion> {
        self.engine.route(request, &CancellationToken::new()).await
    }

    /// Bodies of every request the cloud server received.
    pub async fn cloud_requests(&self) -> Vec<Value> {
        received_json(&self.cloud).await
    }

    /// Bodies of every request the gateway received.
    pub async fn gateway_requests(&self) -> Vec<Value> {
        received_json(&self.gateway).await
    }
}

async fn received_json(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|r: &Request| serde_json::from_slice(&r.body).ok())
        .collect()
}

/// OpenAI chat completion body with `n` tool calls.
pub fn cloud_body(id: &str, n: usize) -> Value {
    let tool_calls: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "id": format!("call_{i}"),
                "type": "function",
                "function": {"name": "set_timer", "arguments": "{\"minutes\":5}"}
            })
        })
        .collect();
    json!({
        "id": id,
        "object": "chat.completion",
        "created": 1_760_000_000,
        "model": "gemini-2.5-flash",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": null, "tool_calls": tool_calls},
            "finish_reason": "tool_calls"
        }]
    })
}

/// The assistant's tool set: a timer and a reminder.
pub fn assistant_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::function(
            "set_timer",
            "Start a countdown timer",
            json!({
                "type": "object",
                "properties": {"minutes": {"type": "integer"}},
                "required": ["minutes"]
            }),
        ),
        ToolSpec::function(
            "create_reminder",
            "Create a reminder",
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "hour": {"type": "integer"},
                    "minute": {"type": "integer"}
                },
                "required": ["title"]
            }),
        ),
    ]
}

/// Single-turn request for `text` with the assistant tools.
pub fn user_request(text: &str) -> ChatRequest {
    ChatRequest::new(
        "gemini-2.5-flash",
        vec![
            ChatMessage::system("You are a concise voice assistant."),
            ChatMessage::user(text),
        ],
    )
    .with_tools(assistant_tools())
}
