//! Hybrid routing engine: local gateway first, cloud fallback.
//!
//! For each request the engine decides whether the on-device model's tool
//! calls are trustworthy enough to return, tries at most one templated
//! re-prompt per rejection kind, and otherwise falls back to the cloud
//! provider (optionally re-asking it once for missing actions).
//!
//! Network calls within one request are strictly sequential, and each is
//! raced against the caller's cancellation token.

use std::future::Future;
use std::sync::Arc;

use hr_gateway::{GatewayClient, GatewayError, InferParams};
use hr_protocol::{
    ChatCompletion, ChatRequest, FallbackReason, FunctionCall, LocalInferenceResult,
    RoutingDecision, ToolDefinition,
};
use tokio_util::sync::CancellationToken;

use crate::cloud::CloudProvider;
use crate::error::{RouteError, RouteResult};
use crate::heuristics::{
    estimate_expected_action_count, extract_latest_user_text, latest_user_has_image,
};
use crate::policy::{
    CLOUD_MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION, DEFAULT_SYSTEM_INSTRUCTION,
    MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION, Policy, REPAIR_SYSTEM_INSTRUCTION,
};
use crate::validation::{ValidationOutcome, validate};

/// Token budget for local generations.
const LOCAL_MAX_TOKENS: u32 = 256;

/// A completion plus the decision that produced it.
#[derive(Debug, Clone)]
pub struct RoutedCompletion {
    pub completion: ChatCompletion,
    pub decision: RoutingDecision,
}

/// Which local prompt produced the current result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalStep {
    Initial,
    Repair,
    MultiIntentRepair,
}

impl LocalStep {
    fn instruction(self) -> &'static str {
        match self {
            Self::Initial => DEFAULT_SYSTEM_INSTRUCTION,
            Self::Repair => REPAIR_SYSTEM_INSTRUCTION,
            Self::MultiIntentRepair => MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION,
        }
    }
}

/// How the local phase ended.
enum LocalOutcome {
    Accepted {
        calls: Vec<FunctionCall>,
        decision: RoutingDecision,
    },
    /// Decision has already been switched to the cloud route.
    Fallback(RoutingDecision),
    Cancelled,
}

/// Why a single local call produced no result.
enum LocalFailure {
    Gateway(GatewayError),
    Cancelled,
}

/// Map a gateway failure onto a fallback reason.
pub fn classify_gateway_error(err: &GatewayError) -> FallbackReason {
    match err {
        GatewayError::Timeout { .. } | GatewayError::Transport(_) | GatewayError::Status { .. } => {
            FallbackReason::GatewayUnavailable
        }
        GatewayError::Decode(_) => FallbackReason::LocalError,
    }
}

/// Race `fut` against cancellation, dropping it if the token fires first.
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        value = fut => Some(value),
    }
}

fn log_decision(decision: &RoutingDecision) {
    tracing::info!(
        route_source = %decision.route_source(),
        fallback_reason = decision.fallback_reason().map(|r| r.as_str()),
        local_confidence = decision.local_confidence(),
        local_latency_ms = decision.local_latency_ms(),
        local_call_count = decision.local_call_count(),
        cloud_call_count = decision.cloud_call_count(),
        expected_action_count = decision.expected_action_count(),
        used_repair_pass = decision.used_repair_pass(),
        used_multi_intent_repair = decision.used_multi_intent_repair(),
        used_cloud_multi_intent_repair = decision.used_cloud_multi_intent_repair(),
        hybrid_routing = %serde_json::to_string(decision).unwrap_or_default(),
        "routing decision"
    );
}

/// Routes tool-calling requests between the local gateway and the cloud.
///
/// Holds no per-request state; one engine serves any number of concurrent
/// requests.
pub struct RoutingEngine {
    policy: Policy,
    gateway: GatewayClient,
    cloud: Arc<dyn CloudProvider>,
}

impl RoutingEngine {
    /// Build an engine whose gateway client follows `policy`.
    pub fn new(policy: Policy, cloud: Arc<dyn CloudProvider>) -> Self {
        let gateway = GatewayClient::new(policy.gateway_config());
        Self::with_gateway(policy, gateway, cloud)
    }

    pub fn with_gateway(
        policy: Policy,
        gateway: GatewayClient,
        cloud: Arc<dyn CloudProvider>,
    ) -> Self {
        Self {
            policy,
            gateway,
            cloud,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Probe the local gateway's health endpoint.
    pub async fn check_gateway_health(&self) -> bool {
        self.gateway.check_health().await
    }

    /// Route one request and return the completion the caller should see.
    ///
    /// Local-path failures of any kind fall back to the cloud. The only
    /// errors are a failed final cloud call and cancellation; cancellation
    /// during the local phase never triggers a cloud call.
    pub async fn route(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> RouteResult<RoutedCompletion> {
        let expected_action_count = estimate_expected_action_count(&request.messages);

        if let Some(reason) = self.precheck(request) {
            tracing::debug!(reason = %reason, "skipping local inference");
            let decision = RoutingDecision::cloud(expected_action_count, reason);
            return self.route_cloud(request, decision, cancel).await;
        }

        let decision = RoutingDecision::local(expected_action_count);
        match self.run_local(request, decision, cancel).await {
            LocalOutcome::Accepted { calls, decision } => {
                log_decision(&decision);
                Ok(RoutedCompletion {
                    completion: ChatCompletion::from_function_calls(&request.model, &calls),
                    decision,
                })
            }
            LocalOutcome::Fallback(decision) => {
                tracing::debug!(
                    reason = ?decision.fallback_reason(),
                    "local inference rejected, falling back to cloud"
                );
                self.route_cloud(request, decision, cancel).await
            }
            LocalOutcome::Cancelled => {
                tracing::info!("request cancelled during local inference");
                Err(RouteError::Cancelled)
            }
        }
    }

    /// Reasons to skip the gateway entirely. Runs before any network call.
    fn precheck(&self, request: &ChatRequest) -> Option<FallbackReason> {
        if !request.has_tools() {
            return Some(FallbackReason::NoToolsAvailable);
        }
        // The local model is text-only.
        if latest_user_has_image(&request.messages) {
            return Some(FallbackReason::GatewayUnavailable);
        }
        if extract_latest_user_text(&request.messages).is_empty() {
            return Some(FallbackReason::NoUserMessage);
        }
        if !self.policy.enable_local_inference {
            return Some(FallbackReason::GatewayUnavailable);
        }
        None
    }

    /// The repair to try next for `reason`, if policy allows and it hasn't
    /// been tried yet.
    fn next_repair(
        &self,
        reason: FallbackReason,
        repair_attempted: bool,
        multi_intent_attempted: bool,
    ) -> Option<LocalStep> {
        match reason {
            FallbackReason::NoFunctionCalls
                if self.policy.enable_repair_pass && !repair_attempted =>
            {
                Some(LocalStep::Repair)
            }
            FallbackReason::MultiIntentIncomplete
                if self.policy.enable_multi_intent_repair && !multi_intent_attempted =>
            {
                Some(LocalStep::MultiIntentRepair)
            }
            _ => None,
        }
    }

    /// Local attempt plus at most one repair of each kind.
    async fn run_local(
        &self,
        request: &ChatRequest,
        mut decision: RoutingDecision,
        cancel: &CancellationToken,
    ) -> LocalOutcome {
        let definitions = ToolDefinition::from_specs(&request.tools);
        let expected_action_count = decision.expected_action_count();

        let mut step = LocalStep::Initial;
        let mut repair_attempted = false;
        let mut multi_intent_attempted = false;

        loop {
            let result = match self.infer_local(request, step, cancel).await {
                Ok(result) => result,
                Err(LocalFailure::Cancelled) => return LocalOutcome::Cancelled,
                Err(LocalFailure::Gateway(err)) => {
                    let reason = classify_gateway_error(&err);
                    tracing::warn!(error = %err, reason = %reason, "local inference failed");
                    return LocalOutcome::Fallback(decision.fall_back(reason));
                }
            };
            decision = decision.with_local_result(&result);

            let outcome = validate(
                &result.function_calls,
                &definitions,
                result.confidence,
                self.policy.local_confidence_threshold,
                expected_action_count,
            );

            let reason = match outcome {
                ValidationOutcome::Accepted => {
                    let decision = match step {
                        LocalStep::Initial => decision,
                        LocalStep::Repair => decision.with_repair_pass(),
                        LocalStep::MultiIntentRepair => decision.with_multi_intent_repair(),
                    };
                    return LocalOutcome::Accepted {
                        calls: result.function_calls,
                        decision,
                    };
                }
                ValidationOutcome::Rejected(reason) => reason,
            };

            let Some(next) = self.next_repair(reason, repair_attempted, multi_intent_attempted)
            else {
                return LocalOutcome::Fallback(decision.fall_back(reason));
            };

            match next {
                LocalStep::Repair => repair_attempted = true,
                LocalStep::MultiIntentRepair => multi_intent_attempted = true,
                LocalStep::Initial => {}
            }
            tracing::debug!(reason = %reason, step = ?next, "retrying local inference");
            step = next;
        }
    }

    async fn infer_local(
        &self,
        request: &ChatRequest,
        step: LocalStep,
        cancel: &CancellationToken,
    ) -> Result<LocalInferenceResult, LocalFailure> {
        let params = InferParams {
            messages: &request.messages,
            tools: &request.tools,
            system_instruction: Some(step.instruction()),
            temperature: Some(self.policy.local_temperature),
            force_tools: Some(true),
            max_tokens: Some(LOCAL_MAX_TOKENS),
        };

        match cancellable(cancel, self.gateway.infer(&params)).await {
            Some(result) => result.map_err(LocalFailure::Gateway),
            None => Err(LocalFailure::Cancelled),
        }
    }

    async fn invoke_cloud(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> RouteResult<ChatCompletion> {
        match cancellable(cancel, self.cloud.complete(request)).await {
            Some(result) => result.map_err(RouteError::from),
            None => Err(RouteError::Cancelled),
        }
    }

    /// Cloud call, plus one multi-intent repair when the answer covers
    /// fewer actions than the request asked for.
    async fn route_cloud(
        &self,
        request: &ChatRequest,
        decision: RoutingDecision,
        cancel: &CancellationToken,
    ) -> RouteResult<RoutedCompletion> {
        let mut cloud_request = request.clone();
        cloud_request.temperature = Some(self.policy.cloud_temperature);

        let completion = match self.invoke_cloud(&cloud_request, cancel).await {
            Ok(completion) => completion,
            Err(err) => {
                tracing::warn!(
                    provider = self.cloud.name(),
                    error = %err,
                    hybrid_routing = %serde_json::to_string(&decision).unwrap_or_default(),
                    "cloud completion failed"
                );
                return Err(err);
            }
        };

        let initial_count = completion.tool_call_count();
        let decision = decision.with_cloud_call_count(initial_count);
        let expected_action_count = decision.expected_action_count();

        if !self.policy.enable_cloud_multi_intent_repair
            || expected_action_count <= 1
            || initial_count >= expected_action_count
        {
            log_decision(&decision);
            return Ok(RoutedCompletion {
                completion,
                decision,
            });
        }

        tracing::debug!(
            expected_action_count,
            cloud_call_count = initial_count,
            "cloud answer incomplete, requesting repair"
        );
        let repair_request =
            cloud_request.with_system_instruction(CLOUD_MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION);

        let decision = match self.invoke_cloud(&repair_request, cancel).await {
            Ok(repaired) if repaired.tool_call_count() > initial_count => {
                let decision = decision.with_cloud_multi_intent_repair(repaired.tool_call_count());
                log_decision(&decision);
                return Ok(RoutedCompletion {
                    completion: repaired,
                    decision,
                });
            }
            Ok(_) => decision,
            Err(RouteError::Cancelled) => return Err(RouteError::Cancelled),
            Err(RouteError::Cloud(err)) => {
                tracing::warn!(error = %err, "cloud repair failed, keeping original response");
                decision.fall_back(FallbackReason::CloudRepairUnavailable)
            }
        };

        log_decision(&decision);
        Ok(RoutedCompletion {
            completion,
            decision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use hr_protocol::{
        ChatMessage, Choice, ContentPart, ImageUrl, Role, RouteSource, ToolCall, ToolCallFunction,
        ToolSpec,
    };
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::error::{CloudError, CloudResult};

    /// Cloud provider that replays canned results and records requests.
    struct MockCloud {
        responses: Mutex<VecDeque<CloudResult<ChatCompletion>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl MockCloud {
        fn new(responses: Vec<CloudResult<ChatCompletion>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CloudProvider for MockCloud {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(&self, request: &ChatRequest) -> CloudResult<ChatCompletion> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CloudError::RequestFailed("no canned response".into())))
        }
    }

    /// Cloud completion with `n` tool calls.
    fn cloud_completion(n: usize) -> ChatCompletion {
        let tool_calls = (0..n)
            .map(|i| ToolCall {
                id: format!("call_{i}"),
                call_type: "function".into(),
                function: ToolCallFunction {
                    name: "set_timer".into(),
                    arguments: "{\"minutes\":5}".into(),
                },
            })
            .collect::<Vec<_>>();
        ChatCompletion {
            id: format!("chatcmpl-cloud-{n}"),
            object: "chat.completion".into(),
            created: 0,
            model: "gemini".into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: Role::Assistant,
                    content: None,
                    tool_calls: (n > 0).then_some(tool_calls),
                    tool_call_id: None,
                    extra: Default::default(),
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: None,
        }
    }

    fn tools() -> Vec<ToolSpec> {
        vec![
            ToolSpec::function(
                "set_timer",
                "Start a timer",
                json!({"type": "object", "properties": {"minutes": {"type": "integer"}}, "required": ["minutes"]}),
            ),
            ToolSpec::function(
                "create_reminder",
                "Create a reminder",
                json!({"type": "object", "properties": {"title": {"type": "string"}}, "required": ["title"]}),
            ),
        ]
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest::new(
            "gemini-2.5-flash",
            vec![ChatMessage::system("You are Lumina."), ChatMessage::user(text)],
        )
        .with_tools(tools())
    }

    fn policy_for(server: &MockServer) -> Policy {
        Policy {
            gateway_url: server.uri(),
            gateway_timeout_ms: 2000,
            cloud_temperature: 0.3,
            ..Policy::default()
        }
    }

    fn gateway_reply(calls: serde_json::Value, confidence: f64) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "functionCalls": calls,
            "confidence": confidence,
            "totalTimeInMs": 40
        }))
    }

    async fn mount_step(server: &MockServer, instruction: &str, reply: ResponseTemplate, times: u64) {
        Mock::given(method("POST"))
            .and(path("/infer"))
            .and(body_partial_json(json!({"systemInstruction": instruction})))
            .respond_with(reply)
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn accepted_local_result_skips_cloud() {
        let server = MockServer::start().await;
        mount_step(
            &server,
            DEFAULT_SYSTEM_INSTRUCTION,
            gateway_reply(json!([{"name": "set_timer", "arguments": {"minutes": 5}}]), 0.995),
            1,
        )
        .await;
        let cloud = MockCloud::new(vec![]);
        let engine = RoutingEngine::new(policy_for(&server), cloud.clone());

        let routed = engine
            .route(&request("set a timer for 5 minutes"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(routed.decision.route_source(), RouteSource::Local);
        assert_eq!(routed.decision.fallback_reason(), None);
        assert_eq!(routed.decision.local_call_count(), Some(1));
        assert!(!routed.decision.used_repair_pass());
        assert_eq!(routed.completion.tool_call_count(), 1);
        assert_eq!(routed.completion.model, "gemini-2.5-flash");
        assert!(cloud.requests().is_empty());
    }

    #[tokio::test]
    async fn low_confidence_falls_back_without_repair() {
        let server = MockServer::start().await;
        mount_step(
            &server,
            DEFAULT_SYSTEM_INSTRUCTION,
            gateway_reply(json!([{"name": "set_timer", "arguments": {"minutes": 5}}]), 0.80),
            1,
        )
        .await;
        mount_step(&server, REPAIR_SYSTEM_INSTRUCTION, gateway_reply(json!([]), 1.0), 0).await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let engine = RoutingEngine::new(policy_for(&server), cloud.clone());

        let routed = engine
            .route(&request("set a timer for 5 minutes"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(routed.decision.route_source(), RouteSource::Cloud);
        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::LowConfidence)
        );
        assert_eq!(routed.decision.local_confidence(), Some(0.80));
        assert_eq!(routed.decision.cloud_call_count(), Some(1));
        assert_eq!(routed.completion.id, "chatcmpl-cloud-1");

        let sent = cloud.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].temperature, Some(0.3));
    }

    #[tokio::test]
    async fn repair_pass_recovers_plain_text_answer() {
        let server = MockServer::start().await;
        mount_step(&server, DEFAULT_SYSTEM_INSTRUCTION, gateway_reply(json!([]), 0.4), 1).await;
        mount_step(
            &server,
            REPAIR_SYSTEM_INSTRUCTION,
            gateway_reply(json!([{"name": "set_timer", "arguments": {"minutes": 5}}]), 0.995),
            1,
        )
        .await;
        let cloud = MockCloud::new(vec![]);
        let engine = RoutingEngine::new(policy_for(&server), cloud.clone());

        let routed = engine
            .route(&request("set a timer for 5 minutes"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(routed.decision.route_source(), RouteSource::Local);
        assert!(routed.decision.used_repair_pass());
        assert_eq!(routed.decision.local_confidence(), Some(0.995));
        assert!(cloud.requests().is_empty());
    }

    #[tokio::test]
    async fn repair_pass_runs_at_most_once() {
        let server = MockServer::start().await;
        mount_step(&server, DEFAULT_SYSTEM_INSTRUCTION, gateway_reply(json!([]), 0.4), 1).await;
        mount_step(&server, REPAIR_SYSTEM_INSTRUCTION, gateway_reply(json!([]), 0.4), 1).await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let engine = RoutingEngine::new(policy_for(&server), cloud.clone());

        let routed = engine
            .route(&request("set a timer for 5 minutes"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::NoFunctionCalls)
        );
        assert!(!routed.decision.used_repair_pass());
        assert_eq!(cloud.requests().len(), 1);
    }

    #[tokio::test]
    async fn repair_disabled_goes_straight_to_cloud() {
        let server = MockServer::start().await;
        mount_step(&server, DEFAULT_SYSTEM_INSTRUCTION, gateway_reply(json!([]), 0.4), 1).await;
        mount_step(&server, REPAIR_SYSTEM_INSTRUCTION, gateway_reply(json!([]), 0.4), 0).await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let policy = Policy {
            enable_repair_pass: false,
            ..policy_for(&server)
        };
        let engine = RoutingEngine::new(policy, cloud.clone());

        let routed = engine
            .route(&request("set a timer for 5 minutes"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::NoFunctionCalls)
        );
    }

    #[tokio::test]
    async fn multi_intent_incomplete_without_repair_goes_to_cloud() {
        let server = MockServer::start().await;
        mount_step(
            &server,
            DEFAULT_SYSTEM_INSTRUCTION,
            gateway_reply(json!([{"name": "set_timer", "arguments": {"minutes": 5}}]), 0.999),
            1,
        )
        .await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(2))]);
        let engine = RoutingEngine::new(policy_for(&server), cloud.clone());

        let routed = engine
            .route(
                &request("set a timer for 5 minutes and then remind me to call mom"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(routed.decision.expected_action_count(), 2);
        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::MultiIntentIncomplete)
        );
        assert_eq!(routed.decision.cloud_call_count(), Some(2));
        assert!(!routed.decision.used_cloud_multi_intent_repair());
        assert_eq!(cloud.requests().len(), 1);
    }

    #[tokio::test]
    async fn multi_intent_repair_recovers_locally() {
        let server = MockServer::start().await;
        mount_step(
            &server,
            DEFAULT_SYSTEM_INSTRUCTION,
            gateway_reply(json!([{"name": "set_timer", "arguments": {"minutes": 5}}]), 0.999),
            1,
        )
        .await;
        mount_step(
            &server,
            MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION,
            gateway_reply(
                json!([
                    {"name": "set_timer", "arguments": {"minutes": 5}},
                    {"name": "create_reminder", "arguments": {"title": "call mom"}}
                ]),
                0.999,
            ),
            1,
        )
        .await;
        let cloud = MockCloud::new(vec![]);
        let policy = Policy {
            enable_multi_intent_repair: true,
            ..policy_for(&server)
        };
        let engine = RoutingEngine::new(policy, cloud.clone());

        let routed = engine
            .route(
                &request("set a timer for 5 minutes and then remind me to call mom"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(routed.decision.route_source(), RouteSource::Local);
        assert!(routed.decision.used_multi_intent_repair());
        assert!(!routed.decision.used_repair_pass());
        assert_eq!(routed.completion.tool_call_count(), 2);
        assert!(cloud.requests().is_empty());
    }

    #[tokio::test]
    async fn repair_then_multi_intent_repair_chain() {
        let server = MockServer::start().await;
        mount_step(&server, DEFAULT_SYSTEM_INSTRUCTION, gateway_reply(json!([]), 0.2), 1).await;
        mount_step(
            &server,
            REPAIR_SYSTEM_INSTRUCTION,
            gateway_reply(json!([{"name": "set_timer", "arguments": {"minutes": 5}}]), 0.999),
            1,
        )
        .await;
        mount_step(
            &server,
            MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION,
            gateway_reply(json!([{"name": "set_timer", "arguments": {"minutes": 5}}]), 0.999),
            1,
        )
        .await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(2))]);
        let policy = Policy {
            enable_multi_intent_repair: true,
            ..policy_for(&server)
        };
        let engine = RoutingEngine::new(policy, cloud.clone());

        let routed = engine
            .route(
                &request("set a timer for 5 minutes and then remind me to call mom"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::MultiIntentIncomplete)
        );
        assert_eq!(routed.decision.local_call_count(), Some(1));
        assert!(!routed.decision.used_repair_pass());
        assert!(!routed.decision.used_multi_intent_repair());
    }

    #[tokio::test]
    async fn image_input_never_reaches_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/infer"))
            .respond_with(gateway_reply(json!([]), 1.0))
            .expect(0)
            .mount(&server)
            .await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let engine = RoutingEngine::new(policy_for(&server), cloud.clone());

        let mut req = request("ignored");
        req.messages.push(ChatMessage::user_parts(vec![
            ContentPart::Text {
                text: "set a timer for what's on this label".into(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "https://example.com/label.jpg".into(),
                    detail: None,
                },
            },
        ]));

        let routed = engine.route(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(routed.decision.route_source(), RouteSource::Cloud);
        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::GatewayUnavailable)
        );
        assert_eq!(routed.decision.local_call_count(), None);
    }

    #[tokio::test]
    async fn prechecks_skip_local_inference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/infer"))
            .respond_with(gateway_reply(json!([]), 1.0))
            .expect(0)
            .mount(&server)
            .await;

        let no_tools = ChatRequest::new("m", vec![ChatMessage::user("hello")]);
        let no_user = ChatRequest::new("m", vec![ChatMessage::system("prompt")]).with_tools(tools());
        let cases = [
            (no_tools, policy_for(&server), FallbackReason::NoToolsAvailable),
            (no_user, policy_for(&server), FallbackReason::NoUserMessage),
            (
                request("set a timer"),
                Policy {
                    enable_local_inference: false,
                    ..policy_for(&server)
                },
                FallbackReason::GatewayUnavailable,
            ),
        ];

        for (req, policy, expected) in cases {
            let cloud = MockCloud::new(vec![Ok(cloud_completion(0))]);
            let engine = RoutingEngine::new(policy, cloud.clone());
            let routed = engine.route(&req, &CancellationToken::new()).await.unwrap();
            assert_eq!(routed.decision.route_source(), RouteSource::Cloud);
            assert_eq!(routed.decision.fallback_reason(), Some(expected));
            assert_eq!(cloud.requests().len(), 1);
        }
    }

    #[tokio::test]
    async fn gateway_timeout_falls_back_to_cloud() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/infer"))
            .respond_with(gateway_reply(json!([]), 1.0).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let policy = Policy {
            gateway_timeout_ms: 200,
            ..policy_for(&server)
        };
        let engine = RoutingEngine::new(policy, cloud.clone());

        let routed = engine
            .route(&request("set a timer for 5 minutes"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::GatewayUnavailable)
        );
        assert_eq!(routed.completion.id, "chatcmpl-cloud-1");
    }

    #[tokio::test]
    async fn oversized_gateway_latency_still_routes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/infer"))
            .and(body_string_contains("set a timer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "functionCalls": [{"name": "set_timer", "arguments": {"minutes": 5}}],
                "confidence": 0.995,
                "totalTimeInMs": 1e30
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/infer"))
            .and(body_string_contains("remind me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "functionCalls": [{"name": "create_reminder", "arguments": {"title": "call mom"}}],
                "confidence": 0.5,
                "totalTimeInMs": 1e30
            })))
            .expect(1)
            .mount(&server)
            .await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let engine = RoutingEngine::new(policy_for(&server), cloud.clone());
        let cancel = CancellationToken::new();

        let local = engine
            .route(&request("set a timer for 5 minutes"), &cancel)
            .await
            .unwrap();
        assert_eq!(local.decision.route_source(), RouteSource::Local);
        assert_eq!(local.decision.local_latency_ms(), Some(0.0));
        assert_eq!(local.completion.tool_call_count(), 1);

        let fallback = engine
            .route(&request("remind me to call mom"), &cancel)
            .await
            .unwrap();
        assert_eq!(fallback.decision.route_source(), RouteSource::Cloud);
        assert_eq!(
            fallback.decision.fallback_reason(),
            Some(FallbackReason::LowConfidence)
        );
        assert_eq!(fallback.decision.local_latency_ms(), Some(0.0));
        assert_eq!(cloud.requests().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_gateway_body_is_local_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/infer"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let engine = RoutingEngine::new(policy_for(&server), cloud.clone());

        let routed = engine
            .route(&request("set a timer for 5 minutes"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::LocalError)
        );
    }

    #[tokio::test]
    async fn gateway_error_after_repair_keeps_local_fields() {
        let server = MockServer::start().await;
        mount_step(&server, DEFAULT_SYSTEM_INSTRUCTION, gateway_reply(json!([]), 0.3), 1).await;
        mount_step(&server, REPAIR_SYSTEM_INSTRUCTION, ResponseTemplate::new(502), 1).await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let engine = RoutingEngine::new(policy_for(&server), cloud.clone());

        let routed = engine
            .route(&request("set a timer for 5 minutes"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::GatewayUnavailable)
        );
        assert_eq!(routed.decision.local_confidence(), Some(0.3));
        assert_eq!(routed.decision.local_call_count(), Some(0));
    }

    #[tokio::test]
    async fn cloud_repair_replaces_incomplete_answer() {
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1)), Ok(cloud_completion(2))]);
        let engine = RoutingEngine::new(
            Policy {
                enable_local_inference: false,
                cloud_temperature: 0.3,
                ..Policy::default()
            },
            cloud.clone(),
        );

        let routed = engine
            .route(
                &request("set a timer for 5 minutes and then remind me to call mom"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(routed.decision.used_cloud_multi_intent_repair());
        assert_eq!(routed.decision.cloud_call_count(), Some(2));
        assert_eq!(routed.completion.id, "chatcmpl-cloud-2");

        let sent = cloud.requests();
        assert_eq!(sent.len(), 2);
        let repair = &sent[1];
        assert_eq!(repair.temperature, Some(0.3));
        assert_eq!(
            repair.messages[0],
            ChatMessage::system(CLOUD_MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION)
        );
        assert_eq!(
            repair
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn cloud_repair_not_better_keeps_original() {
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1)), Ok(cloud_completion(1))]);
        let engine = RoutingEngine::new(
            Policy {
                enable_local_inference: false,
                ..Policy::default()
            },
            cloud.clone(),
        );

        let routed = engine
            .route(
                &request("text Bob and also email Alice"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!routed.decision.used_cloud_multi_intent_repair());
        assert_eq!(routed.decision.cloud_call_count(), Some(1));
        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::GatewayUnavailable)
        );
        assert_eq!(cloud.requests().len(), 2);
    }

    #[tokio::test]
    async fn cloud_repair_failure_is_swallowed() {
        let cloud = MockCloud::new(vec![
            Ok(cloud_completion(1)),
            Err(CloudError::RateLimited {
                retry_after_ms: 1000,
            }),
        ]);
        let engine = RoutingEngine::new(
            Policy {
                enable_local_inference: false,
                ..Policy::default()
            },
            cloud.clone(),
        );

        let routed = engine
            .route(
                &request("set a timer and then remind me to call mom"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(routed.completion.id, "chatcmpl-cloud-1");
        assert_eq!(
            routed.decision.fallback_reason(),
            Some(FallbackReason::CloudRepairUnavailable)
        );
    }

    #[tokio::test]
    async fn cloud_repair_disabled_keeps_original() {
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let engine = RoutingEngine::new(
            Policy {
                enable_local_inference: false,
                enable_cloud_multi_intent_repair: false,
                ..Policy::default()
            },
            cloud.clone(),
        );

        let routed = engine
            .route(
                &request("set a timer and then remind me to call mom"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(routed.completion.id, "chatcmpl-cloud-1");
        assert_eq!(cloud.requests().len(), 1);
    }

    #[tokio::test]
    async fn final_cloud_failure_propagates() {
        let cloud = MockCloud::new(vec![Err(CloudError::AuthFailed("bad key".into()))]);
        let engine = RoutingEngine::new(
            Policy {
                enable_local_inference: false,
                ..Policy::default()
            },
            cloud.clone(),
        );

        let err = engine
            .route(&request("set a timer"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Cloud(CloudError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn cancellation_during_local_phase_skips_cloud() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/infer"))
            .respond_with(gateway_reply(json!([]), 1.0).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let engine = RoutingEngine::new(
            Policy {
                gateway_timeout_ms: 10_000,
                ..policy_for(&server)
            },
            cloud.clone(),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = engine
            .route(&request("set a timer for 5 minutes"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Cancelled));
        assert!(cloud.requests().is_empty());
    }

    #[tokio::test]
    async fn already_cancelled_token_fails_fast() {
        let cloud = MockCloud::new(vec![Ok(cloud_completion(1))]);
        let engine = RoutingEngine::new(
            Policy {
                enable_local_inference: false,
                ..Policy::default()
            },
            cloud.clone(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine.route(&request("set a timer"), &cancel).await.unwrap_err();
        assert!(matches!(err, RouteError::Cancelled));
    }

    #[test]
    fn gateway_errors_classify() {
        assert_eq!(
            classify_gateway_error(&GatewayError::Timeout { timeout_ms: 1 }),
            FallbackReason::GatewayUnavailable
        );
        assert_eq!(
            classify_gateway_error(&GatewayError::Transport("refused".into())),
            FallbackReason::GatewayUnavailable
        );
        assert_eq!(
            classify_gateway_error(&GatewayError::Status { status: 500 }),
            FallbackReason::GatewayUnavailable
        );
        assert_eq!(
            classify_gateway_error(&GatewayError::Decode("eof".into())),
            FallbackReason::LocalError
        );
    }

    #[tokio::test]
    async fn health_check_delegates_to_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let engine = RoutingEngine::new(policy_for(&server), MockCloud::new(vec![]));
        assert!(engine.check_gateway_health().await);
    }
}
