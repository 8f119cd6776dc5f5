//! Routing domain types: tool schemas, normalized local results, and the
//! per-request routing decision record.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chat::{ToolCall, ToolCallFunction, ToolSpec};

/// A named tool invocation produced by either backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl FunctionCall {
    /// Build a call from a JSON value. Non-object values yield no arguments.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Wrap as an assistant tool call with a locally generated id
    /// (`local-tool-call-<index + 1>`).
    pub fn to_tool_call(&self, index: usize) -> ToolCall {
        ToolCall {
            id: format!("local-tool-call-{}", index + 1),
            call_type: "function".into(),
            function: ToolCallFunction {
                name: self.name.clone(),
                arguments: Value::Object(self.arguments.clone()).to_string(),
            },
        }
    }
}

/// Primitive JSON Schema type tag declared for an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl SchemaType {
    /// Parse a schema `type` string, case-insensitively. Unknown tags
    /// (including `"null"`) return `None` and are treated as unspecified.
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            _ => None,
        }
    }
}

/// Validation view of a tool offered in a request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolDefinition {
    pub name: String,
    pub required_arguments: Vec<String>,
    /// Declared argument types. Arguments without a recognised type are absent.
    pub properties: BTreeMap<String, SchemaType>,
}

impl ToolDefinition {
    /// Derive a definition from a function tool's JSON Schema. Returns `None`
    /// for non-function tools.
    pub fn from_spec(spec: &ToolSpec) -> Option<Self> {
        if !spec.is_function() {
            return None;
        }

        let parameters = spec.function.parameters.as_ref().and_then(Value::as_object);

        let required_arguments = parameters
            .and_then(|params| params.get("required"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let properties = parameters
            .and_then(|params| params.get("properties"))
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|(name, schema)| {
                        let type_name = schema.get("type")?.as_str()?;
                        Some((name.clone(), SchemaType::from_type_name(type_name)?))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            name: spec.function.name.clone(),
            required_arguments,
            properties,
        })
    }

    /// Definitions for every function tool in `specs`.
    pub fn from_specs(specs: &[ToolSpec]) -> Vec<Self> {
        specs.iter().filter_map(Self::from_spec).collect()
    }
}

/// Normalized result of one local gateway call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalInferenceResult {
    pub function_calls: Vec<FunctionCall>,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    /// Inference time reported by the gateway.
    pub latency: Duration,
    pub raw_text: Option<String>,
}

impl LocalInferenceResult {
    /// The result used when the gateway body is unusable.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// Backend whose output reached the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Local,
    Cloud,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

impl fmt::Display for RouteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request did not end on the local path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    GatewayUnavailable,
    NoToolsAvailable,
    NoUserMessage,
    NoFunctionCalls,
    UnknownTool,
    InvalidArguments,
    LowConfidence,
    MultiIntentIncomplete,
    LocalError,
    CloudRepairUnavailable,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GatewayUnavailable => "gateway_unavailable",
            Self::NoToolsAvailable => "no_tools_available",
            Self::NoUserMessage => "no_user_message",
            Self::NoFunctionCalls => "no_function_calls",
            Self::UnknownTool => "unknown_tool",
            Self::InvalidArguments => "invalid_arguments",
            Self::LowConfidence => "low_confidence",
            Self::MultiIntentIncomplete => "multi_intent_incomplete",
            Self::LocalError => "local_error",
            Self::CloudRepairUnavailable => "cloud_repair_unavailable",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Observability record for one routed request.
///
/// Threaded by value through the routing steps: each step consumes the
/// decision and returns the updated one. A fallback reason is present
/// exactly when `route_source` is `Cloud`; the only way to switch to the
/// cloud route is [`RoutingDecision::fall_back`], which requires a reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    route_source: RouteSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_reason: Option<FallbackReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_call_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud_call_count: Option<usize>,
    expected_action_count: usize,
    #[serde(skip_serializing_if = "is_false")]
    used_repair_pass: bool,
    #[serde(skip_serializing_if = "is_false")]
    used_multi_intent_repair: bool,
    #[serde(skip_serializing_if = "is_false")]
    used_cloud_multi_intent_repair: bool,
}

impl RoutingDecision {
    /// Start a decision on the local route.
    pub fn local(expected_action_count: usize) -> Self {
        Self {
            route_source: RouteSource::Local,
            fallback_reason: None,
            local_confidence: None,
            local_latency_ms: None,
            local_call_count: None,
            cloud_call_count: None,
            expected_action_count,
            used_repair_pass: false,
            used_multi_intent_repair: false,
            used_cloud_multi_intent_repair: false,
        }
    }

    /// Start a decision that goes straight to the cloud.
    pub fn cloud(expected_action_count: usize, reason: FallbackReason) -> Self {
        Self::local(expected_action_count).fall_back(reason)
    }

    /// Record the latest local attempt.
    pub fn with_local_result(self, result: &LocalInferenceResult) -> Self {
        Self {
            local_confidence: Some(result.confidence),
            local_latency_ms: Some(result.latency_ms()),
            local_call_count: Some(result.function_calls.len()),
            ..self
        }
    }

    pub fn with_repair_pass(self) -> Self {
        Self {
            used_repair_pass: true,
            ..self
        }
    }

    pub fn with_multi_intent_repair(self) -> Self {
        Self {
            used_multi_intent_repair: true,
            ..self
        }
    }

    /// Switch to the cloud route for `reason`.
    pub fn fall_back(self, reason: FallbackReason) -> Self {
        Self {
            route_source: RouteSource::Cloud,
            fallback_reason: Some(reason),
            ..self
        }
    }

    pub fn with_cloud_call_count(self, count: usize) -> Self {
        Self {
            cloud_call_count: Some(count),
            ..self
        }
    }

    /// The repaired cloud response replaced the original.
    pub fn with_cloud_multi_intent_repair(self, count: usize) -> Self {
        Self {
            used_cloud_multi_intent_repair: true,
            cloud_call_count: Some(count),
            ..self
        }
    }

    pub fn route_source(&self) -> RouteSource {
        self.route_source
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        self.fallback_reason
    }

    pub fn local_confidence(&self) -> Option<f64> {
        self.local_confidence
    }

    pub fn local_latency_ms(&self) -> Option<f64> {
        self.local_latency_ms
    }

    pub fn local_call_count(&self) -> Option<usize> {
        self.local_call_count
    }

    pub fn cloud_call_count(&self) -> Option<usize> {
        self.cloud_call_count
    }

    pub fn expected_action_count(&self) -> usize {
        self.expected_action_count
    }

    pub fn used_repair_pass(&self) -> bool {
        self.used_repair_pass
    }

    pub fn used_multi_intent_repair(&self) -> bool {
        self.used_multi_intent_repair
    }

    pub fn used_cloud_multi_intent_repair(&self) -> bool {
        self.used_cloud_multi_intent_repair
    }
}
