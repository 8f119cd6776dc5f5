//! Routing policy: feature toggles, thresholds, and gateway address.
//!
//! Resolved once at startup from defaults, an optional TOML table, and
//! `HYBRID_*` environment variables, then shared read-only.

use std::time::Duration;

use hr_gateway::GatewayConfig;
use serde::Deserialize;

pub const ENV_ENABLE_LOCAL_INFERENCE: &str = "HYBRID_ENABLE_LOCAL_INFERENCE";
pub const ENV_ENABLE_REPAIR_PASS: &str = "HYBRID_ENABLE_REPAIR_PASS";
pub const ENV_ENABLE_MULTI_INTENT_REPAIR: &str = "HYBRID_ENABLE_MULTI_INTENT_REPAIR";
pub const ENV_ENABLE_CLOUD_MULTI_INTENT_REPAIR: &str = "HYBRID_ENABLE_CLOUD_MULTI_INTENT_REPAIR";
pub const ENV_LOCAL_CONFIDENCE_THRESHOLD: &str = "HYBRID_LOCAL_CONFIDENCE_THRESHOLD";
pub const ENV_LOCAL_TEMPERATURE: &str = "HYBRID_LOCAL_TEMPERATURE";
pub const ENV_CLOUD_TEMPERATURE: &str = "HYBRID_CLOUD_TEMPERATURE";
pub const ENV_GATEWAY_URL: &str = "HYBRID_GATEWAY_URL";
pub const ENV_GATEWAY_TIMEOUT_MS: &str = "HYBRID_GATEWAY_TIMEOUT_MS";

/// Instruction for the first local attempt.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful assistant that can use tools.";

/// Instruction for the local repair pass after a plain-text answer.
pub const REPAIR_SYSTEM_INSTRUCTION: &str = "You must respond using one or more tool calls from the provided tool list. Do not respond with plain text.";

/// Instruction for the local repair pass after an incomplete multi-action answer.
pub const MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION: &str = "You must respond using tool calls only. If the user requests multiple actions, return multiple function calls in order, with one function call per action. Do not respond with plain text.";

/// Instruction prepended to the cloud repair request.
pub const CLOUD_MULTI_INTENT_REPAIR_SYSTEM_INSTRUCTION: &str = "You must respond with function calls only. If the user requests multiple actions, output one function call per action in the same order. Do not omit requested actions and do not reply with plain text.";

const TRUE_FLAG_VALUES: &[&str] = &["1", "true", "yes", "on"];

/// Immutable routing policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Policy {
    /// Try the local gateway at all.
    #[serde(default = "default_true")]
    pub enable_local_inference: bool,
    /// Re-prompt once when the local model answered without tool calls.
    #[serde(default = "default_true")]
    pub enable_repair_pass: bool,
    /// Re-prompt once when the local model covered fewer actions than requested.
    #[serde(default)]
    pub enable_multi_intent_repair: bool,
    /// Re-ask the cloud once when it covered fewer actions than requested.
    #[serde(default = "default_true")]
    pub enable_cloud_multi_intent_repair: bool,
    /// Minimum local confidence, in [0, 1].
    #[serde(default = "default_confidence_threshold")]
    pub local_confidence_threshold: f64,
    #[serde(default)]
    pub local_temperature: f64,
    #[serde(default)]
    pub cloud_temperature: f64,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_gateway_timeout_ms")]
    pub gateway_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_confidence_threshold() -> f64 {
    0.99
}

fn default_gateway_url() -> String {
    GatewayConfig::default().base_url
}

fn default_gateway_timeout_ms() -> u64 {
    GatewayConfig::default().timeout_ms
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            enable_local_inference: true,
            enable_repair_pass: true,
            enable_multi_intent_repair: false,
            enable_cloud_multi_intent_repair: true,
            local_confidence_threshold: default_confidence_threshold(),
            local_temperature: 0.0,
            cloud_temperature: 0.0,
            gateway_url: default_gateway_url(),
            gateway_timeout_ms: default_gateway_timeout_ms(),
        }
    }
}

impl Policy {
    /// Defaults overridden by `HYBRID_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Defaults overridden through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::default().with_overrides(lookup)
    }

    /// Apply overrides on top of `self`. Values that fail to parse keep the
    /// current setting; out-of-range results fall back to defaults.
    pub fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let threshold = read_number(&lookup, ENV_LOCAL_CONFIDENCE_THRESHOLD)
            .filter(|t| (0.0..=1.0).contains(t))
            .unwrap_or(self.local_confidence_threshold);

        let policy = Self {
            enable_local_inference: read_bool(
                &lookup,
                ENV_ENABLE_LOCAL_INFERENCE,
                self.enable_local_inference,
            ),
            enable_repair_pass: read_bool(&lookup, ENV_ENABLE_REPAIR_PASS, self.enable_repair_pass),
            enable_multi_intent_repair: read_bool(
                &lookup,
                ENV_ENABLE_MULTI_INTENT_REPAIR,
                self.enable_multi_intent_repair,
            ),
            enable_cloud_multi_intent_repair: read_bool(
                &lookup,
                ENV_ENABLE_CLOUD_MULTI_INTENT_REPAIR,
                self.enable_cloud_multi_intent_repair,
            ),
            local_confidence_threshold: threshold,
            local_temperature: read_number(&lookup, ENV_LOCAL_TEMPERATURE)
                .unwrap_or(self.local_temperature),
            cloud_temperature: read_number(&lookup, ENV_CLOUD_TEMPERATURE)
                .unwrap_or(self.cloud_temperature),
            gateway_url: read_string(&lookup, ENV_GATEWAY_URL)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(self.gateway_url),
            gateway_timeout_ms: read_string(&lookup, ENV_GATEWAY_TIMEOUT_MS)
                .and_then(|raw| raw.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(self.gateway_timeout_ms),
        };
        policy.validated()
    }

    /// Replace values no source may set with their defaults: a threshold
    /// outside [0, 1], non-finite temperatures, a blank gateway URL, and a
    /// zero timeout. Applied to file-loaded policies as well as env ones.
    pub fn validated(self) -> Self {
        let defaults = Self::default();
        let gateway_url = match self.gateway_url.trim().trim_end_matches('/') {
            "" => defaults.gateway_url,
            url => url.to_string(),
        };
        Self {
            local_confidence_threshold: Some(self.local_confidence_threshold)
                .filter(|t| (0.0..=1.0).contains(t))
                .unwrap_or(defaults.local_confidence_threshold),
            local_temperature: Some(self.local_temperature)
                .filter(|t| t.is_finite())
                .unwrap_or(defaults.local_temperature),
            cloud_temperature: Some(self.cloud_temperature)
                .filter(|t| t.is_finite())
                .unwrap_or(defaults.cloud_temperature),
            gateway_url,
            gateway_timeout_ms: Some(self.gateway_timeout_ms)
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.gateway_timeout_ms),
            ..self
        }
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.gateway_url.clone(),
            timeout_ms: self.gateway_timeout_ms,
        }
    }
}

/// A set flag is true only for `1`, `true`, `yes`, or `on`.
fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    match lookup(name) {
        Some(raw) => TRUE_FLAG_VALUES.contains(&raw.trim().to_ascii_lowercase().as_str()),
        None => default,
    }
}

fn read_number(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<f64> {
    lookup(name)
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

fn read_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}
