//! Defensive parsing of gateway `/infer` responses.
//!
//! The gateway fronts a small model whose output is frequently partial or
//! malformed, so nothing here fails: unusable pieces are dropped and
//! missing numbers fall back to zero. Field names are accepted in both
//! camelCase and snake_case.

use std::time::Duration;

use hr_protocol::{FunctionCall, LocalInferenceResult};
use serde_json::{Map, Value};

/// Look up `camel`, falling back to `snake` when absent or null.
fn field<'a>(record: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    record
        .get(camel)
        .filter(|value| !value.is_null())
        .or_else(|| record.get(snake))
}

/// Arguments given either as a JSON object or as a JSON-encoded object string.
fn read_arguments(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(encoded) => {
            let trimmed = encoded.trim();
            if trimmed.is_empty() {
                return None;
            }
            match serde_json::from_str(trimmed) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            }
        }
        _ => None,
    }
}

fn read_function_calls(value: Option<&Value>) -> Vec<FunctionCall> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let record = item.as_object()?;
            let name = record.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let arguments = read_arguments(record.get("arguments")?)?;
            Some(FunctionCall {
                name: name.to_string(),
                arguments,
            })
        })
        .collect()
}

fn read_finite(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|n| n.is_finite())
}

fn read_confidence(value: Option<&Value>) -> f64 {
    read_finite(value)
        .filter(|c| (0.0..=1.0).contains(c))
        .unwrap_or(0.0)
}

fn read_latency(value: Option<&Value>) -> Duration {
    read_finite(value)
        .filter(|ms| *ms >= 0.0)
        .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok())
        .unwrap_or_default()
}

/// Normalize a decoded gateway body. Non-object bodies yield an empty result.
pub fn parse_response(body: &Value) -> LocalInferenceResult {
    let Some(record) = body.as_object() else {
        return LocalInferenceResult::empty();
    };

    LocalInferenceResult {
        function_calls: read_function_calls(field(record, "functionCalls", "function_calls")),
        confidence: read_confidence(record.get("confidence")),
        latency: read_latency(field(record, "totalTimeInMs", "total_time_ms")),
        raw_text: field(record, "rawText", "raw_text")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
