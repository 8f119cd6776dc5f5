//! Acceptance checks for local inference output.
//!
//! Rules run in a fixed order and the first failure decides the reported
//! reason; reordering them changes which reason wins for inputs that fail
//! several checks.

use std::collections::HashMap;

use hr_protocol::{FallbackReason, FunctionCall, SchemaType, ToolDefinition};
use serde_json::{Map, Value};

/// Result of validating one local inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected(FallbackReason),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            Self::Accepted => None,
            Self::Rejected(reason) => Some(*reason),
        }
    }
}

/// Decide whether `function_calls` can be returned to the caller as-is.
pub fn validate(
    function_calls: &[FunctionCall],
    tool_definitions: &[ToolDefinition],
    confidence: f64,
    confidence_threshold: f64,
    expected_action_count: usize,
) -> ValidationOutcome {
    use ValidationOutcome::Rejected;

    if function_calls.is_empty() {
        return Rejected(FallbackReason::NoFunctionCalls);
    }

    if confidence < confidence_threshold {
        return Rejected(FallbackReason::LowConfidence);
    }

    let tools_by_name: HashMap<&str, &ToolDefinition> = tool_definitions
        .iter()
        .map(|def| (def.name.as_str(), def))
        .collect();

    for call in function_calls {
        if call.name.trim().is_empty() {
            return Rejected(FallbackReason::UnknownTool);
        }

        if has_malformed_arguments(&call.arguments) {
            return Rejected(FallbackReason::InvalidArguments);
        }

        let Some(definition) = tools_by_name.get(call.name.as_str()) else {
            return Rejected(FallbackReason::UnknownTool);
        };

        if !has_required_arguments(call, definition)
            || has_invalid_argument_types(call, definition)
            || has_invalid_time_values(&call.arguments)
        {
            return Rejected(FallbackReason::InvalidArguments);
        }
    }

    if expected_action_count > 1 && function_calls.len() < expected_action_count {
        return Rejected(FallbackReason::MultiIntentIncomplete);
    }

    ValidationOutcome::Accepted
}

/// Blank keys at any depth, or numbers that aren't finite.
fn has_malformed_arguments(arguments: &Map<String, Value>) -> bool {
    arguments
        .iter()
        .any(|(key, value)| key.trim().is_empty() || has_invalid_value(value))
}

fn has_invalid_value(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => false,
        Value::Number(n) => n.as_f64().is_none_or(|f| !f.is_finite()),
        Value::Array(items) => items.iter().any(has_invalid_value),
        Value::Object(map) => has_malformed_arguments(map),
    }
}

fn has_required_arguments(call: &FunctionCall, definition: &ToolDefinition) -> bool {
    definition
        .required_arguments
        .iter()
        .all(|name| call.arguments.get(name).is_some_and(|value| !value.is_null()))
}

fn has_invalid_argument_types(call: &FunctionCall, definition: &ToolDefinition) -> bool {
    call.arguments.iter().any(|(name, value)| {
        definition
            .properties
            .get(name)
            .is_some_and(|schema_type| !matches_schema_type(value, *schema_type))
    })
}

/// Whether `value` has the JSON type declared by `schema_type`.
pub fn matches_schema_type(value: &Value, schema_type: SchemaType) -> bool {
    match schema_type {
        SchemaType::String => value.is_string(),
        SchemaType::Number => value.as_f64().is_some_and(f64::is_finite),
        SchemaType::Integer => integral_value(value).is_some(),
        SchemaType::Boolean => value.is_boolean(),
        SchemaType::Object => value.is_object(),
        SchemaType::Array => value.is_array(),
    }
}

/// Numeric value with no fractional part (`5` and `5.0` both qualify).
fn integral_value(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .filter(|n| n.is_finite() && n.fract() == 0.0)
}

/// Obvious out-of-range clock values on well-known argument names.
pub fn has_invalid_time_values(arguments: &Map<String, Value>) -> bool {
    let integral = |name: &str| arguments.get(name).and_then(integral_value);

    if integral("minutes").is_some_and(|m| m < 0.0) {
        return true;
    }
    if integral("hour").is_some_and(|h| !(0.0..=23.0).contains(&h)) {
        return true;
    }
    integral("minute").is_some_and(|m| !(0.0..=59.0).contains(&m))
}
