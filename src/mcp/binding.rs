//! Argument binding for tool calls

use serde_json::{Map, Number, Value};
use tokio_util::sync::CancellationToken;

use super::tools::{BoundValue, ParamKind, ParamSpec};
use crate::error::{BridgeError, Result};

/// Bind caller arguments to declared parameters, in declaration order.
///
/// Cancellation parameters receive `cancel`; supplied arguments are coerced
/// to the declared kind; omitted ones fall back to their default or fail with
/// `MissingRequiredParameter`. Arguments with no matching parameter are
/// ignored.
pub fn bind_arguments(
    tool: &str,
    params: &[ParamSpec],
    arguments: &Map<String, Value>,
    cancel: &CancellationToken,
) -> Result<Vec<(String, BoundValue)>> {
    let mut bound = Vec::with_capacity(params.len());

    for param in params {
        let value = if param.kind == ParamKind::Cancellation {
            BoundValue::Cancellation(cancel.clone())
        } else if let Some(supplied) = arguments.get(&param.name) {
            BoundValue::Json(coerce(param, supplied)?)
        } else if let Some(ref default) = param.default {
            BoundValue::Json(default.clone())
        } else {
            return Err(BridgeError::MissingRequiredParameter {
                tool: tool.to_string(),
                parameter: param.name.clone(),
            });
        };
        bound.push((param.name.clone(), value));
    }

    Ok(bound)
}

fn invalid(param: &ParamSpec, expected: &'static str, value: &Value) -> BridgeError {
    BridgeError::InvalidArgument {
        parameter: param.name.clone(),
        expected,
        message: format!("got {}", value),
    }
}

/// Convert a supplied value to the declared parameter kind
pub fn coerce(param: &ParamSpec, value: &Value) -> Result<Value> {
    // An explicit null means "not provided" for optional parameters.
    if value.is_null() {
        return match param.default {
            Some(ref default) => Ok(default.clone()),
            None if param.kind == ParamKind::Object => Ok(Value::Null),
            None => Err(invalid(param, "a non-null value", value)),
        };
    }

    match param.kind {
        ParamKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(invalid(param, "a string", value)),
        },
        ParamKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(invalid(param, "an integer", value)),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid(param, "an integer", value)),
            Value::Bool(b) => Ok(Value::from(*b as i64)),
            _ => Err(invalid(param, "an integer", value)),
        },
        ParamKind::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid(param, "a number", value)),
            _ => Err(invalid(param, "a number", value)),
        },
        ParamKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(invalid(param, "a boolean", value)),
            },
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(invalid(param, "a boolean", value)),
            },
            _ => Err(invalid(param, "a boolean", value)),
        },
        ParamKind::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err(invalid(param, "an array", value)),
        },
        ParamKind::Object => Ok(value.clone()),
        ParamKind::Cancellation => Err(BridgeError::InvalidArgument {
            parameter: param.name.clone(),
            expected: "nothing",
            message: "cancellation tokens cannot be supplied by the caller".to_string(),
        }),
    }
}
