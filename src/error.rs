//! Error types for hostbridge

use std::time::Duration;

use thiserror::Error;

/// Result type alias for hostbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// JSON-RPC 2.0 error codes
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Reserved for strict parameter validation.
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Application-defined range, used for tool-level failures.
    pub const SERVER_ERROR: i64 = -32000;
}

/// Main error type for hostbridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Tool not found: {name}{}", .suggestion.as_ref().map(|s| format!(" (did you mean '{}'?)", s)).unwrap_or_default())]
    ToolNotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Duplicate tool name '{name}' (declared by {first} and {second})")]
    DuplicateToolName {
        name: String,
        first: String,
        second: String,
    },

    #[error("Missing required parameter '{parameter}' for tool '{tool}'")]
    MissingRequiredParameter { tool: String, parameter: String },

    #[error("Invalid value for parameter '{parameter}': expected {expected}, {message}")]
    InvalidArgument {
        parameter: String,
        expected: &'static str,
        message: String,
    },

    #[error("Tool failed: {0}")]
    ToolFailed(String),

    #[error("Tool call timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Host context unavailable: {0}")]
    HostUnavailable(String),

    #[error("Service not registered: {0}")]
    ServiceNotFound(&'static str),

    #[error("Service construction failed for {service}: {message}")]
    ServiceConstruction {
        service: &'static str,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Shorthand for a tool reporting its own failure
    pub fn tool(message: impl Into<String>) -> Self {
        BridgeError::ToolFailed(message.into())
    }

    /// Whether this error belongs to the tool-execution tier.
    ///
    /// Tool-execution errors are reported as successful JSON-RPC responses
    /// whose payload carries `isError: true`; everything else becomes a
    /// JSON-RPC error object.
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            BridgeError::ToolNotFound { .. }
                | BridgeError::MissingRequiredParameter { .. }
                | BridgeError::InvalidArgument { .. }
                | BridgeError::ToolFailed(_)
                | BridgeError::Timeout(_)
                | BridgeError::Cancelled
                | BridgeError::HostUnavailable(_)
        )
    }

    /// Get error code for the JSON-RPC protocol
    pub fn code(&self) -> i64 {
        match self {
            BridgeError::Parse(_) => codes::PARSE_ERROR,
            BridgeError::InvalidRequest(_) => codes::INVALID_REQUEST,
            BridgeError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            BridgeError::InvalidParams(_) => codes::INVALID_PARAMS,
            e if e.is_tool_error() => codes::SERVER_ERROR,
            _ => codes::INTERNAL_ERROR,
        }
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_codes() {
        assert_eq!(BridgeError::Parse("x".into()).code(), -32700);
        assert_eq!(BridgeError::InvalidRequest("x".into()).code(), -32600);
        assert_eq!(BridgeError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(BridgeError::Internal("x".into()).code(), -32603);
        assert_eq!(
            BridgeError::DuplicateToolName {
                name: "a".into(),
                first: "A".into(),
                second: "B".into()
            }
            .code(),
            -32603
        );
    }

    #[test]
    fn test_tool_tier() {
        let err = BridgeError::MissingRequiredParameter {
            tool: "echo".into(),
            parameter: "message".into(),
        };
        assert!(err.is_tool_error());
        assert!(err.to_string().contains("message"));
        assert!(!BridgeError::Internal("boom".into()).is_tool_error());
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("kaboom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "kaboom");
        let payload = std::panic::catch_unwind(|| panic!("{} apples", 3)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "3 apples");
    }

    #[test]
    fn test_tool_not_found_suggestion() {
        let err = BridgeError::ToolNotFound {
            name: "get_widget_cnt".into(),
            suggestion: Some("get_widget_count".into()),
        };
        assert_eq!(
            err.to_string(),
            "Tool not found: get_widget_cnt (did you mean 'get_widget_count'?)"
        );
    }
}
