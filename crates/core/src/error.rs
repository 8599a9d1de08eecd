use serde::Serialize;
use thiserror::Error;

/// The closed error taxonomy surfaced to callers of the orchestration engine.
///
/// Every failure inside the tool process client, the provider adapters and the
/// conversation loop is folded into one of these five variants so the request
/// boundary can treat "tool provider down" or "LLM unavailable" uniformly,
/// whatever the underlying cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    /// The tool-provider subprocess is unreachable or the handshake failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The named tool is missing or the provider reported an invocation failure.
    #[error("tool call error: {0}")]
    ToolCall(String),

    /// A tool or LLM call exceeded its bound.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The LLM vendor call failed after its single retry.
    #[error("provider error: {0}")]
    Provider(String),

    /// Malformed caller input.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Serializable error body handed to transport layers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error_code: &'static str,
    pub message: String,
}

impl GeoError {
    /// Stable identifier for the error class.
    pub fn code(&self) -> &'static str {
        match self {
            GeoError::Connection(_) => "ConnectionError",
            GeoError::ToolCall(_) => "ToolCallError",
            GeoError::Timeout(_) => "TimeoutError",
            GeoError::Provider(_) => "ProviderError",
            GeoError::Validation(_) => "ValidationError",
        }
    }

    /// The diagnostic without the class prefix.
    pub fn message(&self) -> &str {
        match self {
            GeoError::Connection(m)
            | GeoError::ToolCall(m)
            | GeoError::Timeout(m)
            | GeoError::Provider(m)
            | GeoError::Validation(m) => m,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error_code: self.code(),
            message: self.message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(GeoError::Connection("x".into()).code(), "ConnectionError");
        assert_eq!(GeoError::ToolCall("x".into()).code(), "ToolCallError");
        assert_eq!(GeoError::Timeout("x".into()).code(), "TimeoutError");
        assert_eq!(GeoError::Provider("x".into()).code(), "ProviderError");
        assert_eq!(GeoError::Validation("x".into()).code(), "ValidationError");
    }

    #[test]
    fn test_body_carries_message_without_prefix() {
        let err = GeoError::Timeout("tool call exceeded 30s".into());
        let body = err.to_body();
        assert_eq!(body.error_code, "TimeoutError");
        assert_eq!(body.message, "tool call exceeded 30s");
        assert_eq!(err.to_string(), "timeout: tool call exceeded 30s");
    }
}
