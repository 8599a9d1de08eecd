//! Error types for the MCP crate.

use std::time::Duration;

use geoloop_core::GeoError;

use crate::types::{error_codes, JsonRpcError};

/// Errors that can occur during MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer closed its end of the transport.
    #[error("Transport closed by peer")]
    Closed,

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The server ran the tool and reported a failure (`isError: true`).
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// JSON-RPC error object returned by the server.
    #[error("Server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Server process exited during startup ({status}): {stderr}")]
    ProcessExited { status: String, stderr: String },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Request '{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("Not connected to a tool server")]
    NotConnected,
}

impl McpError {
    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let code = match self {
            McpError::JsonParse(_) => error_codes::PARSE_ERROR,
            McpError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) | McpError::ToolNotFound(_) => error_codes::INVALID_PARAMS,
            McpError::Rpc { code, .. } => *code,
            _ => error_codes::INTERNAL_ERROR,
        };
        JsonRpcError {
            code,
            message: self.to_string(),
            data: None,
        }
    }

    /// Failures worth retrying: the request may succeed if simply re-sent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            McpError::Timeout { .. } | McpError::Transport(_) | McpError::Closed
        )
    }
}

impl From<McpError> for GeoError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Timeout { .. } => GeoError::Timeout(e.to_string()),
            McpError::ToolNotFound(_)
            | McpError::ToolExecution(_)
            | McpError::Rpc { .. }
            | McpError::InvalidParams(_)
            | McpError::MethodNotFound(_)
            | McpError::JsonParse(_) => GeoError::ToolCall(e.to_string()),
            McpError::Transport(_)
            | McpError::Closed
            | McpError::Spawn { .. }
            | McpError::ProcessExited { .. }
            | McpError::Handshake(_)
            | McpError::NotConnected => GeoError::Connection(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_error_mapping() {
        let timeout = McpError::Timeout {
            method: "tools/call".into(),
            after: Duration::from_secs(30),
        };
        assert!(timeout.is_transient());
        assert!(matches!(GeoError::from(timeout), GeoError::Timeout(_)));

        let failed = McpError::ToolExecution("INVALID_USER_KEY".into());
        assert!(!failed.is_transient());
        assert!(matches!(GeoError::from(failed), GeoError::ToolCall(_)));

        let exited = McpError::ProcessExited {
            status: "exit status: 1".into(),
            stderr: "npm ERR!".into(),
        };
        assert!(matches!(GeoError::from(exited), GeoError::Connection(_)));
    }

    #[test]
    fn test_rpc_codes() {
        assert_eq!(
            McpError::ToolNotFound("x".into()).to_rpc_error().code,
            error_codes::INVALID_PARAMS
        );
        assert_eq!(
            McpError::Rpc { code: -32000, message: "boom".into() }.to_rpc_error().code,
            -32000
        );
        assert_eq!(McpError::NotConnected.to_rpc_error().code, error_codes::INTERNAL_ERROR);
    }
}
