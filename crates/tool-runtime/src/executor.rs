//! Tool execution and result normalization.
//!
//! Tool providers hand back heterogeneous payloads: protocol text blocks,
//! nested objects, and JSON documents smuggled inside strings. [`normalize`]
//! is a heuristic, not a parser. It opportunistically unwraps those shapes
//! into plain JSON and falls back to the input untouched whenever a guess
//! does not parse. It never fails.

use crate::tool::{ToolCall, ToolCallRecord, ToolInvoker, ToolResult};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Normalize a raw tool result into plain JSON.
///
/// - `{"type": "text", "text": s}` blocks collapse to `s`
/// - objects are normalized field by field
/// - a one-element array holding a string is re-parsed as JSON
/// - a string whose trimmed form starts with `{` or `[` is re-parsed as JSON
///
/// Anything that was successfully re-parsed is normalized again, so the
/// function is idempotent: `normalize(normalize(v)) == normalize(v)`.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => match text_block(&map) {
            Some(text) => normalize(Value::String(text)),
            None => Value::Object(map.into_iter().map(|(k, v)| (k, normalize(v))).collect()),
        },
        Value::Array(items) => {
            let items: Vec<Value> = items.into_iter().map(normalize).collect();
            if let [Value::String(s)] = items.as_slice() {
                if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                    return normalize(parsed);
                }
            }
            Value::Array(items)
        }
        Value::String(s) => {
            let trimmed = s.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                    return normalize(parsed);
                }
            }
            Value::String(s)
        }
        other => other,
    }
}

fn text_block(map: &Map<String, Value>) -> Option<String> {
    if map.len() != 2 || map.get("type").and_then(Value::as_str) != Some("text") {
        return None;
    }
    map.get("text").and_then(Value::as_str).map(String::from)
}

/// Render a normalized value as tool-result text for the model.
pub fn render_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Outcome of one tool-use request: the trace entry plus the message that
/// goes back to the model.
#[derive(Debug, Clone)]
pub struct ExecutedCall {
    pub record: ToolCallRecord,
    pub result: ToolResult,
}

/// Executes model-requested tool calls and turns every outcome, failures
/// included, into a record and a tool-result message.
pub struct ToolCallExecutor {
    invoker: Arc<dyn ToolInvoker>,
}

impl ToolCallExecutor {
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker }
    }

    pub async fn execute(&self, call: &ToolCall) -> ExecutedCall {
        let arguments = match &call.input {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let error = format!("arguments must be a JSON object, got {}", other);
                warn!(tool = %call.name, "Rejecting tool call: {}", error);
                return Self::failed(call, Map::new(), error);
            }
        };

        debug!(tool = %call.name, id = %call.id, "Executing tool call");
        match self
            .invoker
            .call_tool(&call.name, Value::Object(arguments.clone()))
            .await
        {
            Ok(raw) => {
                let value = normalize(raw);
                ExecutedCall {
                    result: ToolResult {
                        tool_call_id: call.id.clone(),
                        content: render_content(&value),
                        is_error: false,
                    },
                    record: ToolCallRecord::success(&call.name, arguments, value),
                }
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                Self::failed(call, arguments, e.to_string())
            }
        }
    }

    fn failed(call: &ToolCall, arguments: Map<String, Value>, error: String) -> ExecutedCall {
        ExecutedCall {
            result: ToolResult {
                tool_call_id: call.id.clone(),
                content: format!("Tool call failed: {}", error),
                is_error: true,
            },
            record: ToolCallRecord::failure(&call.name, arguments, error),
        }
    }
}
