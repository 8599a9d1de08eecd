use async_trait::async_trait;
use geoloop_core::GeoError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Describes a tool's interface for LLM consumption.
/// Maps to Claude's tool format and OpenAI's function format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name within a catalog (e.g., "maps_geo", "maps_regeocode")
    pub name: String,
    /// Human-readable description for the LLM
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the expected input
    #[serde(rename = "inputSchema", alias = "input_schema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl fmt::Display for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Represents an LLM requesting execution of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Vendor-assigned id, used to match the result
    pub id: String,
    pub name: String,
    /// JSON input arguments
    pub input: Value,
}

/// Result of executing a tool, sent back to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Must match the ToolCall id
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// One entry of a query's tool trace. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub succeeded: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolCallRecord {
    pub fn success(tool_name: &str, arguments: Map<String, Value>, result: Value) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            arguments,
            succeeded: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(tool_name: &str, arguments: Map<String, Value>, error: String) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            arguments,
            succeeded: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Anything that can list and invoke tools: the process-backed client in
/// production, an in-memory stub in tests.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Current tool catalog.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, GeoError>;

    /// Invoke `name` and return its raw (un-normalized) result payload.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, GeoError>;
}

/// In-memory tool invoker for exercising the loop without a subprocess.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub struct StubInvoker {
        catalog: Vec<ToolSpec>,
        responses: Mutex<HashMap<String, Result<Value, GeoError>>>,
        calls: Mutex<Vec<(String, Value)>>,
        list_error: Option<GeoError>,
    }

    impl StubInvoker {
        pub fn new() -> Self {
            Self {
                catalog: Vec::new(),
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                list_error: None,
            }
        }

        /// Register a tool that always answers with `response`.
        pub fn with_tool(mut self, name: &str, response: Result<Value, GeoError>) -> Self {
            self.catalog.push(ToolSpec {
                name: name.to_string(),
                description: format!("stub tool {}", name),
                input_schema: empty_schema(),
            });
            self.responses
                .lock()
                .unwrap()
                .insert(name.to_string(), response);
            self
        }

        /// Make `list_tools` fail.
        pub fn with_list_error(mut self, error: GeoError) -> Self {
            self.list_error = Some(error);
            self
        }

        /// Every (name, arguments) pair seen so far, in call order.
        pub fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Default for StubInvoker {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ToolInvoker for StubInvoker {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, GeoError> {
            match &self.list_error {
                Some(e) => Err(e.clone()),
                None => Ok(self.catalog.clone()),
            }
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, GeoError> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments));
            self.responses
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .unwrap_or_else(|| Err(GeoError::ToolCall(format!("unknown tool: {}", name))))
        }
    }
}
