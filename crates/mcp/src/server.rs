//! MCP server implementation.
//!
//! Exposes a [`ToolHandler`] over the MCP protocol. Used to host tools
//! in-process (see [`InProcessLauncher`]) so the client can be driven
//! without an external runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use geoloop_tool_runtime::ToolSpec;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::McpError;
use crate::process::{Launched, ProcessLauncher};
use crate::transport::{ChannelTransport, McpTransport};
use crate::types::*;

/// Tools served by an [`McpServer`].
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn tools(&self) -> Vec<ToolSpec>;

    /// Run `name`. `Err` is reported to the client as an `isError` result.
    async fn call(&self, name: &str, arguments: Value) -> Result<Value, String>;
}

pub struct McpServer {
    handler: Arc<dyn ToolHandler>,
    server_name: String,
    server_version: String,
    requests_served: Arc<AtomicUsize>,
}

impl McpServer {
    pub fn new(handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            handler,
            server_name: "geoloop-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            requests_served: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Share a counter incremented for every request (not notification).
    pub fn with_request_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.requests_served = counter;
        self
    }

    /// Run the server loop until the transport is closed.
    pub async fn run<T: McpTransport + ?Sized>(&self, transport: &mut T) -> Result<(), McpError> {
        tracing::info!(server = %self.server_name, "MCP server starting");

        while let Some(line) = transport.receive().await? {
            tracing::debug!(message = %line, "Received message");

            let raw: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse JSON");
                    let err = McpError::JsonParse(e).to_rpc_error();
                    let resp = JsonRpcResponse::error(RpcId::Number(0), err.code, err.message);
                    transport.send(&serde_json::to_string(&resp)?).await?;
                    continue;
                }
            };

            // No "id" means notification
            if raw.get("id").is_none() {
                if let Ok(notif) = serde_json::from_value::<JsonRpcNotification>(raw) {
                    tracing::debug!(method = %notif.method, "Notification received");
                }
                continue;
            }

            let response = match serde_json::from_value::<JsonRpcRequest>(raw) {
                Ok(request) => self.handle_request(&request).await,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse JSON-RPC request");
                    JsonRpcResponse::error(
                        RpcId::Number(0),
                        error_codes::INVALID_REQUEST,
                        e.to_string(),
                    )
                }
            };
            transport.send(&serde_json::to_string(&response)?).await?;
        }

        tracing::info!("Transport closed, shutting down");
        Ok(())
    }

    /// Handle a single JSON-RPC request and produce a response.
    pub async fn handle_request(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        self.requests_served.fetch_add(1, Ordering::SeqCst);
        let id = request.id.clone();

        let outcome = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(&request.params).await,
            "ping" => Ok(serde_json::json!({})),
            method => {
                tracing::warn!(method = %method, "Unknown method");
                Err(McpError::MethodNotFound(method.to_string()))
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                let err = e.to_rpc_error();
                JsonRpcResponse::error(id, err.code, err.message)
            }
        }
    }

    fn handle_initialize(&self) -> Result<Value, McpError> {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            },
        };
        Ok(serde_json::to_value(result)?)
    }

    fn handle_list_tools(&self) -> Result<Value, McpError> {
        let result = ListToolsResult {
            tools: self.handler.tools(),
            next_cursor: None,
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_call_tool(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let params = params
            .clone()
            .ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
        let call: CallToolParams =
            serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))?;

        if !self.handler.tools().iter().any(|t| t.name == call.name) {
            return Err(McpError::ToolNotFound(call.name));
        }

        tracing::debug!(tool = %call.name, "Handling tools/call");
        let result = match self.handler.call(&call.name, call.arguments).await {
            Ok(value) => CallToolResult {
                content: vec![text_block(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                })],
                is_error: false,
            },
            Err(message) => CallToolResult {
                content: vec![text_block(message)],
                is_error: true,
            },
        };
        Ok(serde_json::to_value(result)?)
    }
}

/// Hosts an [`McpServer`] on a background task; every launch gets a fresh
/// server on a fresh channel pair.
pub struct InProcessLauncher {
    handler: Arc<dyn ToolHandler>,
    requests: Arc<AtomicUsize>,
    launches: AtomicUsize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl InProcessLauncher {
    pub fn new(handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            handler,
            requests: Arc::new(AtomicUsize::new(0)),
            launches: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Requests handled across every server this launcher started.
    pub fn requests_served(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Abort every running server, as if the process had died.
    pub fn kill_all(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl ProcessLauncher for InProcessLauncher {
    async fn launch(&self) -> Result<Launched, McpError> {
        let (client_side, mut server_side) = ChannelTransport::pair();
        let server = McpServer::new(self.handler.clone())
            .with_request_counter(self.requests.clone());

        let task = tokio::spawn(async move {
            if let Err(e) = server.run(&mut server_side).await {
                tracing::warn!(error = %e, "In-process MCP server stopped");
            }
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
        self.launches.fetch_add(1, Ordering::SeqCst);

        Ok(Launched {
            transport: Box::new(client_side),
            process: None,
        })
    }

    fn describe(&self) -> String {
        "in-process".to_string()
    }
}

impl Drop for InProcessLauncher {
    fn drop(&mut self) {
        self.kill_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Geo;

    #[async_trait]
    impl ToolHandler for Geo {
        fn tools(&self) -> Vec<ToolSpec> {
            vec![ToolSpec {
                name: "maps_geo".to_string(),
                description: "Geocode an address".to_string(),
                input_schema: json!({"type": "object", "properties": {"address": {"type": "string"}}}),
            }]
        }

        async fn call(&self, _name: &str, arguments: Value) -> Result<Value, String> {
            match arguments.get("address").and_then(Value::as_str) {
                Some(addr) => Ok(json!({"address": addr, "location": "116.397428,39.90923"})),
                None => Err("address is required".to_string()),
            }
        }
    }

    fn server() -> McpServer {
        McpServer::new(Arc::new(Geo))
    }

    #[tokio::test]
    async fn test_handle_initialize() {
        let req = JsonRpcRequest::new(RpcId::Number(1), "initialize", Some(json!({})));
        let resp = server().handle_request(&req).await;
        let result: InitializeResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert_eq!(result.server_info.name, "geoloop-mcp");
    }

    #[tokio::test]
    async fn test_handle_list_tools() {
        let req = JsonRpcRequest::new(RpcId::Number(2), "tools/list", None);
        let resp = server().handle_request(&req).await;
        let result: ListToolsResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name, "maps_geo");
    }

    #[tokio::test]
    async fn test_handle_call_tool_success_and_failure() {
        let s = server();
        let ok = s
            .handle_request(&JsonRpcRequest::new(
                RpcId::Number(3),
                "tools/call",
                Some(json!({"name": "maps_geo", "arguments": {"address": "Tiananmen"}})),
            ))
            .await;
        let result: CallToolResult = serde_json::from_value(ok.result.unwrap()).unwrap();
        assert!(!result.is_error);
        assert!(result.text().contains("116.397428"));

        let failed = s
            .handle_request(&JsonRpcRequest::new(
                RpcId::Number(4),
                "tools/call",
                Some(json!({"name": "maps_geo", "arguments": {}})),
            ))
            .await;
        let result: CallToolResult = serde_json::from_value(failed.result.unwrap()).unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "address is required");
    }

    #[tokio::test]
    async fn test_handle_call_tool_not_found() {
        let resp = server()
            .handle_request(&JsonRpcRequest::new(
                RpcId::Number(5),
                "tools/call",
                Some(json!({"name": "nonexistent", "arguments": {}})),
            ))
            .await;
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_handle_unknown_method() {
        let resp = server()
            .handle_request(&JsonRpcRequest::new(RpcId::Number(6), "resources/list", None))
            .await;
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_run_with_channel_transport() {
        let (mut client_side, mut server_side) = ChannelTransport::pair();
        let s = server();
        let handle = tokio::spawn(async move { s.run(&mut server_side).await });

        client_side
            .send(&serde_json::to_string(&JsonRpcNotification::new("notifications/initialized", None)).unwrap())
            .await
            .unwrap();
        client_side.send("not json").await.unwrap();
        let resp: JsonRpcResponse =
            serde_json::from_str(&client_side.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);

        let req = JsonRpcRequest::new(RpcId::Number(7), "ping", None);
        client_side.send(&serde_json::to_string(&req).unwrap()).await.unwrap();
        let resp: JsonRpcResponse =
            serde_json::from_str(&client_side.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp.id, RpcId::Number(7));
        assert!(resp.error.is_none());

        drop(client_side);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_in_process_launcher_counts() {
        let launcher = InProcessLauncher::new(Arc::new(Geo));
        let mut launched = launcher.launch().await.unwrap();
        assert!(launched.process.is_none());

        let req = JsonRpcRequest::new(RpcId::Number(1), "tools/list", None);
        launched.transport.send(&serde_json::to_string(&req).unwrap()).await.unwrap();
        launched.transport.receive().await.unwrap().unwrap();

        assert_eq!(launcher.launches(), 1);
        assert_eq!(launcher.requests_served(), 1);
    }
}
