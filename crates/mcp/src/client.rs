//! Process-backed MCP client.
//!
//! [`ToolProcessClient`] owns the tool-server subprocess and its tool
//! catalog. It connects (spawn, settle, handshake, discovery), invokes tools
//! with a hard timeout under an explicit retry policy, probes liveness and
//! reconnects, and tears everything down.
//!
//! One request is in flight per transport at a time: the session mutex is
//! held from write to matching response.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geoloop_core::config::{ToolCallConfig, ToolServerConfig};
use geoloop_core::GeoError;
use geoloop_tool_runtime::{retry, RetryPolicy, ToolInvoker, ToolSpec};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::process::{CommandLauncher, LaunchSpec, ProcessLauncher, ServerProcess};
use crate::transport::McpTransport;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A liveness probe failed; a reconnect is due.
    Degraded,
}

impl fmt::Display for ClientConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Hard bound on a single `tools/call` attempt.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    /// Bound on `initialize` and the initial `tools/list`.
    pub handshake_timeout: Duration,
    /// Bound on the liveness probe.
    pub probe_timeout: Duration,
    pub client_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            retry: RetryPolicy::new(3, Duration::from_secs(1)),
            handshake_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            client_name: "geoloop".to_string(),
        }
    }
}

impl ClientOptions {
    pub fn from_config(cfg: &ToolCallConfig) -> Self {
        Self {
            call_timeout: cfg.timeout(),
            retry: RetryPolicy::new(cfg.retry_count, cfg.retry_delay())
                .with_backoff(cfg.backoff_factor)
                .with_jitter(cfg.jitter),
            handshake_timeout: cfg.timeout(),
            ..Self::default()
        }
    }
}

struct McpSession {
    transport: Box<dyn McpTransport>,
    process: Option<ServerProcess>,
    server_info: ServerInfo,
    /// A write was cut off mid-line; the stream is no longer framed.
    torn: bool,
}

pub struct ToolProcessClient {
    launcher: Arc<dyn ProcessLauncher>,
    options: ClientOptions,
    state: RwLock<ClientConnectionState>,
    session: Mutex<Option<McpSession>>,
    catalog: RwLock<Vec<ToolSpec>>,
    next_id: AtomicI64,
    /// Bumped on every successful connect.
    generation: AtomicU64,
    /// Set by `disconnect`; the instance cannot be reused afterwards.
    shut_down: AtomicBool,
}

impl ToolProcessClient {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, options: ClientOptions) -> Self {
        Self {
            launcher,
            options,
            state: RwLock::new(ClientConnectionState::Disconnected),
            session: Mutex::new(None),
            catalog: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            generation: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Client for the configured subprocess. Fails if the API key is missing.
    pub fn from_config(server: &ToolServerConfig, calls: &ToolCallConfig) -> Result<Self, GeoError> {
        let spec = LaunchSpec::from_config(server)?;
        Ok(Self::new(
            Arc::new(CommandLauncher::new(spec)),
            ClientOptions::from_config(calls),
        ))
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub async fn state(&self) -> ClientConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ClientConnectionState::Connected
    }

    async fn set_state(&self, next: ClientConnectionState) {
        let mut state = self.state.write().await;
        let prev = *state;
        if prev != next {
            debug!(from = %prev, to = %next, "Tool client state change");
            *state = next;
        }
    }

    /// Name and version the server reported during the handshake.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.server_info.clone())
    }

    // ── Connect / disconnect ────────────────────────────────────────

    /// Spawn the server, complete the handshake and load the catalog.
    /// On failure nothing is left running and no catalog is cached.
    pub async fn connect(&self) -> Result<(), GeoError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(GeoError::Connection("client has been shut down".into()));
        }
        let mut guard = self.session.lock().await;
        if guard.is_some() && self.is_connected().await {
            return Ok(());
        }
        self.connect_locked(&mut guard).await
    }

    async fn connect_locked(&self, guard: &mut Option<McpSession>) -> Result<(), GeoError> {
        self.set_state(ClientConnectionState::Connecting).await;
        if let Some(old) = guard.take() {
            Self::teardown(old).await;
        }
        self.catalog.write().await.clear();

        info!(server = %self.launcher.describe(), "Connecting to tool server");
        let launched = match self.launcher.launch().await {
            Ok(launched) => launched,
            Err(e) => {
                warn!(error = %e, "Tool server launch failed");
                self.set_state(ClientConnectionState::Disconnected).await;
                return Err(GeoError::Connection(e.to_string()));
            }
        };

        let mut session = McpSession {
            transport: launched.transport,
            process: launched.process,
            server_info: ServerInfo {
                name: String::new(),
                version: None,
            },
            torn: false,
        };

        match self.handshake(&mut session).await {
            Ok(tools) => {
                info!(
                    server = %session.server_info.name,
                    tools = tools.len(),
                    "Tool server connected"
                );
                *self.catalog.write().await = tools;
                *guard = Some(session);
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.set_state(ClientConnectionState::Connected).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Tool server handshake failed");
                Self::teardown(session).await;
                self.set_state(ClientConnectionState::Disconnected).await;
                Err(GeoError::Connection(e.to_string()))
            }
        }
    }

    async fn handshake(&self, session: &mut McpSession) -> Result<Vec<ToolSpec>, McpError> {
        let params = serde_json::to_value(InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: self.options.client_name.clone(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
        })?;

        let init = self
            .request(session, "initialize", Some(params), self.options.handshake_timeout)
            .await
            .map_err(|e| match e {
                McpError::Rpc { message, .. } => McpError::Handshake(message),
                other => other,
            })?;
        let init: InitializeResult = serde_json::from_value(init)
            .map_err(|e| McpError::Handshake(format!("invalid initialize result: {}", e)))?;
        if init.protocol_version != PROTOCOL_VERSION {
            warn!(
                server = %init.protocol_version,
                client = PROTOCOL_VERSION,
                "Protocol version differs from the one requested"
            );
        }
        session.server_info = init.server_info;

        let notif = JsonRpcNotification::new("notifications/initialized", None);
        session
            .transport
            .send(&serde_json::to_string(&notif)?)
            .await?;

        self.fetch_tools(session, self.options.handshake_timeout).await
    }

    async fn fetch_tools(&self, session: &mut McpSession, timeout: Duration) -> Result<Vec<ToolSpec>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result = self.request(session, "tools/list", params, timeout).await?;
            let page: ListToolsResult = serde_json::from_value(result)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        for tool in &tools {
            debug!(name = %tool.name, "Discovered tool");
        }
        Ok(tools)
    }

    /// Close the session and stop the subprocess. Never fails; the client
    /// is unusable afterwards.
    pub async fn disconnect(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            info!("Disconnecting from tool server");
            Self::teardown(session).await;
        }
        self.catalog.write().await.clear();
        self.set_state(ClientConnectionState::Disconnected).await;
    }

    async fn teardown(mut session: McpSession) {
        if let Err(e) = session.transport.close().await {
            warn!(error = %e, "Failed to close tool server transport");
        }
        if let Some(process) = session.process.take() {
            process.shutdown().await;
        }
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Send one request and wait for the response with the same id,
    /// skipping notifications and stale responses from abandoned requests.
    async fn request(
        &self,
        session: &mut McpSession,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = RpcId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = JsonRpcRequest::new(id.clone(), method, params);
        let line = serde_json::to_string(&request)?;
        if session.torn {
            return Err(McpError::Closed);
        }
        debug!(method = %method, id = ?id, "Sending request");

        let mut sent = false;
        let outcome = tokio::time::timeout(timeout, Self::exchange(session, &line, &id, &mut sent)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                if !sent {
                    // `write_all` is not cancel safe; part of the line may be in the pipe
                    warn!(method = %method, "Request timed out mid-write, retiring session");
                    session.torn = true;
                }
                Err(McpError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    async fn exchange(
        session: &mut McpSession,
        line: &str,
        id: &RpcId,
        sent: &mut bool,
    ) -> Result<Value, McpError> {
        session.transport.send(line).await?;
        *sent = true;
        loop {
            let line = session.transport.receive().await?.ok_or(McpError::Closed)?;
            let raw: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "Ignoring non-JSON line from server");
                    continue;
                }
            };
            if raw.get("result").is_none() && raw.get("error").is_none() {
                debug!("Ignoring server notification or request");
                continue;
            }
            let response: JsonRpcResponse = serde_json::from_value(raw)?;
            if &response.id != id {
                debug!(expected = ?id, got = ?response.id, "Skipping stale response");
                continue;
            }
            return match response.error {
                Some(err) => Err(McpError::Rpc {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(response.result.unwrap_or(Value::Null)),
            };
        }
    }

    async fn invoke_once(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(McpError::NotConnected)?;

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let result = self
            .request(session, "tools/call", Some(params), self.options.call_timeout)
            .await?;
        let result: CallToolResult = serde_json::from_value(result)?;

        if result.is_error {
            return Err(McpError::ToolExecution(result.text()));
        }
        Ok(Value::Array(result.content))
    }

    // ── Tool operations ─────────────────────────────────────────────

    /// Invoke `name` under the configured retry policy.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, GeoError> {
        let policy = self.options.retry.clone();
        self.call_tool_with(name, arguments, &policy).await
    }

    /// Invoke `name` under an explicit retry policy. Pass
    /// [`RetryPolicy::none`] for tools that must not run twice.
    ///
    /// Returns the raw `content` array of the result.
    pub async fn call_tool_with(
        &self,
        name: &str,
        arguments: Value,
        policy: &RetryPolicy,
    ) -> Result<Value, GeoError> {
        if !self.is_connected().await {
            return Err(GeoError::Connection(format!(
                "tool server is {}",
                self.state().await
            )));
        }
        if !self.catalog.read().await.iter().any(|t| t.name == name) {
            return Err(GeoError::ToolCall(format!("unknown tool '{}'", name)));
        }

        info!(tool = %name, "Calling tool");
        retry(
            policy,
            |attempt| {
                debug!(tool = %name, attempt, "Tool call attempt");
                self.invoke_once(name, arguments.clone())
            },
            McpError::is_transient,
        )
        .await
        .map_err(GeoError::from)
    }

    /// Cached catalog; loaded from the server if empty.
    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, GeoError> {
        {
            let catalog = self.catalog.read().await;
            if !catalog.is_empty() {
                return Ok(catalog.clone());
            }
        }
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| GeoError::from(McpError::NotConnected))?;
        let tools = self
            .fetch_tools(session, self.options.handshake_timeout)
            .await
            .map_err(|e| GeoError::Connection(e.to_string()))?;
        *self.catalog.write().await = tools.clone();
        Ok(tools)
    }

    /// Cheap liveness probe. Never fails and never changes state.
    pub async fn health_check(&self) -> bool {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };
        match self
            .request(session, "tools/list", None, self.options.probe_timeout)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Tool server health probe failed");
                false
            }
        }
    }

    /// Probe the server and reconnect if it is unhealthy or was never
    /// connected.
    pub async fn ensure_healthy(&self) -> Result<(), GeoError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(GeoError::Connection("client has been shut down".into()));
        }
        let seen = self.generation.load(Ordering::SeqCst);
        match self.state().await {
            ClientConnectionState::Connected => {
                if self.health_check().await {
                    return Ok(());
                }
                warn!("Tool server failed liveness probe");
                if self.generation.load(Ordering::SeqCst) == seen {
                    self.set_state(ClientConnectionState::Degraded).await;
                }
                self.reconnect_from(seen).await
            }
            ClientConnectionState::Degraded | ClientConnectionState::Connecting => {
                self.reconnect_from(seen).await
            }
            ClientConnectionState::Disconnected => self.connect().await,
        }
    }

    /// Reconnect unless another caller already replaced the session seen
    /// at generation `seen`.
    async fn reconnect_from(&self, seen: u64) -> Result<(), GeoError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(GeoError::Connection("client has been shut down".into()));
        }
        let mut guard = self.session.lock().await;
        if guard.is_some() && self.generation.load(Ordering::SeqCst) != seen {
            debug!("Tool server already reconnected by a concurrent caller");
            self.set_state(ClientConnectionState::Connected).await;
            return Ok(());
        }
        info!("Reconnecting to tool server");
        self.connect_locked(&mut guard).await
    }

    /// Replace the current session with a fresh one and reload the catalog.
    pub async fn reconnect(&self) -> Result<(), GeoError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(GeoError::Connection("client has been shut down".into()));
        }
        info!("Reconnecting to tool server");
        let mut guard = self.session.lock().await;
        self.connect_locked(&mut guard).await
    }
}

#[async_trait]
impl ToolInvoker for ToolProcessClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, GeoError> {
        ToolProcessClient::list_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, GeoError> {
        ToolProcessClient::call_tool(self, name, arguments).await
    }
}
