//! Tool-server subprocess lifecycle.
//!
//! A [`ProcessLauncher`] produces a fresh, connected transport each time the
//! client (re)connects. [`CommandLauncher`] spawns a real stdio server;
//! the in-process launcher in `server.rs` runs one on a channel pair.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use geoloop_core::config::ToolServerConfig;
use geoloop_core::GeoError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::transport::{LineTransport, McpTransport};

/// Lines of stderr kept for startup diagnostics.
const STDERR_TAIL_LINES: usize = 20;
const SETTLE_POLL: Duration = Duration::from_millis(100);

/// A connected transport plus the process behind it, if any.
pub struct Launched {
    pub transport: Box<dyn McpTransport>,
    pub process: Option<ServerProcess>,
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start a server and return once it is ready to receive requests.
    async fn launch(&self) -> Result<Launched, McpError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

// ── Launch spec ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// How long the process must stay alive before it counts as started.
    pub settle: Duration,
    /// Total time allowed for a voluntary exit once stdin is closed. Half
    /// is spent before SIGTERM, half before the kill.
    pub shutdown_grace: Duration,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            settle: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// The tool provider cannot start without its API key.
    pub fn from_config(cfg: &ToolServerConfig) -> Result<Self, GeoError> {
        let key = cfg.api_key.as_deref().ok_or_else(|| {
            GeoError::Validation(format!(
                "{} is required to start the tool provider",
                cfg.api_key_env
            ))
        })?;
        Ok(Self::new(&cfg.command, cfg.args.clone())
            .with_env(&cfg.api_key_env, key)
            .with_settle(cfg.settle())
            .with_shutdown_grace(cfg.shutdown_grace()))
    }
}

// ── Stderr capture ──────────────────────────────────────────────────

/// Ring buffer of the most recent stderr lines.
#[derive(Clone, Default)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    pub fn snapshot(&self) -> String {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

// ── Running process ─────────────────────────────────────────────────

pub struct ServerProcess {
    child: Child,
    program: String,
    stderr: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl ServerProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn stderr_tail(&self) -> String {
        self.stderr.snapshot()
    }

    /// Poll for `settle`; fail if the process exits in that window.
    async fn wait_until_settled(&mut self, settle: Duration) -> Result<(), McpError> {
        let deadline = tokio::time::Instant::now() + settle;
        loop {
            if let Some(status) = self.child.try_wait()? {
                // Give the stderr reader a moment to drain the pipe.
                if let Some(task) = self.stderr_task.take() {
                    let _ = tokio::time::timeout(Duration::from_millis(500), task).await;
                }
                return Err(McpError::ProcessExited {
                    status: status.to_string(),
                    stderr: self.stderr.snapshot(),
                });
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep(SETTLE_POLL.min(deadline - now)).await;
        }
    }

    /// Escalating stop: the transport must already be closed (stdin EOF).
    /// Waits for a voluntary exit, then sends SIGTERM, then kills. Never fails.
    pub async fn shutdown(mut self) {
        let step = self.shutdown_grace / 2;
        if !self.wait_for_exit(step).await {
            self.terminate().await;
            if !self.wait_for_exit(step).await {
                warn!(
                    program = %self.program,
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "Tool server did not exit in time, killing"
                );
                self.force_kill().await;
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }

    /// True once the process has exited (or can no longer be waited on).
    async fn wait_for_exit(&mut self, within: Duration) -> bool {
        match tokio::time::timeout(within, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(program = %self.program, %status, "Tool server exited");
                true
            }
            Ok(Err(e)) => {
                warn!(program = %self.program, error = %e, "Failed to wait for tool server");
                self.force_kill().await;
                true
            }
            Err(_) => false,
        }
    }

    async fn terminate(&mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        #[cfg(unix)]
        {
            match Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .status()
                .await
            {
                Ok(_) => info!(program = %self.program, pid, "Sent SIGTERM to tool server"),
                Err(e) => warn!(program = %self.program, error = %e, "Failed to send SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            debug!(program = %self.program, pid, "No graceful signal on this platform");
        }
    }

    async fn force_kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(program = %self.program, error = %e, "Failed to kill tool server");
        }
    }
}

// ── Command launcher ────────────────────────────────────────────────

/// Spawns the tool server as a child process speaking MCP over stdio.
pub struct CommandLauncher {
    spec: LaunchSpec,
}

impl CommandLauncher {
    pub fn new(spec: LaunchSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn launch(&self) -> Result<Launched, McpError> {
        let spec = &self.spec;
        info!(program = %spec.program, args = ?spec.args, "Spawning tool server process");

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Spawn {
                program: spec.program.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            McpError::Handshake("failed to capture server stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            McpError::Handshake("failed to capture server stdout".to_string())
        })?;

        let stderr = StderrTail::default();
        let stderr_task = child.stderr.take().map(|pipe| {
            let tail = stderr.clone();
            let program = spec.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(program = %program, "stderr: {}", line);
                    tail.push(line);
                }
            })
        });

        let mut process = ServerProcess {
            child,
            program: spec.program.clone(),
            stderr,
            stderr_task,
            shutdown_grace: spec.shutdown_grace,
        };

        if let Err(e) = process.wait_until_settled(spec.settle).await {
            warn!(program = %spec.program, error = %e, "Tool server failed to start");
            return Err(e);
        }
        debug!(pid = ?process.id(), "Tool server settled");

        Ok(Launched {
            transport: Box::new(LineTransport::new(stdout, stdin)),
            process: Some(process),
        })
    }

    fn describe(&self) -> String {
        format!("{} {}", self.spec.program, self.spec.args.join(" "))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("sh", vec!["-c".to_string(), script.to_string()])
            .with_settle(Duration::from_millis(500))
            .with_shutdown_grace(Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_immediate_exit_reports_stderr() {
        let launcher = CommandLauncher::new(sh("echo 'missing AMAP key' >&2; exit 3"));
        match launcher.launch().await {
            Err(McpError::ProcessExited { status, stderr }) => {
                assert!(status.contains('3'));
                assert!(stderr.contains("missing AMAP key"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("launch should fail"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let launcher = CommandLauncher::new(LaunchSpec::new("geoloop-no-such-binary", vec![]));
        assert!(matches!(launcher.launch().await, Err(McpError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_env_is_passed_and_stdio_wired() {
        let launcher = CommandLauncher::new(
            sh("read line; echo \"{\\\"key\\\":\\\"$AMAP_MAPS_API_KEY\\\"}\"; cat >/dev/null")
                .with_env("AMAP_MAPS_API_KEY", "secret-123"),
        );
        let mut launched = launcher.launch().await.unwrap();
        launched.transport.send("{}").await.unwrap();
        assert_eq!(
            launched.transport.receive().await.unwrap().as_deref(),
            Some("{\"key\":\"secret-123\"}")
        );

        launched.transport.close().await.unwrap();
        let started = Instant::now();
        launched.process.unwrap().shutdown().await;
        // `cat` exits on stdin EOF, well inside the grace period
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_sigterm_stops_process_ignoring_stdin() {
        let launcher = CommandLauncher::new(
            sh("exec sleep 30").with_shutdown_grace(Duration::from_secs(2)),
        );
        let mut launched = launcher.launch().await.unwrap();
        launched.transport.close().await.unwrap();

        let started = Instant::now();
        launched.process.unwrap().shutdown().await;
        let elapsed = started.elapsed();
        // exits during the second half of the grace period, before the kill
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_shutdown_kills_process_ignoring_sigterm() {
        let launcher = CommandLauncher::new(sh("trap '' TERM; exec sleep 30"));
        let mut launched = launcher.launch().await.unwrap();
        launched.transport.close().await.unwrap();

        let started = Instant::now();
        launched.process.unwrap().shutdown().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_from_config_requires_key() {
        let mut cfg = ToolServerConfig {
            command: "npx".into(),
            args: vec!["-y".into(), "@amap/amap-maps-mcp-server".into()],
            api_key: None,
            api_key_env: "AMAP_MAPS_API_KEY".into(),
            settle_ms: 2000,
            shutdown_grace_ms: 5000,
        };
        assert!(matches!(LaunchSpec::from_config(&cfg), Err(GeoError::Validation(_))));

        cfg.api_key = Some("k".into());
        let spec = LaunchSpec::from_config(&cfg).unwrap();
        assert_eq!(spec.env, vec![("AMAP_MAPS_API_KEY".to_string(), "k".to_string())]);
        assert_eq!(spec.settle, Duration::from_secs(2));
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let tail = StderrTail::default();
        for i in 0..(STDERR_TAIL_LINES + 5) {
            tail.push(format!("line {}", i));
        }
        let snapshot = tail.snapshot();
        assert!(!snapshot.contains("line 4\n"));
        assert!(snapshot.ends_with(&format!("line {}", STDERR_TAIL_LINES + 4)));
    }
}
