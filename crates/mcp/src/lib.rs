//! MCP (Model Context Protocol) client for external tool providers.
//!
//! Implements MCP over JSON-RPC 2.0 on a line-delimited stdio transport,
//! and manages the tool-provider subprocess behind it.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **transport**: Pluggable transport layer (child stdio, channels)
//! - **process**: Subprocess spawn, startup settle and shutdown escalation
//! - **client**: `ToolProcessClient`, the connection state machine
//! - **server**: MCP server over a `ToolHandler`, runnable in-process
//! - **error**: Unified error types
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use geoloop_mcp::{ClientOptions, CommandLauncher, LaunchSpec, ToolProcessClient};
//!
//! # async fn example() {
//! let spec = LaunchSpec::new("npx", vec!["-y".into(), "@amap/amap-maps-mcp-server".into()])
//!     .with_env("AMAP_MAPS_API_KEY", "...");
//! let client = ToolProcessClient::new(Arc::new(CommandLauncher::new(spec)), ClientOptions::default());
//! client.connect().await.unwrap();
//! let tools = client.list_tools().await.unwrap();
//! client.disconnect().await;
//! # }
//! ```

pub mod types;
pub mod transport;
pub mod process;
pub mod client;
pub mod server;
pub mod error;

pub use types::*;
pub use transport::{ChannelTransport, LineTransport, McpTransport};
pub use process::{CommandLauncher, LaunchSpec, Launched, ProcessLauncher, ServerProcess};
pub use client::{ClientConnectionState, ClientOptions, ToolProcessClient};
pub use server::{InProcessLauncher, McpServer, ToolHandler};
pub use error::McpError;
