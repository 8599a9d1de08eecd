use crate::conversation::ConversationMessage;
use crate::tool::{ToolCall, ToolSpec};
use async_trait::async_trait;
use geoloop_core::GeoError;
use serde::{Deserialize, Serialize};

/// What one model turn produced, in the order the model emitted it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderReply {
    pub text_segments: Vec<String>,
    pub tool_uses: Vec<ToolCall>,
}

impl ProviderReply {
    pub fn text(text: &str) -> Self {
        Self {
            text_segments: vec![text.to_string()],
            tool_uses: Vec::new(),
        }
    }
}

/// Result of a one-shot connectivity probe against a vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProbe {
    pub success: bool,
    pub provider: String,
    pub model: String,
    pub api_key_configured: bool,
    pub response: Option<String>,
    pub error: Option<String>,
}

/// Trait for LLM vendors that support tool use.
///
/// This trait lives in tool-runtime (not in crates/llm) because it's
/// defined by the consumer (the conversation loop), not the provider.
/// Implementations live in crates/llm. The loop never branches on which
/// vendor it is talking to.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Send the full message history plus the tool catalog and return the
    /// reply partitioned into text segments and tool-use requests.
    async fn send(
        &self,
        messages: &[ConversationMessage],
        tools: &[ToolSpec],
        system_prompt: &str,
    ) -> Result<ProviderReply, LlmError>;

    /// Lightweight one-shot health probe. Never fails; problems are
    /// reported inside the probe.
    async fn test_connection(&self) -> ConnectionProbe;

    /// Provider name for logging/debugging (e.g., "claude", "openai")
    fn provider_name(&self) -> &str;

    fn model(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed")]
    AuthError,
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl From<LlmError> for GeoError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(_) => GeoError::Timeout(e.to_string()),
            LlmError::NotConfigured(_) => GeoError::Validation(e.to_string()),
            other => GeoError::Provider(other.to_string()),
        }
    }
}

/// Scripted provider for testing the conversation loop without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// What the loop sent on one call.
    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub messages: Vec<ConversationMessage>,
        pub tool_names: Vec<String>,
        pub system_prompt: String,
    }

    /// Returns queued replies in FIFO order and records every request.
    pub struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<ProviderReply, LlmError>>>,
        requests: Mutex<Vec<RecordedRequest>>,
        /// When set, every call past the script answers with this reply.
        repeat: Option<ProviderReply>,
    }

    impl ScriptedProvider {
        pub fn new() -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                repeat: None,
            }
        }

        /// A provider that answers every call with the same reply.
        pub fn repeating(reply: ProviderReply) -> Self {
            Self {
                repeat: Some(reply),
                ..Self::new()
            }
        }

        pub fn queue(&self, reply: Result<ProviderReply, LlmError>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        pub fn queue_text(&self, text: &str) {
            self.queue(Ok(ProviderReply::text(text)));
        }

        /// Queue a turn that requests the given tool calls.
        pub fn queue_tool_uses(&self, text: Option<&str>, calls: Vec<ToolCall>) {
            self.queue(Ok(ProviderReply {
                text_segments: text.map(|t| vec![t.to_string()]).unwrap_or_default(),
                tool_uses: calls,
            }));
        }

        pub fn queue_error(&self, error: LlmError) {
            self.queue(Err(error));
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl Default for ScriptedProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        async fn send(
            &self,
            messages: &[ConversationMessage],
            tools: &[ToolSpec],
            system_prompt: &str,
        ) -> Result<ProviderReply, LlmError> {
            self.requests.lock().unwrap().push(RecordedRequest {
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
                system_prompt: system_prompt.to_string(),
            });
            match self.replies.lock().unwrap().pop_front() {
                Some(reply) => reply,
                None => match &self.repeat {
                    Some(reply) => Ok(reply.clone()),
                    None => Err(LlmError::InvalidResponse("script exhausted".into())),
                },
            }
        }

        async fn test_connection(&self) -> ConnectionProbe {
            ConnectionProbe {
                success: true,
                provider: "mock".into(),
                model: "scripted".into(),
                api_key_configured: true,
                response: Some("ok".into()),
                error: None,
            }
        }

        fn provider_name(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }
}
