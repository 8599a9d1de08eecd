use crate::tool::{ToolCall, ToolCallRecord, ToolResult};
use serde::{Deserialize, Serialize};

/// A message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConversationMessage {
    /// User's text input
    User(String),
    /// Assistant's response (may contain text and/or tool calls)
    Assistant(AssistantContent),
    /// Result of a tool execution
    ToolResult(ToolResult),
}

/// Content from the assistant that can contain mixed text and tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantContent {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantContent {
    /// Build from the text segments of one reply, joined without separator.
    /// Text that joins to nothing is `None`; vendors reject empty text blocks.
    pub fn from_reply(text_segments: &[String], tool_calls: Vec<ToolCall>) -> Self {
        let text = Some(text_segments.concat()).filter(|t| !t.is_empty());
        Self { text, tool_calls }
    }
}

/// Terminal value of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationResult {
    pub success: bool,
    pub final_answer: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub error: Option<String>,
    /// Model calls issued while answering.
    pub iterations: usize,
    /// Set by the session that ran the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ConversationResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
