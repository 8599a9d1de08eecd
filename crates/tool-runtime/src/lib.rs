pub mod tool;
pub mod conversation;
pub mod context;
pub mod executor;
pub mod retry;
pub mod provider;
pub mod runtime;

pub use tool::{ToolCall, ToolCallRecord, ToolInvoker, ToolResult, ToolSpec};
pub use conversation::{AssistantContent, ConversationMessage, ConversationResult};
pub use context::{build_user_message, format_context, QueryContext};
pub use executor::{normalize, ExecutedCall, ToolCallExecutor};
pub use retry::{retry, RetryPolicy};
pub use provider::{ConnectionProbe, LlmError, ProviderAdapter, ProviderReply};
pub use runtime::{ConversationLoop, LoopOptions};
