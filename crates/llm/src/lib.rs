//! LLM vendor adapters.
//!
//! Each adapter implements [`geoloop_tool_runtime::ProviderAdapter`] and is
//! the only place that knows its vendor's request/response shape.

pub mod providers;

pub use providers::claude::ClaudeAdapter;
pub use providers::openai::OpenAiAdapter;
pub use providers::{available_providers, create_adapter, probe_provider, ProviderStatus};
