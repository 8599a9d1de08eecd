//! Session wiring: tool provider + model loop + prompts + batch runs.

pub mod batch;
pub mod prompts;
pub mod session;

pub use batch::{extract_valid_json, BatchProcessor, BatchSummary};
pub use prompts::PromptManager;
pub use session::{GeoSession, HealthReport};
