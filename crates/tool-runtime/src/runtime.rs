use crate::context::{build_user_message, QueryContext};
use crate::conversation::{AssistantContent, ConversationMessage, ConversationResult};
use crate::executor::ToolCallExecutor;
use crate::provider::{LlmError, ProviderAdapter, ProviderReply};
use crate::retry::{retry, RetryPolicy};
use crate::tool::{ToolInvoker, ToolSpec};
use geoloop_core::GeoError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a geolocation assistant with access to mapping tools. \
Use the tools to geocode addresses, reverse-geocode coordinates, search for places and plan routes. \
Call a tool whenever the question depends on real map data, then answer concisely from the tool results. \
If a tool fails, explain what went wrong and try an alternative when one exists.";

#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Upper bound on model calls per query.
    pub max_iterations: usize,
    /// Applied to the first model call only.
    pub llm_retry: RetryPolicy,
    pub default_system_prompt: String,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            llm_retry: RetryPolicy::new(2, Duration::from_secs(1)),
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// The loop that orchestrates LLM ↔ tool execution for one query.
///
/// Flow: User → LLM → ToolCalls → Execute → Results → LLM → ... → Final Text
///
/// Message history lives only for the duration of [`ConversationLoop::run`].
pub struct ConversationLoop {
    provider: Arc<dyn ProviderAdapter>,
    tools: Arc<dyn ToolInvoker>,
    executor: ToolCallExecutor,
    options: LoopOptions,
}

impl ConversationLoop {
    pub fn new(provider: Arc<dyn ProviderAdapter>, tools: Arc<dyn ToolInvoker>) -> Self {
        Self {
            executor: ToolCallExecutor::new(tools.clone()),
            provider,
            tools,
            options: LoopOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LoopOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.options.max_iterations = max;
        self
    }

    pub fn with_llm_retry(mut self, policy: RetryPolicy) -> Self {
        self.options.llm_retry = policy;
        self
    }

    pub fn with_default_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.options.default_system_prompt = prompt.into();
        self
    }

    pub fn provider(&self) -> &Arc<dyn ProviderAdapter> {
        &self.provider
    }

    /// Answer one query.
    ///
    /// Tool failures never abort the loop; they are recorded and fed back to
    /// the model. If the catalog load or the first model call fails, the
    /// result has `success = false`. A failing follow-up call ends the loop
    /// with the partial answer and `success = true`.
    pub async fn run(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        system_prompt: Option<&str>,
    ) -> Result<ConversationResult, GeoError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(GeoError::Validation("query must not be empty".into()));
        }
        let system_prompt = system_prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.options.default_system_prompt);

        let catalog = match self.tools.list_tools().await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "Failed to load tool catalog");
                return Ok(ConversationResult::failed(e.to_string()));
            }
        };

        let mut messages = vec![ConversationMessage::User(build_user_message(query, context))];
        let mut answer: Vec<String> = Vec::new();
        let mut records = Vec::new();
        let max_iterations = self.options.max_iterations.max(1);

        info!(
            provider = self.provider.provider_name(),
            tools = catalog.len(),
            max_iterations,
            "Starting conversation loop"
        );

        let mut reply = match self.first_call(&messages, &catalog, system_prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Initial model call failed");
                let mut failed = ConversationResult::failed(GeoError::from(e).to_string());
                failed.iterations = 1;
                return Ok(failed);
            }
        };

        let mut iteration = 1;
        let mut converged = false;
        loop {
            debug!(
                iteration,
                text_segments = reply.text_segments.len(),
                tool_uses = reply.tool_uses.len(),
                "Model turn received"
            );
            answer.extend(reply.text_segments.iter().cloned());

            if reply.tool_uses.is_empty() {
                converged = true;
                break;
            }

            messages.push(ConversationMessage::Assistant(AssistantContent::from_reply(
                &reply.text_segments,
                reply.tool_uses.clone(),
            )));

            // Strictly sequential: later calls may depend on earlier ones.
            for call in &reply.tool_uses {
                let executed = self.executor.execute(call).await;
                messages.push(ConversationMessage::ToolResult(executed.result));
                records.push(executed.record);
            }

            if iteration >= max_iterations {
                break;
            }

            iteration += 1;
            reply = match self.provider.send(&messages, &catalog, system_prompt).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(iteration, error = %e, "Follow-up model call failed");
                    answer.push(format!("Unable to complete the follow-up answer: {}", e));
                    converged = true;
                    break;
                }
            };
        }

        if !converged {
            warn!(max_iterations, "Tool iteration bound reached");
            answer.push(format!(
                "Too many tool iterations (limit {}); the answer may be incomplete.",
                max_iterations
            ));
        }

        info!(
            iterations = iteration,
            tool_calls = records.len(),
            "Conversation loop finished"
        );

        Ok(ConversationResult {
            success: true,
            final_answer: answer.join("\n"),
            tool_calls: records,
            error: None,
            iterations: iteration,
            request_id: None,
        })
    }

    /// No tool has run yet, so re-issuing this call is side-effect free.
    async fn first_call(
        &self,
        messages: &[ConversationMessage],
        catalog: &[ToolSpec],
        system_prompt: &str,
    ) -> Result<ProviderReply, LlmError> {
        retry(
            &self.options.llm_retry,
            |_| self.provider.send(messages, catalog, system_prompt),
            |e| !matches!(e, LlmError::AuthError | LlmError::NotConfigured(_)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::ScriptedProvider;
    use crate::tool::mock::StubInvoker;
    use crate::tool::ToolCall;
    use serde_json::json;

    fn call(id: &str, name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    fn geo_tools() -> Arc<StubInvoker> {
        Arc::new(
            StubInvoker::new()
                .with_tool(
                    "reverse_geocode",
                    Ok(json!([{"type": "text", "text": "{\"formatted_address\": \"Beijing Dongcheng Tiananmen\"}"}])),
                )
                .with_tool("maps_geo", Ok(json!({"location": "116.397428,39.90923"})))
                .with_tool("broken", Err(GeoError::ToolCall("upstream 500".into()))),
        )
    }

    fn setup() -> (ConversationLoop, Arc<ScriptedProvider>, Arc<StubInvoker>) {
        let provider = Arc::new(ScriptedProvider::new());
        let tools = geo_tools();
        let conv = ConversationLoop::new(provider.clone(), tools.clone())
            .with_llm_retry(RetryPolicy::new(2, Duration::ZERO));
        (conv, provider, tools)
    }

    #[tokio::test]
    async fn test_plain_answer_single_model_call() {
        let (conv, provider, tools) = setup();
        provider.queue_text("Hello from the map assistant.");

        let result = conv.run("hi", None, None).await.unwrap();

        assert!(result.success);
        assert!(result.tool_calls.is_empty());
        assert_eq!(result.final_answer, "Hello from the map assistant.");
        assert_eq!(provider.call_count(), 1);
        assert!(tools.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reverse_geocode_scenario() {
        let (conv, provider, _tools) = setup();
        provider.queue_tool_uses(
            None,
            vec![call("toolu_1", "reverse_geocode", json!({"location": "116.397428,39.90923"}))],
        );
        provider.queue_text("That point is Beijing Dongcheng Tiananmen.");

        let result = conv
            .run("116.397428,39.90923 → address?", None, None)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].tool_name, "reverse_geocode");
        assert!(result.tool_calls[0].succeeded);
        assert!(result.final_answer.contains("Beijing Dongcheng Tiananmen"));

        // The follow-up request carried the normalized tool result.
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        match requests[1].messages.last() {
            Some(ConversationMessage::ToolResult(r)) => {
                assert_eq!(r.tool_call_id, "toolu_1");
                assert!(r.content.contains("formatted_address"));
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_k_tool_uses_execute_in_order_with_one_follow_up() {
        let (conv, provider, tools) = setup();
        provider.queue_tool_uses(
            Some("Checking both."),
            vec![
                call("a", "maps_geo", json!({"address": "Tiananmen"})),
                call("b", "broken", json!({})),
                call("c", "reverse_geocode", json!({"location": "1,2"})),
            ],
        );
        provider.queue_text("Done.");

        let result = conv.run("compare", None, None).await.unwrap();

        let names: Vec<_> = result.tool_calls.iter().map(|r| r.tool_name.as_str()).collect();
        assert_eq!(names, vec!["maps_geo", "broken", "reverse_geocode"]);
        assert!(!result.tool_calls[1].succeeded);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(result.final_answer, "Checking both.\nDone.");

        let invoked: Vec<_> = tools.calls().into_iter().map(|(n, _)| n).collect();
        assert_eq!(invoked, vec!["maps_geo", "broken", "reverse_geocode"]);

        // user, assistant(tool uses), three tool results
        let follow_up = &provider.requests()[1].messages;
        assert_eq!(follow_up.len(), 5);
        match &follow_up[3] {
            ConversationMessage::ToolResult(r) => {
                assert!(r.is_error);
                assert!(r.content.starts_with("Tool call failed:"));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_iteration_bound_appends_notice() {
        let provider = Arc::new(ScriptedProvider::repeating(ProviderReply {
            text_segments: vec![],
            tool_uses: vec![call("x", "maps_geo", json!({"address": "loop"}))],
        }));
        let conv = ConversationLoop::new(provider.clone(), geo_tools()).with_max_iterations(3);

        let result = conv.run("never ends", None, None).await.unwrap();

        assert!(result.success);
        assert_eq!(result.tool_calls.len(), 3);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(result.iterations, 3);
        assert!(result.final_answer.ends_with("the answer may be incomplete."));
        assert!(result.final_answer.contains("Too many tool iterations"));
    }

    #[tokio::test]
    async fn test_first_call_retried_once_then_fails() {
        let (conv, provider, _) = setup();
        provider.queue_error(LlmError::NetworkError("reset".into()));
        provider.queue_error(LlmError::ApiError {
            status: 503,
            message: "overloaded".into(),
        });

        let result = conv.run("hi", None, None).await.unwrap();

        assert!(!result.success);
        assert_eq!(provider.call_count(), 2);
        assert!(result.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_first_call_recovers_on_retry() {
        let (conv, provider, _) = setup();
        provider.queue_error(LlmError::NetworkError("reset".into()));
        provider.queue_text("ok");

        let result = conv.run("hi", None, None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.final_answer, "ok");
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let (conv, provider, _) = setup();
        provider.queue_error(LlmError::AuthError);

        let result = conv.run("hi", None, None).await.unwrap();
        assert!(!result.success);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_follow_up_failure_keeps_partial_progress() {
        let (conv, provider, _) = setup();
        provider.queue_tool_uses(
            Some("Let me look."),
            vec![call("t1", "maps_geo", json!({"address": "Tiananmen"}))],
        );
        provider.queue_error(LlmError::NetworkError("connection reset".into()));

        let result = conv.run("where?", None, None).await.unwrap();

        assert!(result.success);
        assert_eq!(result.tool_calls.len(), 1);
        // Follow-up calls are never retried.
        assert_eq!(provider.call_count(), 2);
        assert!(result.final_answer.starts_with("Let me look.\n"));
        assert!(result
            .final_answer
            .contains("Unable to complete the follow-up answer"));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (conv, provider, _) = setup();
        let err = conv.run("   ", None, None).await.unwrap_err();
        assert!(matches!(err, GeoError::Validation(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_catalog_failure_reported() {
        let provider = Arc::new(ScriptedProvider::new());
        let tools = Arc::new(
            StubInvoker::new().with_list_error(GeoError::Connection("provider down".into())),
        );
        let conv = ConversationLoop::new(provider.clone(), tools);

        let result = conv.run("hi", None, None).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("provider down"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_context_and_system_prompt_forwarded() {
        let (conv, provider, _) = setup();
        provider.queue_text("ok");

        let mut ctx = QueryContext::new();
        ctx.insert("city".into(), json!("Shanghai"));
        conv.run("best noodles?", Some(&ctx), Some("Be brief."))
            .await
            .unwrap();

        let req = &provider.requests()[0];
        assert_eq!(req.system_prompt, "Be brief.");
        assert_eq!(req.tool_names.len(), 3);
        assert_eq!(
            req.messages[0],
            ConversationMessage::User("Context: City: Shanghai\n\nUser query: best noodles?".into())
        );
    }

    #[tokio::test]
    async fn test_blank_system_prompt_uses_default() {
        let (conv, provider, _) = setup();
        provider.queue_text("ok");
        conv.run("hi", None, Some("  ")).await.unwrap();
        assert_eq!(provider.requests()[0].system_prompt, DEFAULT_SYSTEM_PROMPT);
    }
}
