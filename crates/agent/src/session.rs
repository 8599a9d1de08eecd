//! The composition root: one tool-provider client plus one model loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use geoloop_core::config::{LlmConfig, ProxyConfig};
use geoloop_core::{Config, GeoError};
use geoloop_mcp::{ClientConnectionState, ToolProcessClient};
use geoloop_tool_runtime::{
    ConnectionProbe, ConversationLoop, ConversationResult, LoopOptions, ProviderAdapter,
    QueryContext, RetryPolicy, ToolSpec,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::prompts::PromptManager;

/// Snapshot returned by [`GeoSession::health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub tool_provider_up: bool,
    pub llm_up: bool,
    pub tool_state: ClientConnectionState,
    pub tools_count: usize,
    pub provider: String,
    pub model: String,
    pub uptime_secs: f64,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_probe: Option<ConnectionProbe>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.tool_provider_up && self.llm_up
    }

    pub fn status(&self) -> &'static str {
        if self.is_healthy() {
            "healthy"
        } else {
            "unhealthy"
        }
    }
}

/// Owns the tool-provider connection and the model loop for its lifetime.
///
/// Concurrent queries share the one subprocess; the client serializes
/// requests on its transport.
pub struct GeoSession {
    tools: Arc<ToolProcessClient>,
    conversation: ConversationLoop,
    prompts: PromptManager,
    llm_config: Option<(LlmConfig, ProxyConfig)>,
    query_timeout: Duration,
    started_at: Instant,
}

impl GeoSession {
    pub fn new(tools: Arc<ToolProcessClient>, provider: Arc<dyn ProviderAdapter>) -> Self {
        let conversation = ConversationLoop::new(provider, tools.clone());
        Self {
            tools,
            conversation,
            prompts: PromptManager::new(),
            llm_config: None,
            query_timeout: Duration::from_secs(120),
            started_at: Instant::now(),
        }
    }

    /// Build everything from configuration. Nothing is spawned until
    /// [`GeoSession::connect`].
    pub fn from_config(config: &Config) -> Result<Self, GeoError> {
        config.validate()?;
        let tools = ToolProcessClient::from_config(&config.tool_server, &config.tool_call)?;
        let provider = geoloop_llm::create_adapter(&config.llm, &config.proxy)?;
        let options = LoopOptions {
            max_iterations: config.conversation.max_iterations,
            llm_retry: RetryPolicy::new(
                config.conversation.llm_retry_attempts,
                config.tool_call.retry_delay(),
            ),
            ..LoopOptions::default()
        };
        Ok(Self::new(Arc::new(tools), provider)
            .with_loop_options(options)
            .with_llm_config(config.llm.clone(), config.proxy.clone())
            .with_query_timeout(config.conversation.query_timeout()))
    }

    pub fn with_loop_options(mut self, options: LoopOptions) -> Self {
        self.conversation = self.conversation.with_options(options);
        self
    }

    pub fn with_prompts(mut self, prompts: PromptManager) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_llm_config(mut self, llm: LlmConfig, proxy: ProxyConfig) -> Self {
        self.llm_config = Some((llm, proxy));
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn prompts(&self) -> &PromptManager {
        &self.prompts
    }

    pub fn tool_client(&self) -> &Arc<ToolProcessClient> {
        &self.tools
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub async fn connect(&self) -> Result<(), GeoError> {
        self.tools.connect().await
    }

    /// Tear down the tool provider. Never fails.
    pub async fn shutdown(&self) {
        self.tools.disconnect().await;
        info!(uptime_secs = self.started_at.elapsed().as_secs(), "Session shut down");
    }

    /// Answer one query, reconnecting first if the tool provider is unhealthy.
    pub async fn process_query(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        system_prompt: Option<&str>,
    ) -> Result<ConversationResult, GeoError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(request_id = %request_id, query_len = query.len(), "Processing query");

        if query.trim().is_empty() {
            return Err(GeoError::Validation("query must not be empty".into()));
        }
        self.tools.ensure_healthy().await?;

        let mut result = self.conversation.run(query, context, system_prompt).await?;
        result.request_id = Some(request_id.clone());

        info!(
            request_id = %request_id,
            success = result.success,
            iterations = result.iterations,
            tool_calls = result.tool_calls.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query finished"
        );
        Ok(result)
    }

    /// [`GeoSession::process_query`] bounded by the session's query timeout.
    ///
    /// An abandoned run leaves the tool provider connected; a request that
    /// was in flight is discarded when its response arrives.
    pub async fn process_query_with_timeout(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        system_prompt: Option<&str>,
    ) -> Result<ConversationResult, GeoError> {
        match tokio::time::timeout(
            self.query_timeout,
            self.process_query(query, context, system_prompt),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = self.query_timeout.as_secs(), "Query timed out");
                Err(GeoError::Timeout(format!(
                    "query did not finish within {}s",
                    self.query_timeout.as_secs()
                )))
            }
        }
    }

    /// Query with a named prompt template.
    pub async fn process_with_template(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        template: &str,
    ) -> Result<ConversationResult, GeoError> {
        let prompt = self.prompts.get(template).to_string();
        self.process_query(query, context, Some(&prompt)).await
    }

    pub async fn get_available_tools(&self) -> Result<Vec<ToolSpec>, GeoError> {
        if !self.tools.is_connected().await {
            self.tools.ensure_healthy().await?;
        }
        self.tools.list_tools().await
    }

    /// Cheap health snapshot. The model is reported up when an adapter is
    /// in place; use [`GeoSession::deep_health`] to actually call it.
    pub async fn health(&self) -> HealthReport {
        self.health_report().await
    }

    /// Health snapshot that also sends a one-shot probe to the model.
    pub async fn deep_health(&self) -> HealthReport {
        let provider = self.conversation.provider().clone();
        let (report, probe) = futures::join!(
            self.health_report(),
            provider.test_connection()
        );
        HealthReport {
            llm_up: probe.success,
            llm_probe: Some(probe),
            ..report
        }
    }

    async fn health_report(&self) -> HealthReport {
        let tool_provider_up = self.tools.health_check().await;
        let tools_count = if tool_provider_up {
            self.tools.list_tools().await.map(|t| t.len()).unwrap_or(0)
        } else {
            0
        };
        let provider = self.conversation.provider();
        HealthReport {
            tool_provider_up,
            llm_up: true,
            tool_state: self.tools.state().await,
            tools_count,
            provider: provider.provider_name().to_string(),
            model: provider.model().to_string(),
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            checked_at: Utc::now(),
            llm_probe: None,
        }
    }

    /// Probe a provider by name, or the active one when `name` is `None`.
    /// The session keeps using its active provider either way.
    pub async fn test_provider_connection(&self, name: Option<&str>) -> ConnectionProbe {
        let active = self.conversation.provider();
        match (name, &self.llm_config) {
            (None, _) => active.test_connection().await,
            (Some(name), _) if name == active.provider_name() => active.test_connection().await,
            (Some(name), Some((llm, proxy))) => geoloop_llm::probe_provider(name, llm, proxy).await,
            (Some(name), None) => ConnectionProbe {
                success: false,
                provider: name.to_string(),
                model: String::new(),
                api_key_configured: false,
                response: None,
                error: Some("no LLM configuration available for this session".to_string()),
            },
        }
    }
}
