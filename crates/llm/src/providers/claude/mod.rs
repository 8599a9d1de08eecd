//! Claude (Anthropic Messages API) implementation of [`ProviderAdapter`].

mod translate;

use async_trait::async_trait;
use geoloop_core::config::{LlmConfig, ProxyConfig};
use geoloop_tool_runtime::{
    ConnectionProbe, ConversationMessage, LlmError, ProviderAdapter, ProviderReply, ToolSpec,
};
use tracing::debug;

use super::http;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROBE_MAX_TOKENS: u32 = 10;

pub struct ClaudeAdapter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl ClaudeAdapter {
    pub fn new(api_key: String, model: String, base_url: String, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens,
        }
    }

    pub fn from_config(cfg: &LlmConfig, proxy: &ProxyConfig) -> Result<Self, LlmError> {
        let api_key = cfg
            .anthropic_api_key
            .clone()
            .ok_or_else(|| LlmError::NotConfigured("ANTHROPIC_API_KEY is not set".into()))?;
        let mut adapter = Self::new(
            api_key,
            cfg.claude_model.clone(),
            cfg.anthropic_base_url.clone(),
            cfg.claude_max_tokens,
        );
        adapter.client = http::build_client(proxy, cfg.request_timeout())?;
        Ok(adapter)
    }

    async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, "Claude request to {}", url);
        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");
        http::post_json(request, body).await
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    async fn send(
        &self,
        messages: &[ConversationMessage],
        tools: &[ToolSpec],
        system_prompt: &str,
    ) -> Result<ProviderReply, LlmError> {
        let body =
            translate::request_body(&self.model, self.max_tokens, messages, tools, system_prompt);
        let resp = self.post(&body).await?;
        let reply = translate::parse_response(&resp)?;
        debug!(
            stop_reason = resp["stop_reason"].as_str().unwrap_or("unknown"),
            text_segments = reply.text_segments.len(),
            tool_uses = reply.tool_uses.len(),
            "Claude reply"
        );
        Ok(reply)
    }

    async fn test_connection(&self) -> ConnectionProbe {
        let messages = [ConversationMessage::User("Hello".to_string())];
        let body = translate::request_body(&self.model, PROBE_MAX_TOKENS, &messages, &[], "");
        let outcome = match self.post(&body).await {
            Ok(resp) => translate::parse_response(&resp),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(reply) => ConnectionProbe {
                success: true,
                provider: self.provider_name().to_string(),
                model: self.model.clone(),
                api_key_configured: true,
                response: Some(reply.text_segments.concat()),
                error: None,
            },
            Err(e) => ConnectionProbe {
                success: false,
                provider: self.provider_name().to_string(),
                model: self.model.clone(),
                api_key_configured: true,
                response: None,
                error: Some(e.to_string()),
            },
        }
    }

    fn provider_name(&self) -> &str {
        "claude"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
