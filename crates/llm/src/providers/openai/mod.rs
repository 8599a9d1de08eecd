//! OpenAI Chat Completions implementation of [`ProviderAdapter`].

mod translate;

use async_trait::async_trait;
use geoloop_core::config::{LlmConfig, ProxyConfig};
use geoloop_tool_runtime::{
    ConnectionProbe, ConversationMessage, LlmError, ProviderAdapter, ProviderReply, ToolSpec,
};
use tracing::debug;

use self::translate::Sampling;
use super::http;

const PROBE_MAX_TOKENS: u32 = 10;

pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiAdapter {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn from_config(cfg: &LlmConfig, proxy: &ProxyConfig) -> Result<Self, LlmError> {
        let api_key = cfg
            .openai_api_key
            .clone()
            .ok_or_else(|| LlmError::NotConfigured("OPENAI_API_KEY is not set".into()))?;
        if cfg.openai_model.trim().is_empty() {
            return Err(LlmError::NotConfigured("OPENAI_MODEL is not set".into()));
        }
        let mut adapter = Self::new(api_key, cfg.openai_model.clone(), cfg.openai_base_url.clone())
            .with_sampling(cfg.openai_max_tokens, cfg.openai_temperature);
        adapter.client = http::build_client(proxy, cfg.request_timeout())?;
        Ok(adapter)
    }

    async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(model = %self.model, "OpenAI request to {}", url);
        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        http::post_json(request, body).await
    }

    fn probe(&self, outcome: Result<ProviderReply, LlmError>) -> ConnectionProbe {
        let (success, response, error) = match outcome {
            Ok(reply) => (true, Some(reply.text_segments.concat()), None),
            Err(e) => (false, None, Some(e.to_string())),
        };
        ConnectionProbe {
            success,
            provider: self.provider_name().to_string(),
            model: self.model.clone(),
            api_key_configured: true,
            response,
            error,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn send(
        &self,
        messages: &[ConversationMessage],
        tools: &[ToolSpec],
        system_prompt: &str,
    ) -> Result<ProviderReply, LlmError> {
        let sampling = Sampling {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let body = translate::request_body(&self.model, &sampling, messages, tools, system_prompt);
        let resp = self.post(&body).await?;
        let reply = translate::parse_response(&resp)?;
        debug!(
            finish_reason = resp["choices"][0]["finish_reason"].as_str().unwrap_or("unknown"),
            tool_uses = reply.tool_uses.len(),
            "OpenAI reply"
        );
        Ok(reply)
    }

    async fn test_connection(&self) -> ConnectionProbe {
        let sampling = Sampling {
            max_tokens: PROBE_MAX_TOKENS,
            temperature: self.temperature,
        };
        let messages = [ConversationMessage::User("Hello".to_string())];
        let body = translate::request_body(&self.model, &sampling, &messages, &[], "");
        let outcome = match self.post(&body).await {
            Ok(resp) => translate::parse_response(&resp),
            Err(e) => Err(e),
        };
        self.probe(outcome)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
