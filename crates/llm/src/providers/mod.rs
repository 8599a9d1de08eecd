//! Vendor adapters and the factory that picks one from configuration.

pub mod claude;
mod http;
pub mod openai;

use std::sync::Arc;

use geoloop_core::config::{LlmConfig, ProxyConfig};
use geoloop_tool_runtime::{ConnectionProbe, LlmError, ProviderAdapter};
use serde::Serialize;
use tracing::info;

use self::claude::ClaudeAdapter;
use self::openai::OpenAiAdapter;

pub const SUPPORTED_PROVIDERS: &[&str] = &["claude", "openai"];

/// Build the adapter selected by `cfg.provider`.
pub fn create_adapter(
    cfg: &LlmConfig,
    proxy: &ProxyConfig,
) -> Result<Arc<dyn ProviderAdapter>, LlmError> {
    let adapter: Arc<dyn ProviderAdapter> = match cfg.provider.as_str() {
        "claude" => Arc::new(ClaudeAdapter::from_config(cfg, proxy)?),
        "openai" => Arc::new(OpenAiAdapter::from_config(cfg, proxy)?),
        other => {
            return Err(LlmError::NotConfigured(format!(
                "unsupported provider '{}', expected one of: {}",
                other,
                SUPPORTED_PROVIDERS.join(", ")
            )))
        }
    };
    info!(provider = adapter.provider_name(), model = adapter.model(), "LLM provider ready");
    Ok(adapter)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub configured: bool,
    pub model: String,
    pub active: bool,
}

pub fn available_providers(cfg: &LlmConfig) -> Vec<ProviderStatus> {
    SUPPORTED_PROVIDERS
        .iter()
        .map(|name| {
            let candidate = cfg.with_provider(name);
            ProviderStatus {
                name: name.to_string(),
                configured: candidate.is_configured(),
                model: candidate.active_model().to_string(),
                active: cfg.provider == *name,
            }
        })
        .collect()
}

/// Probe a named provider without touching whichever one is active.
///
/// An unconfigured provider is reported, not contacted.
pub async fn probe_provider(name: &str, cfg: &LlmConfig, proxy: &ProxyConfig) -> ConnectionProbe {
    let candidate = cfg.with_provider(name);
    match create_adapter(&candidate, proxy) {
        Ok(adapter) => adapter.test_connection().await,
        Err(e) => ConnectionProbe {
            success: false,
            provider: candidate.provider.clone(),
            model: candidate.active_model().to_string(),
            api_key_configured: false,
            response: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_config() -> LlmConfig {
        LlmConfig {
            provider: "claude".into(),
            anthropic_api_key: Some("sk-ant-test".into()),
            anthropic_base_url: "https://api.anthropic.com".into(),
            claude_model: "claude-3-7-sonnet-20250219".into(),
            claude_max_tokens: 1000,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com".into(),
            openai_model: "gpt-4".into(),
            openai_max_tokens: 1000,
            openai_temperature: 0.7,
            request_timeout_secs: 60,
        }
    }

    #[test]
    fn test_create_adapter_selects_vendor() {
        let adapter = create_adapter(&llm_config(), &ProxyConfig::default()).unwrap();
        assert_eq!(adapter.provider_name(), "claude");
        assert_eq!(adapter.model(), "claude-3-7-sonnet-20250219");
    }

    #[test]
    fn test_create_adapter_missing_key() {
        let cfg = llm_config().with_provider("openai");
        assert!(matches!(
            create_adapter(&cfg, &ProxyConfig::default()),
            Err(LlmError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_create_adapter_unknown_provider() {
        let mut cfg = llm_config();
        cfg.provider = "gemini".into();
        assert!(matches!(
            create_adapter(&cfg, &ProxyConfig::default()),
            Err(LlmError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_available_providers() {
        let statuses = available_providers(&llm_config());
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].configured && statuses[0].active);
        assert!(!statuses[1].configured && !statuses[1].active);
        assert_eq!(statuses[1].model, "gpt-4");
    }

    #[tokio::test]
    async fn test_probe_unconfigured_provider_makes_no_request() {
        let probe = probe_provider("openai", &llm_config(), &ProxyConfig::default()).await;
        assert!(!probe.success);
        assert!(!probe.api_key_configured);
        assert_eq!(probe.provider, "openai");
        assert!(probe.error.unwrap().contains("OPENAI_API_KEY"));
    }
}
