//! Shared HTTP plumbing for vendor adapters.

use std::time::Duration;

use geoloop_core::config::ProxyConfig;
use geoloop_tool_runtime::LlmError;
use serde_json::Value;
use tracing::debug;

/// Bodies longer than this are cut in error messages.
const MAX_ERROR_BODY: usize = 500;

/// Build a client honoring the request timeout and the outbound proxy.
pub(crate) fn build_client(proxy: &ProxyConfig, timeout: Duration) -> Result<reqwest::Client, LlmError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(url) = proxy.effective() {
        debug!(proxy = %url, "Routing LLM traffic through proxy");
        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| LlmError::NotConfigured(format!("invalid proxy '{}': {}", url, e)))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| LlmError::NotConfigured(format!("failed to build HTTP client: {}", e)))
}

pub(crate) fn map_send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(e.to_string())
    } else {
        LlmError::NetworkError(e.to_string())
    }
}

/// POST `body` and return the parsed JSON response, mapping vendor
/// status codes onto [`LlmError`].
pub(crate) async fn post_json(
    request: reqwest::RequestBuilder,
    body: &Value,
) -> Result<Value, LlmError> {
    let response = request.json(body).send().await.map_err(map_send_error)?;

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body_text = response.text().await.unwrap_or_default();
        return Err(map_status(status, &body_text, retry_after));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| LlmError::InvalidResponse(e.to_string()))
}

pub(crate) fn map_status(status: u16, body: &str, retry_after: Option<u64>) -> LlmError {
    match status {
        401 | 403 => LlmError::AuthError,
        429 => LlmError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(30),
        },
        408 | 504 => LlmError::Timeout(format!("vendor returned {}", status)),
        _ => LlmError::ApiError {
            status,
            message: error_message(body),
        },
    }
}

/// Both vendors wrap failures as `{"error": {"message": ...}}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY).collect())
}
