//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use geoloop_agent::{BatchProcessor, GeoSession};
use geoloop_core::Config;
use geoloop_tool_runtime::{ConversationResult, QueryContext};
use serde_json::Value;
use tracing::info;

async fn open_session(config: &Config) -> Result<Arc<GeoSession>> {
    let session = GeoSession::from_config(config).context("invalid configuration")?;
    session
        .connect()
        .await
        .context("failed to start the tool server")?;
    Ok(Arc::new(session))
}

pub fn build_context(pairs: &[(String, String)]) -> Option<QueryContext> {
    if pairs.is_empty() {
        return None;
    }
    let mut context = QueryContext::new();
    for (k, v) in pairs {
        context.insert(k.clone(), Value::String(v.clone()));
    }
    Some(context)
}

pub async fn query(
    config: &Config,
    query: &str,
    context: Option<QueryContext>,
    system_prompt: Option<String>,
    template: Option<String>,
    json: bool,
) -> Result<()> {
    let session = open_session(config).await?;
    let prompt = match (system_prompt, template) {
        (Some(p), _) => Some(p),
        (None, Some(name)) => Some(session.prompts().get(&name).to_string()),
        (None, None) => None,
    };
    let outcome = session
        .process_query_with_timeout(query, context.as_ref(), prompt.as_deref())
        .await;
    session.shutdown().await;

    let result = outcome?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    if !result.success {
        bail!(result.error.unwrap_or_else(|| "query failed".into()));
    }
    Ok(())
}

fn print_result(result: &ConversationResult) {
    for call in &result.tool_calls {
        let status = if call.succeeded { "ok" } else { "failed" };
        println!("[tool] {} ({})", call.tool_name, status);
    }
    if !result.tool_calls.is_empty() {
        println!();
    }
    println!("{}", result.final_answer);
}

pub async fn tools(config: &Config, json: bool) -> Result<()> {
    let session = open_session(config).await?;
    let outcome = session.get_available_tools().await;
    session.shutdown().await;
    let tools = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }
    println!("{} tools available:", tools.len());
    for tool in &tools {
        println!("  {:<24} {}", tool.name, tool.description);
    }
    Ok(())
}

pub async fn health(config: &Config, deep: bool) -> Result<()> {
    let session = GeoSession::from_config(config).context("invalid configuration")?;
    // a failed connect shows up in the report
    let _ = session.connect().await;
    let report = if deep {
        session.deep_health().await
    } else {
        session.health().await
    };
    session.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_healthy() {
        bail!("unhealthy");
    }
    Ok(())
}

pub async fn batch(config: &Config, input: &Path, output: &Path, batch_size: usize) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let items = parse_items(&raw).with_context(|| format!("invalid JSON in {}", input.display()))?;

    let session = open_session(config).await?;
    let processor = BatchProcessor::new(session.clone()).with_batch_size(batch_size);
    let (records, summary) = processor.process_batch(&items).await;
    session.shutdown().await;

    let rendered = serde_json::to_string_pretty(&records)?;
    std::fs::write(output, rendered)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(total = summary.total, enriched = summary.enriched, "Batch complete");
    println!(
        "{}/{} records enriched, written to {}",
        summary.enriched,
        summary.total,
        output.display()
    );
    Ok(())
}

/// A file holds either an array of records or a single record.
pub fn parse_items(raw: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Array(items) => Ok(items),
        obj @ Value::Object(_) => Ok(vec![obj]),
        other => bail!("expected a JSON array or object, got {}", other),
    }
}

pub async fn test_provider(config: &Config, name: Option<&str>) -> Result<()> {
    let name = name.unwrap_or(config.llm.provider.as_str());
    let probe = geoloop_llm::probe_provider(name, &config.llm, &config.proxy).await;
    println!("{}", serde_json::to_string_pretty(&probe)?);
    if !probe.success {
        bail!("provider '{}' is not reachable", name);
    }
    Ok(())
}
