//! Translation between provider-agnostic conversation types and the Claude API format.

use serde_json::{json, Value};

use geoloop_tool_runtime::{ConversationMessage, LlmError, ProviderReply, ToolCall, ToolSpec};

/// Translate a [`ToolSpec`] into the Claude API tool format.
pub(super) fn tool_spec_to_claude(tool: &ToolSpec) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

/// Translate the history into Claude messages.
///
/// Claude wants every tool result of one turn inside a single user
/// message, so consecutive results are merged.
pub(super) fn messages_to_claude(messages: &[ConversationMessage]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_results: Vec<Value> = Vec::new();

    for msg in messages {
        if let ConversationMessage::ToolResult(result) = msg {
            pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": result.tool_call_id,
                "content": result.content,
                "is_error": result.is_error,
            }));
            continue;
        }
        if !pending_results.is_empty() {
            out.push(json!({
                "role": "user",
                "content": std::mem::take(&mut pending_results),
            }));
        }
        out.push(message_to_claude(msg));
    }
    if !pending_results.is_empty() {
        out.push(json!({ "role": "user", "content": pending_results }));
    }
    out
}

fn message_to_claude(msg: &ConversationMessage) -> Value {
    match msg {
        ConversationMessage::User(text) => json!({
            "role": "user",
            "content": text,
        }),
        ConversationMessage::Assistant(content) => {
            let mut blocks: Vec<Value> = Vec::new();
            if let Some(text) = content.text.as_deref().filter(|t| !t.is_empty()) {
                blocks.push(json!({"type": "text", "text": text}));
            }
            for tc in &content.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.name,
                    "input": tc.input,
                }));
            }
            json!({
                "role": "assistant",
                "content": blocks,
            })
        }
        ConversationMessage::ToolResult(result) => json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": result.tool_call_id,
                "content": result.content,
                "is_error": result.is_error,
            }],
        }),
    }
}

/// Build the `/v1/messages` request body.
pub(super) fn request_body(
    model: &str,
    max_tokens: u32,
    messages: &[ConversationMessage],
    tools: &[ToolSpec],
    system_prompt: &str,
) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": messages_to_claude(messages),
    });
    if !system_prompt.is_empty() {
        body["system"] = json!(system_prompt);
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.iter().map(tool_spec_to_claude).collect());
    }
    body
}

/// Split the response content blocks into text and tool uses, keeping order.
pub(super) fn parse_response(resp: &Value) -> Result<ProviderReply, LlmError> {
    let blocks = resp["content"]
        .as_array()
        .ok_or_else(|| LlmError::InvalidResponse("missing content array".into()))?;

    let mut reply = ProviderReply::default();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    reply.text_segments.push(text.to_string());
                }
            }
            Some("tool_use") => {
                let id = block["id"].as_str().unwrap_or_default().to_string();
                let name = block["name"]
                    .as_str()
                    .ok_or_else(|| LlmError::InvalidResponse("tool_use block without name".into()))?
                    .to_string();
                reply.tool_uses.push(ToolCall {
                    id,
                    name,
                    input: block.get("input").cloned().unwrap_or(Value::Null),
                });
            }
            // thinking and other block types carry nothing the loop uses
            _ => {}
        }
    }
    Ok(reply)
}
