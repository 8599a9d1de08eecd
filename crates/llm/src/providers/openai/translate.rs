//! Chat Completions wire format.

use serde_json::{json, Value};

use geoloop_tool_runtime::{ConversationMessage, LlmError, ProviderReply, ToolCall, ToolSpec};

pub(super) fn tool_spec_to_openai(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

/// The system prompt travels as a synthetic first message.
pub(super) fn messages_to_openai(messages: &[ConversationMessage], system_prompt: &str) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.is_empty() {
        out.push(json!({ "role": "system", "content": system_prompt }));
    }
    for msg in messages {
        out.push(match msg {
            ConversationMessage::User(text) => json!({ "role": "user", "content": text }),
            ConversationMessage::Assistant(content) => {
                let mut m = json!({
                    "role": "assistant",
                    "content": content.text,
                });
                if !content.tool_calls.is_empty() {
                    m["tool_calls"] = content
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.input.to_string(),
                                }
                            })
                        })
                        .collect();
                }
                m
            }
            ConversationMessage::ToolResult(result) => json!({
                "role": "tool",
                "tool_call_id": result.tool_call_id,
                "content": result.content,
            }),
        });
    }
    out
}

pub(super) struct Sampling {
    pub max_tokens: u32,
    pub temperature: f32,
}

pub(super) fn request_body(
    model: &str,
    sampling: &Sampling,
    messages: &[ConversationMessage],
    tools: &[ToolSpec],
    system_prompt: &str,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages_to_openai(messages, system_prompt),
        "max_tokens": sampling.max_tokens,
        "temperature": sampling.temperature,
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.iter().map(tool_spec_to_openai).collect());
        body["tool_choice"] = json!("auto");
    }
    body
}

pub(super) fn parse_response(resp: &Value) -> Result<ProviderReply, LlmError> {
    let message = resp["choices"]
        .get(0)
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message".into()))?;

    let mut reply = ProviderReply::default();
    if let Some(text) = message["content"].as_str() {
        if !text.is_empty() {
            reply.text_segments.push(text.to_string());
        }
    }
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let function = &call["function"];
            let name = function["name"]
                .as_str()
                .ok_or_else(|| LlmError::InvalidResponse("tool call without function name".into()))?
                .to_string();
            reply.tool_uses.push(ToolCall {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name,
                input: parse_arguments(&function["arguments"]),
            });
        }
    }
    Ok(reply)
}

/// Arguments arrive as a JSON-encoded string. When that string does not
/// parse, it is passed through as a plain string so the executor reports
/// the malformed call instead of the whole turn failing.
fn parse_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => Value::Null,
        Value::String(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Value::Null => Value::Null,
        other => other.clone(),
    }
}
