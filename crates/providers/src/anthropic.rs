//! Anthropic-style adapter (Messages API wire format).
//!
//! The system prompt travels in a top-level `system` field and tool
//! results go back as user messages of `tool_result` blocks. Streaming
//! events are `message_start`, `content_block_start`,
//! `content_block_delta`, `content_block_stop`, `message_delta`; tool
//! inputs arrive as `input_json_delta` partial-JSON strings accumulated
//! per block index and parsed at `content_block_stop`.

use std::collections::HashMap;

use aa_domain::cancel::CancelToken;
use aa_domain::error::{Error, Result};
use aa_domain::tool::{ContentBlock, Message, MessageContent, Role, ToolCall, ToolDefinition, ToolResult};
use serde_json::Value;

use crate::traits::{ProviderRequest, Turn};
use crate::{from_reqwest, provider_http_error, sse};

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_body(req: &ProviderRequest<'_>) -> Value {
    let api_messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "system": req.system_prompt,
        "messages": api_messages,
        "max_tokens": req.max_tokens,
        "stream": true,
    });

    if !req.tools.is_empty() {
        let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn message_to_wire(msg: &Message) -> Value {
    match &msg.content {
        // Raw assistant payloads are already provider-native.
        MessageContent::Raw(raw) => raw.clone(),
        MessageContent::Text(t) => serde_json::json!({
            "role": match msg.role {
                Role::Assistant => "assistant",
                _ => "user",
            },
            "content": t,
        }),
        MessageContent::Blocks(blocks) => {
            let content: Vec<Value> = blocks.iter().map(block_to_wire).collect();
            serde_json::json!({
                "role": match msg.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                },
                "content": content,
            })
        }
    }
}

fn block_to_wire(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({ "type": "text", "text": text }),
        ContentBlock::ToolUse { id, name, input } => serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool result shaping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single user message whose content is one `tool_result` block per
/// answered call.
pub(crate) fn tool_result_messages(results: &[ToolResult]) -> Vec<Message> {
    let blocks: Vec<ContentBlock> = results
        .iter()
        .map(|r| ContentBlock::ToolResult {
            tool_use_id: r.id.clone(),
            content: r.content.clone(),
            is_error: r.is_error,
        })
        .collect();
    vec![Message {
        role: Role::User,
        content: MessageContent::Blocks(blocks),
        tool_call_id: None,
        turn_number: None,
    }]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming accumulation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates one assistant turn from streamed content-block events.
#[derive(Default)]
pub(crate) struct StreamState {
    text: String,
    /// block index -> (call_id, tool_name, partial-JSON buffer)
    open_tool_blocks: HashMap<u64, (String, String, String)>,
    /// Completed tool calls in block-index order.
    tool_calls: Vec<(u64, ToolCall)>,
    input_tokens: u64,
    output_tokens: u64,
}

impl StreamState {
    pub(crate) fn feed(&mut self, data: &str, on_delta: &mut (dyn FnMut(&str) + Send)) -> Result<()> {
        let v: Value = serde_json::from_str(data)?;
        let event_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");

        match event_type {
            "message_start" => {
                if let Some(usage) = v.get("message").and_then(|m| m.get("usage")) {
                    if let Some(n) = usage.get("input_tokens").and_then(|n| n.as_u64()) {
                        self.input_tokens = n;
                    }
                    if let Some(n) = usage.get("output_tokens").and_then(|n| n.as_u64()) {
                        self.output_tokens = n;
                    }
                }
            }

            "content_block_start" => {
                let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some(block) = v.get("content_block") {
                    if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                        let id = block.get("id").and_then(|i| i.as_str()).unwrap_or("").to_string();
                        let name =
                            block.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string();
                        self.open_tool_blocks.insert(idx, (id, name, String::new()));
                    }
                }
            }

            "content_block_delta" => {
                let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some(delta) = v.get("delta") {
                    match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                        "text_delta" => {
                            if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                                if !text.is_empty() {
                                    on_delta(text);
                                    self.text.push_str(text);
                                }
                            }
                        }
                        "input_json_delta" => {
                            if let Some(partial) =
                                delta.get("partial_json").and_then(|p| p.as_str())
                            {
                                if let Some(block) = self.open_tool_blocks.get_mut(&idx) {
                                    block.2.push_str(partial);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }

            "content_block_stop" => {
                let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some((id, name, args)) = self.open_tool_blocks.remove(&idx) {
                    let input: Value = if args.trim().is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&args).unwrap_or_else(|e| {
                            tracing::warn!(
                                call_id = %id,
                                tool = %name,
                                error = %e,
                                "tool input is not valid JSON; defaulting to empty object"
                            );
                            Value::Object(Default::default())
                        })
                    };
                    self.tool_calls.push((idx, ToolCall { id, name, input }));
                }
            }

            "message_delta" => {
                if let Some(n) = v
                    .get("usage")
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(|n| n.as_u64())
                {
                    self.output_tokens = n;
                }
            }

            "error" => {
                let msg = v
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown streaming error");
                return Err(Error::Provider {
                    provider: "anthropic".into(),
                    message: msg.to_string(),
                });
            }

            // ping, message_stop, unknown event types.
            _ => {}
        }

        Ok(())
    }

    pub(crate) fn finish(mut self) -> Turn {
        self.tool_calls.sort_by_key(|(idx, _)| *idx);

        let mut content_blocks: Vec<Value> = Vec::new();
        if !self.text.is_empty() {
            content_blocks.push(serde_json::json!({ "type": "text", "text": self.text }));
        }
        for (_, tc) in &self.tool_calls {
            content_blocks.push(serde_json::json!({
                "type": "tool_use",
                "id": tc.id,
                "name": tc.name,
                "input": tc.input,
            }));
        }

        let raw = serde_json::json!({
            "role": "assistant",
            "content": content_blocks,
        });

        Turn {
            text_content: if self.text.is_empty() { None } else { Some(self.text) },
            tool_calls: self.tool_calls.into_iter().map(|(_, tc)| tc).collect(),
            raw_assistant_message: raw,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP entry points
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) async fn call_streaming(
    http: &reqwest::Client,
    req: &ProviderRequest<'_>,
    on_delta: &mut (dyn FnMut(&str) + Send),
    cancel: &CancelToken,
) -> Result<Turn> {
    let url = format!("{}/v1/messages", req.base_url.trim_end_matches('/'));
    let body = build_body(req);

    tracing::debug!(provider = %req.provider_id, url = %url, "anthropic stream request");

    let mut resp = http
        .post(&url)
        .header("x-api-key", req.api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(from_reqwest)?;

    let status = resp.status();
    if !status.is_success() {
        let err_text = resp.text().await.unwrap_or_default();
        return Err(provider_http_error(req.provider_id, status.as_u16(), &err_text));
    }

    let mut state = StreamState::default();
    let mut buffer = String::new();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match resp.chunk().await {
            Ok(Some(bytes)) => {
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                for data in sse::drain_data_lines(&mut buffer) {
                    state.feed(&data, on_delta)?;
                }
            }
            Ok(None) => {
                if !buffer.trim().is_empty() {
                    buffer.push_str("\n\n");
                    for data in sse::drain_data_lines(&mut buffer) {
                        state.feed(&data, on_delta)?;
                    }
                }
                break;
            }
            Err(e) => return Err(from_reqwest(e)),
        }
    }

    Ok(state.finish())
}

/// Normalize a non-streaming (or cached) response body into a [`Turn`].
pub(crate) fn normalize_response(body: &Value) -> Result<Turn> {
    let content = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Error::Provider {
            provider: "anthropic".into(),
            message: "no content in response".into(),
        })?;

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in content {
        match block.get("type").and_then(|t| t.as_str()).unwrap_or("") {
            "text" => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text_parts.push(t.to_string());
                }
            }
            "tool_use" => {
                tool_calls.push(ToolCall {
                    id: block.get("id").and_then(|i| i.as_str()).unwrap_or("").to_string(),
                    name: block.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string(),
                    input: block.get("input").cloned().unwrap_or(Value::Object(Default::default())),
                });
            }
            _ => {}
        }
    }

    let usage = body.get("usage");
    let input_tokens = usage
        .and_then(|u| u.get("input_tokens"))
        .and_then(|n| n.as_u64())
        .unwrap_or(0);
    let output_tokens = usage
        .and_then(|u| u.get("output_tokens"))
        .and_then(|n| n.as_u64())
        .unwrap_or(0);

    Ok(Turn {
        text_content: if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join(""))
        },
        tool_calls,
        raw_assistant_message: serde_json::json!({
            "role": "assistant",
            "content": content,
        }),
        input_tokens,
        output_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(state: &mut StreamState, lines: &[&str]) -> String {
        let mut seen = String::new();
        for line in lines {
            state.feed(line, &mut |d: &str| seen.push_str(d)).unwrap();
        }
        seen
    }

    #[test]
    fn text_blocks_stream_and_accumulate() {
        let mut state = StreamState::default();
        let seen = feed_all(
            &mut state,
            &[
                r#"{"type":"message_start","message":{"usage":{"input_tokens":42,"output_tokens":1}}}"#,
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text"}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#,
                r#"{"type":"content_block_stop","index":0}"#,
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#,
                r#"{"type":"message_stop"}"#,
            ],
        );
        assert_eq!(seen, "Hello");
        let turn = state.finish();
        assert_eq!(turn.text_content.as_deref(), Some("Hello"));
        assert_eq!(turn.input_tokens, 42);
        assert_eq!(turn.output_tokens, 5);
    }

    #[test]
    fn tool_input_json_deltas_parse_at_block_stop() {
        let mut state = StreamState::default();
        feed_all(
            &mut state,
            &[
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"write_file"}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"path\":\"he"}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"llo.py\"}"}}"#,
                r#"{"type":"content_block_stop","index":0}"#,
            ],
        );
        let turn = state.finish();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id, "toolu_1");
        assert_eq!(turn.tool_calls[0].input["path"], "hello.py");
    }

    #[test]
    fn mixed_text_and_tool_blocks() {
        let mut state = StreamState::default();
        feed_all(
            &mut state,
            &[
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text"}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"writing now"}}"#,
                r#"{"type":"content_block_stop","index":0}"#,
                r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"t1","name":"glob_files"}}"#,
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"pattern\":\"**/*.py\"}"}}"#,
                r#"{"type":"content_block_stop","index":1}"#,
            ],
        );
        let turn = state.finish();
        assert_eq!(turn.text_content.as_deref(), Some("writing now"));
        assert_eq!(turn.tool_calls.len(), 1);
        let raw_content = turn.raw_assistant_message["content"].as_array().unwrap();
        assert_eq!(raw_content[0]["type"], "text");
        assert_eq!(raw_content[1]["type"], "tool_use");
    }

    #[test]
    fn empty_tool_input_defaults_to_object() {
        let mut state = StreamState::default();
        feed_all(
            &mut state,
            &[
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"git_status"}}"#,
                r#"{"type":"content_block_stop","index":0}"#,
            ],
        );
        let turn = state.finish();
        assert_eq!(turn.tool_calls[0].input, serde_json::json!({}));
    }

    #[test]
    fn error_event_surfaces_as_provider_error() {
        let mut state = StreamState::default();
        let err = state
            .feed(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
                &mut |_: &str| {},
            )
            .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn tool_result_messages_are_one_user_message() {
        let results = vec![
            ToolResult { id: "a".into(), content: "ok".into(), is_error: false },
            ToolResult { id: "b".into(), content: "Error: no".into(), is_error: true },
        ];
        let messages = tool_result_messages(&results);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        match &messages[0].content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(
                    &blocks[1],
                    ContentBlock::ToolResult { is_error: true, .. }
                ));
            }
            other => panic!("expected blocks, got {other:?}"),
        }
    }

    #[test]
    fn normalize_cached_response() {
        let body = serde_json::json!({
            "content": [
                { "type": "text", "text": "All " },
                { "type": "text", "text": "done" },
                { "type": "tool_use", "id": "t1", "name": "read_file", "input": {"path": "x"} }
            ],
            "usage": { "input_tokens": 9, "output_tokens": 3 }
        });
        let turn = normalize_response(&body).unwrap();
        assert_eq!(turn.text_content.as_deref(), Some("All done"));
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.output_tokens, 3);
    }

    #[test]
    fn body_puts_system_at_top_level() {
        let messages = vec![Message::user("hi")];
        let req = ProviderRequest {
            kind: crate::ProviderKind::Anthropic,
            provider_id: "p",
            base_url: "http://localhost",
            api_key: "k",
            model: "claude-sonnet-4-20250514",
            system_prompt: "be careful",
            messages: &messages,
            max_tokens: 2048,
            tools: &[],
        };
        let body = build_body(&req);
        assert_eq!(body["system"], "be careful");
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("tools").is_none());
    }
}
