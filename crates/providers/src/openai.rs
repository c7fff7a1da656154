//! OpenAI-style adapter (chat completions wire format).
//!
//! Streaming: each `data:` line is a JSON chunk with
//! `choices[0].delta.{content, tool_calls[]}`. Tool-call fragments
//! accumulate by `index`, concatenating `function.arguments` strings.
//! `[DONE]` terminates; usage arrives on the final chunk because the
//! request sets `stream_options.include_usage`.

use std::collections::BTreeMap;

use aa_domain::cancel::CancelToken;
use aa_domain::error::{Error, Result};
use aa_domain::tool::{Message, MessageContent, Role, ToolCall, ToolDefinition, ToolResult};
use serde_json::Value;

use crate::traits::{ProviderRequest, Turn};
use crate::{from_reqwest, provider_http_error, sse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_body(req: &ProviderRequest<'_>) -> Value {
    let mut messages: Vec<Value> = Vec::new();
    messages.push(serde_json::json!({
        "role": "system",
        "content": req.system_prompt,
    }));
    for msg in req.messages {
        messages.push(message_to_wire(msg));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "stream": true,
        "stream_options": { "include_usage": true },
    });

    if !req.tools.is_empty() {
        let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn message_to_wire(msg: &Message) -> Value {
    match (&msg.role, &msg.content) {
        // Raw assistant payloads are already provider-native.
        (_, MessageContent::Raw(raw)) => raw.clone(),
        (Role::Tool, content) => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": content.extract_all_text(),
        }),
        (role, content) => serde_json::json!({
            "role": role_name(*role),
            "content": content.extract_all_text(),
        }),
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool result shaping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One `role=tool` message per result.
pub(crate) fn tool_result_messages(results: &[ToolResult]) -> Vec<Message> {
    results
        .iter()
        .map(|r| Message {
            role: Role::Tool,
            content: MessageContent::Text(r.content.clone()),
            tool_call_id: Some(r.id.clone()),
            turn_number: None,
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming accumulation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct ToolCallFragment {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates one assistant turn from streamed chunks.
#[derive(Default)]
pub(crate) struct StreamState {
    text: String,
    fragments: BTreeMap<u64, ToolCallFragment>,
    input_tokens: u64,
    output_tokens: u64,
    done: bool,
}

impl StreamState {
    /// Feed one `data:` payload. Text deltas are forwarded to `on_delta`.
    pub(crate) fn feed(&mut self, data: &str, on_delta: &mut (dyn FnMut(&str) + Send)) -> Result<()> {
        if data.trim() == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let v: Value = serde_json::from_str(data)?;

        // Usage may arrive on a chunk with empty choices.
        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            if let Some(n) = usage.get("prompt_tokens").and_then(|n| n.as_u64()) {
                self.input_tokens = n;
            }
            if let Some(n) = usage.get("completion_tokens").and_then(|n| n.as_u64()) {
                self.output_tokens = n;
            }
        }

        let delta = match v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|c| c.get("delta"))
        {
            Some(d) => d,
            None => return Ok(()),
        };

        if let Some(text) = delta.get("content").and_then(|t| t.as_str()) {
            if !text.is_empty() {
                on_delta(text);
                self.text.push_str(text);
            }
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tool_calls {
                let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let frag = self.fragments.entry(index).or_default();
                if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                    frag.id = id.to_string();
                }
                if let Some(func) = tc.get("function") {
                    if let Some(name) = func.get("name").and_then(|n| n.as_str()) {
                        frag.name.push_str(name);
                    }
                    if let Some(args) = func.get("arguments").and_then(|a| a.as_str()) {
                        frag.arguments.push_str(args);
                    }
                }
            }
        }

        Ok(())
    }

    pub(crate) fn finish(self) -> Turn {
        let mut tool_calls = Vec::new();
        let mut raw_tool_calls = Vec::new();

        for (_, frag) in self.fragments {
            let input: Value = if frag.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&frag.arguments).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %frag.id,
                        tool = %frag.name,
                        error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    Value::Object(Default::default())
                })
            };
            raw_tool_calls.push(serde_json::json!({
                "id": frag.id,
                "type": "function",
                "function": { "name": frag.name, "arguments": frag.arguments },
            }));
            tool_calls.push(ToolCall {
                id: frag.id,
                name: frag.name,
                input,
            });
        }

        let text_content = if self.text.is_empty() {
            None
        } else {
            Some(self.text.clone())
        };

        let mut raw = serde_json::json!({
            "role": "assistant",
            "content": text_content.clone().map(Value::String).unwrap_or(Value::Null),
        });
        if !raw_tool_calls.is_empty() {
            raw["tool_calls"] = Value::Array(raw_tool_calls);
        }

        Turn {
            text_content,
            tool_calls,
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
    let url = format!("{}/chat/completions", req.base_url.trim_end_matches('/'));
    let body = build_body(req);

    tracing::debug!(provider = %req.provider_id, url = %url, "openai stream request");

    let mut resp = http
        .post(&url)
        .header("authorization", format!("Bearer {}", req.api_key))
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
                // Flush a trailing partial event, if any.
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
    let message = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| Error::Provider {
            provider: "openai".into(),
            message: "no message in response".into(),
        })?;

    let text_content = message
        .get("content")
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let args = func.get("arguments")?.as_str().unwrap_or("{}");
                    let input =
                        serde_json::from_str(args).unwrap_or(Value::Object(Default::default()));
                    Some(ToolCall { id, name, input })
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = body.get("usage");
    let input_tokens = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(|n| n.as_u64())
        .unwrap_or(0);
    let output_tokens = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(|n| n.as_u64())
        .unwrap_or(0);

    Ok(Turn {
        text_content,
        tool_calls,
        raw_assistant_message: message.clone(),
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
    fn text_deltas_accumulate_and_forward() {
        let mut state = StreamState::default();
        let seen = feed_all(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
                r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
                "[DONE]",
            ],
        );
        assert_eq!(seen, "Hello");
        let turn = state.finish();
        assert_eq!(turn.text_content.as_deref(), Some("Hello"));
        assert!(turn.is_final());
    }

    #[test]
    fn tool_call_fragments_accumulate_by_index() {
        let mut state = StreamState::default();
        feed_all(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"write_file","arguments":""}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":"}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"hello.py\"}"}}]}}]}"#,
                "[DONE]",
            ],
        );
        let turn = state.finish();
        assert_eq!(turn.tool_calls.len(), 1);
        let tc = &turn.tool_calls[0];
        assert_eq!(tc.id, "call_1");
        assert_eq!(tc.name, "write_file");
        assert_eq!(tc.input["path"], "hello.py");
    }

    #[test]
    fn interleaved_tool_calls_keep_their_indices() {
        let mut state = StreamState::default();
        feed_all(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"read_file","arguments":"{\"path\":\"x\"}"}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"read_file","arguments":"{\"path\":\"y\"}"}}]}}]}"#,
                "[DONE]",
            ],
        );
        let turn = state.finish();
        assert_eq!(turn.tool_calls.len(), 2);
        assert_eq!(turn.tool_calls[0].id, "a");
        assert_eq!(turn.tool_calls[1].id, "b");
    }

    #[test]
    fn usage_from_final_chunk() {
        let mut state = StreamState::default();
        feed_all(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"content":"x"}}]}"#,
                r#"{"choices":[],"usage":{"prompt_tokens":120,"completion_tokens":8}}"#,
                "[DONE]",
            ],
        );
        let turn = state.finish();
        assert_eq!(turn.input_tokens, 120);
        assert_eq!(turn.output_tokens, 8);
    }

    #[test]
    fn malformed_arguments_default_to_empty_object() {
        let mut state = StreamState::default();
        feed_all(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"run_command","arguments":"{not json"}}]}}]}"#,
                "[DONE]",
            ],
        );
        let turn = state.finish();
        assert_eq!(turn.tool_calls[0].input, serde_json::json!({}));
    }

    #[test]
    fn raw_assistant_message_is_wire_shaped() {
        let mut state = StreamState::default();
        feed_all(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"content":"doing it"}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"glob_files","arguments":"{\"pattern\":\"*.rs\"}"}}]}}]}"#,
                "[DONE]",
            ],
        );
        let turn = state.finish();
        let raw = &turn.raw_assistant_message;
        assert_eq!(raw["role"], "assistant");
        assert_eq!(raw["content"], "doing it");
        assert_eq!(raw["tool_calls"][0]["function"]["name"], "glob_files");
        // Arguments stay a JSON string on the wire.
        assert!(raw["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn tool_result_messages_one_per_result() {
        let results = vec![
            ToolResult { id: "a".into(), content: "ok".into(), is_error: false },
            ToolResult { id: "b".into(), content: "Error: nope".into(), is_error: true },
        ];
        let messages = tool_result_messages(&results);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::Tool);
        assert_eq!(messages[0].tool_call_id.as_deref(), Some("a"));
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("b"));
    }

    #[test]
    fn normalize_cached_response() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "done",
                    "tool_calls": [{
                        "id": "c9",
                        "type": "function",
                        "function": { "name": "read_file", "arguments": "{\"path\":\"a\"}" }
                    }]
                }
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 2 }
        });
        let turn = normalize_response(&body).unwrap();
        assert_eq!(turn.text_content.as_deref(), Some("done"));
        assert_eq!(turn.tool_calls[0].name, "read_file");
        assert_eq!(turn.input_tokens, 10);
    }

    #[test]
    fn body_includes_usage_option_and_tools() {
        let tools = vec![ToolDefinition {
            name: "read_file".into(),
            description: "read".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let messages = vec![Message::user("hi")];
        let req = ProviderRequest {
            kind: crate::ProviderKind::OpenAi,
            provider_id: "p",
            base_url: "http://localhost",
            api_key: "k",
            model: "gpt-4o",
            system_prompt: "be helpful",
            messages: &messages,
            max_tokens: 1024,
            tools: &tools,
        };
        let body = build_body(&req);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
    }
}
