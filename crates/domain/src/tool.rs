use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// The answer to one tool call, keyed by the call's `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A message in the conversation (provider-agnostic).
///
/// The sequence of messages owned by a thread must remain a valid
/// conversation for the selected provider shape, so assistant messages
/// carry their raw provider-native payload alongside the normalized view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Set on tool-result messages for OpenAI-shaped conversations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// The turn that produced this message, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_number: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    /// Provider-native assistant payload kept verbatim for history fidelity.
    Raw(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            turn_number: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            turn_number: None,
        }
    }

    pub fn assistant_raw(raw: serde_json::Value) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Raw(raw),
            tool_call_id: None,
            turn_number: None,
        }
    }
}

impl MessageContent {
    /// Approximate character weight of this content, used for token
    /// pressure estimation. Structured blocks count their JSON encoding.
    pub fn char_weight(&self) -> usize {
        match self {
            MessageContent::Text(t) => t.len(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| serde_json::to_string(b).map(|s| s.len()).unwrap_or(0))
                .sum(),
            MessageContent::Raw(v) => serde_json::to_string(v).map(|s| s.len()).unwrap_or(0),
        }
    }

    /// Extract and join all plain-text content, skipping structured blocks.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            MessageContent::Raw(v) => v
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_from_blocks_joins_with_newline() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Text { text: "line one".into() },
            ContentBlock::ToolUse {
                id: "c1".into(),
                name: "run_command".into(),
                input: serde_json::json!({}),
            },
            ContentBlock::Text { text: "line two".into() },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn char_weight_counts_structured_json() {
        let content = MessageContent::Blocks(vec![ContentBlock::ToolUse {
            id: "c1".into(),
            name: "read_file".into(),
            input: serde_json::json!({"path": "src/main.rs"}),
        }]);
        assert!(content.char_weight() > 30);
    }

    #[test]
    fn tool_result_default_is_error_false() {
        let raw = r#"{"id":"t1","content":"ok"}"#;
        let result: ToolResult = serde_json::from_str(raw).unwrap();
        assert!(!result.is_error);
    }
}
