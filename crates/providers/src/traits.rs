use aa_domain::tool::{Message, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider kind
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The two wire protocols this core speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / normalized turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything one streaming call needs. Borrowed because the orchestrator
/// owns the conversation and retries may re-send the same request.
#[derive(Debug, Clone)]
pub struct ProviderRequest<'a> {
    pub kind: ProviderKind,
    pub provider_id: &'a str,
    pub base_url: &'a str,
    pub api_key: &'a str,
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub messages: &'a [Message],
    pub max_tokens: u32,
    pub tools: &'a [ToolDefinition],
}

/// One normalized assistant turn.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Concatenated text blocks, `None` when the model produced no text.
    pub text_content: Option<String>,
    /// Normalized tool invocations, in the order the model emitted them.
    pub tool_calls: Vec<ToolCall>,
    /// The provider-native assistant message, kept for history fidelity.
    pub raw_assistant_message: Value,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Turn {
    /// True when the model stopped without requesting any tool.
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}
