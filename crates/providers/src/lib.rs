//! Provider adapter — hides the two supported wire protocols behind a
//! single [`Turn`] contract.
//!
//! Nothing provider-specific leaks past this crate: the orchestrator sees
//! normalized tool calls and token counts, plus the raw assistant message
//! kept verbatim for history fidelity.

pub mod anthropic;
pub mod openai;
pub mod sse;
pub mod traits;

pub use traits::{ProviderKind, ProviderRequest, Turn};

use aa_domain::cancel::CancelToken;
use aa_domain::error::{Error, Result};
use aa_domain::tool::{Message, ToolResult};

/// HTTP client wrapper for provider calls.
pub struct ProviderClient {
    http: reqwest::Client,
}

impl Default for ProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Stream one assistant turn. Text deltas are forwarded to `on_delta`
    /// as they arrive; the accumulated result comes back as a [`Turn`].
    pub async fn call_streaming(
        &self,
        req: &ProviderRequest<'_>,
        on_delta: &mut (dyn FnMut(&str) + Send),
        cancel: &CancelToken,
    ) -> Result<Turn> {
        match req.kind {
            ProviderKind::OpenAi => openai::call_streaming(&self.http, req, on_delta, cancel).await,
            ProviderKind::Anthropic => {
                anthropic::call_streaming(&self.http, req, on_delta, cancel).await
            }
        }
    }
}

/// Shape tool results into the message(s) the given provider expects.
///
/// OpenAI-style conversations answer each call with its own `role=tool`
/// message; Anthropic-style conversations answer all calls with a single
/// user message of `tool_result` blocks.
pub fn build_tool_result_messages(kind: ProviderKind, results: &[ToolResult]) -> Vec<Message> {
    match kind {
        ProviderKind::OpenAi => openai::tool_result_messages(results),
        ProviderKind::Anthropic => anthropic::tool_result_messages(results),
    }
}

/// Normalize a cached provider response body into a [`Turn`]. Used when
/// the optional prompt cache returns a prior response.
pub fn normalize_cached_response(kind: ProviderKind, cached: &serde_json::Value) -> Result<Turn> {
    match kind {
        ProviderKind::OpenAi => openai::normalize_response(cached),
        ProviderKind::Anthropic => anthropic::normalize_response(cached),
    }
}

/// Convert an HTTP failure response into the provider error carrying the
/// status and a truncated body.
pub(crate) fn provider_http_error(provider: &str, status: u16, body: &str) -> Error {
    let trimmed: String = body.chars().take(500).collect();
    Error::Provider {
        provider: provider.to_string(),
        message: format!("HTTP {status} - {trimmed}"),
    }
}

pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
