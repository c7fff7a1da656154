//! Context compression — collapses older history into a summary when the
//! token estimate crosses the threshold, so the conversation keeps fitting
//! the provider's window.
//!
//! The middle of the history is summarized by an auxiliary LLM call; if
//! that call fails the fallback is a local truncation-based summary, so
//! compression never needs the network to make progress.

use aa_domain::error::Result;
use aa_domain::tool::{Message, MessageContent, Role};

/// Estimated-token threshold that triggers compression.
pub const TOKEN_THRESHOLD: usize = 65_000;

/// Compression never runs on histories shorter than this.
pub const MIN_MESSAGES: usize = 6;

/// How many trailing messages stay verbatim.
pub const KEEP_TAIL: usize = 4;

/// Cap on the transcript handed to the summarizer.
pub const TRANSCRIPT_CAP: usize = 6 * 1024;

/// Characters-per-token approximation.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token pressure of a conversation: total character count
/// over the system prompt and all messages (structured content counts its
/// JSON encoding), divided by four.
pub fn estimate_tokens(system_prompt: &str, messages: &[Message]) -> usize {
    let chars: usize = system_prompt.len()
        + messages.iter().map(|m| m.content.char_weight()).sum::<usize>();
    chars / CHARS_PER_TOKEN
}

/// Whether this history needs compressing.
pub fn should_compress(system_prompt: &str, messages: &[Message]) -> bool {
    messages.len() >= MIN_MESSAGES && estimate_tokens(system_prompt, messages) >= TOKEN_THRESHOLD
}

/// Compress the history if needed, replacing everything but the last
/// [`KEEP_TAIL`] messages with a single synthetic user message carrying
/// the summary. A history under threshold is returned unchanged.
pub async fn compress_if_needed<F, Fut>(
    system_prompt: &str,
    messages: Vec<Message>,
    summarize: F,
) -> Vec<Message>
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = Result<String>>,
{
    if !should_compress(system_prompt, &messages) {
        return messages;
    }

    let split = messages.len() - KEEP_TAIL;
    let middle = &messages[..split];
    let transcript = build_transcript(middle);

    let summary = match summarize(transcript.clone()).await {
        Ok(s) if !s.trim().is_empty() => s,
        Ok(_) | Err(_) => {
            tracing::warn!("summarizer unavailable, falling back to truncation summary");
            truncation_summary(&transcript)
        }
    };

    let mut compressed = Vec::with_capacity(KEEP_TAIL + 1);
    compressed.push(Message::user(format!(
        "Conversation summary (older turns compressed):\n{summary}"
    )));
    compressed.extend_from_slice(&messages[split..]);

    tracing::info!(
        original = messages.len(),
        compressed = compressed.len(),
        "context compressed"
    );
    compressed
}

/// The prompt sent to the auxiliary summarizer call.
pub fn summary_prompt(transcript: &str) -> String {
    format!(
        "Summarize the following agent conversation history into a concise \
         summary that preserves:\n\
         1. The objective being worked on\n\
         2. Files created or modified so far\n\
         3. Commands run and their outcomes\n\
         4. Open problems or pending work\n\n\
         Be concise but keep every actionable detail. Write in present tense.\n\n\
         CONVERSATION:\n{transcript}"
    )
}

fn build_transcript(messages: &[Message]) -> String {
    let mut buf = String::new();
    for msg in messages {
        let role_label = match msg.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        };
        let text = match &msg.content {
            MessageContent::Raw(raw) => {
                // Keep tool-call names visible, not their full payloads.
                summarize_raw(raw)
            }
            other => other.extract_all_text(),
        };
        buf.push_str(role_label);
        buf.push_str(": ");
        if text.len() > 1500 {
            buf.push_str(&text[..floor_char_boundary(&text, 1000)]);
            buf.push_str(" [...] ");
        } else {
            buf.push_str(&text);
        }
        buf.push('\n');
        if buf.len() >= TRANSCRIPT_CAP {
            let cap = floor_char_boundary(&buf, TRANSCRIPT_CAP);
            buf.truncate(cap);
            break;
        }
    }
    buf
}

fn summarize_raw(raw: &serde_json::Value) -> String {
    let mut parts = Vec::new();
    if let Some(text) = raw.get("content").and_then(|c| c.as_str()) {
        parts.push(text.to_string());
    }
    if let Some(calls) = raw.get("tool_calls").and_then(|t| t.as_array()) {
        for call in calls {
            if let Some(name) = call
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|n| n.as_str())
            {
                parts.push(format!("[called {name}]"));
            }
        }
    }
    if let Some(blocks) = raw.get("content").and_then(|c| c.as_array()) {
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                        parts.push(t.to_string());
                    }
                }
                Some("tool_use") => {
                    if let Some(name) = block.get("name").and_then(|n| n.as_str()) {
                        parts.push(format!("[called {name}]"));
                    }
                }
                _ => {}
            }
        }
    }
    parts.join(" ")
}

/// Local, no-network fallback: keep the head and tail of the transcript.
fn truncation_summary(transcript: &str) -> String {
    const HEAD: usize = 1200;
    const TAIL: usize = 600;
    if transcript.len() <= HEAD + TAIL {
        return transcript.to_string();
    }
    let head_end = floor_char_boundary(transcript, HEAD);
    let tail_start = floor_char_boundary(transcript, transcript.len() - TAIL);
    format!(
        "{}\n[... middle of conversation omitted ...]\n{}",
        &transcript[..head_end],
        &transcript[tail_start..]
    )
}

/// Largest index `<= index` that sits on a UTF-8 boundary.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
