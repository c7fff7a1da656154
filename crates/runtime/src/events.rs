//! RunStatus events — the live stream the operator UI renders.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Events emitted while a run executes, in emission order per run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RunStatusEvent {
    /// The run moved to a new lifecycle state.
    #[serde(rename = "state")]
    State { state: String },

    /// Incremental assistant text.
    #[serde(rename = "token")]
    Token { text: String },

    /// A tool call is about to run.
    #[serde(rename = "tool_call")]
    ToolCall {
        call_id: String,
        tool_name: String,
        input: Value,
    },

    /// A tool call finished (or failed; errors travel in `content`).
    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },

    /// The agent is waiting on an operator answer.
    #[serde(rename = "ask_user")]
    AskUser { prompt_id: String, question: String },

    /// The run completed; `summary` echoes the run record.
    #[serde(rename = "completed")]
    Completed { summary: String },

    /// Post-completion follow-up suggestions.
    #[serde(rename = "follow_ups")]
    FollowUps { suggestions: Vec<FollowUpSuggestion> },

    /// Fatal or user-visible error.
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        state: String,
    },
}

/// One of the three static follow-up actions offered after completion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpSuggestion {
    pub kind: String,
    pub title: String,
    pub objective_hint: String,
}

/// Sender half handed to the orchestrator. Sends never block the loop:
/// a full or closed channel just drops the event.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<RunStatusEvent>>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunStatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything (headless runs, tests).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: RunStatusEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
