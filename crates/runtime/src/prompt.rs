//! User-prompt coordinator — the `ask_user` tool.
//!
//! Creates a prompt record, announces it on the event stream, then polls
//! the control plane once per second until the operator answers, the
//! prompt expires, or the run is cancelled.

use std::sync::Arc;
use std::time::Duration;

use aa_control::ControlPlaneClient;
use aa_domain::cancel::CancelToken;
use aa_domain::error::{Error, Result};
use aa_domain::run::PromptStatus;
use chrono::Utc;

use crate::events::{EventSink, RunStatusEvent};

/// Prompts expire fifteen minutes after creation.
pub const PROMPT_WINDOW_MINUTES: i64 = 15;

/// Poll cadence while waiting for the operator.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct PromptCoordinator {
    client: Arc<ControlPlaneClient>,
}

impl PromptCoordinator {
    pub fn new(client: Arc<ControlPlaneClient>) -> Self {
        Self { client }
    }

    /// Ask the operator a question and block the turn until it resolves.
    /// The answer comes back as the synthetic tool-result string
    /// `Operator answer: <text>`.
    pub async fn ask_user(
        &self,
        run_id: &str,
        thread_id: &str,
        turn: u32,
        question: &str,
        sink: &EventSink,
        cancel: &CancelToken,
    ) -> Result<String> {
        let expires_at = Utc::now() + chrono::Duration::minutes(PROMPT_WINDOW_MINUTES);
        let prompt = self
            .client
            .create_prompt(run_id, thread_id, turn, question, expires_at)
            .await?;

        sink.emit(RunStatusEvent::AskUser {
            prompt_id: prompt.prompt_id.clone(),
            question: question.to_string(),
        });

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let current = match self.client.get_prompt(&prompt.prompt_id).await {
                Ok(p) => p,
                Err(e) => {
                    // Transient control-plane hiccups do not end the wait.
                    tracing::debug!(error = %e, "prompt poll failed, retrying");
                    continue;
                }
            };

            match current.status {
                PromptStatus::Pending => continue,
                PromptStatus::Answered => {
                    let text = current.response_text.unwrap_or_default();
                    return Ok(format!("Operator answer: {text}"));
                }
                PromptStatus::Expired => {
                    return Err(Error::Other("operator prompt expired unanswered".into()));
                }
                PromptStatus::Cancelled => {
                    return Err(Error::Other("operator prompt was cancelled".into()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_run_stops_the_wait() {
        // The control-plane is unreachable, so create_prompt fails fast;
        // what matters here is that the error path is an Err, not a hang.
        let coordinator = PromptCoordinator::new(Arc::new(ControlPlaneClient::new(
            "http://127.0.0.1:1",
        )));
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = coordinator
            .ask_user("r1", "t1", 1, "proceed?", &EventSink::disabled(), &cancel)
            .await;
        assert!(result.is_err());
    }
}
