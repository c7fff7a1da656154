//! Approval coordinator — gates run starts and sensitive tool calls
//! behind an operator decision, bound to a context hash so an approval
//! cannot be replayed against a different call.

use std::sync::Arc;

use aa_control::{ControlPlaneClient, ResolveOutcome};
use aa_domain::error::{Error, Result};
use aa_domain::hash::approval_context_hash;
use aa_domain::run::ApprovalScope;
use chrono::{Duration, Utc};
use serde_json::Value;

/// Tool approvals expire ten minutes after creation.
pub const TOOL_APPROVAL_WINDOW_MINUTES: i64 = 10;

/// What the operator is asked to confirm.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub run_id: String,
    pub scope: ApprovalScope,
    pub reason: String,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
}

/// The operator-facing prompt surface. The desktop shell shows a native
/// dialog; the CLI asks on stdin; tests answer directly.
#[async_trait::async_trait]
pub trait OperatorGate: Send + Sync {
    async fn confirm(&self, request: &ApprovalRequest) -> bool;
}

/// A gate with a fixed answer (headless runs, tests).
pub struct StaticGate(pub bool);

#[async_trait::async_trait]
impl OperatorGate for StaticGate {
    async fn confirm(&self, _request: &ApprovalRequest) -> bool {
        self.0
    }
}

pub struct ApprovalCoordinator {
    client: Arc<ControlPlaneClient>,
    gate: Arc<dyn OperatorGate>,
}

impl ApprovalCoordinator {
    pub fn new(client: Arc<ControlPlaneClient>, gate: Arc<dyn OperatorGate>) -> Self {
        Self { client, gate }
    }

    /// Run-scoped approval shown before any execution. `Ok(true)` means
    /// approved; `Ok(false)` means the operator rejected the run.
    pub async fn request_run_approval(&self, run_id: &str, objective: &str) -> Result<bool> {
        let request = ApprovalRequest {
            run_id: run_id.to_string(),
            scope: ApprovalScope::Run,
            reason: format!("Start run: {objective}"),
            tool_name: None,
            tool_input: None,
        };

        let approval = self
            .client
            .create_approval(run_id, ApprovalScope::Run, &request.reason, None, None, None, None)
            .await?;

        let approved = self.gate.confirm(&request).await;
        let outcome = self.client.resolve_approval(&approval.id, approved, None).await?;
        Ok(outcome == ResolveOutcome::Approved)
    }

    /// Tool-scoped approval, bound to `(run, turn, tool, input)` by the
    /// context hash computed before the prompt is shown. Anything but an
    /// approved outcome is a denial carrying the server's reason.
    pub async fn request_tool_approval(
        &self,
        run_id: &str,
        turn: u32,
        tool_name: &str,
        tool_input: &Value,
        reason: &str,
    ) -> Result<()> {
        let context_hash = approval_context_hash(run_id, turn, tool_name, tool_input);
        let expires_at = Utc::now() + Duration::minutes(TOOL_APPROVAL_WINDOW_MINUTES);

        let approval = self
            .client
            .create_approval(
                run_id,
                ApprovalScope::Tool,
                reason,
                Some(tool_name),
                Some(tool_input),
                Some(&context_hash),
                Some(expires_at),
            )
            .await?;

        let request = ApprovalRequest {
            run_id: run_id.to_string(),
            scope: ApprovalScope::Tool,
            reason: reason.to_string(),
            tool_name: Some(tool_name.to_string()),
            tool_input: Some(tool_input.clone()),
        };
        let approved = self.gate.confirm(&request).await;

        // Carry the hash through the resolve call verbatim.
        let outcome = self
            .client
            .resolve_approval(&approval.id, approved, Some(&context_hash))
            .await?;

        match outcome {
            ResolveOutcome::Approved => Ok(()),
            ResolveOutcome::Rejected => {
                Err(Error::ApprovalRejected("operator rejected the request".into()))
            }
            ResolveOutcome::Expired => Err(Error::ApprovalRejected("approval expired".into())),
            ResolveOutcome::AlreadyResolved => {
                Err(Error::ApprovalRejected("approval was already resolved".into()))
            }
            ResolveOutcome::ContextMismatch => Err(Error::ApprovalRejected(
                "approval context hash mismatch".into(),
            )),
        }
    }

    /// Gate applied before resume/retry: no live pending tool approvals,
    /// and no approved approval whose expiry has already passed.
    pub async fn check_resume_approvals(&self, run_id: &str) -> Result<()> {
        let approvals = self.client.list_approvals(run_id).await?;
        let now = Utc::now();

        for approval in &approvals {
            if approval.scope != ApprovalScope::Tool {
                continue;
            }
            if approval.is_live_pending(now) {
                return Err(Error::ApprovalRejected(format!(
                    "approval {} is still pending; resolve it before resuming",
                    approval.id
                )));
            }
            if approval.is_stale_approved(now) {
                return Err(Error::ApprovalRejected(format!(
                    "approval {} was approved but has expired; approvals cannot be reused",
                    approval.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aa_domain::run::{Approval, ApprovalStatus};

    fn tool_approval(status: ApprovalStatus, expires_in_minutes: i64) -> Approval {
        Approval {
            id: "a1".into(),
            run_id: "r1".into(),
            scope: ApprovalScope::Tool,
            reason: "egress".into(),
            status,
            tool_name: Some("run_command".into()),
            tool_input: None,
            expires_at: Some(Utc::now() + Duration::minutes(expires_in_minutes)),
            context_hash: Some("h".into()),
        }
    }

    #[test]
    fn live_pending_blocks_resume_semantics() {
        let pending = tool_approval(ApprovalStatus::Pending, 5);
        assert!(pending.is_live_pending(Utc::now()));

        let expired_pending = tool_approval(ApprovalStatus::Pending, -5);
        assert!(!expired_pending.is_live_pending(Utc::now()));
    }

    #[test]
    fn stale_approved_blocks_resume_semantics() {
        let stale = tool_approval(ApprovalStatus::Approved, -5);
        assert!(stale.is_stale_approved(Utc::now()));

        let fresh = tool_approval(ApprovalStatus::Approved, 5);
        assert!(!fresh.is_stale_approved(Utc::now()));
    }

    #[tokio::test]
    async fn static_gate_answers() {
        let request = ApprovalRequest {
            run_id: "r1".into(),
            scope: ApprovalScope::Tool,
            reason: "test".into(),
            tool_name: None,
            tool_input: None,
        };
        assert!(StaticGate(true).confirm(&request).await);
        assert!(!StaticGate(false).confirm(&request).await);
    }
}
