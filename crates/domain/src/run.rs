//! Control-plane record shapes.
//!
//! These structs mirror the rows the control plane stores; field names are
//! camelCase on the wire because the control plane predates this core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub project_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// The original inputs to a run, kept verbatim inside the checkpoint so a
/// retry can re-enter the loop with exactly what the operator asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInput {
    pub project_id: String,
    /// Absolute path of the project the agent may touch.
    pub project_dir: String,
    pub objective: String,
    pub provider_id: String,
    pub model: String,
    /// Routing mode label recorded against model-performance samples.
    #[serde(default = "default_routing_mode")]
    pub routing_mode: String,
    /// Fragments the final output is scored against, when the operator
    /// supplied any.
    #[serde(default)]
    pub expected_fragments: Vec<String>,
}

fn default_routing_mode() -> String {
    "balanced".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approvals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    Run,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub id: String,
    pub run_id: String,
    pub scope: ApprovalScope,
    pub reason: String,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_hash: Option<String>,
}

impl Approval {
    /// An approved record whose expiry is already in the past. Such an
    /// approval must not be honoured by resume/retry.
    pub fn is_stale_approved(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Approved
            && self.expires_at.map(|t| t < now).unwrap_or(false)
    }

    /// A pending record that has not yet expired.
    pub fn is_live_pending(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending
            && self.expires_at.map(|t| t >= now).unwrap_or(true)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User prompts (ask_user)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    Pending,
    Answered,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPrompt {
    pub prompt_id: String,
    pub run_id: String,
    pub thread_id: String,
    pub turn_number: u32,
    pub prompt_text: String,
    pub status: PromptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    pub expires_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persisted execution state (the checkpoint)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Running,
    Checkpointed,
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMarker {
    Planning,
    Executing,
    Finalizing,
}

/// Counters accumulated over a run's lifetime; survives resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub action_count: u32,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub retries: u32,
    pub validation_failures: u32,
    pub safety_violations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointInfo {
    pub at: DateTime<Utc>,
    pub reason: String,
    pub message_count: usize,
}

/// Attests which turn and message count the persisted state refers to.
/// Resume without a boundary is refused as non-deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBoundary {
    pub turn: u32,
    pub reason: String,
    pub context_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub run_id: String,
    pub phase: ExecutionPhase,
    pub phase_marker: PhaseMarker,
    pub turn: u32,
    pub input: RunInput,
    pub stats: RunStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_boundary: Option<ReplayBoundary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verification artifacts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationResult {
    Pass,
    Fail,
    Warning,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationArtifact {
    pub artifact_id: String,
    pub run_id: String,
    pub verification_type: String,
    pub artifact_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_content: Option<String>,
    pub verification_result: VerificationResult,
    pub checks: Vec<String>,
    pub verified_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model performance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPerformanceSample {
    pub provider_id: String,
    pub model: String,
    pub routing_mode: String,
    pub success: bool,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub aggregate_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_terminal() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::AwaitingApproval.is_terminal());
    }

    #[test]
    fn execution_state_serializes_camel_case() {
        let state = ExecutionState {
            run_id: "r1".into(),
            phase: ExecutionPhase::Checkpointed,
            phase_marker: PhaseMarker::Executing,
            turn: 3,
            input: RunInput {
                project_id: "p1".into(),
                project_dir: "/tmp/proj".into(),
                objective: "do the thing".into(),
                provider_id: "openai".into(),
                model: "gpt-4o".into(),
                routing_mode: "balanced".into(),
                expected_fragments: vec![],
            },
            stats: RunStats::default(),
            checkpoint: None,
            replay_boundary: None,
            last_error: None,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"runId\":\"r1\""));
        assert!(json.contains("\"phase\":\"checkpointed\""));
        assert!(json.contains("\"phaseMarker\":\"executing\""));
        assert!(json.contains("\"safetyViolations\":0"));
        assert!(!json.contains("replayBoundary"));
    }

    #[test]
    fn stale_approved_detection() {
        let mut a = Approval {
            id: "a1".into(),
            run_id: "r1".into(),
            scope: ApprovalScope::Tool,
            reason: "egress".into(),
            status: ApprovalStatus::Approved,
            tool_name: Some("run_command".into()),
            tool_input: None,
            expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
            context_hash: None,
        };
        assert!(a.is_stale_approved(Utc::now()));

        a.expires_at = Some(Utc::now() + chrono::Duration::minutes(5));
        assert!(!a.is_stale_approved(Utc::now()));

        a.status = ApprovalStatus::Pending;
        assert!(a.is_live_pending(Utc::now()));
        a.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        assert!(!a.is_live_pending(Utc::now()));
    }

    #[test]
    fn prompt_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&PromptStatus::Answered).unwrap(),
            "\"answered\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::AwaitingApproval).unwrap(),
            "\"awaiting_approval\""
        );
    }
}
