//! The safety pipeline — the ordered gates every tool call passes through
//! before and after execution:
//!
//! command inspector → egress policy → tool policy → operator approval →
//! executor (with tool-class retry) → outcome validator.
//!
//! All failures are materialized into the tool-result string (`Error: ...`)
//! so the model can react; the pipeline itself never raises, and a single
//! failed tool never aborts the turn.

use std::sync::Arc;

use aa_control::TraceBuffer;
use aa_domain::cancel::CancelToken;
use aa_domain::config::{ProjectConfig, Settings};
use aa_domain::error::Error;
use aa_domain::tool::{ToolCall, ToolResult};
use aa_mcp_client::McpManager;
use aa_safety::egress::{evaluate_egress, EgressRequest};
use aa_safety::inspector::inspect_command;
use aa_safety::policy::evaluate_tool;
use aa_safety::Decision;
use aa_tools::validator::{validate_outcome, ValidationOutcome};
use aa_tools::ToolExecutor;

use crate::approval::ApprovalCoordinator;
use crate::retry::{with_retry, Stage};

/// Everything the orchestrator needs to know about one dispatched call.
pub struct PipelineOutput {
    pub result: ToolResult,
    pub validation: Option<ValidationOutcome>,
    pub safety_violation: bool,
    pub retries: u32,
}

impl PipelineOutput {
    fn blocked(call_id: &str, message: String) -> Self {
        Self {
            result: ToolResult {
                id: call_id.to_string(),
                content: message,
                is_error: true,
            },
            validation: None,
            safety_violation: true,
            retries: 0,
        }
    }
}

pub struct SafetyPipeline {
    executor: ToolExecutor,
    project_config: ProjectConfig,
    settings: Settings,
    approvals: Arc<ApprovalCoordinator>,
    mcp: Arc<McpManager>,
}

impl SafetyPipeline {
    pub fn new(
        executor: ToolExecutor,
        project_config: ProjectConfig,
        settings: Settings,
        approvals: Arc<ApprovalCoordinator>,
        mcp: Arc<McpManager>,
    ) -> Self {
        Self {
            executor,
            project_config,
            settings,
            approvals,
            mcp,
        }
    }

    /// Run one tool call through every gate. Never returns an error; the
    /// model sees failures as `Error: ...` results.
    pub async fn run_tool(
        &self,
        run_id: &str,
        turn: u32,
        call: &ToolCall,
        cancel: &CancelToken,
        traces: &TraceBuffer,
    ) -> PipelineOutput {
        // ── Gate 1+2: command inspection and egress (run_command only) ──
        if call.name == "run_command" {
            let command = call
                .input
                .get("command")
                .and_then(|c| c.as_str())
                .unwrap_or_default();
            let inspection = inspect_command(command);

            traces.append(
                "safety.command_inspected",
                serde_json::json!({
                    "turn": turn,
                    "risk": inspection.risk,
                    "violations": inspection.violations,
                    "hosts": inspection.external_hosts,
                }),
            );

            if inspection.is_blocked() {
                let detail = inspection
                    .violations
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "critical risk".into());
                return PipelineOutput::blocked(
                    &call.id,
                    format!("Error: Blocked command: {detail}"),
                );
            }

            if inspection.network_sensitive || !inspection.external_hosts.is_empty() {
                let verdict = evaluate_egress(&EgressRequest {
                    hosts: &inspection.external_hosts,
                    mode: self.settings.egress_policy_mode,
                    allow_hosts: &self.settings.egress_allow_hosts,
                    exception_hosts: &self.settings.egress_exception_hosts,
                    critical: false,
                });

                match verdict.decision {
                    Decision::Allow => {
                        if !verdict.blocked_hosts.is_empty() {
                            traces.append(
                                "safety.egress_audit",
                                serde_json::json!({
                                    "turn": turn,
                                    "blockedHosts": verdict.blocked_hosts,
                                }),
                            );
                        }
                    }
                    Decision::Deny => {
                        return PipelineOutput::blocked(
                            &call.id,
                            format!("Error: Egress denied: {}", verdict.reason),
                        );
                    }
                    Decision::NeedsApproval => {
                        let approval = self
                            .approvals
                            .request_tool_approval(
                                run_id,
                                turn,
                                &call.name,
                                &call.input,
                                &format!(
                                    "Network access to {}",
                                    verdict.blocked_hosts.join(", ")
                                ),
                            )
                            .await;
                        if let Err(e) = approval {
                            return PipelineOutput::blocked(
                                &call.id,
                                format!("Error: Egress not approved: {e}"),
                            );
                        }
                    }
                }
            }
        }

        // ── Gate 3: tool policy ─────────────────────────────────────────
        let verdict = evaluate_tool(&call.name, &call.input, &self.project_config);
        match verdict.decision {
            Decision::Allow => {}
            Decision::Deny => {
                return PipelineOutput::blocked(&call.id, format!("Error: {}", verdict.reason));
            }
            Decision::NeedsApproval => {
                let approval = self
                    .approvals
                    .request_tool_approval(run_id, turn, &call.name, &call.input, &verdict.reason)
                    .await;
                if let Err(e) = approval {
                    return PipelineOutput::blocked(
                        &call.id,
                        format!("Error: Tool not approved: {e}"),
                    );
                }
            }
        }

        // ── Gate 4: execution with tool-class retry ─────────────────────
        let mut failed_attempts: u32 = 0;
        let execution = with_retry(
            Stage::Tool,
            || async {
                if call.name.starts_with("mcp__") {
                    self.mcp
                        .invoke_tool(&call.name, call.input.clone())
                        .await
                        .map_err(|e| Error::Tool {
                            tool: call.name.clone(),
                            message: e.to_string(),
                        })
                } else {
                    self.executor
                        .execute(&call.name, &call.input, cancel)
                        .await
                        .map_err(|message| {
                            if cancel.is_cancelled() {
                                Error::Cancelled
                            } else {
                                Error::Tool {
                                    tool: call.name.clone(),
                                    message,
                                }
                            }
                        })
                }
            },
            &mut |attempt, err| {
                failed_attempts = attempt;
                traces.append(
                    "execution.retry",
                    serde_json::json!({
                        "turn": turn,
                        "tool": call.name,
                        "attempt": attempt,
                        "error": err.to_string(),
                    }),
                );
            },
        )
        .await;

        let (content, is_error) = match execution {
            Ok(content) => (content, false),
            Err(e) => (format!("Error: {e}"), true),
        };

        // ── Gate 5: outcome validation ──────────────────────────────────
        let validation = validate_outcome(
            &call.name,
            &call.input,
            &content,
            self.executor.project_dir(),
        )
        .await;

        PipelineOutput {
            result: ToolResult {
                id: call.id.clone(),
                content,
                is_error,
            },
            validation: Some(validation),
            safety_violation: false,
            retries: failed_attempts,
        }
    }
}
