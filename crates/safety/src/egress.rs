//! Egress policy — decides whether a command's external hosts may be
//! reached, given the operator's mode and allowlists.

use aa_domain::config::EgressMode;
use serde::Serialize;

use crate::Decision;

/// How many unknown hosts an enforce-mode command may carry before the
/// decision hardens from needs-approval to deny.
const APPROVAL_HOST_LIMIT: usize = 2;

/// Input to one egress decision.
#[derive(Debug, Clone)]
pub struct EgressRequest<'a> {
    pub hosts: &'a [String],
    pub mode: EgressMode,
    pub allow_hosts: &'a [String],
    pub exception_hosts: &'a [String],
    /// True when the command inspector already classified the command as
    /// critical; enforce mode then denies instead of asking.
    pub critical: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressVerdict {
    #[serde(skip)]
    pub decision: Decision,
    pub blocked_hosts: Vec<String>,
    pub reason: String,
}

/// Decide whether the given hosts may be reached.
pub fn evaluate_egress(req: &EgressRequest<'_>) -> EgressVerdict {
    let unknown: Vec<String> = req
        .hosts
        .iter()
        .filter(|h| {
            !req.allow_hosts.iter().any(|a| a.eq_ignore_ascii_case(h))
                && !req.exception_hosts.iter().any(|a| a.eq_ignore_ascii_case(h))
        })
        .cloned()
        .collect();

    match req.mode {
        EgressMode::Off => EgressVerdict {
            decision: Decision::Allow,
            blocked_hosts: Vec::new(),
            reason: "egress policy disabled".into(),
        },
        EgressMode::Audit => EgressVerdict {
            decision: Decision::Allow,
            reason: if unknown.is_empty() {
                "all hosts allowlisted".into()
            } else {
                format!("audit mode: {} host(s) outside allowlist", unknown.len())
            },
            blocked_hosts: unknown,
        },
        EgressMode::Enforce => {
            if unknown.is_empty() {
                return EgressVerdict {
                    decision: Decision::Allow,
                    blocked_hosts: Vec::new(),
                    reason: "all hosts allowlisted".into(),
                };
            }
            if req.critical {
                return EgressVerdict {
                    decision: Decision::Deny,
                    reason: "critical command with non-allowlisted hosts".into(),
                    blocked_hosts: unknown,
                };
            }
            if unknown.len() <= APPROVAL_HOST_LIMIT {
                EgressVerdict {
                    decision: Decision::NeedsApproval,
                    reason: format!("{} host(s) require operator approval", unknown.len()),
                    blocked_hosts: unknown,
                }
            } else {
                EgressVerdict {
                    decision: Decision::Deny,
                    reason: format!("{} non-allowlisted hosts exceed the approval limit", unknown.len()),
                    blocked_hosts: unknown,
                }
            }
        }
    }
}
