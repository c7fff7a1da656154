//! Outcome validator — inspects a tool's result after execution and
//! grades it, optionally against a verification profile embedded in the
//! tool input.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fs_ops::validate_path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Optional checks the model (or operator) can attach to a tool input
/// under the `verificationProfile` key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationProfile {
    pub expected_output_contains: Vec<String>,
    pub must_contain: Vec<String>,
    pub min_bytes: Option<u64>,
    pub quick_check_command: Option<String>,
}

impl VerificationProfile {
    /// Pull the embedded profile out of a tool input, if present.
    pub fn from_input(input: &Value) -> Self {
        input
            .get("verificationProfile")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub ok: bool,
    pub severity: Severity,
    /// How much weight this verdict deserves, in `[0, 1]`.
    pub confidence: f64,
    pub verification_type: String,
    pub checks: Vec<String>,
}

impl ValidationOutcome {
    fn passing(verification_type: &str, confidence: f64, checks: Vec<String>) -> Self {
        Self {
            ok: true,
            severity: Severity::Info,
            confidence,
            verification_type: verification_type.into(),
            checks,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Grade a tool result. `tool_result` is the string that will be (or was)
/// injected back into the conversation.
pub async fn validate_outcome(
    tool_name: &str,
    tool_input: &Value,
    tool_result: &str,
    project_dir: &Path,
) -> ValidationOutcome {
    let profile = VerificationProfile::from_input(tool_input);
    match tool_name {
        "run_command" => validate_command(tool_result, &profile),
        "write_file" => validate_file_write(tool_input, project_dir, &profile).await,
        "read_file" => validate_file_read(tool_result),
        _ => ValidationOutcome::passing("generic", 0.5, vec!["no checks for this tool".into()]),
    }
}

fn validate_command(tool_result: &str, profile: &VerificationProfile) -> ValidationOutcome {
    let mut checks = Vec::new();

    // Result format is `exit N\n<stdout>\n<stderr>`.
    let exit_code: Option<i32> = tool_result
        .lines()
        .next()
        .and_then(|l| l.strip_prefix("exit "))
        .and_then(|n| n.trim().parse().ok());

    match exit_code {
        Some(0) => checks.push("exit code 0".into()),
        Some(code) => {
            checks.push(format!("non-zero exit code {code}"));
            return ValidationOutcome {
                ok: false,
                severity: Severity::Error,
                confidence: 0.9,
                verification_type: "command".into(),
                checks,
            };
        }
        None => {
            checks.push("missing exit code line".into());
            return ValidationOutcome {
                ok: false,
                severity: Severity::Error,
                confidence: 0.6,
                verification_type: "command".into(),
                checks,
            };
        }
    }

    let missing: Vec<&String> = profile
        .expected_output_contains
        .iter()
        .filter(|frag| !tool_result.contains(frag.as_str()))
        .collect();
    if !missing.is_empty() {
        checks.push(format!("{} expected fragment(s) missing from output", missing.len()));
        return ValidationOutcome {
            ok: false,
            severity: Severity::Warn,
            confidence: 0.7,
            verification_type: "command".into(),
            checks,
        };
    }
    if !profile.expected_output_contains.is_empty() {
        checks.push("all expected fragments present".into());
    }

    ValidationOutcome::passing("command", 0.8, checks)
}

async fn validate_file_write(
    tool_input: &Value,
    project_dir: &Path,
    profile: &VerificationProfile,
) -> ValidationOutcome {
    let mut checks = Vec::new();

    let error = |checks: Vec<String>| ValidationOutcome {
        ok: false,
        severity: Severity::Error,
        confidence: 0.9,
        verification_type: "file_write".into(),
        checks,
    };
    let warn = |checks: Vec<String>| ValidationOutcome {
        ok: false,
        severity: Severity::Warn,
        confidence: 0.7,
        verification_type: "file_write".into(),
        checks,
    };

    let rel_path = match tool_input.get("path").and_then(|v| v.as_str()) {
        Some(p) => p,
        None => {
            checks.push("input has no path".into());
            return error(checks);
        }
    };

    let abs = match validate_path(project_dir, rel_path) {
        Ok(p) => p,
        Err(e) => {
            checks.push(e);
            return error(checks);
        }
    };

    let content = match tokio::fs::read(&abs).await {
        Ok(bytes) => bytes,
        Err(_) => {
            checks.push(format!("file '{rel_path}' absent after write"));
            return error(checks);
        }
    };
    checks.push(format!("file exists ({} bytes)", content.len()));

    if content.is_empty() {
        checks.push("file is empty".into());
        return warn(checks);
    }
    if let Some(min) = profile.min_bytes {
        if (content.len() as u64) < min {
            checks.push(format!("file below minimum size {min}"));
            return warn(checks);
        }
        checks.push("minimum size satisfied".into());
    }

    let text = String::from_utf8_lossy(&content);
    let missing: Vec<&String> = profile
        .must_contain
        .iter()
        .filter(|token| !text.contains(token.as_str()))
        .collect();
    if !missing.is_empty() {
        checks.push(format!("{} required token(s) missing", missing.len()));
        return warn(checks);
    }
    if !profile.must_contain.is_empty() {
        checks.push("all required tokens present".into());
    }

    ValidationOutcome::passing("file_write", 0.85, checks)
}

fn validate_file_read(tool_result: &str) -> ValidationOutcome {
    if tool_result.trim().is_empty() {
        return ValidationOutcome {
            ok: false,
            severity: Severity::Warn,
            confidence: 0.6,
            verification_type: "file_read".into(),
            checks: vec!["read returned empty content".into()],
        };
    }
    ValidationOutcome::passing(
        "file_read",
        0.7,
        vec![format!("read {} chars", tool_result.len())],
    )
}
