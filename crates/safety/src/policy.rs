//! Per-tool policy — allow/approve/deny decisions that do not depend on
//! command parsing.

use aa_domain::config::ProjectConfig;
use serde_json::Value;

use crate::Decision;

/// Outcome of a tool-policy check.
#[derive(Debug, Clone)]
pub struct PolicyVerdict {
    pub decision: Decision,
    pub reason: String,
}

impl PolicyVerdict {
    fn allow(reason: impl Into<String>) -> Self {
        Self { decision: Decision::Allow, reason: reason.into() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { decision: Decision::Deny, reason: reason.into() }
    }

    fn approval(reason: impl Into<String>) -> Self {
        Self { decision: Decision::NeedsApproval, reason: reason.into() }
    }
}

/// Tools the model may call. MCP tools are validated separately because
/// their set is discovered at runtime.
const KNOWN_TOOLS: &[&str] = &[
    "write_file",
    "read_file",
    "edit_file",
    "run_command",
    "search_code",
    "glob_files",
    "list_directory",
    "git_status",
    "git_diff",
    "git_commit",
    "ask_user",
];

/// Decide whether a tool call may proceed, per the tool's own rules and
/// the project's allowlist (when one is declared).
pub fn evaluate_tool(tool_name: &str, input: &Value, project: &ProjectConfig) -> PolicyVerdict {
    let is_mcp = tool_name.starts_with("mcp__");

    if !is_mcp && !KNOWN_TOOLS.contains(&tool_name) {
        return PolicyVerdict::deny(format!("unknown tool '{tool_name}'"));
    }

    // A declared project allowlist confines the run to the listed tools.
    if !project.allowed_tools.is_empty()
        && !project.allowed_tools.iter().any(|t| t == tool_name)
    {
        return PolicyVerdict::deny(format!(
            "tool '{tool_name}' is not in the project allowlist"
        ));
    }

    match tool_name {
        "git_commit" => {
            let message = input.get("message").and_then(|v| v.as_str()).unwrap_or("");
            if message.trim().is_empty() {
                PolicyVerdict::deny("git_commit requires a non-empty message")
            } else {
                PolicyVerdict::allow("commit message present")
            }
        }
        "git_diff" | "git_status" => PolicyVerdict::allow("read-only git operation"),
        name if name.starts_with("mcp__") => {
            PolicyVerdict::approval(format!("external MCP tool '{name}'"))
        }
        _ => PolicyVerdict::allow("tool permitted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_tool_allowed() {
        let v = evaluate_tool("read_file", &json!({"path": "a"}), &ProjectConfig::default());
        assert_eq!(v.decision, Decision::Allow);
    }

    #[test]
    fn unknown_tool_denied() {
        let v = evaluate_tool("format_disk", &json!({}), &ProjectConfig::default());
        assert_eq!(v.decision, Decision::Deny);
    }

    #[test]
    fn allowlist_confines_tools() {
        let project = ProjectConfig {
            allowed_tools: vec!["read_file".into(), "search_code".into()],
        };
        assert_eq!(
            evaluate_tool("read_file", &json!({}), &project).decision,
            Decision::Allow
        );
        assert_eq!(
            evaluate_tool("write_file", &json!({}), &project).decision,
            Decision::Deny
        );
    }

    #[test]
    fn git_commit_requires_message() {
        let empty = evaluate_tool("git_commit", &json!({"message": "  "}), &ProjectConfig::default());
        assert_eq!(empty.decision, Decision::Deny);

        let missing = evaluate_tool("git_commit", &json!({}), &ProjectConfig::default());
        assert_eq!(missing.decision, Decision::Deny);

        let ok = evaluate_tool(
            "git_commit",
            &json!({"message": "fix: handle empty input"}),
            &ProjectConfig::default(),
        );
        assert_eq!(ok.decision, Decision::Allow);
    }

    #[test]
    fn mcp_tools_need_approval() {
        let v = evaluate_tool("mcp__notes__create", &json!({}), &ProjectConfig::default());
        assert_eq!(v.decision, Decision::NeedsApproval);
    }

    #[test]
    fn mcp_tools_respect_allowlist() {
        let project = ProjectConfig {
            allowed_tools: vec!["read_file".into()],
        };
        let v = evaluate_tool("mcp__notes__create", &json!({}), &project);
        assert_eq!(v.decision, Decision::Deny);
    }
}
