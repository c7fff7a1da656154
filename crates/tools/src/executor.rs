//! Tool executor — routes a validated tool call to its implementation.

use std::path::PathBuf;

use aa_domain::cancel::CancelToken;
use aa_domain::tool::ToolDefinition;
use serde_json::Value;

use crate::{fs_ops, git, run_cmd, search};

/// Executes the closed tool set against one project directory.
///
/// Cheap to clone; read-only batches clone one executor per concurrent
/// sub-task so no state is shared across them.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    project_dir: PathBuf,
}

impl ToolExecutor {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    pub fn project_dir(&self) -> &std::path::Path {
        &self.project_dir
    }

    /// Execute one tool call. The Ok string is returned to the model
    /// verbatim; the Err string becomes an `Error: ...` tool result.
    ///
    /// `ask_user` and `mcp__*` are the orchestrator's responsibility and
    /// fail here if they slip through.
    pub async fn execute(
        &self,
        tool_name: &str,
        input: &Value,
        cancel: &CancelToken,
    ) -> Result<String, String> {
        if cancel.is_cancelled() {
            return Err("run cancelled".into());
        }

        match tool_name {
            "read_file" => {
                let req = parse_input(input)?;
                fs_ops::read_file(&self.project_dir, req).await
            }
            "write_file" => {
                let req = parse_input(input)?;
                fs_ops::write_file(&self.project_dir, req).await
            }
            "edit_file" => {
                let req = parse_input(input)?;
                fs_ops::edit_file(&self.project_dir, req).await
            }
            "list_directory" => {
                let req = parse_input(input)?;
                fs_ops::list_directory(&self.project_dir, req).await
            }
            "run_command" => {
                let req = parse_input(input)?;
                run_cmd::run_command(&self.project_dir, req, cancel).await
            }
            "search_code" => {
                let req = parse_input(input)?;
                search::search_code(&self.project_dir, req).await
            }
            "glob_files" => {
                let req = parse_input(input)?;
                search::glob_files(&self.project_dir, req).await
            }
            "git_status" => git::git_status(&self.project_dir).await,
            "git_diff" => {
                let req = parse_input(input)?;
                git::git_diff(&self.project_dir, req).await
            }
            "git_commit" => {
                let req = parse_input(input)?;
                git::git_commit(&self.project_dir, req).await
            }
            other => Err(format!("tool '{other}' is not executable here")),
        }
    }
}

fn parse_input<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T, String> {
    serde_json::from_value(input.clone()).map_err(|e| format!("invalid tool input: {e}"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool definitions advertised to the model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the definition list sent with every provider call.
pub fn builtin_tool_definitions() -> Vec<ToolDefinition> {
    fn def(name: &str, description: &str, parameters: Value) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    vec![
        def(
            "read_file",
            "Read a file from the project (truncated past 32 KiB).",
            serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
        ),
        def(
            "write_file",
            "Create or overwrite a file. Parent directories are created.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        ),
        def(
            "edit_file",
            "Replace a literal search string in a file (first match, or all with replaceAll).",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "search": { "type": "string" },
                    "replace": { "type": "string" },
                    "replaceAll": { "type": "boolean" }
                },
                "required": ["path", "search", "replace"]
            }),
        ),
        def(
            "run_command",
            "Run a single-line shell command in the project directory (30s timeout).",
            serde_json::json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"]
            }),
        ),
        def(
            "search_code",
            "Case-insensitive regex search over project files (max 200 hits).",
            serde_json::json!({
                "type": "object",
                "properties": { "pattern": { "type": "string" } },
                "required": ["pattern"]
            }),
        ),
        def(
            "glob_files",
            "List project files matching a glob; * is one segment, ** any depth (max 500).",
            serde_json::json!({
                "type": "object",
                "properties": { "pattern": { "type": "string" } },
                "required": ["pattern"]
            }),
        ),
        def(
            "list_directory",
            "List entries of a project directory.",
            serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } }
            }),
        ),
        def(
            "git_status",
            "Show the project's git status.",
            serde_json::json!({ "type": "object", "properties": {} }),
        ),
        def(
            "git_diff",
            "Show unstaged changes, optionally limited to one path.",
            serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } }
            }),
        ),
        def(
            "git_commit",
            "Stage all changes and commit with the given message.",
            serde_json::json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            }),
        ),
        def(
            "ask_user",
            "Ask the operator a question and wait for their answer.",
            serde_json::json!({
                "type": "object",
                "properties": { "question": { "type": "string" } },
                "required": ["question"]
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn dispatch_write_then_read() {
        let ws = TempDir::new().unwrap();
        let exec = ToolExecutor::new(ws.path());
        let cancel = CancelToken::new();

        exec.execute(
            "write_file",
            &serde_json::json!({"path": "hello.py", "content": "print('Hello')"}),
            &cancel,
        )
        .await
        .unwrap();

        let content = exec
            .execute("read_file", &serde_json::json!({"path": "hello.py"}), &cancel)
            .await
            .unwrap();
        assert_eq!(content, "print('Hello')");
    }

    #[tokio::test]
    async fn invalid_input_shape_is_an_error() {
        let ws = TempDir::new().unwrap();
        let exec = ToolExecutor::new(ws.path());
        let err = exec
            .execute("read_file", &serde_json::json!({"file": "x"}), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.contains("invalid tool input"));
    }

    #[tokio::test]
    async fn ask_user_is_not_executable_here() {
        let ws = TempDir::new().unwrap();
        let exec = ToolExecutor::new(ws.path());
        let err = exec
            .execute("ask_user", &serde_json::json!({"question": "?"}), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.contains("not executable"));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let ws = TempDir::new().unwrap();
        let exec = ToolExecutor::new(ws.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = exec
            .execute("read_file", &serde_json::json!({"path": "x"}), &cancel)
            .await
            .unwrap_err();
        assert!(err.contains("cancelled"));
    }

    #[test]
    fn definitions_cover_the_closed_tool_set() {
        let defs = builtin_tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        for required in [
            "read_file",
            "write_file",
            "edit_file",
            "run_command",
            "search_code",
            "glob_files",
            "list_directory",
            "git_status",
            "git_diff",
            "git_commit",
            "ask_user",
        ] {
            assert!(names.contains(&required), "missing {required}");
        }
    }
}
