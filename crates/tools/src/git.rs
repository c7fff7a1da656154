//! Git tools — `git_status`, `git_diff`, `git_commit`.
//!
//! Thin wrappers that spawn the `git` binary with fixed argument vectors
//! (never through a shell) inside the project directory.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;

/// Git operations get a shorter leash than `run_command`.
const GIT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Deserialize)]
pub struct GitDiffRequest {
    /// Optional path to restrict the diff to.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitCommitRequest {
    pub message: String,
}

async fn run_git(project_root: &Path, args: &[&str]) -> Result<String, String> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(project_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(GIT_TIMEOUT, cmd.output())
        .await
        .map_err(|_| format!("git {} timed out", args.first().unwrap_or(&"")))?
        .map_err(|e| format!("failed to run git: {e}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(format!(
            "git {} failed (exit {}): {}",
            args.first().unwrap_or(&""),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }

    Ok(if stdout.trim().is_empty() { stderr } else { stdout })
}

pub async fn git_status(project_root: &Path) -> Result<String, String> {
    let out = run_git(project_root, &["status", "--porcelain=v1", "--branch"]).await?;
    if out.trim().is_empty() {
        Ok("working tree clean".into())
    } else {
        Ok(out)
    }
}

pub async fn git_diff(project_root: &Path, req: GitDiffRequest) -> Result<String, String> {
    let out = match req.path.as_deref() {
        Some(path) => run_git(project_root, &["diff", "--", path]).await?,
        None => run_git(project_root, &["diff"]).await?,
    };
    if out.trim().is_empty() {
        Ok("no unstaged changes".into())
    } else {
        Ok(out)
    }
}

/// Stage everything and commit. The tool policy already guarantees a
/// non-empty message.
pub async fn git_commit(project_root: &Path, req: GitCommitRequest) -> Result<String, String> {
    run_git(project_root, &["add", "-A"]).await?;
    run_git(project_root, &["commit", "-m", &req.message]).await
}
