//! `run_command` — spawn a single shell command with a hard wall timeout
//! and bounded output capture.
//!
//! Contract: stdin is closed, stdout/stderr are capped at 1 MiB each
//! (rolling: the oldest output is dropped first), the wall clock stops the
//! command at 30 seconds with `exit 124`, and the result is always
//! `exit N\n<stdout>\n<stderr>`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use aa_domain::cancel::CancelToken;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;

/// Hard wall timeout for every command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Rolling cap for each of stdout and stderr.
pub const OUTPUT_CAP_BYTES: usize = 1024 * 1024;

/// Exit code reported when the wall timeout fires (mirrors GNU timeout).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone, Deserialize)]
pub struct RunCommandRequest {
    pub command: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rolling output buffer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded byte buffer that drops its oldest contents when full.
#[derive(Default)]
struct RollingBuffer {
    bytes: Vec<u8>,
    cap: usize,
    dropped: usize,
}

impl RollingBuffer {
    fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.cap {
            let excess = self.bytes.len() - self.cap;
            self.bytes.drain(..excess);
            self.dropped += excess;
        }
    }

    fn into_string(self) -> String {
        let text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.dropped > 0 {
            format!("[{} bytes of earlier output dropped]\n{text}", self.dropped)
        } else {
            text
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reject commands that smuggle structure past the single-line contract.
/// The command inspector has its own richer checks; this is the executor's
/// last line before spawn.
fn reject_before_spawn(command: &str) -> Option<String> {
    if command.contains('\n') || command.contains('\r') {
        return Some("multi-line commands are rejected".into());
    }
    if command.contains("$(") || command.contains('`') {
        return Some("command substitution is rejected".into());
    }
    None
}

/// Run a command under `sh -c` inside the project directory.
pub async fn run_command(
    project_root: &Path,
    req: RunCommandRequest,
    cancel: &CancelToken,
) -> Result<String, String> {
    if let Some(reason) = reject_before_spawn(&req.command) {
        return Err(reason);
    }

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&req.command)
        .current_dir(project_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| format!("failed to spawn: {e}"))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(drain(stdout));
    let stderr_task = tokio::spawn(drain(stderr));

    let cancel = cancel.clone();
    let mut poll = tokio::time::interval(Duration::from_millis(50));
    let deadline = tokio::time::sleep(COMMAND_TIMEOUT);
    tokio::pin!(deadline);

    let exit_code = loop {
        tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => break status.code().unwrap_or(-1),
                    Err(e) => return Err(format!("failed to wait for command: {e}")),
                }
            }
            _ = &mut deadline => {
                let _ = child.kill().await;
                break TIMEOUT_EXIT_CODE;
            }
            _ = poll.tick() => {
                if cancel.is_cancelled() {
                    let _ = child.kill().await;
                    return Err("command cancelled".into());
                }
            }
        }
    };

    let stdout = stdout_task.await.unwrap_or_default().into_string();
    let stderr = stderr_task.await.unwrap_or_default().into_string();

    tracing::debug!(
        command = %req.command,
        exit_code,
        stdout_len = stdout.len(),
        stderr_len = stderr.len(),
        "command finished"
    );

    Ok(format!("exit {exit_code}\n{stdout}\n{stderr}"))
}

async fn drain(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> RollingBuffer {
    let mut buf = RollingBuffer::new(OUTPUT_CAP_BYTES);
    if let Some(pipe) = pipe {
        let mut reader = BufReader::new(pipe);
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.push(&chunk[..n]),
            }
        }
    }
    buf
}
