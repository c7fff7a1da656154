//! Stdio transport — JSON-RPC over a child process's stdin/stdout.
//!
//! Requests carry monotonic ids and are correlated to responses by a
//! pending map: a background reader task routes each incoming response to
//! the waiting caller. A per-request timeout evicts its pending entry;
//! process exit fails every pending request at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP server process has exited")]
    ProcessExited,

    #[error("timeout waiting for response to request {0}")]
    Timeout(u64),
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Stdio transport for one MCP server process.
pub struct StdioTransport {
    stdin: AsyncMutex<ChildStdin>,
    child: AsyncMutex<Child>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Spawn the child process and start the response reader task.
    pub fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        // Reader task: route responses to their waiting callers. On EOF
        // (process exit) every pending request is failed by dropping its
        // sender.
        {
            let pending = Arc::clone(&pending);
            let alive = Arc::clone(&alive);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let trimmed = line.trim();
                    if trimmed.is_empty() || !trimmed.starts_with('{') {
                        continue;
                    }
                    match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                        Ok(resp) => {
                            if let Some(tx) = pending.lock().remove(&resp.id) {
                                let _ = tx.send(resp);
                            } else {
                                tracing::debug!(id = resp.id, "response for unknown or evicted request");
                            }
                        }
                        Err(_) => {
                            // Server-initiated notification; nothing waits on it.
                            tracing::debug!(line = %trimmed, "skipping non-response message");
                        }
                    }
                }
                alive.store(false, Ordering::SeqCst);
                pending.lock().clear();
                tracing::debug!("MCP server stdout closed");
            });
        }

        Ok(Self {
            stdin: AsyncMutex::new(stdin),
            child: AsyncMutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            alive,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a request and wait up to [`REQUEST_TIMEOUT`] for its response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;
        tracing::debug!(id, method, "sending MCP request");

        if let Err(e) = self.write_line(&json).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            // Sender dropped: the reader task cleared pending on exit.
            Ok(Err(_)) => Err(TransportError::ProcessExited),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout(id))
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        let json = serde_json::to_string(&notif)?;
        self.write_line(&json).await
    }

    /// Close stdin, give the process a moment to exit, then kill it.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "MCP server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for MCP server process");
            }
            Err(_) => {
                tracing::warn!("MCP server did not exit within timeout, killing");
                let _ = child.kill().await;
            }
        }
        self.pending.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `cat` echoes lines back, so a request written as JSON comes back
    /// verbatim and parses as a response when it carries the same id.
    #[tokio::test]
    async fn echo_process_answers_request() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new()).unwrap();
        // The echoed request deserializes as a response with a matching id
        // (serde ignores the extra `method` field and fills result as None).
        let resp = transport.send_request("tools/list", None).await.unwrap();
        assert_eq!(resp.id, 1);
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new()).unwrap();
        let a = transport.send_request("a", None).await.unwrap();
        let b = transport.send_request("b", None).await.unwrap();
        assert_eq!(a.id + 1, b.id);
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn dead_process_fails_requests() {
        let transport = StdioTransport::spawn("true", &[], &HashMap::new()).unwrap();
        // Give `true` a moment to exit and the reader task to notice.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let err = transport.send_request("tools/list", None).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ProcessExited | TransportError::Io(_)
        ));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new()).unwrap();
        transport.shutdown().await;
        transport.shutdown().await;
        assert!(!transport.is_alive());
    }
}
