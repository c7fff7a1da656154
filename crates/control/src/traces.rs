//! Fire-and-forget trace buffer.
//!
//! `append` schedules the HTTP write and keeps its handle; it never
//! surfaces errors. `flush` joins every pending write and is called once
//! before finalization, so turn N never waits on turn N-1's traces.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::client::ControlPlaneClient;

pub struct TraceBuffer {
    client: Arc<ControlPlaneClient>,
    run_id: String,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl TraceBuffer {
    pub fn new(client: Arc<ControlPlaneClient>, run_id: impl Into<String>) -> Self {
        Self {
            client,
            run_id: run_id.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Schedule a trace write. Returns immediately; failures are logged
    /// and swallowed.
    pub fn append(&self, event_type: &str, payload: Value) {
        let client = Arc::clone(&self.client);
        let run_id = self.run_id.clone();
        let event_type = event_type.to_string();

        let handle = tokio::spawn(async move {
            if let Err(e) = client.append_trace(&run_id, &event_type, payload).await {
                tracing::debug!(run_id = %run_id, event_type = %event_type, error = %e, "trace append failed");
            }
        });

        self.pending.lock().push(handle);
    }

    /// Await every write scheduled before this call.
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Number of writes still in flight (for tests and diagnostics).
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> TraceBuffer {
        // Nothing listens here; appends fail quietly, which is the contract.
        let client = Arc::new(ControlPlaneClient::new("http://127.0.0.1:1"));
        TraceBuffer::new(client, "run-1")
    }

    #[tokio::test]
    async fn append_is_nonblocking_and_flush_joins() {
        let traces = buffer();
        traces.append("agent.tool_call", serde_json::json!({"tool": "read_file"}));
        traces.append("execution.retry", serde_json::json!({"attempt": 1}));
        assert_eq!(traces.pending_count(), 2);

        traces.flush().await;
        assert_eq!(traces.pending_count(), 0);
    }

    #[tokio::test]
    async fn flush_on_empty_buffer_is_noop() {
        let traces = buffer();
        traces.flush().await;
        assert_eq!(traces.pending_count(), 0);
    }

    #[tokio::test]
    async fn append_after_flush_starts_a_new_batch() {
        let traces = buffer();
        traces.append("a", serde_json::json!({}));
        traces.flush().await;
        traces.append("b", serde_json::json!({}));
        assert_eq!(traces.pending_count(), 1);
        traces.flush().await;
        assert_eq!(traces.pending_count(), 0);
    }
}
