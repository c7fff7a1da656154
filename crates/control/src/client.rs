//! Typed HTTP client for the control plane.
//!
//! All JSON over HTTP/1.1 against `AUTOAGENT_API_URL`, 10 second client
//! timeout. 4xx responses are permanent errors; the caller decides what
//! to retry.

use std::time::Duration;

use aa_domain::config::Settings;
use aa_domain::error::{Error, Result};
use aa_domain::run::{
    Approval, ApprovalScope, ExecutionState, ModelPerformanceSample, Run, RunStatus, UserPrompt,
    VerificationArtifact,
};
use aa_domain::tool::Message;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

/// Client timeout for every control-plane call.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// A REST client for the control plane. Created once per process; the
/// underlying `reqwest::Client` keeps a connection pool.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    http: Client,
    base_url: String,
}

/// Outcome of resolving an approval, including the server's 409 reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Approved,
    Rejected,
    AlreadyResolved,
    Expired,
    ContextMismatch,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    #[serde(default)]
    reason: String,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(CONTROL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn expect_ok(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::ControlPlane(format!(
            "{what} returned {}: {}",
            status.as_u16(),
            body.chars().take(300).collect::<String>()
        )))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(from_reqwest)?;
        let resp = Self::expect_ok(resp, path).await?;
        resp.json().await.map_err(from_reqwest)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let resp = Self::expect_ok(resp, path).await?;
        resp.json().await.map_err(from_reqwest)
    }

    async fn post_no_body(&self, path: &str, body: &Value) -> Result<()> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        Self::expect_ok(resp, path).await?;
        Ok(())
    }

    // ── runs ─────────────────────────────────────────────────────────

    pub async fn create_run(&self, project_id: &str, objective: &str) -> Result<Run> {
        self.post_json(
            "/api/runs",
            &serde_json::json!({ "projectId": project_id, "objective": objective }),
        )
        .await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Run> {
        self.get_json(&format!("/api/runs/{run_id}")).await
    }

    pub async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        summary: Option<&str>,
    ) -> Result<()> {
        let mut body = serde_json::json!({ "status": status });
        if let Some(summary) = summary {
            body["summary"] = Value::String(summary.to_string());
        }
        let resp = self
            .http
            .put(self.url(&format!("/api/runs/{run_id}")))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        Self::expect_ok(resp, "update run").await?;
        Ok(())
    }

    // ── traces ───────────────────────────────────────────────────────

    pub async fn append_trace(&self, run_id: &str, event_type: &str, payload: Value) -> Result<()> {
        // Free-form payload by design; no field validation on this path.
        self.post_no_body(
            &format!("/api/traces/{run_id}"),
            &serde_json::json!({ "eventType": event_type, "payload": payload }),
        )
        .await
    }

    // ── approvals ────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_approval(
        &self,
        run_id: &str,
        scope: ApprovalScope,
        reason: &str,
        tool_name: Option<&str>,
        tool_input: Option<&Value>,
        context_hash: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Approval> {
        let mut body = serde_json::json!({
            "runId": run_id,
            "scope": scope,
            "reason": reason,
        });
        if let Some(name) = tool_name {
            body["toolName"] = Value::String(name.into());
        }
        if let Some(input) = tool_input {
            body["toolInput"] = input.clone();
        }
        if let Some(hash) = context_hash {
            body["contextHash"] = Value::String(hash.into());
        }
        if let Some(at) = expires_at {
            body["expiresAt"] = serde_json::json!(at);
        }
        self.post_json("/api/approvals", &body).await
    }

    pub async fn list_approvals(&self, run_id: &str) -> Result<Vec<Approval>> {
        let all: Vec<Approval> = self.get_json("/api/approvals").await?;
        Ok(all.into_iter().filter(|a| a.run_id == run_id).collect())
    }

    /// Resolve an approval, carrying the expected context hash verbatim.
    ///
    /// 409 responses carry the server's reason (`already_resolved`,
    /// `expired`, `context_mismatch`); 404 is an error.
    pub async fn resolve_approval(
        &self,
        approval_id: &str,
        approved: bool,
        expected_context_hash: Option<&str>,
    ) -> Result<ResolveOutcome> {
        let mut body = serde_json::json!({ "approved": approved });
        if let Some(hash) = expected_context_hash {
            body["expectedContextHash"] = Value::String(hash.into());
        }

        let resp = self
            .http
            .post(self.url(&format!("/api/approvals/{approval_id}/resolve")))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        match resp.status() {
            StatusCode::NOT_FOUND => Err(Error::ControlPlane(format!(
                "approval {approval_id} not found"
            ))),
            StatusCode::CONFLICT => {
                let reason = resp
                    .json::<ConflictBody>()
                    .await
                    .map(|b| b.reason)
                    .unwrap_or_default();
                Ok(match reason.as_str() {
                    "expired" => ResolveOutcome::Expired,
                    "context_mismatch" => ResolveOutcome::ContextMismatch,
                    _ => ResolveOutcome::AlreadyResolved,
                })
            }
            status if status.is_success() => Ok(if approved {
                ResolveOutcome::Approved
            } else {
                ResolveOutcome::Rejected
            }),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(Error::ControlPlane(format!(
                    "resolve returned {}: {body}",
                    status.as_u16()
                )))
            }
        }
    }

    // ── settings ─────────────────────────────────────────────────────

    pub async fn get_settings(&self) -> Result<Settings> {
        self.get_json("/api/settings").await
    }

    // ── execution state (checkpoints) ────────────────────────────────

    pub async fn save_execution_state(&self, state: &ExecutionState) -> Result<()> {
        self.post_no_body(
            &format!("/api/execution-state/{}", state.run_id),
            &serde_json::to_value(state)?,
        )
        .await
    }

    pub async fn get_execution_state(&self, run_id: &str) -> Result<Option<ExecutionState>> {
        let resp = self
            .http
            .get(self.url(&format!("/api/execution-state/{run_id}")))
            .send()
            .await
            .map_err(from_reqwest)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::expect_ok(resp, "get execution state").await?;
        Ok(Some(resp.json().await.map_err(from_reqwest)?))
    }

    pub async fn delete_execution_state(&self, run_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/execution-state/{run_id}")))
            .send()
            .await
            .map_err(from_reqwest)?;
        // Deleting an absent checkpoint is fine.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_ok(resp, "delete execution state").await?;
        Ok(())
    }

    // ── threads ──────────────────────────────────────────────────────

    pub async fn create_thread(&self, run_id: &str) -> Result<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ThreadRow {
            thread_id: String,
        }
        let row: ThreadRow = self
            .post_json("/api/threads", &serde_json::json!({ "runId": run_id }))
            .await?;
        Ok(row.thread_id)
    }

    pub async fn get_thread_by_run(&self, run_id: &str) -> Result<Option<String>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ThreadRow {
            thread_id: String,
        }
        let resp = self
            .http
            .get(self.url(&format!("/api/threads/by-run/{run_id}")))
            .send()
            .await
            .map_err(from_reqwest)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::expect_ok(resp, "get thread by run").await?;
        let row: ThreadRow = resp.json().await.map_err(from_reqwest)?;
        Ok(Some(row.thread_id))
    }

    pub async fn append_thread_message(&self, thread_id: &str, message: &Message) -> Result<()> {
        self.post_no_body(
            &format!("/api/threads/{thread_id}/messages"),
            &serde_json::to_value(message)?,
        )
        .await
    }

    pub async fn get_thread_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        self.get_json(&format!("/api/threads/{thread_id}/messages")).await
    }

    // ── user prompts ─────────────────────────────────────────────────

    pub async fn create_prompt(
        &self,
        run_id: &str,
        thread_id: &str,
        turn_number: u32,
        prompt_text: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<UserPrompt> {
        self.post_json(
            "/api/prompts",
            &serde_json::json!({
                "runId": run_id,
                "threadId": thread_id,
                "turnNumber": turn_number,
                "promptText": prompt_text,
                "expiresAt": expires_at,
            }),
        )
        .await
    }

    pub async fn get_prompt(&self, prompt_id: &str) -> Result<UserPrompt> {
        self.get_json(&format!("/api/prompts/{prompt_id}")).await
    }

    // ── artifacts ────────────────────────────────────────────────────

    pub async fn create_artifact(&self, artifact: &VerificationArtifact) -> Result<()> {
        self.post_no_body("/api/artifacts", &serde_json::to_value(artifact)?).await
    }

    // ── model performance / promotions ───────────────────────────────

    pub async fn record_model_performance(&self, sample: &ModelPerformanceSample) -> Result<()> {
        self.post_no_body("/api/model-performance", &serde_json::to_value(sample)?).await
    }

    pub async fn record_promotion_evaluation(&self, evaluation: &Value) -> Result<()> {
        self.post_no_body("/api/promotions/evaluations", evaluation).await
    }

    // ── prompt cache (optional) ──────────────────────────────────────

    pub async fn prompt_cache_get(&self, key: &str) -> Result<Option<Value>> {
        let resp = self
            .http
            .get(self.url(&format!("/api/prompt-cache/{key}")))
            .send()
            .await
            .map_err(from_reqwest)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::expect_ok(resp, "prompt cache get").await?;
        Ok(Some(resp.json().await.map_err(from_reqwest)?))
    }

    pub async fn prompt_cache_put(&self, key: &str, response: &Value) -> Result<()> {
        self.post_no_body(&format!("/api/prompt-cache/{key}"), response).await
    }

    // ── retention ────────────────────────────────────────────────────

    /// Ask the control plane to prune rows past their retention windows.
    pub async fn sweep_retention(&self, settings: &Settings) -> Result<()> {
        self.post_no_body(
            "/api/retention/sweep",
            &serde_json::json!({
                "traceRetentionDays": settings.trace_retention_days,
                "artifactRetentionDays": settings.artifact_retention_days,
                "promptRetentionDays": settings.prompt_retention_days,
                "promptCacheRetentionDays": settings.prompt_cache_retention_days,
            }),
        )
        .await
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = ControlPlaneClient::new("http://localhost:8080/");
        assert_eq!(client.url("/api/runs"), "http://localhost:8080/api/runs");
    }

    #[tokio::test]
    async fn unreachable_control_plane_is_an_error() {
        // Nothing listens on this port.
        let client = ControlPlaneClient::new("http://127.0.0.1:1");
        let err = client.get_settings().await.unwrap_err();
        assert!(matches!(err, Error::Http(_) | Error::Timeout(_)));
    }
}
