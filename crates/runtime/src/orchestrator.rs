//! Run orchestrator — the agentic loop.
//!
//! `execute_run` drives one run end to end: operator approval, up to 25
//! provider turns, tool dispatch through the safety pipeline (read-only
//! calls in parallel, mutating calls serial), per-turn checkpoints, and
//! finalization or the failure path. One cooperative task per run; the
//! only cross-run state is the circuit registry and the cancel map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use aa_control::{ControlPlaneClient, TraceBuffer};
use aa_domain::cancel::CancelToken;
use aa_domain::config::Settings;
use aa_domain::error::{Error, ErrorClass, Result};
use aa_domain::hash::prompt_cache_key;
use aa_domain::run::{
    ExecutionPhase, ExecutionState, ModelPerformanceSample, Run, RunInput, RunStats, RunStatus,
    VerificationArtifact, VerificationResult,
};
use aa_domain::tool::{Message, ToolCall, ToolResult};
use aa_mcp_client::McpManager;
use aa_providers::{
    build_tool_result_messages, normalize_cached_response, ProviderClient, ProviderKind,
    ProviderRequest, Turn,
};
use aa_tools::validator::{Severity, ValidationOutcome};
use aa_tools::{executor::builtin_tool_definitions, is_read_only, repomap, ToolExecutor};
use chrono::Utc;
use parking_lot::Mutex;

use crate::approval::ApprovalCoordinator;
use crate::cancel::CancelMap;
use crate::checkpoint::{self, ResumeMode};
use crate::circuit::CircuitRegistry;
use crate::compress;
use crate::events::{EventSink, RunStatusEvent};
use crate::pipeline::SafetyPipeline;
use crate::prompt::PromptCoordinator;
use crate::retry::{with_retry, Stage};
use crate::score::{follow_up_suggestions, score_execution, ScoreInput};
use crate::truncate::smart_truncate;

/// Hard cap on provider round-trips per run.
pub const MAX_TURNS: u32 = 25;

/// Default completion budget per provider call.
const MAX_OUTPUT_TOKENS: u32 = 4096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wiring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The resolved provider connection for one run. The API key arrives as
/// an opaque string; the secret store that produced it is not our concern.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub provider_id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: String,
}

/// What `execute_run` hands back to the caller.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub summary: String,
    pub stats: RunStats,
    pub turns: u32,
    pub final_text: String,
}

pub struct Orchestrator {
    client: Arc<ControlPlaneClient>,
    provider: ProviderClient,
    approvals: Arc<ApprovalCoordinator>,
    prompts: PromptCoordinator,
    circuits: Arc<CircuitRegistry>,
    cancels: Arc<CancelMap>,
    mcp: Arc<McpManager>,
    settings: Settings,
    /// routing mode -> best aggregate score seen in this process.
    baseline_by_routing_mode: Mutex<HashMap<String, f64>>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<ControlPlaneClient>,
        approvals: Arc<ApprovalCoordinator>,
        mcp: Arc<McpManager>,
        settings: Settings,
    ) -> Self {
        Self {
            prompts: PromptCoordinator::new(Arc::clone(&client)),
            client,
            provider: ProviderClient::new(),
            approvals,
            circuits: Arc::new(CircuitRegistry::new()),
            cancels: Arc::new(CancelMap::new()),
            mcp,
            settings,
            baseline_by_routing_mode: Mutex::new(HashMap::new()),
        }
    }

    /// The cancel map, for operator abort wiring.
    pub fn cancels(&self) -> Arc<CancelMap> {
        Arc::clone(&self.cancels)
    }

    /// Abort an active run: signal its token. The running task persists
    /// the aborted state and flips the run to cancelled on its way out.
    pub fn abort(&self, run_id: &str) -> bool {
        self.cancels.cancel(run_id)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Entry point
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Execute a run to completion. `resume_from` re-enters a previously
    /// persisted run after the deterministic-resume gate passes.
    pub async fn execute_run(
        &self,
        input: RunInput,
        endpoint: ProviderEndpoint,
        run: Run,
        sink: EventSink,
        resume_from: Option<(ExecutionState, ResumeMode)>,
    ) -> Result<RunOutcome> {
        let run_id = run.run_id.clone();
        let traces = TraceBuffer::new(Arc::clone(&self.client), &run_id);
        let started = Instant::now();

        // ── Re-entry gates ──────────────────────────────────────────
        // Refusals here surface directly and leave the run untouched.
        let (mut stats, start_turn) = match &resume_from {
            Some((state, mode)) => {
                checkpoint::check_reentry(state, *mode)?;
                self.approvals.check_resume_approvals(&run_id).await?;
                match mode {
                    ResumeMode::Resume => (state.stats.clone(), state.turn + 1),
                    ResumeMode::Retry => (RunStats::default(), 1),
                }
            }
            None => (RunStats::default(), 1),
        };

        // ── Run-scoped operator approval ────────────────────────────
        sink.emit(RunStatusEvent::State { state: "approval_required".into() });
        let approved = self
            .approvals
            .request_run_approval(&run_id, &input.objective)
            .await?;
        if !approved {
            self.client
                .update_run(&run_id, RunStatus::Cancelled, Some("rejected by operator"))
                .await
                .ok();
            sink.emit(RunStatusEvent::State { state: "rejected".into() });
            return Ok(RunOutcome {
                run_id,
                status: RunStatus::Cancelled,
                summary: "rejected by operator".into(),
                stats,
                turns: 0,
                final_text: String::new(),
            });
        }

        let cancel = self.cancels.register(&run_id);
        self.client
            .update_run(&run_id, RunStatus::Running, None)
            .await
            .ok();
        sink.emit(RunStatusEvent::State { state: "executing".into() });
        traces.append("run.started", serde_json::json!({ "objective": input.objective }));

        let result = self
            .turn_loop(&input, &endpoint, &run_id, &sink, &traces, &cancel, &mut stats, start_turn)
            .await;

        // ── Success / failure epilogue ──────────────────────────────
        let outcome = match result {
            Ok((final_text, turns)) => {
                self.finalize(
                    &input, &endpoint, &run_id, &sink, &traces, &stats, turns, &final_text, started,
                )
                .await
            }
            Err(err) => {
                self.fail(
                    &input, &endpoint, &run_id, &sink, &traces, &stats, &err, started,
                )
                .await;
                Err(err)
            }
        };

        self.cancels.remove(&run_id);
        outcome
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Turn loop
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[allow(clippy::too_many_arguments)]
    async fn turn_loop(
        &self,
        input: &RunInput,
        endpoint: &ProviderEndpoint,
        run_id: &str,
        sink: &EventSink,
        traces: &TraceBuffer,
        cancel: &CancelToken,
        stats: &mut RunStats,
        start_turn: u32,
    ) -> Result<(String, u32)> {
        let project_dir = std::path::PathBuf::from(&input.project_dir);
        let project_config = aa_domain::config::ProjectConfig::load(&project_dir)?;
        let pipeline = SafetyPipeline::new(
            ToolExecutor::new(&project_dir),
            project_config,
            self.settings.clone(),
            Arc::clone(&self.approvals),
            Arc::clone(&self.mcp),
        );

        // ── Conversation setup ──────────────────────────────────────
        let thread_id = match self.client.get_thread_by_run(run_id).await? {
            Some(id) => id,
            None => self.client.create_thread(run_id).await?,
        };

        let system_prompt = build_system_prompt();
        let mut messages: Vec<Message> = if start_turn > 1 {
            // Resuming: the thread already holds the conversation.
            self.client.get_thread_messages(&thread_id).await?
        } else {
            let repo_map = repomap::build_repo_map(&project_dir);
            let first = Message::user(build_initial_prompt(&input.objective, &repo_map));
            self.persist_message(&thread_id, &first);
            vec![first]
        };

        let mut tool_defs = builtin_tool_definitions();
        for (mangled, def) in self.mcp.list_tools() {
            tool_defs.push(aa_domain::tool::ToolDefinition {
                name: mangled,
                description: def.description.clone(),
                parameters: def.input_schema.clone(),
            });
        }

        let mut final_text = String::new();

        for turn in start_turn..=MAX_TURNS {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // ── Compress context when the estimate crosses the line ──
            messages = compress::compress_if_needed(&system_prompt, messages, |transcript| {
                let provider = &self.provider;
                let endpoint = endpoint.clone();
                let cancel = cancel.clone();
                async move {
                    let prompt = compress::summary_prompt(&transcript);
                    let aux_messages = vec![Message::user(prompt)];
                    let aux_model = endpoint.summarizer_model();
                    let req = ProviderRequest {
                        kind: endpoint.kind,
                        provider_id: &endpoint.provider_id,
                        base_url: &endpoint.base_url,
                        api_key: &endpoint.api_key,
                        model: &aux_model,
                        system_prompt: "You summarize conversations.",
                        messages: &aux_messages,
                        max_tokens: 1024,
                        tools: &[],
                    };
                    let turn = provider
                        .call_streaming(&req, &mut |_| {}, &cancel)
                        .await?;
                    Ok(turn.text_content.unwrap_or_default())
                }
            })
            .await;

            // ── Provider call through cache, breaker, and retry ──────
            let assistant_turn = self
                .call_provider(input, endpoint, &system_prompt, &messages, &tool_defs, sink, traces, cancel, stats)
                .await?;

            stats.total_input_tokens += assistant_turn.input_tokens;
            stats.total_output_tokens += assistant_turn.output_tokens;

            // Raw assistant message goes into history before anything else.
            let assistant_message = Message::assistant_raw(assistant_turn.raw_assistant_message.clone());
            self.persist_message(&thread_id, &assistant_message);
            messages.push(assistant_message);

            if let Some(text) = &assistant_turn.text_content {
                final_text = text.clone();
            }

            if assistant_turn.is_final() {
                return Ok((final_text, turn));
            }

            // ── Tool dispatch ────────────────────────────────────────
            let results = self
                .dispatch_tools(
                    &assistant_turn.tool_calls,
                    &pipeline,
                    run_id,
                    &thread_id,
                    turn,
                    sink,
                    traces,
                    cancel,
                    stats,
                )
                .await?;

            // Inject results in the provider's shape, truncated for the
            // conversation only; traces carried the full text already.
            let injected: Vec<ToolResult> = results
                .iter()
                .map(|r| ToolResult {
                    id: r.id.clone(),
                    content: smart_truncate(&r.content),
                    is_error: r.is_error,
                })
                .collect();
            for msg in build_tool_result_messages(endpoint.kind, &injected) {
                self.persist_message(&thread_id, &msg);
                messages.push(msg);
            }

            // ── Checkpoint after the turn's tool results ─────────────
            let state = checkpoint::build_checkpoint(run_id, input, stats, turn, messages.len());
            if let Err(e) = self.client.save_execution_state(&state).await {
                tracing::warn!(run_id, error = %e, "checkpoint persist failed");
            }
        }

        Err(Error::Other(format!("turn limit reached ({MAX_TURNS} turns)")))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Provider call (cache → circuit → retry → stream)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[allow(clippy::too_many_arguments)]
    async fn call_provider(
        &self,
        input: &RunInput,
        endpoint: &ProviderEndpoint,
        system_prompt: &str,
        messages: &[Message],
        tool_defs: &[aa_domain::tool::ToolDefinition],
        sink: &EventSink,
        traces: &TraceBuffer,
        cancel: &CancelToken,
        stats: &mut RunStats,
    ) -> Result<Turn> {
        let cache_key = if self.settings.prompt_cache_enabled {
            let fingerprint = serde_json::json!({
                "providerKind": endpoint.kind,
                "model": input.model,
                "system": system_prompt,
                "maxTokens": MAX_OUTPUT_TOKENS,
                "messages": serde_json::to_value(messages)?,
            });
            let key = prompt_cache_key(&fingerprint);
            if let Ok(Some(cached)) = self.client.prompt_cache_get(&key).await {
                tracing::debug!(key = %key, "prompt cache hit");
                return normalize_cached_response(endpoint.kind, &cached);
            }
            Some(key)
        } else {
            None
        };

        let req = ProviderRequest {
            kind: endpoint.kind,
            provider_id: &endpoint.provider_id,
            base_url: &endpoint.base_url,
            api_key: &endpoint.api_key,
            model: &input.model,
            system_prompt,
            messages,
            max_tokens: MAX_OUTPUT_TOKENS,
            tools: tool_defs,
        };

        let mut retry_count: u32 = 0;
        let turn = with_retry(
            Stage::Llm,
            || async {
                self.circuits.check(&endpoint.provider_id)?;
                let mut on_delta = |text: &str| {
                    sink.emit(RunStatusEvent::Token { text: text.to_string() });
                };
                let result = self.provider.call_streaming(&req, &mut on_delta, cancel).await;
                match &result {
                    Ok(_) => self.circuits.record_success(&endpoint.provider_id),
                    Err(e) => {
                        let class = e.class();
                        if matches!(class, ErrorClass::Transient | ErrorClass::Provider)
                            && !matches!(e, Error::CircuitOpen(_))
                        {
                            self.circuits.record_failure(&endpoint.provider_id);
                        }
                    }
                }
                result
            },
            &mut |attempt, err| {
                retry_count = attempt;
                traces.append(
                    "execution.retry",
                    serde_json::json!({ "stage": "llm", "attempt": attempt, "error": err.to_string() }),
                );
            },
        )
        .await?;
        stats.retries += retry_count;

        if let Some(key) = cache_key {
            let body = cacheable_body(endpoint.kind, &turn);
            if let Err(e) = self.client.prompt_cache_put(&key, &body).await {
                tracing::debug!(error = %e, "prompt cache write failed");
            }
        }

        traces.append(
            "agent.turn",
            serde_json::json!({
                "inputTokens": turn.input_tokens,
                "outputTokens": turn.output_tokens,
                "toolCalls": turn.tool_calls.len(),
            }),
        );

        Ok(turn)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Tool dispatch (ask_user serial, read-only parallel, mutating serial)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_tools(
        &self,
        tool_calls: &[ToolCall],
        pipeline: &SafetyPipeline,
        run_id: &str,
        thread_id: &str,
        turn: u32,
        sink: &EventSink,
        traces: &TraceBuffer,
        cancel: &CancelToken,
        stats: &mut RunStats,
    ) -> Result<Vec<ToolResult>> {
        for call in tool_calls {
            sink.emit(RunStatusEvent::ToolCall {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                input: call.input.clone(),
            });
            traces.append(
                "agent.tool_call",
                serde_json::json!({ "turn": turn, "tool": call.name, "callId": call.id }),
            );
        }

        let (ask_user_calls, rest): (Vec<&ToolCall>, Vec<&ToolCall>) =
            tool_calls.iter().partition(|c| c.name == "ask_user");
        let (read_only, mutating): (Vec<&ToolCall>, Vec<&ToolCall>) =
            rest.into_iter().partition(|c| is_read_only(&c.name));

        let mut results: Vec<ToolResult> = Vec::with_capacity(tool_calls.len());

        // ask_user first, serially: the operator's answer may change what
        // the remaining tools should do, and it blocks the turn anyway.
        for call in ask_user_calls {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let question = call
                .input
                .get("question")
                .and_then(|q| q.as_str())
                .unwrap_or("(no question)");
            let result = match self
                .prompts
                .ask_user(run_id, thread_id, turn, question, sink, cancel)
                .await
            {
                Ok(answer) => ToolResult { id: call.id.clone(), content: answer, is_error: false },
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => ToolResult {
                    id: call.id.clone(),
                    content: format!("Error: {e}"),
                    is_error: true,
                },
            };
            stats.action_count += 1;
            results.push(result);
        }

        // Read-only batch: concurrent, nothing shared between sub-tasks.
        if !read_only.is_empty() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let futures: Vec<_> = read_only
                .iter()
                .map(|call| pipeline.run_tool(run_id, turn, call, cancel, traces))
                .collect();
            for output in futures_util::future::join_all(futures).await {
                self.absorb_output(run_id, output, stats, &mut results, traces).await;
            }
        }

        // Mutating calls: strictly serial, in the order the model emitted.
        for call in mutating {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let output = pipeline.run_tool(run_id, turn, call, cancel, traces).await;
            self.absorb_output(run_id, output, stats, &mut results, traces).await;
        }

        for result in &results {
            sink.emit(RunStatusEvent::ToolResult {
                call_id: result.id.clone(),
                tool_name: tool_calls
                    .iter()
                    .find(|c| c.id == result.id)
                    .map(|c| c.name.clone())
                    .unwrap_or_default(),
                content: result.content.clone(),
                is_error: result.is_error,
            });
            traces.append(
                "agent.tool_result",
                serde_json::json!({
                    "turn": turn,
                    "callId": result.id,
                    "isError": result.is_error,
                    "content": result.content,
                }),
            );
        }

        Ok(results)
    }

    /// Fold one pipeline output into the stats, persist its verification
    /// artifact, and collect the result.
    async fn absorb_output(
        &self,
        run_id: &str,
        output: crate::pipeline::PipelineOutput,
        stats: &mut RunStats,
        results: &mut Vec<ToolResult>,
        traces: &TraceBuffer,
    ) {
        stats.action_count += 1;
        stats.retries += output.retries;
        if output.safety_violation {
            stats.safety_violations += 1;
            traces.append(
                "safety.violation",
                serde_json::json!({ "callId": output.result.id, "content": output.result.content }),
            );
        }

        if let Some(validation) = &output.validation {
            if !validation.ok {
                stats.validation_failures += 1;
            }
            let artifact = build_artifact(run_id, validation, &output.result);
            if let Err(e) = self.client.create_artifact(&artifact).await {
                tracing::debug!(error = %e, "artifact persist failed");
            }
        }

        results.push(output.result);
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Finalization / failure
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        input: &RunInput,
        endpoint: &ProviderEndpoint,
        run_id: &str,
        sink: &EventSink,
        traces: &TraceBuffer,
        stats: &RunStats,
        turns: u32,
        final_text: &str,
        started: Instant,
    ) -> Result<RunOutcome> {
        let latency_ms = started.elapsed().as_millis() as u64;
        let score = score_execution(&ScoreInput {
            output_text: final_text,
            expected_fragments: &input.expected_fragments,
            latency_ms,
            output_tokens: stats.total_output_tokens,
            safety_violations: stats.safety_violations,
        });

        // Routing-mode baseline only ever ratchets upward.
        {
            let mut baselines = self.baseline_by_routing_mode.lock();
            let entry = baselines.entry(input.routing_mode.clone()).or_insert(0.0);
            *entry = entry.max(score.aggregate);
        }

        let summary = truncate_chars(&input.objective, 200);
        let sample = ModelPerformanceSample {
            provider_id: endpoint.provider_id.clone(),
            model: input.model.clone(),
            routing_mode: input.routing_mode.clone(),
            success: true,
            latency_ms,
            cost_usd: 0.0,
            aggregate_score: score.aggregate,
        };
        let evaluation = serde_json::json!({
            "runId": run_id,
            "aggregateScore": score.aggregate,
            "correctness": score.correctness,
            "safety": score.safety,
            "evaluatedAt": Utc::now(),
        });

        // Independent bookkeeping runs concurrently; none of it may block
        // the others.
        let (promo, perf, status, _) = tokio::join!(
            self.client.record_promotion_evaluation(&evaluation),
            self.client.record_model_performance(&sample),
            self.client.update_run(run_id, RunStatus::Completed, Some(&summary)),
            traces.flush(),
        );
        for result in [promo, perf, status] {
            if let Err(e) = result {
                tracing::warn!(run_id, error = %e, "finalization bookkeeping failed");
            }
        }

        if let Err(e) = self.client.delete_execution_state(run_id).await {
            tracing::debug!(run_id, error = %e, "checkpoint delete failed");
        }

        sink.emit(RunStatusEvent::Completed { summary: summary.clone() });
        sink.emit(RunStatusEvent::FollowUps {
            suggestions: follow_up_suggestions(&input.objective),
        });

        Ok(RunOutcome {
            run_id: run_id.to_string(),
            status: RunStatus::Completed,
            summary,
            stats: stats.clone(),
            turns,
            final_text: final_text.to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail(
        &self,
        input: &RunInput,
        endpoint: &ProviderEndpoint,
        run_id: &str,
        sink: &EventSink,
        traces: &TraceBuffer,
        stats: &RunStats,
        err: &Error,
        started: Instant,
    ) {
        let aborted = matches!(err, Error::Cancelled);
        let message = err.to_string();
        traces.append("run.error", serde_json::json!({ "error": message }));

        let phase = if aborted { ExecutionPhase::Aborted } else { ExecutionPhase::Failed };
        let state = checkpoint::build_terminal(run_id, input, stats, 0, phase, Some(message.clone()));
        if let Err(e) = self.client.save_execution_state(&state).await {
            tracing::warn!(run_id, error = %e, "terminal state persist failed");
        }

        let sample = ModelPerformanceSample {
            provider_id: endpoint.provider_id.clone(),
            model: input.model.clone(),
            routing_mode: input.routing_mode.clone(),
            success: false,
            latency_ms: started.elapsed().as_millis() as u64,
            cost_usd: 0.0,
            aggregate_score: 0.0,
        };
        if let Err(e) = self.client.record_model_performance(&sample).await {
            tracing::debug!(error = %e, "failure sample persist failed");
        }

        let run_status = if aborted { RunStatus::Cancelled } else { RunStatus::Failed };
        let summary = truncate_chars(&message, 200);
        if let Err(e) = self.client.update_run(run_id, run_status, Some(&summary)).await {
            tracing::warn!(run_id, error = %e, "run status update failed");
        }

        traces.flush().await;
        sink.emit(RunStatusEvent::Error {
            message,
            detail: None,
            state: "failed".into(),
        });
    }

    /// Persist a conversation message to the thread, fire-and-forget.
    fn persist_message(&self, thread_id: &str, message: &Message) {
        let client = Arc::clone(&self.client);
        let thread_id = thread_id.to_string();
        let message = message.clone();
        tokio::spawn(async move {
            if let Err(e) = client.append_thread_message(&thread_id, &message).await {
                tracing::debug!(error = %e, "thread message persist failed");
            }
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl ProviderEndpoint {
    /// The auxiliary summarizer reuses the run's provider wiring with a
    /// small model.
    fn summarizer_model(&self) -> String {
        match self.kind {
            ProviderKind::OpenAi => "gpt-4o-mini".into(),
            ProviderKind::Anthropic => "claude-3-5-haiku-latest".into(),
        }
    }
}

/// Reconstruct a provider-native response body from a normalized turn so
/// the prompt cache can replay it through `normalize_cached_response`.
fn cacheable_body(kind: ProviderKind, turn: &Turn) -> serde_json::Value {
    match kind {
        ProviderKind::OpenAi => serde_json::json!({
            "choices": [{ "message": turn.raw_assistant_message }],
            "usage": {
                "prompt_tokens": turn.input_tokens,
                "completion_tokens": turn.output_tokens,
            },
        }),
        ProviderKind::Anthropic => serde_json::json!({
            "content": turn.raw_assistant_message.get("content").cloned().unwrap_or_default(),
            "usage": {
                "input_tokens": turn.input_tokens,
                "output_tokens": turn.output_tokens,
            },
        }),
    }
}

fn build_system_prompt() -> String {
    "You are an autonomous coding agent working inside a single project \
     directory. Use the provided tools to read, modify, and verify the \
     project. Paths are relative to the project root. Prefer small, \
     verifiable steps; run checks after changes. When the objective is \
     met, reply without tool calls and summarize what you did."
        .to_string()
}

fn build_initial_prompt(objective: &str, repo_map: &str) -> String {
    if repo_map.trim().is_empty() {
        format!("Objective: {objective}\n\nThe project directory is currently empty.")
    } else {
        format!("Objective: {objective}\n\nProject map:\n{repo_map}")
    }
}

fn build_artifact(
    run_id: &str,
    validation: &ValidationOutcome,
    result: &ToolResult,
) -> VerificationArtifact {
    let verification_result = if validation.ok {
        VerificationResult::Pass
    } else {
        match validation.severity {
            Severity::Error => VerificationResult::Fail,
            Severity::Warn => VerificationResult::Warning,
            Severity::Info => VerificationResult::Pass,
        }
    };
    VerificationArtifact {
        artifact_id: uuid::Uuid::new_v4().to_string(),
        run_id: run_id.to_string(),
        verification_type: validation.verification_type.clone(),
        artifact_type: "tool_result".into(),
        artifact_content: Some(truncate_chars(&result.content, 2000)),
        verification_result,
        checks: validation.checks.clone(),
        verified_at: Utc::now(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_prompt_mentions_objective_and_map() {
        let prompt = build_initial_prompt("Write hello.py", "hello.py (14B)");
        assert!(prompt.contains("Write hello.py"));
        assert!(prompt.contains("Project map:"));

        let empty = build_initial_prompt("Write hello.py", "  ");
        assert!(empty.contains("currently empty"));
    }

    #[test]
    fn artifact_maps_validation_severity() {
        let result = ToolResult { id: "c".into(), content: "exit 1\n\nboom".into(), is_error: false };
        let validation = ValidationOutcome {
            ok: false,
            severity: Severity::Error,
            confidence: 0.9,
            verification_type: "command".into(),
            checks: vec!["non-zero exit code 1".into()],
        };
        let artifact = build_artifact("r1", &validation, &result);
        assert_eq!(artifact.verification_result, VerificationResult::Fail);
        assert_eq!(artifact.verification_type, "command");
        assert_eq!(artifact.run_id, "r1");
    }

    #[test]
    fn summary_truncates_at_200_chars() {
        let long = "o".repeat(500);
        assert_eq!(truncate_chars(&long, 200).len(), 200);
        assert_eq!(truncate_chars("short", 200), "short");
    }

    #[test]
    fn read_only_partition_matches_spec() {
        for tool in ["read_file", "search_code", "glob_files", "list_directory"] {
            assert!(is_read_only(tool), "{tool} must be read-only");
        }
        for tool in ["write_file", "edit_file", "run_command", "git_commit", "ask_user"] {
            assert!(!is_read_only(tool), "{tool} must not be read-only");
        }
    }
}
