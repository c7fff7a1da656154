//! Checkpoint & replay boundary.
//!
//! After each turn that produced tool results the orchestrator persists a
//! checkpoint annotated with a replay boundary. Resume is refused whenever
//! the persisted state cannot be replayed deterministically.

use aa_domain::error::{Error, Result};
use aa_domain::hash::replay_boundary_hash;
use aa_domain::run::{
    CheckpointInfo, ExecutionPhase, ExecutionState, PhaseMarker, ReplayBoundary, RunInput, RunStats,
};
use chrono::Utc;

/// Checkpoint reason recorded after a turn's tool results.
pub const REASON_TOOL_RESULT: &str = "tool_result";

/// How a previously persisted run is being re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Continue from the persisted stats and turn.
    Resume,
    /// Discard the turn count, re-enter with the original input.
    Retry,
}

/// Build the per-turn checkpoint state.
pub fn build_checkpoint(
    run_id: &str,
    input: &RunInput,
    stats: &RunStats,
    turn: u32,
    message_count: usize,
) -> ExecutionState {
    let now = Utc::now();
    ExecutionState {
        run_id: run_id.to_string(),
        phase: ExecutionPhase::Checkpointed,
        phase_marker: PhaseMarker::Executing,
        turn,
        input: input.clone(),
        stats: stats.clone(),
        checkpoint: Some(CheckpointInfo {
            at: now,
            reason: REASON_TOOL_RESULT.into(),
            message_count,
        }),
        replay_boundary: Some(ReplayBoundary {
            turn,
            reason: REASON_TOOL_RESULT.into(),
            context_hash: replay_boundary_hash(run_id, turn, REASON_TOOL_RESULT, message_count),
            created_at: now,
        }),
        last_error: None,
    }
}

/// Build a terminal state for the failure path.
pub fn build_terminal(
    run_id: &str,
    input: &RunInput,
    stats: &RunStats,
    turn: u32,
    phase: ExecutionPhase,
    last_error: Option<String>,
) -> ExecutionState {
    ExecutionState {
        run_id: run_id.to_string(),
        phase,
        phase_marker: PhaseMarker::Finalizing,
        turn,
        input: input.clone(),
        stats: stats.clone(),
        checkpoint: None,
        replay_boundary: None,
        last_error,
    }
}

/// The deterministic-resume gate. Returns the error explaining why the
/// persisted state cannot be re-entered in the requested mode.
pub fn check_reentry(state: &ExecutionState, mode: ResumeMode) -> Result<()> {
    match state.phase {
        ExecutionPhase::Completed => Err(Error::Other(
            "run already completed; neither resume nor retry is possible".into(),
        )),
        ExecutionPhase::Aborted => Err(Error::Other(
            "run was aborted; start a new run instead".into(),
        )),
        ExecutionPhase::Checkpointed => {
            let boundary = match &state.replay_boundary {
                Some(b) => b,
                None => return Err(Error::Other("Checkpoint missing replay boundary".into())),
            };
            if mode == ResumeMode::Resume {
                let message_count = state
                    .checkpoint
                    .as_ref()
                    .map(|c| c.message_count)
                    .unwrap_or(0);
                let expected = replay_boundary_hash(
                    &state.run_id,
                    boundary.turn,
                    &boundary.reason,
                    message_count,
                );
                if expected != boundary.context_hash {
                    return Err(Error::Other(
                        "replay boundary hash does not match the checkpoint".into(),
                    ));
                }
            }
            Ok(())
        }
        ExecutionPhase::Running => match mode {
            // A run that never checkpointed has nothing to resume from.
            ResumeMode::Resume if state.checkpoint.is_none() => Err(Error::Other(
                "run has no checkpoint; resume is not possible (retry instead)".into(),
            )),
            _ => Ok(()),
        },
        ExecutionPhase::Failed => match mode {
            ResumeMode::Retry => Ok(()),
            ResumeMode::Resume => {
                if state.checkpoint.is_some() && state.replay_boundary.is_some() {
                    Ok(())
                } else {
                    Err(Error::Other("Checkpoint missing replay boundary".into()))
                }
            }
        },
    }
}
