//! Run scoring and follow-up suggestions.
//!
//! `score_execution` is a pure function over the final transcript; the
//! aggregate feeds the routing-mode baseline, the promotion evaluation,
//! and the model-performance sample.

use crate::events::FollowUpSuggestion;

/// Inputs to one scoring pass.
#[derive(Debug, Clone)]
pub struct ScoreInput<'a> {
    pub output_text: &'a str,
    pub expected_fragments: &'a [String],
    pub latency_ms: u64,
    pub output_tokens: u64,
    pub safety_violations: u32,
}

/// The scored verdict, all components in `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionScore {
    pub correctness: f64,
    pub efficiency: f64,
    pub safety: f64,
    pub aggregate: f64,
}

/// Latency at which the efficiency component bottoms out.
const LATENCY_CEILING_MS: f64 = 120_000.0;

/// Output-token count at which the efficiency component bottoms out.
const TOKEN_CEILING: f64 = 8_000.0;

/// Score a finished run.
pub fn score_execution(input: &ScoreInput<'_>) -> ExecutionScore {
    let correctness = if input.expected_fragments.is_empty() {
        if input.output_text.trim().is_empty() { 0.5 } else { 1.0 }
    } else {
        let hits = input
            .expected_fragments
            .iter()
            .filter(|frag| input.output_text.contains(frag.as_str()))
            .count();
        hits as f64 / input.expected_fragments.len() as f64
    };

    let latency_factor = 1.0 - (input.latency_ms as f64 / LATENCY_CEILING_MS).min(1.0);
    let token_factor = 1.0 - (input.output_tokens as f64 / TOKEN_CEILING).min(1.0);
    let efficiency = (latency_factor + token_factor) / 2.0;

    let safety = (1.0 - input.safety_violations as f64 * 0.25).max(0.0);

    let aggregate = correctness * 0.5 + efficiency * 0.2 + safety * 0.3;

    ExecutionScore {
        correctness,
        efficiency,
        safety,
        aggregate,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Follow-up suggestions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The three static follow-up actions offered after completion. A
/// follow-up run shares the prior thread id and inherits its history.
pub fn follow_up_suggestions(objective: &str) -> Vec<FollowUpSuggestion> {
    let short = objective_hint(objective);
    vec![
        FollowUpSuggestion {
            kind: "gap_fix".into(),
            title: "Close remaining gaps".into(),
            objective_hint: format!("Review the result of \"{short}\" and fix anything incomplete"),
        },
        FollowUpSuggestion {
            kind: "add_verification".into(),
            title: "Add verification".into(),
            objective_hint: format!("Add tests or checks verifying \"{short}\""),
        },
        FollowUpSuggestion {
            kind: "optimize".into(),
            title: "Optimize".into(),
            objective_hint: format!("Improve the performance or clarity of the work done for \"{short}\""),
        },
    ]
}

fn objective_hint(objective: &str) -> String {
    let trimmed = objective.trim();
    if trimmed.len() <= 80 {
        trimmed.to_string()
    } else {
        let mut cut = 80;
        while cut > 0 && !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &trimmed[..cut])
    }
}
