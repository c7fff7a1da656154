//! Smart truncation of oversized tool results before conversation
//! injection. The full text still goes to the trace log; only what the
//! model sees is bounded.

/// Tool results above this length get truncated.
pub const TRUNCATE_THRESHOLD: usize = 15_000;

/// Share of the budget spent on the head of the result.
const HEAD_SHARE: f64 = 0.6;

/// Share of the budget spent on the tail.
const TAIL_SHARE: f64 = 0.2;

/// Truncate a tool result to head-60% + tail-20% of the threshold, with a
/// marker recording how many lines were dropped. Short results pass
/// through untouched.
pub fn smart_truncate(text: &str) -> String {
    if text.len() <= TRUNCATE_THRESHOLD {
        return text.to_string();
    }

    let head_len = (TRUNCATE_THRESHOLD as f64 * HEAD_SHARE) as usize;
    let tail_len = (TRUNCATE_THRESHOLD as f64 * TAIL_SHARE) as usize;

    let head_end = floor_boundary(text, head_len);
    let tail_start = floor_boundary(text, text.len() - tail_len);

    let omitted_lines = text[head_end..tail_start].lines().count();

    format!(
        "{}\n[... {omitted_lines} lines truncated ...]\n{}",
        &text[..head_end],
        &text[tail_start..]
    )
}

fn floor_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
