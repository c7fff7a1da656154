//! Retry policies — bounded exponential backoff with jitter, keyed by
//! `(stage, error class)`.

use std::future::Future;
use std::time::Duration;

use aa_domain::error::{Error, ErrorClass, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which layer the call belongs to; pairs with [`ErrorClass`] to pick a
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Llm,
    Tool,
}

/// `attempts` is the number of re-attempts after a failure, so a policy
/// of `{attempts: 3}` makes at most four calls in total.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// `min(max, base * 2^(attempt-1))` plus uniform jitter in
    /// `[0, base/2]`. Attempts are 1-indexed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let exp = base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
        let capped = exp.min(self.max_delay.as_millis() as u64);
        capped
            .checked_add(jitter_ms(base_ms / 2, attempt))
            .map(Duration::from_millis)
            .unwrap_or(self.max_delay)
    }
}

/// Cheap deterministic jitter in `[0, cap]`, seeded by the attempt number
/// and the current nanos. Not cryptographic; just spreads retry storms.
fn jitter_ms(cap: u64, attempt: u32) -> u64 {
    if cap == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let hash = (nanos ^ attempt.wrapping_mul(2654435761)) as u64;
    hash % (cap + 1)
}

/// Look up the policy for a `(stage, class)` pair.
///
/// Defaults: transient LLM failures get 3 retries at 400 ms base; tool
/// failures get 2 retries at 250 ms; policy, provider, cancellation, and
/// unknown errors are never retried.
pub fn policy_for(stage: Stage, class: ErrorClass) -> RetryPolicy {
    match (stage, class) {
        (Stage::Llm, ErrorClass::Transient) => RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(5),
        },
        (Stage::Tool, ErrorClass::Transient) | (Stage::Tool, ErrorClass::Tool) => RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        },
        _ => RetryPolicy::none(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run `operation` under the stage's retry discipline. `on_attempt` is
/// called with `(attempt, error)` after every failed attempt, for trace
/// emission.
pub async fn with_retry<T, F, Fut>(
    stage: Stage,
    mut operation: F,
    on_attempt: &mut (dyn FnMut(u32, &Error) + Send),
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let class = err.class();
                // Cancellation always propagates immediately.
                if class == ErrorClass::Cancelled {
                    return Err(err);
                }
                failures += 1;
                on_attempt(failures, &err);
                let policy = policy_for(stage, class);
                if failures > policy.attempts {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(failures);
                tracing::debug!(
                    attempt = failures,
                    class = ?class,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn three_transient_failures_then_success() {
        // The S-curve case: three 500s, then a 200. Three retry
        // notifications with increasing attempt, and the call succeeds.
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let mut attempts_seen = Vec::new();

        let result = with_retry(
            Stage::Llm,
            move || {
                let calls = Arc::clone(&calls2);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(Error::Provider {
                            provider: "p".into(),
                            message: "HTTP 500 - overloaded".into(),
                        })
                    } else {
                        Ok("empty response")
                    }
                }
            },
            &mut |attempt, _err| attempts_seen.push(attempt),
        )
        .await
        .unwrap();

        assert_eq!(result, "empty response");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(attempts_seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn transient_exhausts_after_three_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);

        let result: Result<()> = with_retry(
            Stage::Llm,
            move || {
                let calls = Arc::clone(&calls2);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Timeout("still down".into()))
                }
            },
            &mut |_, _| {},
        )
        .await;

        assert!(result.is_err());
        // One initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn policy_errors_never_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);

        let result: Result<()> = with_retry(
            Stage::Tool,
            move || {
                let calls = Arc::clone(&calls2);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Policy("blocked".into()))
                }
            },
            &mut |_, _| {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_propagates_without_callback() {
        let mut callback_fired = false;
        let result: Result<()> = with_retry(
            Stage::Llm,
            || async { Err(Error::Cancelled) },
            &mut |_, _| callback_fired = true,
        )
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!callback_fired);
    }

    #[tokio::test]
    async fn tool_class_gets_two_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);

        let _: Result<()> = with_retry(
            Stage::Tool,
            move || {
                let calls = Arc::clone(&calls2);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Tool {
                        tool: "run_command".into(),
                        message: "exit 1".into(),
                    })
                }
            },
            &mut |_, _| {},
        )
        .await;

        // One initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(1000),
        };
        // Jitter adds at most base/2 = 200ms.
        let d1 = policy.delay_for_attempt(1);
        assert!(d1 >= Duration::from_millis(400) && d1 <= Duration::from_millis(600));
        let d2 = policy.delay_for_attempt(2);
        assert!(d2 >= Duration::from_millis(800) && d2 <= Duration::from_millis(1200));
        let d4 = policy.delay_for_attempt(4);
        assert!(d4 <= Duration::from_millis(1200));
    }

    #[test]
    fn no_retry_policy_for_unknown_llm_errors() {
        let policy = policy_for(Stage::Llm, ErrorClass::Unknown);
        assert_eq!(policy.attempts, 0);
    }
}
