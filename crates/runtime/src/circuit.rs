//! Per-provider circuit breaker.
//!
//! After a run of consecutive failures the provider's circuit opens for a
//! cooldown window; calls during the window fail fast with
//! `provider_circuit_open`. A success closes the circuit and resets the
//! failure count.

use std::collections::HashMap;
use std::time::Duration;

use aa_domain::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Consecutive failures before the circuit opens.
pub const FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit stays open.
pub const COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
struct CircuitState {
    failures: u32,
    open_until: Option<DateTime<Utc>>,
}

/// Process-wide registry, keyed by provider id. Owned by the orchestrator
/// process; every mutation happens under one mutex.
#[derive(Default)]
pub struct CircuitRegistry {
    circuits: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail fast if the provider's circuit is open.
    pub fn check(&self, provider_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut circuits = self.circuits.lock();
        if let Some(state) = circuits.get_mut(provider_id) {
            if let Some(open_until) = state.open_until {
                if now < open_until {
                    return Err(Error::CircuitOpen(format!(
                        "{provider_id} open until {open_until}"
                    )));
                }
                // Cooldown elapsed; allow a probe call through.
                state.open_until = None;
            }
        }
        Ok(())
    }

    /// Record a failed provider call. Opens the circuit at the threshold.
    pub fn record_failure(&self, provider_id: &str) {
        let mut circuits = self.circuits.lock();
        let state = circuits.entry(provider_id.to_owned()).or_default();
        state.failures += 1;
        if state.failures >= FAILURE_THRESHOLD && state.open_until.is_none() {
            let open_until = Utc::now() + chrono::Duration::from_std(COOLDOWN).unwrap_or_default();
            state.open_until = Some(open_until);
            tracing::warn!(
                provider_id,
                failures = state.failures,
                %open_until,
                "provider circuit opened"
            );
        }
    }

    /// Record a successful call: close the circuit, reset the count.
    pub fn record_success(&self, provider_id: &str) {
        let mut circuits = self.circuits.lock();
        if let Some(state) = circuits.get_mut(provider_id) {
            state.failures = 0;
            state.open_until = None;
        }
    }

    /// Current consecutive-failure count (for tests and diagnostics).
    pub fn failures(&self, provider_id: &str) -> u32 {
        self.circuits
            .lock()
            .get(provider_id)
            .map(|s| s.failures)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_circuit_allows_calls() {
        let registry = CircuitRegistry::new();
        assert!(registry.check("p1").is_ok());
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let registry = CircuitRegistry::new();
        for _ in 0..FAILURE_THRESHOLD {
            assert!(registry.check("p1").is_ok());
            registry.record_failure("p1");
        }
        let err = registry.check("p1").unwrap_err();
        assert!(err.to_string().contains("provider_circuit_open"));
    }

    #[test]
    fn below_threshold_stays_closed() {
        let registry = CircuitRegistry::new();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            registry.record_failure("p1");
        }
        assert!(registry.check("p1").is_ok());
    }

    #[test]
    fn success_resets_failures_and_closes() {
        let registry = CircuitRegistry::new();
        for _ in 0..FAILURE_THRESHOLD {
            registry.record_failure("p1");
        }
        assert!(registry.check("p1").is_err());

        registry.record_success("p1");
        assert_eq!(registry.failures("p1"), 0);
        assert!(registry.check("p1").is_ok());
    }

    #[test]
    fn circuits_are_per_provider() {
        let registry = CircuitRegistry::new();
        for _ in 0..FAILURE_THRESHOLD {
            registry.record_failure("p1");
        }
        assert!(registry.check("p1").is_err());
        assert!(registry.check("p2").is_ok());
    }
}
