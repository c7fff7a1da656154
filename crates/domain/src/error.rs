/// Shared error type used across all AutoAgent crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("provider_circuit_open: {0}")]
    CircuitOpen(String),

    #[error("control plane: {0}")]
    ControlPlane(String),

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("policy: {0}")]
    Policy(String),

    #[error("approval rejected: {0}")]
    ApprovalRejected(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Coarse error classes that drive retry and circuit-breaker decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Network timeouts, 5xx, connection resets. Retried with backoff.
    Transient,
    /// Structured provider failures (4xx, circuit open). Not retried
    /// within the turn; counts against the provider's circuit.
    Provider,
    /// A tool's own contract failed (non-zero exit, missing file).
    Tool,
    /// Denied by the command inspector, egress policy, tool policy, or
    /// a rejected approval. Never retried.
    Policy,
    /// The run's cancellation token fired.
    Cancelled,
    Unknown,
}

/// Substrings that mark a message as transient when structured
/// classification has nothing better to say.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "temporarily",
    "econnreset",
    "429",
    "500",
    "502",
    "503",
    "504",
];

impl Error {
    /// Classify this error for retry purposes.
    ///
    /// Structured variants map directly; `Http`/`Other` fall back to
    /// substring inspection of the message.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Timeout(_) => ErrorClass::Transient,
            Error::Provider { message, .. } => {
                if is_transient_message(message) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Provider
                }
            }
            Error::CircuitOpen(_) => ErrorClass::Provider,
            Error::Tool { .. } | Error::Io(_) => ErrorClass::Tool,
            Error::Policy(_) | Error::ApprovalRejected(_) => ErrorClass::Policy,
            Error::Cancelled => ErrorClass::Cancelled,
            Error::Http(msg) | Error::ControlPlane(msg) => {
                if is_transient_message(msg) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Unknown
                }
            }
            Error::Other(msg) => {
                if is_transient_message(msg) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Unknown
                }
            }
            _ => ErrorClass::Unknown,
        }
    }
}

fn is_transient_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient() {
        assert_eq!(Error::Timeout("read".into()).class(), ErrorClass::Transient);
    }

    #[test]
    fn provider_4xx_is_provider_class() {
        let e = Error::Provider {
            provider: "p1".into(),
            message: "HTTP 401 - invalid key".into(),
        };
        assert_eq!(e.class(), ErrorClass::Provider);
    }

    #[test]
    fn provider_5xx_is_transient() {
        let e = Error::Provider {
            provider: "p1".into(),
            message: "HTTP 503 - overloaded".into(),
        };
        assert_eq!(e.class(), ErrorClass::Transient);
    }

    #[test]
    fn circuit_open_is_provider_class() {
        assert_eq!(
            Error::CircuitOpen("p1".into()).class(),
            ErrorClass::Provider
        );
    }

    #[test]
    fn policy_and_approval_are_policy_class() {
        assert_eq!(Error::Policy("blocked".into()).class(), ErrorClass::Policy);
        assert_eq!(
            Error::ApprovalRejected("operator said no".into()).class(),
            ErrorClass::Policy
        );
    }

    #[test]
    fn cancelled_class() {
        assert_eq!(Error::Cancelled.class(), ErrorClass::Cancelled);
    }

    #[test]
    fn substring_fallback_on_other() {
        assert_eq!(
            Error::Other("request timed out after 10s".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            Error::Other("something odd".into()).class(),
            ErrorClass::Unknown
        );
    }
}
