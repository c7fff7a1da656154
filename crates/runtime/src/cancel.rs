//! Per-run cancellation registry.
//!
//! One [`CancelToken`] per active run, keyed by run id. `abort` signals
//! the token and removes the entry; the token itself lives in
//! `aa_domain::cancel` so tools and providers can check it too.

use std::collections::HashMap;

use aa_domain::cancel::CancelToken;
use parking_lot::Mutex;

/// Tracks active cancellation tokens per run id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new token for a run.
    pub fn register(&self, run_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(run_id.to_owned(), token.clone());
        token
    }

    /// Signal the run's token. Returns true if a token was found.
    pub fn cancel(&self, run_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(run_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token (called when a run ends, however it ends).
    pub fn remove(&self, run_id: &str) {
        self.tokens.lock().remove(run_id);
    }

    /// Check if a run is currently active.
    pub fn is_running(&self, run_id: &str) -> bool {
        self.tokens.lock().contains_key(run_id)
    }
}
