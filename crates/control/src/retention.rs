//! Retention sweeper — periodic pruning of expired traces, artifacts,
//! prompts, and prompt-cache entries.

use std::sync::Arc;
use std::time::Duration;

use aa_domain::config::Settings;

use crate::client::ControlPlaneClient;

/// Spawn the sweeper loop. Runs every `cleanup_interval_minutes` until the
/// returned handle is aborted; individual sweep failures are logged and
/// the loop keeps going.
pub fn spawn_sweeper(
    client: Arc<ControlPlaneClient>,
    settings: Settings,
) -> tokio::task::JoinHandle<()> {
    let interval_minutes = settings.cleanup_interval_minutes.max(1);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match client.sweep_retention(&settings).await {
                Ok(()) => {
                    tracing::debug!(interval_minutes, "retention sweep completed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "retention sweep failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweeper_spawns_and_aborts_cleanly() {
        let client = Arc::new(ControlPlaneClient::new("http://127.0.0.1:1"));
        let handle = spawn_sweeper(client, Settings::default());
        assert!(!handle.is_finished());
        handle.abort();
        let joined = handle.await;
        assert!(joined.unwrap_err().is_cancelled());
    }
}
