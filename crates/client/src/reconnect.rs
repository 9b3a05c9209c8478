//! Exponential-backoff reconnection for the workflow push channel.
//!
//! When the push connection drops while a workflow is still running,
//! the session controller calls [`reconnect_loop`] to keep retrying
//! with increasing delays until either the connection is restored or
//! the [`CancellationToken`] is triggered. The same backoff schedule
//! is reused for snapshot-poll failures.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::{FrameStream, WorkflowBackend};

/// Tunable parameters for the exponential-backoff strategy.
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Attempt to reopen the push connection with exponential backoff.
///
/// Returns `Some(stream)` once a connection succeeds, or `None` if the
/// `cancel` token is triggered before a successful connection.
pub async fn reconnect_loop(
    backend: &dyn WorkflowBackend,
    workflow_id: &str,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<FrameStream> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::info!(
            workflow_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to workflow socket",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(workflow_id, "Reconnect cancelled");
                return None;
            }
            result = backend.connect(workflow_id) => {
                match result {
                    Ok(stream) => {
                        tracing::info!(workflow_id, attempt, "Reconnected to workflow socket");
                        return Some(stream);
                    }
                    Err(e) => {
                        tracing::warn!(
                            workflow_id,
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use async_trait::async_trait;
    use journ_core::snapshot::WorkflowSnapshot;

    #[test]
    fn next_delay_doubles() {
        let config = ReconnectConfig::default();
        let d = next_delay(Duration::from_secs(1), &config);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(8), &config);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn next_delay_already_at_max() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(30),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(30), &config);
        assert_eq!(d, Duration::from_secs(30));
    }

    #[test]
    fn custom_multiplier() {
        let config = ReconnectConfig {
            multiplier: 3.0,
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(2), &config);
        assert_eq!(d, Duration::from_secs(6));
    }

    #[test]
    fn full_backoff_sequence() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];

        for &expected_secs in &expected {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &config);
        }
    }

    /// Backend whose connection attempts always fail.
    struct UnreachableBackend;

    #[async_trait]
    impl WorkflowBackend for UnreachableBackend {
        async fn connect(&self, _workflow_id: &str) -> Result<FrameStream, BackendError> {
            Err(BackendError::Connection("unreachable".to_string()))
        }

        async fn fetch_snapshot(
            &self,
            _workflow_id: &str,
        ) -> Result<WorkflowSnapshot, BackendError> {
            Err(BackendError::Connection("unreachable".to_string()))
        }

        async fn request_cancel(&self, _workflow_id: &str) -> Result<(), BackendError> {
            Err(BackendError::Connection("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn cancellation_token_stops_reconnect() {
        let cancel = CancellationToken::new();
        // Cancel immediately: reconnect_loop should return None without
        // a successful connection.
        cancel.cancel();

        let config = ReconnectConfig::default();
        let result = reconnect_loop(&UnreachableBackend, "wf-1", &config, &cancel).await;
        assert!(result.is_none());
    }
}
