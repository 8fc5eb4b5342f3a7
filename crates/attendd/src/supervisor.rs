//! Restart loop for camera workers.

use crate::shutdown::Shutdown;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// A worker that ran at least this long restarts with the initial backoff.
    pub healthy_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            healthy_after: Duration::from_secs(60),
        }
    }
}

/// Run the worker produced by `start` as its own task, restarting it after
/// errors or panics until shutdown.
pub async fn supervise<F, Fut, E>(
    name: &str,
    mut start: F,
    policy: RestartPolicy,
    mut shutdown: Shutdown,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut backoff = policy.initial_backoff;
    let mut restarts = 0u32;

    while !shutdown.is_triggered() {
        let started = Instant::now();
        match tokio::spawn(start()).await {
            Ok(Ok(())) if shutdown.is_triggered() => break,
            Ok(Ok(())) => tracing::warn!(worker = name, "worker exited unexpectedly"),
            Ok(Err(e)) => tracing::error!(worker = name, error = %e, "worker failed"),
            Err(e) if e.is_panic() => tracing::error!(worker = name, "worker panicked"),
            Err(e) => tracing::error!(worker = name, error = %e, "worker task aborted"),
        }

        if started.elapsed() >= policy.healthy_after {
            backoff = policy.initial_backoff;
        }
        restarts += 1;
        tracing::info!(
            worker = name,
            restarts,
            wait_ms = backoff.as_millis() as u64,
            "restarting worker"
        );

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.wait() => break,
        }
        backoff = (backoff * 2).min(policy.max_backoff);
    }
    tracing::debug!(worker = name, "supervisor stopped");
}
