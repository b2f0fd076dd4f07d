//! # Loop Supervisor
//!
//! Runs a long-lived loop and restarts it with exponential backoff when it
//! fails, logging every failure. A loop that ran longer than the maximum
//! backoff is considered healthy again and restarts from the initial delay.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{error, info, warn};

use flip_common::{FlipResult, Shutdown};

/// Restart delays for a supervised loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Runs `task` until shutdown, restarting it after every exit.
///
/// `on_restart` is invoked once per restart.
pub async fn supervise<F, Fut, R>(
    name: &'static str,
    policy: RestartPolicy,
    mut shutdown: Shutdown,
    mut task: F,
    on_restart: R,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = FlipResult<()>>,
    R: Fn(),
{
    let mut backoff = policy.initial_backoff;

    loop {
        if shutdown.is_triggered() {
            break;
        }

        let started = Instant::now();
        match task().await {
            Ok(()) if shutdown.is_triggered() => break,
            Ok(()) => warn!(task = name, "loop exited unexpectedly"),
            Err(err) => error!(task = name, error = %err, retry_in = ?backoff, "loop failed"),
        }

        if started.elapsed() > policy.max_backoff {
            backoff = policy.initial_backoff;
        }

        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = time::sleep(backoff) => {}
        }
        on_restart();
        info!(task = name, "restarting loop");
        backoff = (backoff * 2).min(policy.max_backoff);
    }

    info!(task = name, "loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use flip_common::{shutdown, FlipError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RestartPolicy {
        RestartPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn restarts_failed_loops_until_success() {
        let (trigger, shutdown) = shutdown::channel();
        let attempts = Arc::new(AtomicU32::new(0));
        let restarts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let restart_counter = Arc::clone(&restarts);
        supervise(
            "flaky",
            fast_policy(),
            shutdown,
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n >= 2 {
                    trigger.trigger();
                }
                async move {
                    if n < 2 {
                        Err(FlipError::Config("boom".into()))
                    } else {
                        Ok(())
                    }
                }
            },
            move || {
                restart_counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(restarts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_start_after_shutdown() {
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();
        let attempts = AtomicU32::new(0);
        supervise(
            "idle",
            fast_policy(),
            shutdown,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            || {},
        )
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
