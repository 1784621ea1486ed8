//! Background task arena
//!
//! Periodic jobs (health probes, cost passes, compliance passes) are spawned
//! through one `BackgroundTasks` arena. `shutdown()` cancels every job and
//! waits for in-flight iterations, so no timer fires once it returns.

use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle set for periodic jobs
pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl BackgroundTasks {
    /// Empty arena
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Token cancelled on shutdown
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has started
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of live jobs
    pub fn len(&self) -> usize {
        self.handles.lock().iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Whether there are no live jobs
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a job that runs every `period`, first run after one period.
    ///
    /// A failed iteration is logged and the schedule continues. Returns
    /// `false` if the arena is already shut down.
    pub fn spawn_periodic<F, Fut, E>(&self, name: impl Into<String>, period: Duration, mut job: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let mut handles = self.handles.lock();
        if self.token.is_cancelled() {
            tracing::warn!(task = %name, "Refusing to spawn task after shutdown");
            return false;
        }

        let token = self.token.clone();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = job().await {
                    tracing::warn!(task = %task_name, error = %e, "Periodic task iteration failed");
                }
            }
            tracing::debug!(task = %task_name, "Periodic task stopped");
        });

        handles.push((name, handle));
        true
    }

    /// Cancel every job and wait for in-flight iterations to finish
    pub async fn shutdown(&self) {
        let handles: Vec<_> = {
            // Holding the lock while cancelling orders this against spawn_periodic
            let mut guard = self.handles.lock();
            self.token.cancel();
            guard.drain(..).collect()
        };

        tracing::info!("Stopping {} background tasks", handles.len());
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                tracing::warn!(task = %name, error = %e, "Background task ended abnormally");
            }
        }
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_failures_do_not_stop_schedule() {
        let tasks = BackgroundTasks::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        tasks.spawn_periodic("flaky", Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n % 2 == 0 {
                    Err(format!("iteration {} failed", n))
                } else {
                    Ok(())
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        tasks.shutdown().await;
        assert!(runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_no_runs_after_shutdown() {
        let tasks = BackgroundTasks::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        tasks.spawn_periodic("tick", Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tasks.shutdown().await;
        let after_shutdown = runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
        assert!(tasks.is_empty());

        let spawned = tasks.spawn_periodic("late", Duration::from_millis(5), || async { Ok::<_, String>(()) });
        assert!(!spawned);
    }
}
