//! Process-wide stop signal plus the set of background tasks to drain on exit

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Root cancellation token for ingestion loops, scalper actors and timers.
///
/// Long-running tasks are registered with [`track`](Self::track) so that
/// [`drain`](Self::drain) can wait for them after the token fires.
#[derive(Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel on the first Ctrl+C
    pub fn with_ctrl_c() -> Self {
        let controller = Self::new();
        let token = controller.token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl+C received; stopping");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Ctrl+C handler unavailable"),
            }
        });
        controller
    }

    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    pub fn track(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Await every tracked task for at most `grace` in total.
    ///
    /// Returns how many tasks were aborted or ended in a panic.
    pub async fn drain(&self, grace: Duration) -> usize {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let deadline = tokio::time::Instant::now() + grace;
        let mut failed = 0;
        for mut task in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    warn!(error = %e, "Background task ended abnormally");
                }
                Err(_) => {
                    failed += 1;
                    task.abort();
                    warn!("Background task ignored shutdown; aborted");
                }
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_children_follow_trigger() {
        let controller = ShutdownController::new();
        let child = controller.child_token();
        assert!(!child.is_cancelled());

        controller.trigger();
        assert!(controller.is_triggered());
        assert!(child.is_cancelled());
        controller.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_stragglers() {
        let controller = ShutdownController::new();
        let token = controller.child_token();
        controller.track(tokio::spawn(async move { token.cancelled().await }));
        controller.track(tokio::spawn(std::future::pending::<()>()));
        assert_eq!(controller.tracked(), 2);

        controller.trigger();
        assert_eq!(controller.drain(Duration::from_secs(5)).await, 1);
        assert_eq!(controller.tracked(), 0);
    }
}
