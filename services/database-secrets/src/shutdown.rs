//! Background task supervision.
//!
//! The engine's periodic loops run as tracked tasks that stop when the
//! shared cancellation token fires.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the engine's background tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl ShutdownCoordinator {
    /// Coordinator with no tasks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled on shutdown; loops select on it.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has started.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a tracked task that is dropped at its next await point once
    /// shutdown begins.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.tasks.lock().spawn(async move {
            tokio::select! {
                () = future => info!(task = name, "background task completed"),
                () = token.cancelled() => info!(task = name, "background task cancelled by shutdown"),
            }
        });
    }

    /// Cancel every task and wait up to `timeout` for them to finish, then
    /// abort stragglers.
    pub async fn shutdown(&self, timeout: Duration) {
        self.token.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "background task failed during shutdown");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("shutdown timeout reached, aborting remaining tasks");
            tasks.abort_all();
        }
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }
}
