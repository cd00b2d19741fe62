//! Lifecycle management for long-running service tasks.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracks named service tasks and shuts them down as a group.
///
/// Every task receives a child token of the global cancellation token; on
/// shutdown the global token is cancelled and all tasks are awaited with a
/// timeout.
pub struct TaskManager {
    tasks: HashMap<String, JoinHandle<Result<()>>>,
    global_token: CancellationToken,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            global_token: CancellationToken::new(),
        }
    }

    /// Spawns and registers a task under `name`.
    pub async fn spawn_task<F, Fut>(&mut self, name: String, task_fn: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.global_token.child_token();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            info!("Starting task: {task_name}");
            let result = task_fn(token).await;
            match &result {
                Ok(()) => info!("Task '{task_name}' finished"),
                Err(err) => error!("Task '{task_name}' failed: {err}"),
            }
            result
        });

        self.tasks.insert(name, handle);
        Ok(())
    }

    /// Cancels every task and waits for completion.
    ///
    /// Returns the first error encountered, if any.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());
        self.global_token.cancel();

        let mut first_error = None;
        for (name, handle) in self.tasks.drain() {
            let outcome = match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(err))) => Some(err),
                Ok(Err(err)) => Some(anyhow!("Task '{name}' panicked: {err}")),
                Err(_) => Some(anyhow!("Task '{name}' exceeded the shutdown timeout")),
            };
            if let Some(err) = outcome {
                warn!("{err}");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err).context("One or more tasks failed during shutdown"),
            None => {
                info!("All tasks stopped");
                Ok(())
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn spawns_and_tracks_tasks() {
        let mut manager = TaskManager::new();
        manager
            .spawn_task("noop".to_string(), |_token| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(manager.active_count(), 1);
        assert!(manager.is_running("noop"));
        assert!(!manager.is_running("other"));
    }

    #[tokio::test]
    async fn shutdown_cancels_tasks() {
        let mut manager = TaskManager::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        manager
            .spawn_task("waiter".to_string(), move |token| async move {
                token.cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        manager.shutdown_all().await.unwrap();
        assert!(cancelled.load(Ordering::SeqCst));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_reports_task_errors() {
        let mut manager = TaskManager::new();
        manager
            .spawn_task("failing".to_string(), |_token| async {
                Err(anyhow!("boom"))
            })
            .await
            .unwrap();

        assert!(manager.shutdown_all().await.is_err());
    }
}
