use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Providers that create components asynchronously.
#[async_trait]
pub trait AsyncProvider<T> {
    async fn provide(&self) -> Result<T>;
}

/// Services started through the [`TaskManager`].
///
/// Services start in priority order; a critical service failing to start
/// aborts the daemon, a non-critical one only logs.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Starts the service in the task manager.
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    /// Service name for logging and management.
    fn name(&self) -> &'static str;

    /// Startup priority, higher starts first.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether the daemon cannot run without this service.
    fn is_critical(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    struct NoopService {
        name: &'static str,
        priority: i32,
    }

    #[async_trait]
    impl ServiceProvider for NoopService {
        async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
            task_manager
                .spawn_task(self.name.to_string(), |_token| async { Ok(()) })
                .await
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    struct FailingService;

    #[async_trait]
    impl ServiceProvider for FailingService {
        async fn start(&self, _task_manager: &mut TaskManager) -> Result<()> {
            Err(anyhow!("refused to start"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn services_sort_by_priority() {
        let mut services: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(NoopService { name: "low", priority: 1 }),
            Box::new(NoopService { name: "high", priority: 9 }),
            Box::new(NoopService { name: "mid", priority: 5 }),
        ];
        services.sort_by_key(|s| std::cmp::Reverse(s.priority()));

        let names: Vec<&str> = services.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn start_spawns_the_task() {
        let mut task_manager = TaskManager::new();
        let service = NoopService { name: "svc", priority: 0 };

        service.start(&mut task_manager).await.unwrap();
        assert!(task_manager.is_running("svc"));
    }

    #[tokio::test]
    async fn failing_service_reports_error() {
        let mut task_manager = TaskManager::new();
        assert!(FailingService.start(&mut task_manager).await.is_err());
    }

    #[tokio::test]
    async fn defaults_are_non_critical() {
        let service = NoopService { name: "svc", priority: 0 };
        assert!(!service.is_critical());
    }
}
