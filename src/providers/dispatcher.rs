//! Feedback dispatcher service.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{app_context::AppState, providers::traits::ServiceProvider, task_manager::TaskManager};

/// Runs the manager's dispatcher loop: feedback completions, timeouts and
/// client-lifetime control messages all funnel through it.
pub struct DispatcherServiceProvider {
    state: Arc<AppState>,
}

impl DispatcherServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for DispatcherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let manager = self.state.manager.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                manager.run_dispatcher(cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "DispatcherService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}
