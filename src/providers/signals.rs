//! Unix signal handling service.
//!
//! SIGHUP requests a theme reload, SIGTERM a clean shutdown. Raw signal
//! callbacks never touch daemon state; they only publish bus events drained
//! by the coordinator.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::{
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

pub struct SignalServiceProvider {
    bus: EventBus,
}

impl SignalServiceProvider {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ServiceProvider for SignalServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let bus = self.bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_signal_service(bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "SignalService"
    }

    fn priority(&self) -> i32 {
        7
    }
}

async fn run_signal_service(bus: EventBus, cancel_token: CancellationToken) -> Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            _ = hangup.recv() => {
                info!("Caught SIGHUP, reloading feedback theme");
                let _ = bus.publish(Event::ThemeReloadRequested);
            }
            _ = terminate.recv() => {
                info!("Caught SIGTERM, shutting down");
                let _ = bus.publish(Event::SystemShutdown);
                break;
            }
        }
    }
    Ok(())
}
