//! System coordinator for service lifecycle.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, DBusServiceProvider, DispatcherServiceProvider,
        ServiceProvider, SettingsWatcherServiceProvider, SignalServiceProvider,
    },
    settings::SettingsManager,
    task_manager::TaskManager,
};

/// Creates the shared state, starts all services in priority order and runs
/// the main event loop until shutdown.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Initializes the application state and registers all services.
    pub async fn initialize(&mut self, settings: SettingsManager, replace: bool) -> Result<()> {
        info!("Initializing SystemCoordinator");

        let provider = AppStateProvider::new(settings, self.event_bus.clone());
        let state = provider
            .provide()
            .await
            .context("Failed to initialize application state")?;
        self.shared_state = Some(state.clone());

        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(DispatcherServiceProvider::new(state.clone())),
            Box::new(SignalServiceProvider::new(self.event_bus.clone())),
            Box::new(SettingsWatcherServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
        ];

        let dbus =
            DBusServiceProvider::new(state.clone(), self.event_bus.clone(), replace).await?;
        providers.push(Box::new(dbus));

        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers",
            self.service_providers.len()
        );
        Ok(())
    }

    /// Starts all registered services. Critical services must come up;
    /// non-critical ones may fail with a warning.
    pub async fn start_all_services(&mut self) -> Result<()> {
        for provider in &self.service_providers {
            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        provider.is_critical()
                    );
                }
                Err(err) if provider.is_critical() => {
                    return Err(err).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(err) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {err}",
                        provider.name()
                    );
                }
            }
        }
        Ok(())
    }

    /// Main loop: drains bus events and waits for shutdown.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut events = self.event_bus.subscribe();
        info!("Entering main loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for the shutdown signal")?;
                    info!("Received Ctrl+C, shutting down");
                    self.shutdown().await;
                    break;
                }
                event = events.recv() => {
                    if !self.handle_event(event).await? {
                        break;
                    }
                }
            }
        }

        info!("Main loop terminated");
        Ok(())
    }

    /// Returns `false` once the loop should stop.
    async fn handle_event(
        &mut self,
        event: Result<Event, tokio::sync::broadcast::error::RecvError>,
    ) -> Result<bool> {
        let Some(state) = self.shared_state.clone() else {
            bail!("Coordinator not initialized");
        };

        match event {
            Ok(Event::ThemeReloadRequested) => state.manager.reload_theme().await,
            Ok(Event::ProfileChanged(level)) => {
                // Either our own announcement or a settings file edit; the
                // manager ignores a level it already runs at.
                state.manager.set_profile(level.as_str()).await;
            }
            Ok(Event::SoundThemeChanged(name)) => {
                if let Some(sound) = &state.devices.sound {
                    sound.set_theme_name(name);
                }
            }
            Ok(Event::SystemShutdown) => {
                self.shutdown().await;
                return Ok(false);
            }
            Ok(Event::FeedbackEnded { .. }) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("Coordinator lagged by {n} events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                bail!("Event bus closed unexpectedly");
            }
        }
        Ok(true)
    }

    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown");
        if let Err(err) = self.task_manager.shutdown_all().await {
            warn!("Error during task shutdown: {err}");
        }
        info!("Shutdown complete");
    }

    #[allow(dead_code)]
    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}
