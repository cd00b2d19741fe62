//! Settings file monitoring service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use notify::{recommended_watcher, EventHandler, RecursiveMode, Watcher};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    event::{Event as AppEvent, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

const DEBOUNCE: Duration = Duration::from_millis(300);

/// Watches the settings file and publishes profile, theme and sound-theme
/// changes on the event bus.
pub struct SettingsWatcherServiceProvider {
    state: Arc<AppState>,
    bus: EventBus,
}

impl SettingsWatcherServiceProvider {
    pub fn new(state: Arc<AppState>, bus: EventBus) -> Self {
        Self { state, bus }
    }
}

#[async_trait]
impl ServiceProvider for SettingsWatcherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let bus = self.bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_settings_watcher(state, bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "SettingsWatcherService"
    }

    fn priority(&self) -> i32 {
        6
    }

    fn is_critical(&self) -> bool {
        false
    }
}

struct ChannelHandler {
    sender: mpsc::UnboundedSender<notify::Result<notify::Event>>,
}

impl EventHandler for ChannelHandler {
    fn handle_event(&mut self, event: notify::Result<notify::Event>) {
        let _ = self.sender.send(event);
    }
}

async fn run_settings_watcher(
    state: Arc<AppState>,
    bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let settings_path = state.settings.path().to_path_buf();
    let watch_dir: PathBuf = settings_path
        .parent()
        .context("Settings path has no parent directory")?
        .to_path_buf();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher =
        recommended_watcher(ChannelHandler { sender: tx }).context("Failed to create watcher")?;
    watcher
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", watch_dir.display()))?;
    debug!("Watching settings in {}", watch_dir.display());

    loop {
        let event = tokio::select! {
            () = cancel_token.cancelled() => break,
            event = rx.recv() => event,
        };
        let Some(event) = event else { break };

        let touched = match event {
            Ok(event) => event.paths.iter().any(|p| *p == settings_path),
            Err(err) => {
                warn!("Watch error: {err}");
                false
            }
        };
        if !touched {
            continue;
        }

        // Editors fire several events per save; let them settle and drain.
        tokio::time::sleep(DEBOUNCE).await;
        while rx.try_recv().is_ok() {}

        let old = match state.settings.reload().await {
            Ok(old) => old,
            Err(err) => {
                warn!("Failed to reload settings: {err}");
                continue;
            }
        };
        let new = state.settings.snapshot().await;

        if old.profile != new.profile {
            let _ = bus.publish(AppEvent::ProfileChanged(new.profile));
        }
        if old.theme != new.theme {
            let _ = bus.publish(AppEvent::ThemeReloadRequested);
        }
        if old.sound_theme != new.sound_theme {
            let _ = bus.publish(AppEvent::SoundThemeChanged(new.sound_theme.clone()));
        }
    }

    Ok(())
}
