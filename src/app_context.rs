//! Shared application state.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::{
    debug,
    dev::Devices,
    event::EventBus,
    haptic_manager::HapticManager,
    manager::FeedbackManager,
    settings::SettingsManager,
    theme::ThemeLoader,
};

/// The owned root of all daemon state: settings, devices, the feedback
/// manager and (when a motor exists) the haptic manager.
pub struct AppState {
    pub settings: SettingsManager,
    pub devices: Arc<Devices>,
    pub manager: Arc<FeedbackManager>,
    pub haptic: Option<Arc<HapticManager>>,
}

impl AppState {
    /// Probes the hardware, loads the initial theme and wires up the
    /// managers. Failing to find any theme (including the default) is fatal.
    pub async fn new(settings: SettingsManager, bus: EventBus) -> Result<AppState> {
        let snapshot = settings.snapshot().await;

        let devices = Arc::new(Devices::init(snapshot.sound_theme.clone()));

        let loader = ThemeLoader::new();
        let theme = loader
            .load(&snapshot.theme)
            .context("Failed to load any feedback theme")?;

        let manager = FeedbackManager::new(
            settings.clone(),
            loader,
            theme,
            devices.clone(),
            bus,
            snapshot.profile,
        );

        let haptic = if devices.vibra.is_some() || debug::force_haptic() {
            let haptic = HapticManager::new(
                devices.clone(),
                settings.clone(),
                manager.level_handle(),
                manager.completion_sender(),
            );
            manager.attach_haptic(haptic.clone());
            Some(haptic)
        } else {
            None
        };

        Ok(AppState {
            settings,
            devices,
            manager,
            haptic,
        })
    }
}
