//! Application state provider.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    app_context::AppState, event::EventBus, providers::traits::AsyncProvider,
    settings::SettingsManager,
};

/// Builds the shared [`AppState`]: device probing, theme loading and manager
/// wiring happen here, in async context.
pub struct AppStateProvider {
    settings: SettingsManager,
    bus: EventBus,
}

impl AppStateProvider {
    pub fn new(settings: SettingsManager, bus: EventBus) -> Self {
        Self { settings, bus }
    }
}

#[async_trait]
impl AsyncProvider<Arc<AppState>> for AppStateProvider {
    async fn provide(&self) -> Result<Arc<AppState>> {
        let state = AppState::new(self.settings.clone(), self.bus.clone()).await?;
        Ok(Arc::new(state))
    }
}
