//! Application entry point and builder.

use crate::{coordinator::SystemCoordinator, settings::SettingsManager};
use anyhow::Result;

/// Ties the daemon lifecycle together: initialize the coordinator, start the
/// services, run the main loop.
pub struct Application {
    coordinator: SystemCoordinator,
    settings: SettingsManager,
    replace: bool,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub async fn run(&mut self) -> Result<()> {
        self.coordinator
            .initialize(self.settings.clone(), self.replace)
            .await?;
        self.coordinator.start_all_services().await?;
        self.coordinator.run_main_loop().await?;
        Ok(())
    }
}

/// Fluent configuration for [`Application`].
pub struct ApplicationBuilder {
    settings: Option<SettingsManager>,
    replace: bool,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            settings: None,
            replace: false,
        }
    }

    pub fn with_settings(mut self, settings: SettingsManager) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Ask a running instance to hand over the bus name.
    pub fn with_replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    pub fn build(self) -> Result<Application> {
        let settings = self
            .settings
            .ok_or_else(|| anyhow::anyhow!("Settings manager is required"))?;
        Ok(Application {
            coordinator: SystemCoordinator::new(),
            settings,
            replace: self.replace,
        })
    }
}
