//! Direct haptic patterns, as exposed through the `Haptic` bus interface.
//!
//! Patterns sent here are serialized by the single physical motor: a new
//! pattern replaces whatever pattern is in flight, an empty pattern cancels
//! it. Event feedbacks always outrank patterns driven through this path.

use log::debug;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    dev::Devices,
    feedback::{Completion, Feedback, RunContext, VibraPatternFeedback},
    settings::{Level, SettingsManager},
};

/// A pattern is limited to this many steps.
pub const MAX_PATTERN_STEPS: usize = 10;
/// A single step is limited to this duration.
pub const MAX_STEP_MS: u32 = 10_000;

#[derive(Default)]
struct ActiveSlot {
    /// Bumped for every started pattern so stale completions are ignored.
    generation: usize,
    feedback: Option<VibraPatternFeedback>,
}

/// Backend of the `Haptic` interface.
pub struct HapticManager {
    devices: Arc<Devices>,
    settings: SettingsManager,
    level: Arc<RwLock<Level>>,
    completion_tx: UnboundedSender<Completion>,
    active: Mutex<ActiveSlot>,
}

impl HapticManager {
    /// Reserved event id for completions of patterns driven through this
    /// manager. Regular event ids are nonzero.
    pub const EVENT_ID: u32 = 0;

    pub fn new(
        devices: Arc<Devices>,
        settings: SettingsManager,
        level: Arc<RwLock<Level>>,
        completion_tx: UnboundedSender<Completion>,
    ) -> Arc<HapticManager> {
        Arc::new(HapticManager {
            devices,
            settings,
            level,
            completion_tx,
            active: Mutex::new(ActiveSlot::default()),
        })
    }

    /// Handles a `Vibrate` call.
    ///
    /// Returns `Ok(false)` when the call was valid but nothing vibrates: the
    /// profile is too low, there is no motor, or an event currently owns it.
    /// Magnitudes outside `[0, 1]` are an argument error.
    pub async fn vibrate(&self, app_id: &str, pattern: &[(f64, u32)]) -> Result<bool, String> {
        if pattern.iter().any(|(m, _)| !(0.0..=1.0).contains(m)) {
            return Err("magnitude out of range".to_string());
        }

        let level = self.effective_level(app_id).await;
        if level < Level::Quiet {
            debug!("Feedback level too low for haptic");
            return Ok(false);
        }

        let Some(vibra) = self.devices.vibra.as_ref() else {
            debug!("No haptic device");
            return Ok(false);
        };

        let steps = clamp_pattern(pattern);
        if steps.is_empty() {
            debug!("Empty pattern, ending haptic feedback");
            self.end_active();
            return Ok(true);
        }

        // Replace whatever this interface is currently driving.
        self.end_active();
        if vibra.is_busy() {
            // An event owns the motor; deny the pattern.
            debug!("Haptic motor busy");
            return Ok(false);
        }

        let (magnitudes, durations) = steps.into_iter().unzip();
        let feedback = VibraPatternFeedback::new(magnitudes, durations);

        let mut active = self.active.lock().unwrap();
        active.generation += 1;
        feedback.run(RunContext {
            event_id: Self::EVENT_ID,
            index: active.generation,
            devices: self.devices.clone(),
            done: self.completion_tx.clone(),
        });
        active.feedback = Some(feedback);
        Ok(true)
    }

    /// Stops the in-flight pattern, if any. The motor is silenced right away
    /// so a following upload does not see it busy.
    pub fn end_active(&self) {
        let feedback = self.active.lock().unwrap().feedback.take();
        if let Some(feedback) = feedback {
            feedback.end();
        }
        if let Some(vibra) = self.devices.vibra.as_ref() {
            let _ = vibra.stop();
        }
    }

    /// Completion callback routed through the manager's dispatcher.
    pub fn on_done(&self, generation: usize) {
        let mut active = self.active.lock().unwrap();
        if active.generation == generation {
            active.feedback = None;
        }
    }

    async fn effective_level(&self, app_id: &str) -> Level {
        let app_level = self.settings.app_level(app_id).await;
        let global = *self.level.read().unwrap();
        // Haptic never asks for more than quiet and carries no importance.
        global.min(app_level).min(Level::Quiet)
    }
}

/// Applies the pattern limits: at most [`MAX_PATTERN_STEPS`] steps, each
/// capped at [`MAX_STEP_MS`].
fn clamp_pattern(pattern: &[(f64, u32)]) -> Vec<(f64, u32)> {
    pattern
        .iter()
        .take(MAX_PATTERN_STEPS)
        .map(|(magnitude, duration)| (*magnitude, (*duration).min(MAX_STEP_MS)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn haptic(devices: Devices, level: Level) -> (Arc<HapticManager>, TempDir) {
        let dir = TempDir::new().unwrap();
        let settings = SettingsManager::new(Settings::default(), dir.path().join("settings.yml"));
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = HapticManager::new(
            Arc::new(devices),
            settings,
            Arc::new(RwLock::new(level)),
            tx,
        );
        (manager, dir)
    }

    #[test]
    fn clamps_pattern_limits() {
        let long: Vec<(f64, u32)> = (0..20).map(|i| (0.5, 20_000 + i)).collect();
        let clamped = clamp_pattern(&long);
        assert_eq!(clamped.len(), MAX_PATTERN_STEPS);
        assert!(clamped.iter().all(|(_, d)| *d == MAX_STEP_MS));
    }

    #[tokio::test]
    async fn rejects_invalid_magnitude() {
        let (manager, _dir) = haptic(Devices::none(), Level::Full);
        let result = manager.vibrate("app", &[(1.5, 100)]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn without_device_nothing_vibrates() {
        let (manager, _dir) = haptic(Devices::none(), Level::Full);
        assert_eq!(manager.vibrate("app", &[(1.0, 100)]).await.unwrap(), false);
    }

    #[tokio::test]
    async fn silent_profile_denies_haptic() {
        let (manager, _dir) = haptic(Devices::none(), Level::Silent);
        assert_eq!(manager.vibrate("app", &[(1.0, 100)]).await.unwrap(), false);
    }

    #[tokio::test]
    async fn empty_pattern_is_a_cancel() {
        let (manager, _dir) = haptic(Devices::none(), Level::Full);
        // No device: even the cancel path reports absence of a motor.
        assert_eq!(manager.vibrate("app", &[]).await.unwrap(), false);
    }
}
