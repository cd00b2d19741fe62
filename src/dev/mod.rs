//! Hardware backends: LEDs, the haptic motor and sound output.

pub mod led;
pub mod sound;
pub mod vibra;

pub use led::LedDevices;
pub use sound::SoundDevice;
pub use vibra::VibraDevice;

use log::{debug, warn};

/// Process-wide device singletons. Every device is optional; a feedback whose
/// device is missing is simply not selected.
#[derive(Debug, Default)]
pub struct Devices {
    pub leds: Option<LedDevices>,
    pub vibra: Option<VibraDevice>,
    pub sound: Option<SoundDevice>,
}

impl Devices {
    /// Probes all hardware once at startup.
    pub fn init(sound_theme: String) -> Devices {
        let leds = match LedDevices::discover() {
            Ok(leds) => Some(leds),
            Err(err) => {
                debug!("Failed to init LED devices: {err}");
                None
            }
        };

        let vibra = VibraDevice::discover();
        if vibra.is_none() {
            debug!("No vibra capable device found");
        }

        let sound = match SoundDevice::new(sound_theme) {
            Ok(sound) => Some(sound),
            Err(err) => {
                warn!("Failed to init sound device: {err}");
                None
            }
        };

        Devices { leds, vibra, sound }
    }

    /// A device set without any hardware.
    pub fn none() -> Devices {
        Devices::default()
    }
}
