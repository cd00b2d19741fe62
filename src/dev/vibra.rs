//! Haptic motor device handling.
//!
//! Talks to the kernel force-feedback interface of an input device. Exactly
//! one effect is uploaded at a time; an identical rumble reappearing
//! back-to-back reuses the uploaded effect to avoid driver churn.

use anyhow::{Context, Result};
use evdev::{
    Device, EventType, FFEffect, FFEffectData, FFEffectKind, FFEffectType, FFEnvelope, FFReplay,
    FFTrigger, FFWaveform, InputEvent,
};
use log::{debug, warn};
use std::{fmt, sync::Mutex};

/// Master gain applied at init when the device supports FF_GAIN (75%).
const MASTER_GAIN: i32 = 0xC000;

/// Replay length used for periodic effects that run until stopped.
const PERIODIC_LENGTH_MS: u16 = u16::MAX;

struct Inner {
    device: Device,
    effect: Option<FFEffect>,
    /// (strength, length) of the currently uploaded rumble effect.
    uploaded: Option<(u16, u16)>,
}

/// A force-feedback capable input device.
pub struct VibraDevice {
    inner: Mutex<Inner>,
}

impl fmt::Debug for VibraDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("VibraDevice")
            .field("device", &inner.device.name())
            .field("busy", &inner.effect.is_some())
            .finish()
    }
}

impl VibraDevice {
    /// Scans the input subsystem for the first device with both rumble and
    /// periodic effect support.
    pub fn discover() -> Option<VibraDevice> {
        for (path, device) in evdev::enumerate() {
            let Some(ff) = device.supported_ff() else {
                continue;
            };
            if !ff.contains(FFEffectType::FF_RUMBLE) || !ff.contains(FFEffectType::FF_PERIODIC) {
                continue;
            }

            debug!(
                "Vibra device at '{}' usable ({})",
                path.display(),
                device.name().unwrap_or("unnamed")
            );
            let vibra = VibraDevice {
                inner: Mutex::new(Inner {
                    device,
                    effect: None,
                    uploaded: None,
                }),
            };
            vibra.setup_gain();
            return Some(vibra);
        }
        None
    }

    fn setup_gain(&self) {
        let mut inner = self.inner.lock().unwrap();
        let supports_gain = inner
            .device
            .supported_ff()
            .map(|ff| ff.contains(FFEffectType::FF_GAIN))
            .unwrap_or(false);
        if !supports_gain {
            debug!("Gain unsupported");
            return;
        }

        debug!("Setting master gain to 75%");
        let event = InputEvent::new(
            EventType::FORCEFEEDBACK,
            FFEffectType::FF_GAIN.0,
            MASTER_GAIN,
        );
        if let Err(err) = inner.device.send_events(&[event]) {
            warn!("Unable to set gain: {err}");
        }
    }

    /// Plays a rumble of `duration_ms` at `magnitude` in [0, 1]. Reuses the
    /// uploaded effect when magnitude and duration match the previous one.
    pub fn rumble(&self, magnitude: f64, duration_ms: u32) -> Result<()> {
        let strength = magnitude_to_strength(magnitude);
        let length = duration_ms.min(u32::from(u16::MAX)) as u16;
        let mut inner = self.inner.lock().unwrap();

        if inner.uploaded != Some((strength, length)) || inner.effect.is_none() {
            inner.effect = None;
            inner.uploaded = None;

            let data = FFEffectData {
                direction: 0x4000,
                trigger: FFTrigger::default(),
                replay: FFReplay { length, delay: 0 },
                kind: FFEffectKind::Rumble {
                    strong_magnitude: strength,
                    weak_magnitude: 0,
                },
            };
            debug!("Uploading rumble effect ({strength}, {length} ms)");
            let effect = inner
                .device
                .upload_ff_effect(data)
                .context("Failed to upload rumble effect")?;
            inner.effect = Some(effect);
            inner.uploaded = Some((strength, length));
        }

        match inner.effect.as_mut() {
            Some(effect) => effect.play(1).context("Failed to play rumble effect"),
            None => Ok(()),
        }
    }

    /// Uploads and starts a periodic sine effect. The effect keeps running
    /// until [`VibraDevice::stop`].
    pub fn periodic(&self, magnitude: f64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.effect = None;
        inner.uploaded = None;

        let data = FFEffectData {
            direction: 0x4000,
            trigger: FFTrigger::default(),
            replay: FFReplay {
                length: PERIODIC_LENGTH_MS,
                delay: 0,
            },
            kind: FFEffectKind::Periodic {
                waveform: FFWaveform::Sine,
                period: 10,
                magnitude: magnitude_to_level(magnitude),
                offset: 0,
                phase: 0,
                envelope: FFEnvelope {
                    attack_length: 0,
                    attack_level: 0,
                    fade_length: 0,
                    fade_level: 0,
                },
            },
        };
        debug!("Uploading periodic effect");
        let mut effect = inner
            .device
            .upload_ff_effect(data)
            .context("Failed to upload periodic effect")?;
        effect
            .play(i32::MAX)
            .context("Failed to play periodic effect")?;
        inner.effect = Some(effect);
        Ok(())
    }

    /// Stops any playing effect and erases it from the device.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.uploaded = None;
        if let Some(mut effect) = inner.effect.take() {
            effect.stop().context("Failed to stop effect")?;
        }
        Ok(())
    }

    /// Erases the uploaded effect without expecting it to be playing.
    pub fn remove_effect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.effect = None;
        inner.uploaded = None;
    }

    /// Whether an effect currently occupies the motor.
    pub fn is_busy(&self) -> bool {
        self.inner.lock().unwrap().effect.is_some()
    }
}

/// Maps a magnitude in [0, 1] onto the u16 rumble strength range.
fn magnitude_to_strength(magnitude: f64) -> u16 {
    (magnitude.clamp(0.0, 1.0) * f64::from(u16::MAX)).round() as u16
}

/// Maps a magnitude in [0, 1] onto the i16 periodic level range.
fn magnitude_to_level(magnitude: f64) -> i16 {
    (magnitude.clamp(0.0, 1.0) * f64::from(i16::MAX)).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn magnitudes_scale_and_clamp() {
        assert_eq!(magnitude_to_strength(0.0), 0);
        assert_eq!(magnitude_to_strength(1.0), u16::MAX);
        assert_eq!(magnitude_to_strength(1.5), u16::MAX);
        assert_eq!(magnitude_to_strength(-0.5), 0);
        assert_eq!(magnitude_to_strength(0.5), 32768);

        assert_eq!(magnitude_to_level(1.0), i16::MAX);
        assert_eq!(magnitude_to_level(0.0), 0);
    }
}
