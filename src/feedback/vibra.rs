//! Haptic feedbacks: repeated rumbles, endless periodic vibration and
//! magnitude/duration patterns.

use log::{debug, warn};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{EndReason, Feedback, RunContext};
use crate::dev::Devices;

/// Rumble length used when the configured duration leaves no room for the
/// requested repetitions.
const DEFAULT_RUMBLE_MS: u32 = 250;

/// Plays `count` rumbles with pauses, spread over a total duration.
#[derive(Debug)]
pub struct VibraRumbleFeedback {
    count: u32,
    pause: u32,
    duration: u32,
    magnitude: f64,
    cancel: CancellationToken,
}

impl VibraRumbleFeedback {
    pub fn new(count: u32, pause: u32, duration: u32, magnitude: f64) -> VibraRumbleFeedback {
        VibraRumbleFeedback {
            count: count.max(1),
            pause,
            duration,
            magnitude,
            cancel: CancellationToken::new(),
        }
    }
}

impl Feedback for VibraRumbleFeedback {
    fn kind(&self) -> &'static str {
        "vibra-rumble"
    }

    fn is_available(&self, devices: &Devices) -> bool {
        devices.vibra.is_some()
    }

    fn is_vibra(&self) -> bool {
        true
    }

    fn run(&self, ctx: RunContext) -> bool {
        let cancel = self.cancel.clone();
        let (count, magnitude) = (self.count, self.magnitude);
        let mut pause = self.pause;
        let mut rumble = (self.duration / count).saturating_sub(pause);
        let mut repetitions = count;
        if rumble == 0 {
            rumble = DEFAULT_RUMBLE_MS;
            pause = 0;
            repetitions = 1;
        }
        debug!(
            "Rumble: duration {}, rumble {}, pause {}, repetitions {}",
            self.duration, rumble, pause, repetitions
        );

        tokio::spawn(async move {
            let Some(vibra) = ctx.devices.vibra.as_ref() else {
                ctx.finish(EndReason::Natural);
                return;
            };

            let mut reason = EndReason::Natural;
            for _ in 0..repetitions {
                if let Err(err) = vibra.rumble(magnitude, rumble) {
                    warn!("Failed to rumble: {err}");
                    break;
                }
                tokio::select! {
                    () = cancel.cancelled() => {
                        if let Err(err) = vibra.stop() {
                            warn!("Failed to stop rumble: {err}");
                        }
                        reason = EndReason::Explicit;
                        break;
                    }
                    () = tokio::time::sleep(Duration::from_millis(u64::from(rumble + pause))) => {}
                }
            }
            if reason == EndReason::Natural {
                vibra.remove_effect();
            }
            ctx.finish(reason);
        });
        true
    }

    fn end(&self) {
        self.cancel.cancel();
    }
}

/// Vibrates continuously until ended.
#[derive(Debug)]
pub struct VibraPeriodicFeedback {
    magnitude: f64,
    cancel: CancellationToken,
}

impl VibraPeriodicFeedback {
    pub fn new(magnitude: f64) -> VibraPeriodicFeedback {
        VibraPeriodicFeedback {
            magnitude,
            cancel: CancellationToken::new(),
        }
    }
}

impl Feedback for VibraPeriodicFeedback {
    fn kind(&self) -> &'static str {
        "vibra-periodic"
    }

    fn is_available(&self, devices: &Devices) -> bool {
        devices.vibra.is_some()
    }

    fn is_vibra(&self) -> bool {
        true
    }

    fn run(&self, ctx: RunContext) -> bool {
        let Some(vibra) = ctx.devices.vibra.as_ref() else {
            return false;
        };
        if let Err(err) = vibra.periodic(self.magnitude) {
            warn!("Failed to start periodic vibra: {err}");
            return false;
        }

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            if let Some(vibra) = ctx.devices.vibra.as_ref() {
                if let Err(err) = vibra.stop() {
                    warn!("Failed to stop periodic vibra: {err}");
                }
            }
            ctx.finish(EndReason::Explicit);
        });
        true
    }

    fn end(&self) {
        self.cancel.cancel();
    }
}

/// Sequences `(magnitude, duration)` steps back to back. A magnitude of zero
/// is a pause.
#[derive(Debug)]
pub struct VibraPatternFeedback {
    magnitudes: Vec<f64>,
    durations: Vec<u32>,
    cancel: CancellationToken,
}

impl VibraPatternFeedback {
    pub fn new(magnitudes: Vec<f64>, durations: Vec<u32>) -> VibraPatternFeedback {
        VibraPatternFeedback {
            magnitudes,
            durations,
            cancel: CancellationToken::new(),
        }
    }
}

impl Feedback for VibraPatternFeedback {
    fn kind(&self) -> &'static str {
        "vibra-pattern"
    }

    fn is_available(&self, devices: &Devices) -> bool {
        devices.vibra.is_some()
    }

    fn is_vibra(&self) -> bool {
        true
    }

    fn run(&self, ctx: RunContext) -> bool {
        let cancel = self.cancel.clone();
        let steps: Vec<(f64, u32)> = self
            .magnitudes
            .iter()
            .copied()
            .zip(self.durations.iter().copied())
            .collect();
        debug!("Pattern vibra: {} steps", steps.len());

        tokio::spawn(async move {
            let Some(vibra) = ctx.devices.vibra.as_ref() else {
                ctx.finish(EndReason::Natural);
                return;
            };

            let mut reason = EndReason::Natural;
            'steps: for (magnitude, duration) in steps {
                if magnitude == 0.0 {
                    vibra.remove_effect();
                } else if let Err(err) = vibra.rumble(magnitude, duration) {
                    warn!("Failed to play pattern step: {err}");
                    break;
                }

                tokio::select! {
                    () = cancel.cancelled() => {
                        reason = EndReason::Explicit;
                        break 'steps;
                    }
                    () = tokio::time::sleep(Duration::from_millis(u64::from(duration))) => {}
                }
            }
            if let Err(err) = vibra.stop() {
                warn!("Failed to stop pattern: {err}");
            }
            ctx.finish(reason);
        });
        true
    }

    fn end(&self) {
        self.cancel.cancel();
    }
}
