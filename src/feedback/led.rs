//! LED feedback: a periodic blink pattern in a requested color.
//!
//! LED feedback has no natural end; it runs until the event is ended
//! explicitly or expires.

use log::warn;
use tokio_util::sync::CancellationToken;

use super::{EndReason, Feedback, RunContext};
use crate::dev::{led::parse_color_lossy, Devices};

#[derive(Debug)]
pub struct LedFeedback {
    color: String,
    frequency: u32,
    max_brightness: u32,
    cancel: CancellationToken,
}

impl LedFeedback {
    pub fn new(color: String, frequency: u32, max_brightness: u32) -> LedFeedback {
        LedFeedback {
            color,
            frequency,
            max_brightness: max_brightness.min(100),
            cancel: CancellationToken::new(),
        }
    }
}

impl Feedback for LedFeedback {
    fn kind(&self) -> &'static str {
        "led"
    }

    fn is_available(&self, devices: &Devices) -> bool {
        let (color, _) = parse_color_lossy(&self.color);
        devices
            .leds
            .as_ref()
            .map(|leds| leds.has_led_for(color))
            .unwrap_or(false)
    }

    fn run(&self, ctx: RunContext) -> bool {
        let Some(leds) = ctx.devices.leds.as_ref() else {
            return false;
        };
        let (color, rgb) = parse_color_lossy(&self.color);
        if let Err(err) = leds.start_periodic(color, rgb, self.max_brightness, self.frequency) {
            warn!("Failed to start LED pattern: {err}");
            return false;
        }

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            if let Some(leds) = ctx.devices.leds.as_ref() {
                if let Err(err) = leds.stop(color) {
                    warn!("Failed to stop LED: {err}");
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
