//! Feedback objects.
//!
//! A feedback is one concrete output action (a sound, a rumble, a blink).
//! Feedbacks are built from theme entries, run concurrently and report their
//! completion as messages into the manager's dispatcher queue instead of
//! calling back into their owner.

mod dummy;
mod led;
mod sound;
mod vibra;

pub mod event;

pub use dummy::DummyFeedback;
pub use led::LedFeedback;
pub use sound::SoundFeedback;
pub use vibra::{VibraPatternFeedback, VibraPeriodicFeedback, VibraRumbleFeedback};

use std::{fmt, sync::Arc};
use tokio::sync::mpsc;

use crate::{dev::Devices, theme::FeedbackCfg};

/// Why a feedback or event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Ran its natural length.
    Natural,
    /// The event timeout fired.
    Expired,
    /// Ended on request.
    Explicit,
    /// No feedback was found for the event.
    NotFound,
}

impl EndReason {
    /// Wire encoding used in the `FeedbackEnded` signal.
    pub fn code(self) -> u32 {
        match self {
            EndReason::Natural => 0,
            EndReason::Expired => 1,
            EndReason::Explicit => 2,
            EndReason::NotFound => 3,
        }
    }

    /// Precedence when several end causes race: `NotFound > Expired >
    /// Explicit > Natural`.
    fn precedence(self) -> u8 {
        match self {
            EndReason::Natural => 0,
            EndReason::Explicit => 1,
            EndReason::Expired => 2,
            EndReason::NotFound => 3,
        }
    }

    /// Combines two reasons, keeping the one with higher precedence. The
    /// first reason wins ties.
    pub fn merge(self, other: EndReason) -> EndReason {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }
}

/// Lifecycle state of a single feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackState {
    None,
    Running,
    Ending,
    Ended,
}

/// Completion notice posted by a feedback task.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub event_id: u32,
    pub index: usize,
    pub reason: EndReason,
}

/// Everything a feedback needs to run: its identity within the event, the
/// device singletons and the completion queue.
#[derive(Clone)]
pub struct RunContext {
    pub event_id: u32,
    pub index: usize,
    pub devices: Arc<Devices>,
    pub done: mpsc::UnboundedSender<Completion>,
}

impl RunContext {
    /// Posts the completion message for this feedback. Exactly one call per
    /// started feedback.
    pub fn finish(&self, reason: EndReason) {
        let _ = self.done.send(Completion {
            event_id: self.event_id,
            index: self.index,
            reason,
        });
    }

    /// Playback key unique across in-flight feedbacks.
    pub fn playback_key(&self) -> u64 {
        (u64::from(self.event_id) << 32) | self.index as u64
    }
}

/// One concrete output action.
///
/// `run` is non-blocking: it kicks off the work and returns whether the
/// feedback started. A started feedback posts exactly one [`Completion`]
/// through its [`RunContext`], from the dispatcher's queue, never
/// reentrantly. `end` is idempotent and safe to call before or after the
/// completion fired.
pub trait Feedback: Send + Sync + fmt::Debug {
    fn kind(&self) -> &'static str;

    /// Whether the device this feedback needs is present.
    fn is_available(&self, devices: &Devices) -> bool;

    fn run(&self, ctx: RunContext) -> bool;

    fn end(&self);

    /// Whether this feedback occupies the haptic motor.
    fn is_vibra(&self) -> bool {
        false
    }

    /// Whether this feedback plays a sound.
    fn is_sound(&self) -> bool {
        false
    }
}

/// Builds the runtime feedback for a theme entry.
pub fn from_cfg(cfg: &FeedbackCfg) -> Box<dyn Feedback> {
    match cfg {
        FeedbackCfg::Dummy => Box::new(DummyFeedback::default()),
        FeedbackCfg::Sound {
            effect,
            media_role,
            file_name,
        } => Box::new(SoundFeedback::new(
            effect.clone(),
            media_role.clone(),
            file_name.clone(),
        )),
        FeedbackCfg::VibraRumble {
            count,
            pause,
            duration,
            magnitude,
        } => Box::new(VibraRumbleFeedback::new(*count, *pause, *duration, *magnitude)),
        FeedbackCfg::VibraPeriodic { magnitude } => {
            Box::new(VibraPeriodicFeedback::new(*magnitude))
        }
        FeedbackCfg::VibraPattern {
            magnitudes,
            durations,
        } => Box::new(VibraPatternFeedback::new(
            magnitudes.clone(),
            durations.clone(),
        )),
        FeedbackCfg::Led {
            color,
            frequency,
            max_brightness,
        } => Box::new(LedFeedback::new(color.clone(), *frequency, *max_brightness)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reason_codes_match_wire_encoding() {
        assert_eq!(EndReason::Natural.code(), 0);
        assert_eq!(EndReason::Expired.code(), 1);
        assert_eq!(EndReason::Explicit.code(), 2);
        assert_eq!(EndReason::NotFound.code(), 3);
    }

    #[test]
    fn reason_precedence() {
        assert_eq!(EndReason::Natural.merge(EndReason::Explicit), EndReason::Explicit);
        assert_eq!(EndReason::Explicit.merge(EndReason::Natural), EndReason::Explicit);
        assert_eq!(EndReason::Explicit.merge(EndReason::Expired), EndReason::Expired);
        assert_eq!(EndReason::Expired.merge(EndReason::NotFound), EndReason::NotFound);
        assert_eq!(EndReason::NotFound.merge(EndReason::Natural), EndReason::NotFound);
        // The first non-Natural reason wins against later equal ones.
        assert_eq!(EndReason::Expired.merge(EndReason::Expired), EndReason::Expired);
    }

    #[test]
    fn builds_feedback_from_theme_entries() {
        let cfg = FeedbackCfg::VibraRumble {
            count: 3,
            pause: 50,
            duration: 600,
            magnitude: 1.0,
        };
        assert_eq!(from_cfg(&cfg).kind(), "vibra-rumble");
        assert!(from_cfg(&cfg).is_vibra());

        assert_eq!(from_cfg(&FeedbackCfg::Dummy).kind(), "dummy");
    }
}
