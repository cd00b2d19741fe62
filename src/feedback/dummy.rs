//! No-op feedback, useful to explicitly silence an event in a theme.

use super::{EndReason, Feedback, RunContext};
use crate::dev::Devices;

#[derive(Debug, Default)]
pub struct DummyFeedback;

impl Feedback for DummyFeedback {
    fn kind(&self) -> &'static str {
        "dummy"
    }

    fn is_available(&self, _devices: &Devices) -> bool {
        true
    }

    fn run(&self, ctx: RunContext) -> bool {
        // Completes on the next dispatcher turn.
        tokio::spawn(async move {
            ctx.finish(EndReason::Natural);
        });
        true
    }

    fn end(&self) {}
}
