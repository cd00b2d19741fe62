//! Per-event feedback aggregation.
//!
//! A triggered event holds its selected feedbacks, tracks which of them are
//! still running and settles on a single end reason under the precedence
//! `NotFound > Expired > Explicit > Natural`.

use std::sync::Arc;
use tokio::{sync::mpsc, task::AbortHandle};

use super::{Completion, EndReason, Feedback, FeedbackState, RunContext};
use crate::{dev::Devices, settings::Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    None,
    Running,
    Ended,
    Errored,
}

struct Slot {
    feedback: Box<dyn Feedback>,
    /// Profile slice the feedback was drawn from.
    level: Level,
    state: FeedbackState,
}

/// A single triggered event and its feedbacks.
pub struct FeedbackEvent {
    id: u32,
    app_id: String,
    event_name: String,
    sender: String,
    timeout: i32,
    slots: Vec<Slot>,
    state: EventState,
    reason: EndReason,
    ending: bool,
    timeout_task: Option<AbortHandle>,
}

impl FeedbackEvent {
    pub fn new(
        id: u32,
        app_id: &str,
        event_name: &str,
        sender: &str,
        timeout: i32,
    ) -> FeedbackEvent {
        FeedbackEvent {
            id,
            app_id: app_id.to_string(),
            event_name: event_name.to_string(),
            sender: sender.to_string(),
            timeout,
            slots: Vec::new(),
            state: EventState::None,
            reason: EndReason::Natural,
            ending: false,
            timeout_task: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn timeout(&self) -> i32 {
        self.timeout
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn reason(&self) -> EndReason {
        self.reason
    }

    pub fn add_feedback(&mut self, feedback: Box<dyn Feedback>, level: Level) {
        self.slots.push(Slot {
            feedback,
            level,
            state: FeedbackState::None,
        });
    }

    pub fn has_feedbacks(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Starts every feedback. Returns how many actually started; the event is
    /// `Running` when at least one did.
    pub fn run_all(
        &mut self,
        devices: Arc<Devices>,
        done: mpsc::UnboundedSender<Completion>,
    ) -> usize {
        let mut started = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let ctx = RunContext {
                event_id: self.id,
                index,
                devices: devices.clone(),
                done: done.clone(),
            };
            if slot.feedback.run(ctx) {
                slot.state = FeedbackState::Running;
                started += 1;
            } else {
                slot.state = FeedbackState::Ended;
            }
        }
        if started > 0 {
            self.state = EventState::Running;
        }
        started
    }

    pub fn set_timeout_task(&mut self, handle: AbortHandle) {
        self.timeout_task = Some(handle);
    }

    /// Applies `reason` under the end-reason precedence.
    pub fn note_reason(&mut self, reason: EndReason) {
        self.reason = self.reason.merge(reason);
    }

    /// Requests the end of all still running feedbacks. Idempotent.
    pub fn begin_end(&mut self, reason: EndReason) {
        self.ending = true;
        self.note_reason(reason);
        for slot in &mut self.slots {
            if slot.state == FeedbackState::Running {
                slot.state = FeedbackState::Ending;
                slot.feedback.end();
            }
        }
    }

    /// Ends feedbacks that were drawn from a slice above `level`. Used when
    /// the profile is lowered while events are in flight.
    pub fn end_feedbacks_above(&mut self, level: Level) {
        for slot in &mut self.slots {
            if slot.level > level && slot.state == FeedbackState::Running {
                slot.state = FeedbackState::Ending;
                slot.feedback.end();
            }
        }
    }

    /// Records a feedback completion.
    pub fn on_done(&mut self, index: usize, reason: EndReason) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = FeedbackState::Ended;
        }
        self.note_reason(reason);
    }

    fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, FeedbackState::Running | FeedbackState::Ending))
            .count()
    }

    pub fn is_done(&self) -> bool {
        self.pending() == 0
    }

    /// Whether the event should be finalized now. An event with `timeout == 0`
    /// loops forever: it only finishes once explicitly ended.
    pub fn should_finish(&self) -> bool {
        self.is_done() && (self.ending || self.timeout != 0)
    }

    /// Marks the event ended, aborting a pending timeout timer.
    pub fn finish(&mut self) {
        self.state = EventState::Ended;
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }
}

impl Drop for FeedbackEvent {
    fn drop(&mut self) {
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for FeedbackEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackEvent")
            .field("id", &self.id)
            .field("app_id", &self.app_id)
            .field("event_name", &self.event_name)
            .field("state", &self.state)
            .field("reason", &self.reason)
            .field("feedbacks", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::DummyFeedback;
    use pretty_assertions::assert_eq;

    fn event_with_dummies(n: usize) -> FeedbackEvent {
        let mut event = FeedbackEvent::new(1, "org.example.app", "bell-terminal", ":1.1", -1);
        for _ in 0..n {
            event.add_feedback(Box::new(DummyFeedback), Level::Full);
        }
        event
    }

    #[tokio::test]
    async fn aggregates_completions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut event = event_with_dummies(2);

        assert_eq!(event.run_all(Arc::new(Devices::none()), tx), 2);
        assert_eq!(event.state(), EventState::Running);
        assert!(!event.is_done());

        event.on_done(0, EndReason::Natural);
        assert!(!event.should_finish());
        event.on_done(1, EndReason::Natural);
        assert!(event.should_finish());
        assert_eq!(event.reason(), EndReason::Natural);
    }

    #[tokio::test]
    async fn reason_precedence_applies() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut event = event_with_dummies(2);
        event.run_all(Arc::new(Devices::none()), tx);

        event.note_reason(EndReason::Expired);
        event.on_done(0, EndReason::Explicit);
        event.on_done(1, EndReason::Natural);
        assert_eq!(event.reason(), EndReason::Expired);
    }

    #[tokio::test]
    async fn begin_end_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut event = event_with_dummies(1);
        event.run_all(Arc::new(Devices::none()), tx);

        event.begin_end(EndReason::Explicit);
        event.begin_end(EndReason::Explicit);
        event.on_done(0, EndReason::Explicit);
        assert!(event.should_finish());
        assert_eq!(event.reason(), EndReason::Explicit);
    }

    #[tokio::test]
    async fn loop_events_only_finish_when_ended() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut event = FeedbackEvent::new(7, "app", "ringtone", ":1.2", 0);
        event.add_feedback(Box::new(DummyFeedback), Level::Full);
        event.run_all(Arc::new(Devices::none()), tx);

        event.on_done(0, EndReason::Natural);
        assert!(event.is_done());
        assert!(!event.should_finish());

        event.begin_end(EndReason::Explicit);
        assert!(event.should_finish());
    }

    #[test]
    fn events_without_feedbacks_are_empty() {
        let event = FeedbackEvent::new(2, "app", "unknown-event", ":1.3", -1);
        assert!(!event.has_feedbacks());
        assert!(event.is_done());
    }
}
