//! Event-driven communication between daemon services.

use anyhow::Result;
use tokio::sync::broadcast;

use crate::settings::Level;

/// Service events published through the [`EventBus`].
///
/// Keeps services loosely coupled: the manager announces finished events
/// without knowing about the bus interface, the settings watcher announces
/// changes without touching the manager directly.
#[derive(Debug, Clone)]
pub enum Event {
    /// Reload the feedback theme (SIGHUP or theme setting change).
    ThemeReloadRequested,
    /// The active profile changed.
    ProfileChanged(Level),
    /// The configured sound theme changed.
    SoundThemeChanged(String),
    /// An event finished; forwarded as the `FeedbackEnded` bus signal.
    FeedbackEnded { id: u32, reason: u32 },
    SystemShutdown,
}

/// Broadcast bus for publish-subscribe messaging between services.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Creates a new subscriber receiving all events published afterwards.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(Event::FeedbackEnded { id: 3, reason: 0 }).unwrap();

        match rx.recv().await.unwrap() {
            Event::FeedbackEnded { id: 3, reason: 0 } => {}
            other => panic!("Unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(Event::ThemeReloadRequested).unwrap();

        assert!(matches!(rx1.recv().await.unwrap(), Event::ThemeReloadRequested));
        assert!(matches!(rx2.recv().await.unwrap(), Event::ThemeReloadRequested));
    }

    #[tokio::test]
    async fn events_arrive_in_publication_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(Event::ProfileChanged(Level::Quiet)).unwrap();
        bus.publish(Event::SystemShutdown).unwrap();

        assert!(matches!(rx.recv().await.unwrap(), Event::ProfileChanged(Level::Quiet)));
        assert!(matches!(rx.recv().await.unwrap(), Event::SystemShutdown));
    }

    #[test]
    fn publish_without_subscribers_errors() {
        let bus = EventBus::new();
        assert!(bus.publish(Event::SystemShutdown).is_err());
    }
}
