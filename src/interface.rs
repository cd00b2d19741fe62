//! D-Bus interfaces of the daemon.
//!
//! `Feedback` carries the event lifecycle, `Haptic` drives raw vibration
//! patterns and is only exported when a motor exists (or haptics are forced
//! for debugging).

use futures::StreamExt;
use log::{debug, warn};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::sync::mpsc::UnboundedSender;
use zbus::{
    fdo, interface, message::Header, object_server::SignalEmitter, zvariant::OwnedValue,
    Connection,
};

use crate::{
    haptic_manager::HapticManager,
    manager::{Control, FeedbackManager, Hints},
    settings::Level,
};

pub const BUS_NAME: &str = "io.github.feedbackd";
pub const OBJECT_PATH: &str = "/io/github/feedbackd";

pub struct FeedbackInterface {
    manager: Arc<FeedbackManager>,
}

impl FeedbackInterface {
    pub fn new(manager: Arc<FeedbackManager>) -> Self {
        Self { manager }
    }
}

#[interface(name = "io.github.feedbackd.Feedback")]
impl FeedbackInterface {
    /// Starts feedback for a named event. Returns the allocated event id;
    /// completion is announced through the `FeedbackEnded` signal.
    async fn trigger_feedback(
        &self,
        app_id: String,
        event: String,
        hints: HashMap<String, OwnedValue>,
        timeout: i32,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] connection: &Connection,
    ) -> fdo::Result<u32> {
        if app_id.is_empty() {
            return Err(fdo::Error::InvalidArgs("Invalid app id".to_string()));
        }
        if event.is_empty() {
            return Err(fdo::Error::InvalidArgs("Invalid event".to_string()));
        }
        let hints = parse_hints(&hints)?;

        let sender = header
            .sender()
            .map(|name| name.to_string())
            .unwrap_or_default();

        let (id, new_client) = self
            .manager
            .trigger(&sender, &app_id, &event, hints, timeout)
            .await;

        if new_client && !sender.is_empty() {
            let watcher = tokio::spawn(watch_client(
                connection.clone(),
                sender.clone(),
                self.manager.control_sender(),
            ));
            self.manager.set_client_watch(&sender, watcher.abort_handle());
        }

        Ok(id)
    }

    /// Ends all feedbacks of an event. Unknown ids succeed silently.
    async fn end_feedback(&self, id: u32) {
        self.manager.end(id);
    }

    #[zbus(signal)]
    pub async fn feedback_ended(
        emitter: &SignalEmitter<'_>,
        id: u32,
        reason: u32,
    ) -> zbus::Result<()>;

    #[zbus(property)]
    async fn profile(&self) -> String {
        self.manager.profile().to_string()
    }

    #[zbus(property)]
    async fn set_profile(&mut self, profile: String) {
        if !self.manager.set_profile(&profile).await {
            warn!("Invalid profile '{profile}'");
        }
    }
}

/// Parses the trigger hints at the bus boundary. Unknown keys are ignored,
/// wrongly typed values for known keys are an argument error.
fn parse_hints(hints: &HashMap<String, OwnedValue>) -> fdo::Result<Hints> {
    let mut parsed = Hints::default();

    if let Some(value) = hints.get("profile") {
        let name: &str = value
            .downcast_ref()
            .map_err(|_| fdo::Error::InvalidArgs("profile hint must be a string".to_string()))?;
        match name.parse::<Level>() {
            Ok(level) => parsed.level = Some(level),
            Err(()) => warn!("Ignoring unknown profile hint '{name}'"),
        }
    }

    if let Some(value) = hints.get("important") {
        parsed.important = value
            .downcast_ref()
            .map_err(|_| fdo::Error::InvalidArgs("important hint must be a bool".to_string()))?;
    }

    if let Some(value) = hints.get("sound-file") {
        let path: &str = value
            .downcast_ref()
            .map_err(|_| fdo::Error::InvalidArgs("sound-file hint must be a string".to_string()))?;
        parsed.sound_file = Some(PathBuf::from(path));
    }

    Ok(parsed)
}

/// Watches a client's bus name and reports its loss to the dispatcher.
async fn watch_client(connection: Connection, name: String, control: UnboundedSender<Control>) {
    let proxy = match fdo::DBusProxy::new(&connection).await {
        Ok(proxy) => proxy,
        Err(err) => {
            warn!("Failed to watch client {name}: {err}");
            return;
        }
    };
    let mut stream = match proxy
        .receive_name_owner_changed_with_args(&[(0, name.as_str())])
        .await
    {
        Ok(stream) => stream,
        Err(err) => {
            warn!("Failed to watch client {name}: {err}");
            return;
        }
    };

    while let Some(signal) = stream.next().await {
        let Ok(args) = signal.args() else {
            continue;
        };
        if args.new_owner().is_none() {
            debug!("Bus name {name} lost its owner");
            let _ = control.send(Control::ClientVanished(name));
            break;
        }
    }
}

pub struct HapticInterface {
    haptic: Arc<HapticManager>,
}

impl HapticInterface {
    pub fn new(haptic: Arc<HapticManager>) -> Self {
        Self { haptic }
    }
}

#[interface(name = "io.github.feedbackd.Haptic")]
impl HapticInterface {
    /// Plays a `(magnitude, duration)` pattern on the motor. An empty
    /// pattern cancels the caller's current pattern, a non-empty one
    /// replaces it. Returns whether the motor accepted the pattern.
    async fn vibrate(&self, app_id: String, pattern: Vec<(f64, u32)>) -> fdo::Result<bool> {
        debug!("Haptic triggered for {app_id}");
        self.haptic
            .vibrate(&app_id, &pattern)
            .await
            .map_err(fdo::Error::InvalidArgs)
    }
}
