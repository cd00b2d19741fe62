//! The feedback manager.
//!
//! Receives triggered events, resolves the effective profile level, selects
//! feedbacks from the theme, owns the event and client tables and drives the
//! dispatcher that aggregates feedback completions into `FeedbackEnded`
//! notifications.

use anyhow::{Context as _, Result};
use dashmap::{mapref::entry::Entry, DashMap};
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::AbortHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    dev::Devices,
    event::{Event, EventBus},
    feedback::{self, event::FeedbackEvent, Completion, EndReason, SoundFeedback},
    haptic_manager::HapticManager,
    settings::{Level, SettingsManager},
    theme::{Theme, ThemeLoader},
};

/// Parsed trigger hints. Unknown hint keys are dropped at the bus boundary.
#[derive(Debug, Clone, Default)]
pub struct Hints {
    /// Requested profile level.
    pub level: Option<Level>,
    /// Allows the requested level to override a lower global level.
    pub important: bool,
    /// Absolute path forcing a specific sound payload.
    pub sound_file: Option<PathBuf>,
}

/// Control messages consumed by the dispatcher.
#[derive(Debug)]
pub enum Control {
    /// The timeout timer of an event fired.
    Expired(u32),
    /// An event without feedbacks announces its end.
    NotFound(u32),
    /// A client's bus name vanished.
    ClientVanished(String),
}

#[derive(Default)]
struct ClientEntry {
    events: HashSet<u32>,
    watch: Option<AbortHandle>,
}

type Receivers = (UnboundedReceiver<Completion>, UnboundedReceiver<Control>);

/// Orchestrates events, feedbacks, clients and devices.
pub struct FeedbackManager {
    settings: SettingsManager,
    loader: ThemeLoader,
    theme: RwLock<Arc<Theme>>,
    devices: Arc<Devices>,
    level: Arc<RwLock<Level>>,
    next_id: AtomicU32,
    events: DashMap<u32, FeedbackEvent>,
    clients: DashMap<String, ClientEntry>,
    bus: EventBus,
    completion_tx: UnboundedSender<Completion>,
    control_tx: UnboundedSender<Control>,
    receivers: Mutex<Option<Receivers>>,
    haptic: OnceCell<Arc<HapticManager>>,
}

impl FeedbackManager {
    pub fn new(
        settings: SettingsManager,
        loader: ThemeLoader,
        theme: Theme,
        devices: Arc<Devices>,
        bus: EventBus,
        level: Level,
    ) -> Arc<FeedbackManager> {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Arc::new(FeedbackManager {
            settings,
            loader,
            theme: RwLock::new(Arc::new(theme)),
            devices,
            level: Arc::new(RwLock::new(level)),
            next_id: AtomicU32::new(1),
            events: DashMap::new(),
            clients: DashMap::new(),
            bus,
            completion_tx,
            control_tx,
            receivers: Mutex::new(Some((completion_rx, control_rx))),
            haptic: OnceCell::new(),
        })
    }

    /// Wires up the haptic manager once it exists. Events carrying a vibra
    /// feedback preempt patterns driven through it.
    pub fn attach_haptic(&self, haptic: Arc<HapticManager>) {
        let _ = self.haptic.set(haptic);
    }

    pub fn control_sender(&self) -> UnboundedSender<Control> {
        self.control_tx.clone()
    }

    pub fn completion_sender(&self) -> UnboundedSender<Completion> {
        self.completion_tx.clone()
    }

    /// Shared handle onto the active profile level.
    pub fn level_handle(&self) -> Arc<RwLock<Level>> {
        self.level.clone()
    }

    pub fn profile(&self) -> Level {
        *self.level.read().unwrap()
    }

    pub fn devices(&self) -> &Arc<Devices> {
        &self.devices
    }

    /// Handles a `TriggerFeedback` call.
    ///
    /// Always allocates and returns an event id. When the theme yields no
    /// usable feedback the `FeedbackEnded(id, NotFound)` notification is
    /// posted through the dispatcher queue, so it fires on a later turn,
    /// never reentrantly. The second return value tells whether this is the
    /// first tracked event for the sending client.
    pub async fn trigger(
        &self,
        sender: &str,
        app_id: &str,
        event_name: &str,
        hints: Hints,
        timeout: i32,
    ) -> (u32, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = timeout.max(-1);

        let hint_level = hints.level.unwrap_or(Level::Full);
        let level = self
            .effective_level(app_id, hint_level, hints.important)
            .await;
        debug!("Event '{event_name}' for '{app_id}' from {sender} at level {level}");

        let selected = self.theme.read().unwrap().lookup(level, event_name);

        let mut event = FeedbackEvent::new(id, app_id, event_name, sender, timeout);
        let mut has_sound = false;

        // A custom sound only plays at full level.
        if level == Level::Full {
            if let Some(file) = &hints.sound_file {
                debug!("Using custom sound file '{}'", file.display());
                event.add_feedback(Box::new(SoundFeedback::from_file(file.clone())), Level::Full);
                has_sound = true;
            }
        }

        for (slice, cfg) in selected {
            let fb = feedback::from_cfg(&cfg);
            if !fb.is_available(&self.devices) {
                debug!("Skipping unavailable {} feedback", fb.kind());
                continue;
            }
            if fb.is_sound() && has_sound {
                continue;
            }
            if fb.is_vibra() {
                // Events outrank patterns driven through the Haptic interface.
                if let Some(haptic) = self.haptic.get() {
                    haptic.end_active();
                }
                // The motor plays one feedback at a time.
                if self
                    .devices
                    .vibra
                    .as_ref()
                    .map(|v| v.is_busy())
                    .unwrap_or(false)
                {
                    debug!("Haptic motor busy, skipping {} feedback", fb.kind());
                    continue;
                }
            }
            event.add_feedback(fb, slice);
        }

        if !event.has_feedbacks() {
            let _ = self.control_tx.send(Control::NotFound(id));
            return (id, false);
        }

        self.events.insert(id, event);
        let started = {
            let Some(mut entry) = self.events.get_mut(&id) else {
                return (id, false);
            };
            let started = entry.run_all(self.devices.clone(), self.completion_tx.clone());
            if started > 0 && timeout > 0 {
                let control = self.control_tx.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(u64::from(timeout as u32))).await;
                    let _ = control.send(Control::Expired(id));
                });
                entry.set_timeout_task(timer.abort_handle());
            }
            started
        };

        if started == 0 {
            self.events.remove(&id);
            let _ = self.control_tx.send(Control::NotFound(id));
            return (id, false);
        }

        let is_new_client = self.track_client(sender, id);
        (id, is_new_client)
    }

    /// Handles an `EndFeedback` call. Unknown ids are ignored.
    pub fn end(&self, id: u32) {
        debug!("Ending feedback for event {id}");
        self.end_with(id, EndReason::Explicit);
    }

    fn end_with(&self, id: u32, reason: EndReason) {
        let finished = {
            let Some(mut event) = self.events.get_mut(&id) else {
                debug!("Tried to end unknown event {id}");
                return;
            };
            event.begin_end(reason);
            event.is_done()
        };
        if finished {
            self.finalize(id);
        }
    }

    fn finalize(&self, id: u32) {
        let Some((_, mut event)) = self.events.remove(&id) else {
            return;
        };
        event.finish();
        if let Some(mut client) = self.clients.get_mut(event.sender()) {
            client.events.remove(&id);
        }
        debug!("All feedbacks for event {id} finished");
        let _ = self.bus.publish(Event::FeedbackEnded {
            id,
            reason: event.reason().code(),
        });
    }

    /// Registers `id` with the sender's client entry. Returns `true` when the
    /// client was not tracked before and needs a bus-name watcher.
    fn track_client(&self, sender: &str, id: u32) -> bool {
        if sender.is_empty() {
            return false;
        }
        match self.clients.entry(sender.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().events.insert(id);
                false
            }
            Entry::Vacant(slot) => {
                let mut entry = ClientEntry::default();
                entry.events.insert(id);
                slot.insert(entry);
                true
            }
        }
    }

    /// Stores the watcher task handle for a client.
    pub fn set_client_watch(&self, sender: &str, watch: AbortHandle) {
        if let Some(mut entry) = self.clients.get_mut(sender) {
            if let Some(old) = entry.watch.replace(watch) {
                old.abort();
            }
        }
    }

    /// Computes the effective level per the submitted app id, the hint level
    /// and the `important` flag.
    pub async fn effective_level(&self, app_id: &str, want: Level, important: bool) -> Level {
        let app_level = self.settings.app_level(app_id).await;
        if important && self.settings.allows_important(app_id).await {
            return want;
        }
        self.profile().min(app_level).min(want)
    }

    /// Switches the active profile. Returns `false` for unknown names.
    pub async fn set_profile(&self, profile: &str) -> bool {
        let Ok(level) = profile.parse::<Level>() else {
            return false;
        };
        {
            let mut current = self.level.write().unwrap();
            if *current == level {
                return true;
            }
            *current = level;
        }
        info!("Switching profile to '{profile}'");

        if let Err(err) = self.settings.set_profile(level).await {
            warn!("Failed to persist profile: {err}");
        }
        let _ = self.bus.publish(Event::ProfileChanged(level));

        // Feedbacks drawn from slices above the new level stop now.
        for mut entry in self.events.iter_mut() {
            entry.end_feedbacks_above(level);
        }
        true
    }

    /// Builds the new theme and swaps it in. Events in flight keep their
    /// feedback objects; only subsequent triggers see the new theme.
    pub async fn reload_theme(&self) {
        let name = self.settings.theme_name().await;
        match self.loader.load(&name) {
            Ok(theme) => {
                info!("Loaded theme '{}'", theme.name());
                *self.theme.write().unwrap() = Arc::new(theme);
            }
            Err(err) => warn!("Failed to reload theme: {err}"),
        }
    }

    /// Runs the dispatcher until cancelled: consumes feedback completions and
    /// control messages, finalizes events and publishes their end.
    pub async fn run_dispatcher(&self, cancel: CancellationToken) -> Result<()> {
        let (mut completions, mut control) = self
            .receivers
            .lock()
            .unwrap()
            .take()
            .context("Dispatcher already running")?;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.cancel_all();
                    break;
                }
                Some(completion) = completions.recv() => self.handle_completion(completion),
                Some(message) = control.recv() => self.handle_control(message),
            }
        }
        Ok(())
    }

    fn handle_completion(&self, completion: Completion) {
        if completion.event_id == HapticManager::EVENT_ID {
            if let Some(haptic) = self.haptic.get() {
                haptic.on_done(completion.index);
            }
            return;
        }

        let finished = {
            let Some(mut event) = self.events.get_mut(&completion.event_id) else {
                warn!("Feedback ended for unknown event {}", completion.event_id);
                return;
            };
            event.on_done(completion.index, completion.reason);
            event.should_finish()
        };
        if finished {
            self.finalize(completion.event_id);
        }
    }

    fn handle_control(&self, message: Control) {
        match message {
            Control::Expired(id) => self.end_with(id, EndReason::Expired),
            Control::NotFound(id) => {
                let _ = self.bus.publish(Event::FeedbackEnded {
                    id,
                    reason: EndReason::NotFound.code(),
                });
            }
            Control::ClientVanished(name) => {
                debug!("Client {name} vanished");
                let Some((_, entry)) = self.clients.remove(&name) else {
                    return;
                };
                if let Some(watch) = entry.watch {
                    watch.abort();
                }
                for id in entry.events {
                    debug!("Ending event {id} since {name} vanished");
                    self.end_with(id, EndReason::Explicit);
                }
            }
        }
    }

    /// Shutdown path: request the end of everything that still runs.
    fn cancel_all(&self) {
        let ids: Vec<u32> = self.events.iter().map(|e| e.id()).collect();
        for id in ids {
            self.end_with(id, EndReason::Explicit);
        }
        if let Some(haptic) = self.haptic.get() {
            haptic.end_active();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dev::LedDevices,
        settings::Settings,
        theme::FeedbackCfg,
    };
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    const NATURAL: u32 = 0;
    const EXPIRED: u32 = 1;
    const EXPLICIT: u32 = 2;
    const NOT_FOUND: u32 = 3;

    struct Fixture {
        manager: Arc<FeedbackManager>,
        rx: broadcast::Receiver<Event>,
        cancel: CancellationToken,
        _settings_dir: TempDir,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn setup(theme: Theme, devices: Devices, level: Level) -> Fixture {
        let settings_dir = TempDir::new().unwrap();
        let settings = SettingsManager::new(
            Settings::default(),
            settings_dir.path().join("settings.yml"),
        );
        let loader = ThemeLoader::with_paths(Vec::new(), Vec::new());
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let manager = FeedbackManager::new(
            settings,
            loader,
            theme,
            Arc::new(devices),
            bus,
            level,
        );

        let cancel = CancellationToken::new();
        let dispatcher = manager.clone();
        let token = cancel.clone();
        tokio::spawn(async move { dispatcher.run_dispatcher(token).await });

        Fixture {
            manager,
            rx,
            cancel,
            _settings_dir: settings_dir,
        }
    }

    fn dummy_theme(event: &str) -> Theme {
        let mut theme = Theme::default();
        theme.insert(Level::Full, event, FeedbackCfg::Dummy);
        theme
    }

    fn led_cfg() -> FeedbackCfg {
        FeedbackCfg::Led {
            color: "white".to_string(),
            frequency: 1000,
            max_brightness: 100,
        }
    }

    fn fake_led_devices(root: &TempDir) -> Devices {
        let dir = root.path().join("white:indicator");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("feedbackd"), "led").unwrap();
        fs::write(dir.join("brightness"), "0").unwrap();
        fs::write(dir.join("max_brightness"), "255").unwrap();
        fs::write(dir.join("trigger"), "none").unwrap();
        fs::write(dir.join("pattern"), "").unwrap();
        Devices {
            leds: Some(LedDevices::discover_in(root.path()).unwrap()),
            vibra: None,
            sound: None,
        }
    }

    async fn next_ended(rx: &mut broadcast::Receiver<Event>) -> (u32, u32) {
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("no FeedbackEnded within timeout")
                .unwrap();
            if let Event::FeedbackEnded { id, reason } = event {
                return (id, reason);
            }
        }
    }

    #[tokio::test]
    async fn ids_are_unique_and_increasing() {
        let mut fixture = setup(dummy_theme("bell-terminal"), Devices::none(), Level::Full).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let (id, _) = fixture
                .manager
                .trigger(":1.1", "org.example.app", "bell-terminal", Hints::default(), -1)
                .await;
            ids.push(id);
        }

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(ids.iter().all(|id| *id != 0));
        for _ in 0..3 {
            let (_, reason) = next_ended(&mut fixture.rx).await;
            assert_eq!(reason, NATURAL);
        }
    }

    #[tokio::test]
    async fn unknown_event_ends_not_found() {
        let mut fixture = setup(dummy_theme("bell-terminal"), Devices::none(), Level::Full).await;

        let (id, _) = fixture
            .manager
            .trigger(":1.1", "app", "missing-event", Hints::default(), -1)
            .await;

        let (ended_id, reason) = next_ended(&mut fixture.rx).await;
        assert_eq!(ended_id, id);
        assert_eq!(reason, NOT_FOUND);
    }

    #[tokio::test]
    async fn explicit_end_reports_explicit() {
        let leds = TempDir::new().unwrap();
        let mut theme = Theme::default();
        theme.insert(Level::Full, "phone-incoming-call", led_cfg());
        let mut fixture = setup(theme, fake_led_devices(&leds), Level::Full).await;

        let (id, _) = fixture
            .manager
            .trigger(":1.1", "app", "phone-incoming-call", Hints::default(), -1)
            .await;

        fixture.manager.end(id);
        let (ended_id, reason) = next_ended(&mut fixture.rx).await;
        assert_eq!(ended_id, id);
        assert_eq!(reason, EXPLICIT);
    }

    #[tokio::test]
    async fn double_end_emits_once() {
        let leds = TempDir::new().unwrap();
        let mut theme = Theme::default();
        theme.insert(Level::Full, "phone-incoming-call", led_cfg());
        let mut fixture = setup(theme, fake_led_devices(&leds), Level::Full).await;

        let (id, _) = fixture
            .manager
            .trigger(":1.1", "app", "phone-incoming-call", Hints::default(), -1)
            .await;

        fixture.manager.end(id);
        fixture.manager.end(id);
        let (_, reason) = next_ended(&mut fixture.rx).await;
        assert_eq!(reason, EXPLICIT);

        // No second notification may arrive.
        let extra = timeout(Duration::from_millis(100), next_ended(&mut fixture.rx)).await;
        assert!(extra.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_expires_event_and_stops_led() {
        let leds = TempDir::new().unwrap();
        let mut theme = Theme::default();
        theme.insert(Level::Silent, "alarm-clock-elapsed", led_cfg());
        let mut fixture = setup(theme, fake_led_devices(&leds), Level::Silent).await;

        let (id, _) = fixture
            .manager
            .trigger(":1.1", "app", "alarm-clock-elapsed", Hints::default(), 1)
            .await;

        let (ended_id, reason) = next_ended(&mut fixture.rx).await;
        assert_eq!(ended_id, id);
        assert_eq!(reason, EXPIRED);

        let brightness = leds.path().join("white:indicator/brightness");
        assert_eq!(fs::read_to_string(brightness).unwrap(), "0");
    }

    #[tokio::test]
    async fn quiet_level_gates_full_feedbacks() {
        let mut fixture = setup(dummy_theme("bell-terminal"), Devices::none(), Level::Silent).await;

        let (id, _) = fixture
            .manager
            .trigger(":1.1", "app", "bell-terminal", Hints::default(), -1)
            .await;
        let (ended_id, reason) = next_ended(&mut fixture.rx).await;
        assert_eq!((ended_id, reason), (id, NOT_FOUND));
    }

    #[tokio::test]
    async fn important_hint_raises_level() {
        let mut fixture = setup(dummy_theme("bell-terminal"), Devices::none(), Level::Silent).await;

        let hints = Hints {
            level: Some(Level::Full),
            important: true,
            sound_file: None,
        };
        let (id, _) = fixture
            .manager
            .trigger(":1.1", "app", "bell-terminal", hints, -1)
            .await;
        let (ended_id, reason) = next_ended(&mut fixture.rx).await;
        assert_eq!((ended_id, reason), (id, NATURAL));
    }

    #[tokio::test]
    async fn hint_level_without_important_cannot_raise() {
        let mut fixture = setup(dummy_theme("bell-terminal"), Devices::none(), Level::Silent).await;

        let hints = Hints {
            level: Some(Level::Full),
            important: false,
            sound_file: None,
        };
        let (_, reason) = {
            fixture
                .manager
                .trigger(":1.1", "app", "bell-terminal", hints, -1)
                .await;
            next_ended(&mut fixture.rx).await
        };
        assert_eq!(reason, NOT_FOUND);
    }

    #[tokio::test]
    async fn vanished_client_cancels_its_events() {
        let leds = TempDir::new().unwrap();
        let mut theme = Theme::default();
        theme.insert(Level::Full, "phone-incoming-call", led_cfg());
        let mut fixture = setup(theme, fake_led_devices(&leds), Level::Full).await;

        let (id, is_new) = fixture
            .manager
            .trigger(":1.7", "app", "phone-incoming-call", Hints::default(), -1)
            .await;
        assert!(is_new);

        fixture
            .manager
            .control_sender()
            .send(Control::ClientVanished(":1.7".to_string()))
            .unwrap();

        let (ended_id, reason) = next_ended(&mut fixture.rx).await;
        assert_eq!((ended_id, reason), (id, EXPLICIT));
    }

    #[tokio::test]
    async fn second_event_for_same_client_is_not_new() {
        let mut fixture = setup(dummy_theme("bell-terminal"), Devices::none(), Level::Full).await;

        let (_, first_new) = fixture
            .manager
            .trigger(":1.9", "app", "bell-terminal", Hints::default(), -1)
            .await;
        let (_, second_new) = fixture
            .manager
            .trigger(":1.9", "app", "bell-terminal", Hints::default(), -1)
            .await;

        assert!(first_new);
        assert!(!second_new);
        let _ = next_ended(&mut fixture.rx).await;
        let _ = next_ended(&mut fixture.rx).await;
    }

    #[tokio::test]
    async fn set_profile_validates_and_persists() {
        let fixture = setup(dummy_theme("bell-terminal"), Devices::none(), Level::Full).await;

        assert!(!fixture.manager.set_profile("loud").await);
        assert!(fixture.manager.set_profile("quiet").await);
        assert_eq!(fixture.manager.profile(), Level::Quiet);
        assert_eq!(fixture.manager.settings.profile().await, Level::Quiet);
    }
}
