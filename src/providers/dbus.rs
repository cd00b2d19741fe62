//! D-Bus service provider.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zbus::{fdo::RequestNameFlags, Connection};

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    interface::{
        FeedbackInterface, FeedbackInterfaceSignals, HapticInterface, BUS_NAME, OBJECT_PATH,
    },
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Exports the `Feedback` (and conditionally `Haptic`) interfaces on the
/// session bus and forwards manager notifications as bus signals.
pub struct DBusServiceProvider {
    state: Arc<AppState>,
    bus: EventBus,
    connection: Connection,
    replace: bool,
}

impl DBusServiceProvider {
    /// Connects to the session bus. With `replace` set, an already running
    /// instance is asked to hand over the well-known name.
    pub async fn new(state: Arc<AppState>, bus: EventBus, replace: bool) -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("Could not get the session bus")?;
        Ok(Self {
            state,
            bus,
            connection,
            replace,
        })
    }
}

#[async_trait]
impl ServiceProvider for DBusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let bus = self.bus.clone();
        let connection = self.connection.clone();
        let replace = self.replace;

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                run_dbus_service(state, bus, connection, replace, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "DBusService"
    }

    fn priority(&self) -> i32 {
        8
    }

    fn is_critical(&self) -> bool {
        true
    }
}

async fn run_dbus_service(
    state: Arc<AppState>,
    bus: EventBus,
    connection: Connection,
    replace: bool,
    cancel_token: CancellationToken,
) -> Result<()> {
    connection
        .object_server()
        .at(OBJECT_PATH, FeedbackInterface::new(state.manager.clone()))
        .await?;

    if let Some(haptic) = &state.haptic {
        info!("Exporting haptic interface");
        connection
            .object_server()
            .at(OBJECT_PATH, HapticInterface::new(haptic.clone()))
            .await?;
    }

    let mut flags = RequestNameFlags::AllowReplacement | RequestNameFlags::DoNotQueue;
    if replace {
        flags |= RequestNameFlags::ReplaceExisting;
    }
    connection
        .request_name_with_flags(BUS_NAME, flags)
        .await
        .with_context(|| format!("Could not acquire the '{BUS_NAME}' service name"))?;
    info!("Service name '{BUS_NAME}' acquired");

    let iface = connection
        .object_server()
        .interface::<_, FeedbackInterface>(OBJECT_PATH)
        .await?;

    let mut events = bus.subscribe();
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("D-Bus service cancelled");
                break;
            }
            event = events.recv() => match event {
                Ok(Event::FeedbackEnded { id, reason }) => {
                    if let Err(err) = iface.feedback_ended(id, reason).await {
                        warn!("Failed to emit FeedbackEnded({id}): {err}");
                    }
                }
                Ok(Event::ProfileChanged(_)) => {
                    let emitter = iface.signal_emitter();
                    if let Err(err) = iface.get_mut().await.profile_changed(emitter).await {
                        warn!("Failed to notify profile change: {err}");
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("D-Bus service lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    bail!("Event bus closed unexpectedly");
                }
            }
        }
    }

    Ok(())
}
