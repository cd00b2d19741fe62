//! Dependency injection providers for service management.
//!
//! Each daemon service (bus interface, dispatcher, settings watcher, signal
//! handling) is created through a provider so the coordinator can start and
//! stop them uniformly.

pub mod app_state;
pub mod dbus;
pub mod dispatcher;
pub mod settings_watcher;
pub mod signals;
pub mod traits;

pub use app_state::AppStateProvider;
pub use dbus::DBusServiceProvider;
pub use dispatcher::DispatcherServiceProvider;
pub use settings_watcher::SettingsWatcherServiceProvider;
pub use signals::SignalServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
