//! # feedbackd
//!
//! A session daemon providing audio, haptic and LED feedback for application
//! events.
//!
//! Applications report named events (`phone-incoming-call`,
//! `message-new-instant`, ...) over the session bus; the daemon resolves
//! them against a layered feedback theme and drives the matching sounds,
//! rumbles and LED patterns for the lifetime of the event.
//!
//! ## Architecture
//!
//! The daemon uses a provider-based service system:
//! - [`SystemCoordinator`](coordinator::SystemCoordinator): lifecycle manager
//! - [`EventBus`](event::EventBus): inter-service communication
//! - [`AppState`](app_context::AppState): shared application state
//! - [`FeedbackManager`](manager::FeedbackManager): the event/feedback
//!   orchestration core
//!
//! ## Example
//!
//! ```no_run
//! use feedbackd::{application::Application, settings::SettingsManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = SettingsManager::load(None).await?;
//!     Application::builder()
//!         .with_settings(settings)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod cli;
pub mod coordinator;
pub mod debug;
pub mod dev;
pub mod event;
pub mod feedback;
pub mod haptic_manager;
pub mod interface;
pub mod manager;
pub mod providers;
pub mod settings;
pub mod task_manager;
pub mod theme;
