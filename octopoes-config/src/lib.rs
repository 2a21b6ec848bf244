//! Configuration library for Octopoes.
//!
//! Settings are resolved from a file or inline JSON, then overridden from
//! the environment, then validated. The engine receives the resulting
//! [`Settings`] explicitly; nothing here is process-global.

/// Configuration load errors
pub mod error;
/// Settings resolution from files and the environment
pub mod loader;
/// Settings structures and their defaults
pub mod models;

pub use error::ConfigLoadError;
pub use loader::{SettingsLoad, load_settings};
pub use models::{
    BitSettings, BrokerSettings, Settings, SettingsSource, XtdbSettings,
};
