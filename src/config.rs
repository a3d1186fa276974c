//! Configuration for the bridge.
//!
//! Settings are read from a TOML file. Every field has a default, so an
//! absent file or an empty table yields a working configuration.

pub mod settings;
pub mod user;

pub use settings::{BackendSettings, BridgeSettings, SessionSettings};
pub use user::{load_settings, load_user_settings, parse_settings, user_config_path};
