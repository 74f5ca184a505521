//! Configuration and filesystem conventions shared by the `malradar` crates.

pub mod config;
pub mod paths;

pub use config::{Blacklists, ConfigError, Configuration, load_config};
pub use paths::default_state_dir;
