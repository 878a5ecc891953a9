//! Classroom sync configuration.
//!
//! TOML-based configuration for the session synchronizer and the room
//! relay. Every section uses serde defaults so a partial file (or no
//! file at all) yields a working setup.
//!
//! ```rust,no_run
//! use classroom_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! println!("relay port: {}", config.relay.port);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    ClassroomConfig, ClassroomSection, LogLevel, LoggingConfig, RealtimeSection, RelaySection,
    CONFIG_SCHEMA_VERSION,
};

use classroom_common::ConfigError;

/// Load config from the platform default path and validate it.
pub fn load_config() -> Result<ClassroomConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}
