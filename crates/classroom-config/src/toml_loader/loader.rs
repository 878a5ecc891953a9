//! Reading a config file into a [`ClassroomConfig`].

use std::io::ErrorKind;
use std::path::Path;

use classroom_common::ConfigError;
use tracing::{info, warn};

use super::paths::{create_default_config, default_config_path};
use crate::schema::ClassroomConfig;
use crate::validation;

/// Read and parse `path`. Absent keys take their defaults.
///
/// Out-of-range values are only warned about here; callers that must refuse
/// them run [`validation::validate`] themselves.
pub fn load_from_path(path: &Path) -> Result<ClassroomConfig, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => {
            return Err(ConfigError::ParseError(format!(
                "cannot read {}: {e}",
                path.display()
            )))
        }
    };

    let config = parse(&text)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
    if let Err(e) = validation::validate(&config) {
        warn!(path = %path.display(), error = %e, "Config has invalid values, keeping them");
    }

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Load from [`default_config_path`], seeding the file on first run.
pub fn load_default() -> Result<ClassroomConfig, ConfigError> {
    let path = default_config_path()?;
    match load_from_path(&path) {
        Err(ConfigError::FileNotFound(_)) => {
            create_default_config(&path)?;
            Ok(ClassroomConfig::default())
        }
        other => other,
    }
}

pub(crate) fn parse(text: &str) -> Result<ClassroomConfig, toml::de::Error> {
    toml::from_str(text)
}
