//! Where the config file lives, and seeding it on first run.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use classroom_common::ConfigError;
use tracing::info;

use super::template::default_config_toml;

/// Environment variable that points at a config file, overriding the
/// platform location.
pub const CONFIG_PATH_ENV: &str = "CLASSROOM_SYNC_CONFIG";

const APP_DIR: &str = "classroom-sync";
const FILE_NAME: &str = "config.toml";

/// `$CLASSROOM_SYNC_CONFIG` if set, else `<config dir>/classroom-sync/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    resolve(std::env::var_os(CONFIG_PATH_ENV), dirs::config_dir())
}

fn resolve(explicit: Option<OsString>, config_dir: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    config_dir
        .map(|dir| dir.join(APP_DIR).join(FILE_NAME))
        .ok_or_else(|| {
            ConfigError::ParseError(format!(
                "no platform config directory, set {CONFIG_PATH_ENV}"
            ))
        })
}

/// Seed `path` with the commented default config. A file already there is
/// left alone. Returns whether anything was written.
pub fn create_default_config(path: &Path) -> Result<bool, ConfigError> {
    let io_error =
        |action: &str, e: std::io::Error| ConfigError::ParseError(format!("cannot {action} {}: {e}", path.display()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error("create the directory of", e))?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(io_error("create", e)),
    };
    file.write_all(default_config_toml().as_bytes())
        .map_err(|e| io_error("write", e))?;

    info!(path = %path.display(), "Wrote default config");
    Ok(true)
}
