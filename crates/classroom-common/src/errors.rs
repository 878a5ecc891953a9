use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClassroomError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    RoomId(#[from] crate::id::RoomIdError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError("relay.port = 0 is out of range".into());
        assert_eq!(
            err.to_string(),
            "config validation error: relay.port = 0 is out of range"
        );
    }

    #[test]
    fn classroom_error_from_config() {
        let config_err = ConfigError::ParseError("bad toml".into());
        let err: ClassroomError = config_err.into();
        assert!(matches!(err, ClassroomError::Config(_)));
        assert!(err.to_string().contains("bad toml"));
    }

    #[test]
    fn classroom_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err: ClassroomError = io_err.into();
        assert!(matches!(err, ClassroomError::Io(_)));
        assert!(err.to_string().contains("port taken"));
    }

    #[test]
    fn classroom_error_string_variants() {
        let err = ClassroomError::Transport("socket closed".into());
        assert_eq!(err.to_string(), "transport error: socket closed");

        let err = ClassroomError::Sync("session ended".into());
        assert_eq!(err.to_string(), "sync error: session ended");

        let err = ClassroomError::Relay("room closed".into());
        assert_eq!(err.to_string(), "relay error: room closed");

        let err = ClassroomError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }
}
