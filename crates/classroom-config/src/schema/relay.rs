use serde::{Deserialize, Serialize};

/// Configuration for the room relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    /// Address to bind.
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
    /// Seconds a new connection has to send its join frame.
    pub hello_timeout: u64,
    /// Seconds a room may live without a connected teacher before it is reaped.
    pub room_ttl: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8787,
            hello_timeout: 10,
            room_ttl: 3600,
        }
    }
}
