//! Realtime messaging service connection settings.

use serde::{Deserialize, Serialize};

/// Connection settings for the hosted realtime service (Phoenix Channels).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    /// Project reference, e.g. "ojmqzagktzkualzgpcbq".
    pub project_ref: String,
    /// Publishable anon key.
    pub api_key: String,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval: u64,
    /// Base reconnect delay in seconds.
    pub reconnect_delay: u64,
    /// Upper bound for the exponential reconnect delay, in seconds.
    pub max_reconnect_delay: u64,
}

impl std::fmt::Debug for RealtimeSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSection")
            .field("project_ref", &self.project_ref)
            .field("api_key", &"[REDACTED]")
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("max_reconnect_delay", &self.max_reconnect_delay)
            .finish()
    }
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            project_ref: String::new(),
            api_key: String::new(),
            heartbeat_interval: 25,
            reconnect_delay: 1,
            max_reconnect_delay: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let section = RealtimeSection {
            api_key: "super-secret".into(),
            ..Default::default()
        };
        let debug = format!("{section:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
