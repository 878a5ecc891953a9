//! Wire frames, channel settings and the event/command enums shared by the
//! realtime client and its connection task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use classroom_config::RealtimeSection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where and how to reach a Supabase Realtime server.
#[derive(Clone)]
pub struct RealtimeConfig {
    pub project_ref: String,
    /// Publishable anon key, sent as the `apikey` query parameter.
    pub api_key: String,
    /// JWT attached to every channel join.
    pub access_token: Option<String>,
    /// Full WebSocket URL for a self-hosted server. Overrides `project_ref`.
    pub endpoint: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |present: bool| if present { "<set>" } else { "<unset>" };
        f.debug_struct("RealtimeConfig")
            .field("project_ref", &self.project_ref)
            .field("api_key", &redact(!self.api_key.is_empty()))
            .field("access_token", &redact(self.access_token.is_some()))
            .field("endpoint", &self.endpoint)
            .field(
                "reconnect",
                &(self.reconnect_delay_secs..=self.max_reconnect_delay_secs),
            )
            .finish_non_exhaustive()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::from(&RealtimeSection::default())
    }
}

impl From<&RealtimeSection> for RealtimeConfig {
    fn from(section: &RealtimeSection) -> Self {
        Self {
            project_ref: section.project_ref.clone(),
            api_key: section.api_key.clone(),
            access_token: None,
            endpoint: None,
            heartbeat_interval_secs: section.heartbeat_interval,
            reconnect_delay_secs: section.reconnect_delay,
            max_reconnect_delay_secs: section.max_reconnect_delay,
        }
    }
}

impl RealtimeConfig {
    pub(crate) fn ws_url(&self) -> String {
        let base = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("wss://{}.supabase.co/realtime/v1/websocket", self.project_ref),
        };
        format!("{base}?apikey={}&vsn=1.0.0", self.api_key)
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

const TOPIC_PREFIX: &str = "realtime:";

static NEXT_REF: AtomicU64 = AtomicU64::new(1);

/// One Phoenix v1 JSON frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
}

impl PhoenixFrame {
    /// A frame on the channel for `topic`, with a fresh ref.
    fn on(topic: &str, event: &str, payload: Value) -> Self {
        Self {
            topic: format!("{TOPIC_PREFIX}{topic}"),
            event: event.to_string(),
            payload,
            reference: Some(NEXT_REF.fetch_add(1, Ordering::Relaxed).to_string()),
        }
    }

    pub(crate) fn heartbeat() -> Self {
        Self {
            topic: "phoenix".into(),
            ..Self::on("", "heartbeat", Value::Object(Default::default()))
        }
    }

    pub(crate) fn join(topic: &str, config: &ChannelConfig, access_token: Option<&str>) -> Self {
        Self::on(topic, "phx_join", config.join_payload(access_token))
    }

    pub(crate) fn leave(topic: &str) -> Self {
        Self::on(topic, "phx_leave", Value::Object(Default::default()))
    }

    pub(crate) fn broadcast(topic: &str, event: &str, payload: Value) -> Self {
        Self::on(
            topic,
            "broadcast",
            serde_json::json!({ "type": "broadcast", "event": event, "payload": payload }),
        )
    }

    /// `track` with `meta`, or `untrack` when there is none.
    pub(crate) fn presence(topic: &str, meta: Option<&Value>) -> Self {
        let body = match meta {
            Some(meta) => serde_json::json!({ "type": "presence", "event": "track", "payload": meta }),
            None => serde_json::json!({ "type": "presence", "event": "untrack" }),
        };
        Self::on(topic, "presence", body)
    }

    /// Channel topic without the `realtime:` prefix.
    pub(crate) fn channel(&self) -> &str {
        self.topic.strip_prefix(TOPIC_PREFIX).unwrap_or(&self.topic)
    }
}

// ---------------------------------------------------------------------------
// Channel settings
// ---------------------------------------------------------------------------

/// Per-channel options sent with `phx_join`.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Deliver our own broadcasts back to us.
    pub self_echo: bool,
    pub ack: bool,
    /// Identifies this client in the channel's presence map.
    pub presence_key: String,
}

#[derive(Serialize)]
struct JoinPayload<'a> {
    config: JoinOptions<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
}

#[derive(Serialize)]
struct JoinOptions<'a> {
    broadcast: BroadcastOptions,
    presence: PresenceOptions<'a>,
}

#[derive(Serialize)]
struct BroadcastOptions {
    #[serde(rename = "self")]
    self_echo: bool,
    ack: bool,
}

#[derive(Serialize)]
struct PresenceOptions<'a> {
    key: &'a str,
}

impl ChannelConfig {
    /// Room member settings: own broadcasts echoed, presence keyed by
    /// participant id.
    pub fn echoing(presence_key: &str) -> Self {
        Self {
            self_echo: true,
            ack: false,
            presence_key: presence_key.to_string(),
        }
    }

    fn join_payload(&self, access_token: Option<&str>) -> Value {
        let payload = JoinPayload {
            config: JoinOptions {
                broadcast: BroadcastOptions {
                    self_echo: self.self_echo,
                    ack: self.ack,
                },
                presence: PresenceOptions {
                    key: &self.presence_key,
                },
            },
            access_token,
        };
        serde_json::to_value(payload).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Events & commands
// ---------------------------------------------------------------------------

/// Presence key → metas, as Supabase reports them.
pub type PresenceMap = HashMap<String, Vec<Value>>;

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    /// Everyone currently present. Sent right after a join.
    Sync(PresenceMap),
    Diff {
        joins: PresenceMap,
        leaves: PresenceMap,
    },
}

/// What the connection task reports.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    SocketUp,
    SocketDown,
    /// A connect attempt failed; another follows after the backoff.
    ConnectFailed(String),
    Joined {
        topic: String,
    },
    ChannelFailed {
        topic: String,
        reason: String,
    },
    Broadcast {
        topic: String,
        event: String,
        payload: Value,
    },
    Presence {
        topic: String,
        change: PresenceChange,
    },
}

/// What client handles ask the connection task to do.
#[derive(Debug)]
pub(crate) enum RealtimeCommand {
    Join {
        topic: String,
        config: ChannelConfig,
    },
    Leave {
        topic: String,
    },
    Broadcast {
        topic: String,
        event: String,
        payload: Value,
    },
    /// Start tracking `meta`, or stop when `None`.
    Track {
        topic: String,
        meta: Option<Value>,
    },
    Shutdown,
}
