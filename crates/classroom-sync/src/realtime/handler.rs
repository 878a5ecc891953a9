//! Turns inbound Phoenix frames into [`RealtimeEvent`]s.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::ChannelTable;
use super::types::{PhoenixFrame, PresenceChange, PresenceMap, RealtimeEvent};

/// `{ key: { metas: [..] } }` → `{ key: [..] }`. Keys without metas are dropped.
pub(crate) fn presence_map(value: &Value) -> PresenceMap {
    value
        .as_object()
        .into_iter()
        .flatten()
        .filter_map(|(key, entry)| {
            let metas = entry.get("metas")?.as_array()?;
            Some((key.clone(), metas.clone()))
        })
        .collect()
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |node, key| node.get(key))
        .and_then(Value::as_str)
}

/// Route one frame. Frames for unknown events are logged and dropped.
pub(crate) async fn dispatch(
    frame: &PhoenixFrame,
    channels: &ChannelTable,
    event_tx: &mpsc::Sender<RealtimeEvent>,
) {
    let topic = frame.channel().to_string();
    let event = match frame.event.as_str() {
        "phx_reply" => reply_event(frame, &topic, channels).await,
        "phx_error" | "phx_close" => {
            let reason = if frame.event == "phx_error" {
                "channel error"
            } else {
                "channel closed"
            };
            info!(topic = %topic, reason, "Channel went away");
            Some(RealtimeEvent::ChannelFailed {
                topic,
                reason: reason.to_string(),
            })
        }
        "broadcast" => {
            let event = str_at(&frame.payload, &["event"]).unwrap_or("unknown").to_string();
            debug!(topic = %topic, event = %event, "Broadcast received");
            Some(RealtimeEvent::Broadcast {
                topic,
                event,
                payload: frame.payload.get("payload").cloned().unwrap_or(Value::Null),
            })
        }
        "presence_state" => {
            let present = presence_map(&frame.payload);
            debug!(topic = %topic, present = present.len(), "Presence state received");
            Some(RealtimeEvent::Presence {
                topic,
                change: PresenceChange::Sync(present),
            })
        }
        "presence_diff" => {
            let side = |name: &str| frame.payload.get(name).map(presence_map).unwrap_or_default();
            let (joins, leaves) = (side("joins"), side("leaves"));
            debug!(topic = %topic, joins = joins.len(), leaves = leaves.len(), "Presence diff received");
            Some(RealtimeEvent::Presence {
                topic,
                change: PresenceChange::Diff { joins, leaves },
            })
        }
        other => {
            debug!(topic = %topic, event = %other, "Unhandled Phoenix event");
            None
        }
    };

    if let Some(event) = event {
        let _ = event_tx.send(event).await;
    }
}

/// Replies to heartbeats, broadcasts and presence carry their own refs. Only
/// the outstanding join ref marks the channel joined; any error reply fails it.
async fn reply_event(frame: &PhoenixFrame, topic: &str, channels: &ChannelTable) -> Option<RealtimeEvent> {
    let answers_join = {
        let mut channels = channels.write().await;
        match channels.get_mut(topic) {
            Some(entry) if entry.join_ref.is_some() && entry.join_ref == frame.reference => {
                entry.join_ref = None;
                true
            }
            _ => false,
        }
    };

    let status = str_at(&frame.payload, &["status"]).unwrap_or("unknown");
    if status == "ok" {
        if !answers_join {
            return None;
        }
        info!(topic = %topic, "Channel joined");
        return Some(RealtimeEvent::Joined {
            topic: topic.to_string(),
        });
    }

    let reason = str_at(&frame.payload, &["response", "reason"])
        .unwrap_or("unknown error")
        .to_string();
    warn!(topic = %topic, status = %status, reason = %reason, "Channel reply error");
    Some(RealtimeEvent::ChannelFailed {
        topic: topic.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use super::super::connection::ChannelEntry;
    use super::super::types::ChannelConfig;
    use super::*;

    fn awaiting_join(topic: &str, join_ref: &str) -> ChannelTable {
        let mut map = HashMap::new();
        map.insert(
            topic.to_string(),
            ChannelEntry {
                config: ChannelConfig::echoing("s1"),
                tracked: None,
                join_ref: Some(join_ref.to_string()),
            },
        );
        Arc::new(RwLock::new(map))
    }

    fn frame(topic: &str, event: &str, payload: Value, reference: Option<&str>) -> PhoenixFrame {
        PhoenixFrame {
            topic: format!("realtime:{topic}"),
            event: event.into(),
            payload,
            reference: reference.map(Into::into),
        }
    }

    fn reply(reference: &str, status: &str) -> PhoenixFrame {
        frame(
            "classroom_1",
            "phx_reply",
            serde_json::json!({ "status": status, "response": { "reason": "nope" } }),
            Some(reference),
        )
    }

    #[test]
    fn presence_map_keeps_only_entries_with_metas() {
        let value = serde_json::json!({
            "s1": { "metas": [{ "id": "s1", "phx_ref": "x" }] },
            "bogus": { "no_metas": true }
        });
        let parsed = presence_map(&value);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["s1"][0]["id"], "s1");
        assert!(presence_map(&Value::Null).is_empty());
    }

    #[tokio::test]
    async fn only_the_join_reply_marks_the_channel_joined() {
        let channels = awaiting_join("classroom_1", "7");
        let (tx, mut rx) = mpsc::channel(8);

        dispatch(&reply("8", "ok"), &channels, &tx).await;
        assert!(rx.try_recv().is_err());

        dispatch(&reply("7", "ok"), &channels, &tx).await;
        assert_eq!(
            rx.try_recv().ok(),
            Some(RealtimeEvent::Joined {
                topic: "classroom_1".into()
            })
        );

        // The same ref again is not a fresh join.
        dispatch(&reply("7", "ok"), &channels, &tx).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn error_reply_surfaces_reason() {
        let channels = awaiting_join("classroom_1", "7");
        let (tx, mut rx) = mpsc::channel(8);
        dispatch(&reply("7", "error"), &channels, &tx).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(RealtimeEvent::ChannelFailed { reason, .. }) if reason == "nope"
        ));
    }

    #[tokio::test]
    async fn broadcast_unwraps_inner_event() {
        let channels: ChannelTable = Arc::new(RwLock::new(HashMap::new()));
        let (tx, mut rx) = mpsc::channel(8);
        let incoming = frame(
            "classroom_1",
            "broadcast",
            serde_json::json!({
                "type": "broadcast",
                "event": "classroom",
                "payload": { "hello": 1 }
            }),
            None,
        );
        dispatch(&incoming, &channels, &tx).await;
        assert_eq!(
            rx.try_recv().ok(),
            Some(RealtimeEvent::Broadcast {
                topic: "classroom_1".into(),
                event: "classroom".into(),
                payload: serde_json::json!({ "hello": 1 }),
            })
        );
    }

    #[tokio::test]
    async fn presence_diff_splits_joins_and_leaves() {
        let channels: ChannelTable = Arc::new(RwLock::new(HashMap::new()));
        let (tx, mut rx) = mpsc::channel(8);
        let incoming = frame(
            "classroom_1",
            "presence_diff",
            serde_json::json!({
                "joins": { "s2": { "metas": [{ "id": "s2" }] } },
                "leaves": {}
            }),
            None,
        );
        dispatch(&incoming, &channels, &tx).await;
        match rx.try_recv() {
            Ok(RealtimeEvent::Presence {
                change: PresenceChange::Diff { joins, leaves },
                ..
            }) => {
                assert!(joins.contains_key("s2"));
                assert!(leaves.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
