//! [`Transport`] over Supabase Realtime.
//!
//! One socket serves every room this process subscribes to. Each room is a
//! channel joined with self-echo on and presence keyed by participant id; a
//! router task fans socket events out to the matching subscription.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use classroom_common::RoomId;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::{Subscription, SubscriptionId, Transport, TransportEvent};
use crate::error::TransportError;
use crate::participant::Participant;
use crate::protocol::{Envelope, BROADCAST_EVENT};
use crate::realtime::{ChannelConfig, PresenceChange, RealtimeClient, RealtimeConfig, RealtimeEvent};

struct Route {
    subscription: SubscriptionId,
    tx: mpsc::UnboundedSender<TransportEvent>,
    /// presence key → participant
    present: HashMap<String, Participant>,
}

type Routes = Arc<RwLock<HashMap<String, Route>>>;

pub struct RealtimeTransport {
    client: RealtimeClient,
    routes: Routes,
}

impl RealtimeTransport {
    /// Open the socket and start routing. Must be called inside a tokio runtime.
    pub fn connect(config: RealtimeConfig) -> Self {
        let (client, rt_events) = RealtimeClient::connect(config);
        let routes: Routes = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(router(rt_events, Arc::clone(&routes)));
        Self { client, routes }
    }

    pub async fn is_connected(&self) -> bool {
        self.client.is_connected().await
    }

    /// Leave every channel and close the socket.
    pub async fn shutdown(&self) -> Result<(), TransportError> {
        self.client.disconnect().await
    }
}

#[async_trait]
impl Transport for RealtimeTransport {
    async fn subscribe(
        &self,
        room: &RoomId,
        participant: &Participant,
    ) -> Result<Subscription, TransportError> {
        let topic = room.as_str().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();

        {
            let mut routes = self.routes.write().await;
            if routes.contains_key(&topic) {
                return Err(TransportError::AlreadySubscribed(topic));
            }
            routes.insert(
                topic.clone(),
                Route {
                    subscription: id.clone(),
                    tx,
                    present: HashMap::new(),
                },
            );
        }

        self.client
            .join_channel(&topic, ChannelConfig::echoing(&participant.id))
            .await?;
        self.client
            .presence_track(&topic, serde_json::to_value(participant)?)
            .await?;

        info!(room = %room, participant = %participant.id, "Joining Realtime channel");
        Ok(Subscription { id, events: rx })
    }

    async fn publish(&self, room: &RoomId, envelope: &Envelope) -> Result<(), TransportError> {
        if !self.routes.read().await.contains_key(room.as_str()) {
            return Err(TransportError::NotConnected);
        }
        if !self.client.is_connected().await {
            return Err(TransportError::NotConnected);
        }
        let payload = serde_json::to_value(envelope)?;
        self.client
            .broadcast(room.as_str(), BROADCAST_EVENT, payload)
            .await
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        let topic = {
            let mut routes = self.routes.write().await;
            let topic = routes
                .iter()
                .find(|(_, route)| &route.subscription == id)
                .map(|(topic, _)| topic.clone());
            if let Some(topic) = &topic {
                routes.remove(topic);
            }
            topic
        };
        if let Some(topic) = topic {
            self.client.presence_untrack(&topic).await?;
            self.client.leave_channel(&topic).await?;
            debug!(topic = %topic, "Left Realtime channel");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

async fn router(mut rt_events: mpsc::Receiver<RealtimeEvent>, routes: Routes) {
    while let Some(event) = rt_events.recv().await {
        match event {
            RealtimeEvent::SocketUp => {
                debug!("Realtime socket up, waiting for channel joins");
            }
            RealtimeEvent::SocketDown => {
                let mut routes = routes.write().await;
                for route in routes.values_mut() {
                    route.present.clear();
                    let _ = route.tx.send(TransportEvent::Disconnected);
                }
            }
            RealtimeEvent::ConnectFailed(message) => {
                for route in routes.read().await.values() {
                    let _ = route.tx.send(TransportEvent::Error(message.clone()));
                }
            }
            RealtimeEvent::Joined { topic } => {
                send_to(&routes, &topic, TransportEvent::Connected).await;
            }
            RealtimeEvent::ChannelFailed { topic, reason } => {
                send_to(&routes, &topic, TransportEvent::Error(reason)).await;
            }
            RealtimeEvent::Broadcast {
                topic,
                event,
                payload,
            } => {
                if event != BROADCAST_EVENT {
                    debug!(topic = %topic, event = %event, "Ignoring foreign broadcast");
                    continue;
                }
                match serde_json::from_value::<Envelope>(payload) {
                    Ok(envelope) => {
                        send_to(&routes, &topic, TransportEvent::Message(envelope)).await;
                    }
                    Err(e) => warn!(topic = %topic, error = %e, "Malformed classroom envelope"),
                }
            }
            RealtimeEvent::Presence { topic, change } => {
                if let Some(route) = routes.write().await.get_mut(&topic) {
                    route.apply_presence(change);
                }
            }
        }
    }
    debug!("Realtime event stream ended");
}

impl Route {
    /// Report who came and went, keeping `present` in step.
    fn apply_presence(&mut self, change: PresenceChange) {
        match change {
            PresenceChange::Sync(state) => {
                let incoming: HashMap<String, Participant> = state
                    .iter()
                    .filter_map(|(key, metas)| parse_participant(metas).map(|p| (key.clone(), p)))
                    .collect();
                for (key, participant) in &self.present {
                    if !incoming.contains_key(key) {
                        let _ = self.tx.send(TransportEvent::PresenceLeave(participant.clone()));
                    }
                }
                for (key, participant) in &incoming {
                    if !self.present.contains_key(key) {
                        let _ = self.tx.send(TransportEvent::PresenceJoin(participant.clone()));
                    }
                }
                self.present = incoming;
            }
            PresenceChange::Diff { joins, leaves } => {
                for (key, metas) in &leaves {
                    let gone = self.present.remove(key).or_else(|| parse_participant(metas));
                    if let Some(participant) = gone {
                        let _ = self.tx.send(TransportEvent::PresenceLeave(participant));
                    }
                }
                for (key, metas) in &joins {
                    if let Some(participant) = parse_participant(metas) {
                        if self.present.insert(key.clone(), participant.clone()).is_none() {
                            let _ = self.tx.send(TransportEvent::PresenceJoin(participant));
                        }
                    }
                }
            }
        }
    }
}

async fn send_to(routes: &Routes, topic: &str, event: TransportEvent) {
    if let Some(route) = routes.read().await.get(topic) {
        let _ = route.tx.send(event);
    }
}

/// The tracked payload is the participant itself; Phoenix adds `phx_ref`.
fn parse_participant(metas: &[serde_json::Value]) -> Option<Participant> {
    let meta = metas.first()?;
    serde_json::from_value(meta.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_meta_parses_into_participant() {
        let metas = vec![serde_json::json!({
            "id": "t1",
            "display_name": "Tess",
            "role": "teacher",
            "phx_ref": "F1x"
        })];
        let participant = parse_participant(&metas).unwrap();
        assert!(participant.is_teacher());
        assert_eq!(participant.display_name, "Tess");
    }

    #[test]
    fn foreign_presence_meta_is_skipped() {
        let metas = vec![serde_json::json!({ "user_id": "u1", "status": "online" })];
        assert!(parse_participant(&metas).is_none());
        assert!(parse_participant(&[]).is_none());
    }

    #[tokio::test]
    async fn router_delivers_join_and_broadcast_to_room() {
        let routes: Routes = Arc::new(RwLock::new(HashMap::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        routes.write().await.insert(
            "classroom_1".into(),
            Route {
                subscription: SubscriptionId::new(),
                tx,
                present: HashMap::new(),
            },
        );

        let (rt_tx, rt_rx) = mpsc::channel(16);
        let task = tokio::spawn(router(rt_rx, Arc::clone(&routes)));

        let envelope = Envelope::new(
            Participant::teacher("t1", "T"),
            crate::protocol::ClassroomMessage::CanvasClear,
        );
        rt_tx
            .send(RealtimeEvent::Joined {
                topic: "classroom_1".into(),
            })
            .await
            .unwrap();
        rt_tx
            .send(RealtimeEvent::Broadcast {
                topic: "classroom_2".into(),
                event: BROADCAST_EVENT.into(),
                payload: serde_json::to_value(&envelope).unwrap(),
            })
            .await
            .unwrap();
        rt_tx
            .send(RealtimeEvent::Broadcast {
                topic: "classroom_1".into(),
                event: BROADCAST_EVENT.into(),
                payload: serde_json::to_value(&envelope).unwrap(),
            })
            .await
            .unwrap();
        rt_tx.send(RealtimeEvent::SocketDown).await.unwrap();
        drop(rt_tx);
        task.await.unwrap();

        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        assert_eq!(rx.recv().await, Some(TransportEvent::Message(envelope)));
        assert_eq!(rx.recv().await, Some(TransportEvent::Disconnected));
    }

    #[tokio::test]
    async fn presence_state_reports_departures() {
        let routes: Routes = Arc::new(RwLock::new(HashMap::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let teacher = Participant::teacher("t1", "T");
        let mut present = HashMap::new();
        present.insert("t1".to_string(), teacher.clone());
        routes.write().await.insert(
            "classroom_1".into(),
            Route {
                subscription: SubscriptionId::new(),
                tx,
                present,
            },
        );

        let (rt_tx, rt_rx) = mpsc::channel(16);
        let task = tokio::spawn(router(rt_rx, Arc::clone(&routes)));
        let mut state = HashMap::new();
        state.insert(
            "s1".to_string(),
            vec![serde_json::json!({"id": "s1", "display_name": "S", "role": "student"})],
        );
        rt_tx
            .send(RealtimeEvent::Presence {
                topic: "classroom_1".into(),
                change: PresenceChange::Sync(state),
            })
            .await
            .unwrap();
        drop(rt_tx);
        task.await.unwrap();

        assert_eq!(rx.recv().await, Some(TransportEvent::PresenceLeave(teacher)));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::PresenceJoin(Participant::student("s1", "S")))
        );
    }
}
