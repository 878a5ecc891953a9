//! In-process hub. Every room has a single total order, so all members
//! see identical message sequences.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use classroom_common::RoomId;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{Subscription, SubscriptionId, Transport, TransportEvent};
use crate::capability;
use crate::error::TransportError;
use crate::participant::Participant;
use crate::protocol::Envelope;

struct Member {
    subscription: SubscriptionId,
    participant: Participant,
    tx: mpsc::UnboundedSender<TransportEvent>,
    connected: bool,
}

impl Member {
    fn send(&self, event: TransportEvent) {
        if self.connected {
            let _ = self.tx.send(event);
        }
    }
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<RoomId, Vec<Member>>,
}

impl HubState {
    fn room_of(&self, id: &SubscriptionId) -> Option<RoomId> {
        self.rooms
            .iter()
            .find(|(_, members)| members.iter().any(|m| &m.subscription == id))
            .map(|(room, _)| room.clone())
    }
}

/// Shared in-memory [`Transport`]. Clones share the same rooms.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
    authorize: bool,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hub that drops envelopes the sender's role may not publish,
    /// the way the relay does.
    pub fn with_authorization() -> Self {
        Self {
            authorize: true,
            ..Self::default()
        }
    }

    /// Simulate a dropped link for every subscription of `participant_id`.
    /// Messages published while disconnected are lost to it.
    pub async fn disconnect(&self, participant_id: &str) {
        let mut state = self.state.lock().await;
        for members in state.rooms.values_mut() {
            let mut dropped = Vec::new();
            for member in members.iter_mut() {
                if member.participant.id == participant_id && member.connected {
                    let _ = member.tx.send(TransportEvent::Disconnected);
                    member.connected = false;
                    dropped.push(member.participant.clone());
                }
            }
            for participant in dropped {
                for member in members.iter() {
                    member.send(TransportEvent::PresenceLeave(participant.clone()));
                }
            }
        }
    }

    /// Restore links dropped by [`LocalHub::disconnect`].
    pub async fn reconnect(&self, participant_id: &str) {
        let mut state = self.state.lock().await;
        for members in state.rooms.values_mut() {
            let mut restored = Vec::new();
            for member in members.iter_mut() {
                if member.participant.id == participant_id && !member.connected {
                    member.connected = true;
                    member.send(TransportEvent::Connected);
                    restored.push(member.subscription.clone());
                }
            }
            for subscription in restored {
                announce_join(members, &subscription);
            }
        }
    }

    /// Deliver a connection error to every subscription of `participant_id`,
    /// connected or not.
    pub async fn fail(&self, participant_id: &str, message: &str) {
        let state = self.state.lock().await;
        for member in state.rooms.values().flatten() {
            if member.participant.id == participant_id {
                let _ = member.tx.send(TransportEvent::Error(message.to_string()));
            }
        }
    }

    /// Fan out a raw JSON envelope, bypassing serialization on the sender side.
    pub async fn publish_raw(&self, room: &RoomId, json: &str) -> Result<(), TransportError> {
        let envelope: Envelope = serde_json::from_str(json)?;
        let state = self.state.lock().await;
        fan_out(&state, room, &envelope);
        Ok(())
    }

    /// Connected subscriptions in `room`.
    pub async fn member_count(&self, room: &RoomId) -> usize {
        let state = self.state.lock().await;
        state
            .rooms
            .get(room)
            .map(|members| members.iter().filter(|m| m.connected).count())
            .unwrap_or(0)
    }
}

/// Tell the (re)joined member who is here, and everyone that it arrived.
fn announce_join(members: &[Member], subscription: &SubscriptionId) {
    let Some(newcomer) = members.iter().find(|m| &m.subscription == subscription) else {
        return;
    };
    for other in members.iter().filter(|m| m.connected && &m.subscription != subscription) {
        newcomer.send(TransportEvent::PresenceJoin(other.participant.clone()));
    }
    for member in members {
        member.send(TransportEvent::PresenceJoin(newcomer.participant.clone()));
    }
}

fn fan_out(state: &HubState, room: &RoomId, envelope: &Envelope) {
    if let Some(members) = state.rooms.get(room) {
        for member in members {
            member.send(TransportEvent::Message(envelope.clone()));
        }
    }
}

#[async_trait]
impl Transport for LocalHub {
    async fn subscribe(
        &self,
        room: &RoomId,
        participant: &Participant,
    ) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();

        let mut state = self.state.lock().await;
        let members = state.rooms.entry(room.clone()).or_default();
        members.push(Member {
            subscription: id.clone(),
            participant: participant.clone(),
            tx,
            connected: true,
        });
        if let Some(member) = members.last() {
            member.send(TransportEvent::Connected);
        }
        announce_join(members, &id);

        debug!(room = %room, participant = %participant.id, "Subscribed to local hub");
        Ok(Subscription { id, events: rx })
    }

    async fn publish(&self, room: &RoomId, envelope: &Envelope) -> Result<(), TransportError> {
        let state = self.state.lock().await;
        let sender_connected = state
            .rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .any(|m| m.connected && m.participant.id == envelope.sender.id)
            })
            .unwrap_or(false);
        if !sender_connected {
            return Err(TransportError::NotConnected);
        }

        if self.authorize {
            if let Err(e) = capability::authorize(&envelope.sender, &envelope.message) {
                warn!(room = %room, sender = %envelope.sender.id, error = %e, "Rejected envelope");
                return Err(TransportError::Rejected(e.to_string()));
            }
        }

        // Through the wire format so every subscriber decodes what a remote
        // peer would.
        let wire = serde_json::to_string(envelope)?;
        let decoded: Envelope = serde_json::from_str(&wire)?;
        fan_out(&state, room, &decoded);
        Ok(())
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let Some(room) = state.room_of(id) else {
            return Ok(());
        };
        if let Some(members) = state.rooms.get_mut(&room) {
            if let Some(pos) = members.iter().position(|m| &m.subscription == id) {
                let member = members.remove(pos);
                if member.connected {
                    for other in members.iter() {
                        other.send(TransportEvent::PresenceLeave(member.participant.clone()));
                    }
                }
            }
            if members.is_empty() {
                state.rooms.remove(&room);
            }
        }
        debug!(room = %room, subscription = %id, "Unsubscribed from local hub");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClassroomMessage;

    fn room() -> RoomId {
        RoomId::new("classroom", "1")
    }

    fn drain(sub: &mut Subscription) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = sub.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn messages(events: &[TransportEvent]) -> Vec<ClassroomMessage> {
        events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Message(env) => Some(env.message.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn publisher_receives_own_message() {
        let hub = LocalHub::new();
        let teacher = Participant::teacher("t1", "T");
        let mut sub = hub.subscribe(&room(), &teacher).await.unwrap();
        hub.publish(&room(), &Envelope::new(teacher, ClassroomMessage::CanvasClear))
            .await
            .unwrap();
        assert_eq!(messages(&drain(&mut sub)), vec![ClassroomMessage::CanvasClear]);
    }

    #[tokio::test]
    async fn presence_is_announced_both_ways() {
        let hub = LocalHub::new();
        let teacher = Participant::teacher("t1", "T");
        let student = Participant::student("s1", "S");
        let mut t = hub.subscribe(&room(), &teacher).await.unwrap();
        drain(&mut t);
        let mut s = hub.subscribe(&room(), &student).await.unwrap();

        let s_events = drain(&mut s);
        assert_eq!(s_events[0], TransportEvent::Connected);
        assert!(s_events.contains(&TransportEvent::PresenceJoin(teacher.clone())));
        assert!(drain(&mut t).contains(&TransportEvent::PresenceJoin(student.clone())));

        hub.unsubscribe(&s.id).await.unwrap();
        assert_eq!(drain(&mut t), vec![TransportEvent::PresenceLeave(student)]);
        assert_eq!(hub.member_count(&room()).await, 1);
    }

    #[tokio::test]
    async fn disconnected_member_misses_messages() {
        let hub = LocalHub::new();
        let teacher = Participant::teacher("t1", "T");
        let student = Participant::student("s1", "S");
        let _t = hub.subscribe(&room(), &teacher).await.unwrap();
        let mut s = hub.subscribe(&room(), &student).await.unwrap();
        drain(&mut s);

        hub.disconnect("s1").await;
        hub.publish(&room(), &Envelope::new(teacher.clone(), ClassroomMessage::CanvasClear))
            .await
            .unwrap();
        let err = hub
            .publish(&room(), &Envelope::new(student, ClassroomMessage::CanvasClear))
            .await;
        assert!(matches!(err, Err(TransportError::NotConnected)));

        hub.reconnect("s1").await;
        let events = drain(&mut s);
        assert_eq!(events[0], TransportEvent::Disconnected);
        assert!(events.contains(&TransportEvent::Connected));
        assert!(messages(&events).is_empty());
    }

    #[tokio::test]
    async fn authorizing_hub_rejects_student_slide_change() {
        let hub = LocalHub::with_authorization();
        let student = Participant::student("s1", "S");
        let _s = hub.subscribe(&room(), &student).await.unwrap();
        let result = hub
            .publish(
                &room(),
                &Envelope::new(
                    student,
                    ClassroomMessage::SlideUpdate {
                        current_slide_index: 3,
                    },
                ),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));
    }

    #[tokio::test]
    async fn raw_frames_with_unknown_types_are_delivered() {
        let hub = LocalHub::new();
        let mut sub = hub
            .subscribe(&room(), &Participant::student("s1", "S"))
            .await
            .unwrap();
        drain(&mut sub);
        hub.publish_raw(
            &room(),
            r#"{"id":"x","sender":{"id":"t1","display_name":"T","role":"teacher"},"sent_at":1,"message":{"type":"hologram"}}"#,
        )
        .await
        .unwrap();
        assert_eq!(messages(&drain(&mut sub)), vec![ClassroomMessage::Unknown]);

        assert!(hub.publish_raw(&room(), "not json").await.is_err());
    }
}
