//! Room store: maps room ids to the connections currently in them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use classroom_sync::relay_protocol::RelayFrame;
use classroom_sync::Participant;
use tokio::sync::{mpsc, RwLock};

/// One live connection in a room.
pub struct Member {
    pub conn_id: String,
    pub participant: Participant,
    pub tx: mpsc::Sender<String>,
}

struct Room {
    members: Vec<Member>,
    /// Set while no teacher is connected.
    teacher_absent_since: Option<Instant>,
}

impl Room {
    fn teacher_connected(&self) -> bool {
        self.members.iter().any(|m| m.participant.is_teacher())
    }

    fn refresh_teacher_presence(&mut self) {
        if self.teacher_connected() {
            self.teacher_absent_since = None;
        } else if self.teacher_absent_since.is_none() {
            self.teacher_absent_since = Some(Instant::now());
        }
    }

    /// Queue `json` for every member. Members whose queue is full or gone
    /// are removed and returned; their connection ends and the client
    /// reconnects and resyncs.
    fn broadcast(&mut self, json: &str) -> Vec<Member> {
        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(self.members.len());
        for member in self.members.drain(..) {
            if member.tx.try_send(json.to_string()).is_ok() {
                kept.push(member);
            } else {
                evicted.push(member);
            }
        }
        self.members = kept;
        evicted
    }
}

#[derive(Default)]
struct StoreState {
    rooms: HashMap<String, Room>,
    /// Ended rooms and when they ended.
    closed: HashMap<String, Instant>,
}

/// Result of [`RoomStore::join`].
#[derive(Debug, PartialEq)]
pub enum JoinOutcome {
    /// Registered. `others` were already present.
    Joined { others: Vec<Participant> },
    /// The teacher ended this room.
    Closed,
}

/// Thread-safe room store.
#[derive(Clone, Default)]
pub struct RoomStore {
    state: Arc<RwLock<StoreState>>,
}

pub fn encode(frame: &RelayFrame) -> String {
    serde_json::to_string(frame).unwrap_or_default()
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. A previous connection of the same participant
    /// is replaced. Everyone, the newcomer included, receives its
    /// `presence_join`.
    pub async fn join(
        &self,
        room_id: &str,
        conn_id: &str,
        participant: Participant,
        tx: mpsc::Sender<String>,
    ) -> JoinOutcome {
        let mut state = self.state.write().await;
        if state.closed.contains_key(room_id) {
            return JoinOutcome::Closed;
        }

        let room = state.rooms.entry(room_id.to_string()).or_insert_with(|| Room {
            members: Vec::new(),
            teacher_absent_since: None,
        });
        room.members.retain(|m| m.participant.id != participant.id);
        let others = room.members.iter().map(|m| m.participant.clone()).collect();

        room.members.push(Member {
            conn_id: conn_id.to_string(),
            participant: participant.clone(),
            tx,
        });
        room.refresh_teacher_presence();

        let json = encode(&RelayFrame::PresenceJoin { participant });
        for evicted in room.broadcast(&json) {
            tracing::warn!(room = %room_id, participant = %evicted.participant.id, "Evicting slow member");
        }
        JoinOutcome::Joined { others }
    }

    /// Remove a connection. Returns its participant if it was still a member.
    pub async fn leave(&self, room_id: &str, conn_id: &str) -> Option<Participant> {
        let mut state = self.state.write().await;
        let room = state.rooms.get_mut(room_id)?;
        let pos = room.members.iter().position(|m| m.conn_id == conn_id)?;
        let member = room.members.remove(pos);
        room.refresh_teacher_presence();

        let json = encode(&RelayFrame::PresenceLeave {
            participant: member.participant.clone(),
        });
        room.broadcast(&json);
        if room.members.is_empty() {
            state.rooms.remove(room_id);
            tracing::debug!(room = %room_id, "Room emptied");
        }
        Some(member.participant)
    }

    /// Fan a frame out to every member of the room, sender included.
    pub async fn fan_out(&self, room_id: &str, frame: &RelayFrame) -> usize {
        let mut state = self.state.write().await;
        let Some(room) = state.rooms.get_mut(room_id) else {
            return 0;
        };
        let evicted = room.broadcast(&encode(frame));
        for member in &evicted {
            tracing::warn!(room = %room_id, participant = %member.participant.id, "Evicting slow member");
        }
        if !evicted.is_empty() {
            room.refresh_teacher_presence();
        }
        room.members.len()
    }

    /// Send a frame to one connection only.
    pub async fn send_to(&self, room_id: &str, conn_id: &str, frame: &RelayFrame) -> bool {
        let state = self.state.read().await;
        state
            .rooms
            .get(room_id)
            .and_then(|room| room.members.iter().find(|m| m.conn_id == conn_id))
            .is_some_and(|member| member.tx.try_send(encode(frame)).is_ok())
    }

    /// End a room: members get `room_closed`, the room is dropped and the
    /// id refuses joins until the reaper forgets it.
    pub async fn close(&self, room_id: &str) {
        let mut state = self.state.write().await;
        state.closed.insert(room_id.to_string(), Instant::now());
        if let Some(mut room) = state.rooms.remove(room_id) {
            room.broadcast(&encode(&RelayFrame::RoomClosed));
            tracing::info!(room = %room_id, members = room.members.len(), "Room closed");
        }
    }

    /// Drop rooms that have had no teacher connected for longer than `ttl`,
    /// and forget rooms closed longer than `ttl` ago.
    pub async fn reap_stale(&self, ttl: Duration) -> usize {
        let mut state = self.state.write().await;
        let now = Instant::now();
        state
            .closed
            .retain(|_, closed_at| now.duration_since(*closed_at) <= ttl);

        let before = state.rooms.len();
        state.rooms.retain(|id, room| {
            let stale = room
                .teacher_absent_since
                .is_some_and(|since| now.duration_since(since) > ttl);
            if stale {
                tracing::info!(room = %id, "Reaping room without teacher");
            }
            !stale
        });
        before - state.rooms.len()
    }

    pub async fn is_member(&self, room_id: &str, conn_id: &str) -> bool {
        self.state
            .read()
            .await
            .rooms
            .get(room_id)
            .is_some_and(|room| room.members.iter().any(|m| m.conn_id == conn_id))
    }

    /// Number of live rooms.
    pub async fn count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }
}
