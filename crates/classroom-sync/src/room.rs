//! Room roster: everyone seen in the room and whether they are connected.

use std::collections::HashMap;

use classroom_common::RoomId;

use crate::participant::Participant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub participant: Participant,
    pub status: ConnectionStatus,
}

/// One live lesson instance as seen from a single client.
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    /// participant id → entry. Departed participants stay, marked disconnected.
    participants: HashMap<String, RosterEntry>,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            participants: HashMap::new(),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Returns `true` if the participant was not already connected.
    pub fn join(&mut self, participant: Participant) -> bool {
        let previous = self.participants.insert(
            participant.id.clone(),
            RosterEntry {
                participant,
                status: ConnectionStatus::Connected,
            },
        );
        !matches!(previous, Some(entry) if entry.status == ConnectionStatus::Connected)
    }

    /// Returns `true` if the participant was connected.
    pub fn leave(&mut self, participant_id: &str) -> bool {
        match self.participants.get_mut(participant_id) {
            Some(entry) if entry.status == ConnectionStatus::Connected => {
                entry.status = ConnectionStatus::Disconnected;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, participant_id: &str) -> Option<&RosterEntry> {
        self.participants.get(participant_id)
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<_> = self.participants.values().cloned().collect();
        entries.sort_by(|a, b| a.participant.id.cmp(&b.participant.id));
        entries
    }

    pub fn connected(&self) -> Vec<Participant> {
        self.roster()
            .into_iter()
            .filter(|e| e.status == ConnectionStatus::Connected)
            .map(|e| e.participant)
            .collect()
    }

    pub fn teacher_connected(&self) -> bool {
        self.participants
            .values()
            .any(|e| e.status == ConnectionStatus::Connected && e.participant.is_teacher())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> Room {
        Room::new("classroom_42".parse().unwrap())
    }

    #[test]
    fn leave_keeps_entry_as_disconnected() {
        let mut room = room();
        assert!(room.join(Participant::student("s1", "Sam")));
        assert!(room.leave("s1"));
        assert!(!room.leave("s1"));
        assert_eq!(
            room.get("s1").unwrap().status,
            ConnectionStatus::Disconnected
        );
        assert!(room.connected().is_empty());
    }

    #[test]
    fn rejoin_is_reported_once() {
        let mut room = room();
        assert!(room.join(Participant::student("s1", "Sam")));
        assert!(!room.join(Participant::student("s1", "Sam")));
        room.leave("s1");
        assert!(room.join(Participant::student("s1", "Sam")));
    }

    #[test]
    fn tracks_teacher_presence() {
        let mut room = room();
        room.join(Participant::student("s1", "Sam"));
        assert!(!room.teacher_connected());
        room.join(Participant::teacher("t1", "Tess"));
        assert!(room.teacher_connected());
        room.leave("t1");
        assert!(!room.teacher_connected());
        assert_eq!(room.id().class_id(), "42");
    }
}
