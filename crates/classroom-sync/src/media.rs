//! Handles to media streams owned by the external media layer.
//!
//! Only the `is_screen_sharing` document flag is replicated. The handles
//! themselves stay on the client that holds them.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Camera,
    Microphone,
    Screen,
}

/// Opaque reference to a stream the media layer owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle {
    pub stream_id: String,
    pub kind: MediaKind,
}

impl MediaHandle {
    pub fn new(stream_id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            stream_id: stream_id.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaSlots {
    local: HashMap<MediaKind, MediaHandle>,
    /// participant id → their streams.
    remote: HashMap<String, HashMap<MediaKind, MediaHandle>>,
}

impl MediaSlots {
    /// Returns the handle previously in that slot.
    pub fn set_local(&mut self, handle: MediaHandle) -> Option<MediaHandle> {
        self.local.insert(handle.kind, handle)
    }

    pub fn clear_local(&mut self, kind: MediaKind) -> Option<MediaHandle> {
        self.local.remove(&kind)
    }

    pub fn local(&self, kind: MediaKind) -> Option<&MediaHandle> {
        self.local.get(&kind)
    }

    pub fn set_remote(&mut self, participant_id: &str, handle: MediaHandle) {
        self.remote
            .entry(participant_id.to_string())
            .or_default()
            .insert(handle.kind, handle);
    }

    pub fn remote(&self, participant_id: &str, kind: MediaKind) -> Option<&MediaHandle> {
        self.remote.get(participant_id)?.get(&kind)
    }

    /// Drop every stream belonging to a participant who left.
    pub fn remove_participant(&mut self, participant_id: &str) {
        self.remote.remove(participant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_slot_replaces_previous_handle() {
        let mut slots = MediaSlots::default();
        assert!(slots.set_local(MediaHandle::new("cam-1", MediaKind::Camera)).is_none());
        let old = slots.set_local(MediaHandle::new("cam-2", MediaKind::Camera));
        assert_eq!(old.unwrap().stream_id, "cam-1");
        assert_eq!(slots.local(MediaKind::Camera).unwrap().stream_id, "cam-2");
    }

    #[test]
    fn remote_streams_are_dropped_with_participant() {
        let mut slots = MediaSlots::default();
        slots.set_remote("s1", MediaHandle::new("scr", MediaKind::Screen));
        assert!(slots.remote("s1", MediaKind::Screen).is_some());
        slots.remove_participant("s1");
        assert!(slots.remote("s1", MediaKind::Screen).is_none());
    }
}
