//! Frames exchanged with `classroom-relay`.
//!
//! The first client frame is a [`RelayHello`]. After that the client sends
//! bare [`Envelope`](crate::protocol::Envelope) JSON and receives
//! [`RelayFrame`]s.

use serde::{Deserialize, Serialize};

use crate::participant::Participant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayHello {
    #[serde(rename = "join")]
    Join {
        room_id: String,
        participant: Participant,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Registration succeeded; `members` are the others already present.
    Joined {
        room_id: String,
        members: Vec<Participant>,
    },
    PresenceJoin {
        participant: Participant,
    },
    PresenceLeave {
        participant: Participant,
    },
    /// A sender-stamped envelope, kept as raw JSON so kinds the relay does
    /// not know pass through untouched.
    Message {
        envelope: serde_json::Value,
    },
    /// The last frame was refused and not fanned out.
    Rejected {
        reason: String,
    },
    Error {
        message: String,
    },
    /// The teacher ended the session. No further joins are accepted.
    RoomClosed,
}
