//! Live classroom session synchronization.
//!
//! Keeps a teacher's and a student's view of an in-progress lesson
//! consistent: slide, whiteboard, quiz and poll state, notes, and reward
//! events, replicated over a room-scoped pub/sub [`Transport`].

pub mod capability;
pub mod document;
pub mod error;
pub mod media;
pub mod participant;
pub mod poll;
pub mod protocol;
pub mod quiz;
pub mod realtime;
pub mod relay_protocol;
pub mod room;
pub mod strokes;
pub mod synchronizer;
pub mod transport;

pub use capability::{authorize, CapabilityError};
pub use document::{
    CanvasTab, DocumentChange, DocumentPatch, SessionContext, SessionContextPatch,
    SharedSessionDocument, Tool,
};
pub use error::{SyncError, TransportError};
pub use media::{MediaHandle, MediaKind};
pub use participant::{Participant, Role};
pub use poll::{PollInteraction, PollPhase, PollVote};
pub use protocol::{ClassroomMessage, Envelope, PollAction, QuizAction, SessionSnapshot};
pub use quiz::{OptionTally, QuizInteraction, QuizPhase, QuizResponse};
pub use realtime::{RealtimeClient, RealtimeConfig};
pub use room::{ConnectionStatus, RosterEntry};
pub use strokes::{NewStroke, Point, Stroke};
pub use synchronizer::{SessionSynchronizer, SyncConfig, SyncEvent};
pub use transport::{
    LocalHub, RealtimeTransport, RelayTransport, RelayTransportConfig, Subscription,
    SubscriptionId, Transport, TransportEvent,
};
