//! Room-scoped publish/subscribe.
//!
//! A [`Transport`] delivers every envelope published to a room to all of
//! the room's current subscribers, the publisher included, in a stable
//! per-publisher order. Connectivity and presence changes arrive on the
//! same stream as messages.

mod local;
mod realtime;
mod relay;

use std::fmt;

use async_trait::async_trait;
use classroom_common::RoomId;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::participant::Participant;
use crate::protocol::Envelope;

pub use local::LocalHub;
pub use realtime::RealtimeTransport;
pub use relay::{RelayTransport, RelayTransportConfig};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(classroom_common::new_short_id())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a subscriber observes.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Joined (or rejoined) the room; messages flow from here on.
    Connected,
    /// Link dropped. Messages published meanwhile are not replayed.
    Disconnected,
    /// A connection attempt or the channel failed.
    Error(String),
    PresenceJoin(Participant),
    PresenceLeave(Participant),
    Message(Envelope),
}

pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start receiving everything published to `room` from now on.
    async fn subscribe(
        &self,
        room: &RoomId,
        participant: &Participant,
    ) -> Result<Subscription, TransportError>;

    /// Best effort. The publisher gets its own envelope back on its stream.
    async fn publish(&self, room: &RoomId, envelope: &Envelope) -> Result<(), TransportError>;

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), TransportError>;
}
