//! [`Transport`] client for `classroom-relay`.
//!
//! Each subscription owns one WebSocket to the relay and reconnects with
//! exponential backoff. Envelopes published while the socket is down are
//! queued and flushed after the next successful join.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use classroom_common::RoomId;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Subscription, SubscriptionId, Transport, TransportEvent};
use crate::error::TransportError;
use crate::participant::Participant;
use crate::protocol::Envelope;
use crate::relay_protocol::{RelayFrame, RelayHello};

#[derive(Debug, Clone)]
pub struct RelayTransportConfig {
    /// e.g. `ws://localhost:8787`
    pub url: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// How long to wait for the `joined` frame.
    pub join_timeout: Duration,
}

impl RelayTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            join_timeout: Duration::from_secs(10),
        }
    }
}

struct RelaySession {
    subscription: SubscriptionId,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

pub struct RelayTransport {
    config: RelayTransportConfig,
    /// room id → session
    sessions: Arc<RwLock<HashMap<String, RelaySession>>>,
}

impl RelayTransport {
    pub fn new(config: RelayTransportConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn subscribe(
        &self,
        room: &RoomId,
        participant: &Participant,
    ) -> Result<Subscription, TransportError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(room.as_str()) {
            return Err(TransportError::AlreadySubscribed(room.to_string()));
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();
        let hello = RelayHello::Join {
            room_id: room.to_string(),
            participant: participant.clone(),
        };

        let task = tokio::spawn(run_relay_session(
            self.config.clone(),
            serde_json::to_string(&hello)?,
            outbound_rx,
            event_tx,
        ));

        sessions.insert(
            room.to_string(),
            RelaySession {
                subscription: id.clone(),
                outbound: outbound_tx,
                task,
            },
        );
        Ok(Subscription { id, events: event_rx })
    }

    async fn publish(&self, room: &RoomId, envelope: &Envelope) -> Result<(), TransportError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(room.as_str())
            .ok_or(TransportError::NotConnected)?;
        let json = serde_json::to_string(envelope)?;
        session
            .outbound
            .send(json)
            .map_err(|_| TransportError::Closed)
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        let mut sessions = self.sessions.write().await;
        let room = sessions
            .iter()
            .find(|(_, s)| &s.subscription == id)
            .map(|(room, _)| room.clone());
        if let Some(session) = room.and_then(|room| sessions.remove(&room)) {
            // Dropping the sender lets the task close the socket cleanly.
            drop(session.outbound);
            let mut task = session.task;
            if tokio::time::timeout(Duration::from_secs(2), &mut task)
                .await
                .is_err()
            {
                debug!(subscription = %id, "Relay session did not stop in time, aborting");
                task.abort();
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

enum SessionResult {
    /// Unsubscribed or the room was closed; do not reconnect.
    Shutdown,
    Disconnected(String),
}

async fn run_relay_session(
    config: RelayTransportConfig,
    hello: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut backoff = config.reconnect_delay;

    loop {
        info!(url = %config.url, "Connecting to relay");
        match connect_async(&config.url).await {
            Ok((ws, _)) => {
                match relay_session(ws, &config, &hello, &mut outbound, &events, &mut backoff)
                    .await
                {
                    SessionResult::Shutdown => {
                        info!("Relay session finished");
                        return;
                    }
                    SessionResult::Disconnected(reason) => {
                        warn!(reason = %reason, "Relay connection lost");
                        let _ = events.send(TransportEvent::Disconnected);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect to relay");
                let _ = events.send(TransportEvent::Error(format!("connect failed: {e}")));
            }
        }

        if events.is_closed() {
            return;
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.max_reconnect_delay);
    }
}

async fn relay_session(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    config: &RelayTransportConfig,
    hello: &str,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    backoff: &mut Duration,
) -> SessionResult {
    let (mut sink, mut stream) = ws.split();

    // 1. Hello
    if sink.send(Message::Text(hello.to_string().into())).await.is_err() {
        return SessionResult::Disconnected("failed to send hello".into());
    }

    // 2. Wait for joined
    let first = tokio::time::timeout(config.join_timeout, stream.next()).await;
    let frame = match first {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<RelayFrame>(&text).ok(),
        Ok(_) => None,
        Err(_) => return SessionResult::Disconnected("join timed out".into()),
    };
    match frame {
        Some(RelayFrame::Joined { room_id, members }) => {
            info!(room = %room_id, members = members.len(), "Joined relay room");
            *backoff = config.reconnect_delay;
            let _ = events.send(TransportEvent::Connected);
            for member in members {
                let _ = events.send(TransportEvent::PresenceJoin(member));
            }
        }
        Some(RelayFrame::RoomClosed) => {
            let _ = events.send(TransportEvent::Error("room is closed".into()));
            return SessionResult::Shutdown;
        }
        Some(RelayFrame::Error { message }) => {
            return SessionResult::Disconnected(format!("relay error: {message}"));
        }
        _ => return SessionResult::Disconnected("unexpected relay response".into()),
    }

    // 3. Forwarding loop
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                match msg {
                    Some(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            return SessionResult::Disconnected("send failed".into());
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        return SessionResult::Shutdown;
                    }
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if handle_frame(&text, events) {
                            return SessionResult::Shutdown;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionResult::Disconnected("relay closed connection".into());
                    }
                    Some(Err(e)) => {
                        return SessionResult::Disconnected(format!("ws error: {e}"));
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Translate one relay frame. Returns `true` when the room was closed.
fn handle_frame(text: &str, events: &mpsc::UnboundedSender<TransportEvent>) -> bool {
    let frame = match serde_json::from_str::<RelayFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Unrecognized relay frame");
            return false;
        }
    };

    match frame {
        RelayFrame::Message { envelope } => match serde_json::from_value::<Envelope>(envelope) {
            Ok(envelope) => {
                let _ = events.send(TransportEvent::Message(envelope));
            }
            Err(e) => warn!(error = %e, "Malformed envelope from relay"),
        },
        RelayFrame::PresenceJoin { participant } => {
            let _ = events.send(TransportEvent::PresenceJoin(participant));
        }
        RelayFrame::PresenceLeave { participant } => {
            let _ = events.send(TransportEvent::PresenceLeave(participant));
        }
        RelayFrame::Rejected { reason } => {
            warn!(reason = %reason, "Relay rejected a message");
            let _ = events.send(TransportEvent::Error(format!("rejected: {reason}")));
        }
        RelayFrame::Error { message } => {
            let _ = events.send(TransportEvent::Error(message));
        }
        RelayFrame::RoomClosed => {
            info!("Relay closed the room");
            return true;
        }
        RelayFrame::Joined { .. } => {
            debug!("Duplicate joined frame");
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClassroomMessage;

    #[test]
    fn message_frame_becomes_envelope_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let envelope = Envelope::new(Participant::teacher("t1", "T"), ClassroomMessage::CanvasClear);
        let frame = RelayFrame::Message {
            envelope: serde_json::to_value(&envelope).unwrap(),
        };
        let closed = handle_frame(&serde_json::to_string(&frame).unwrap(), &tx);
        assert!(!closed);
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Message(envelope));
    }

    #[test]
    fn room_closed_stops_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(handle_frame(r#"{"kind":"room_closed"}"#, &tx));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rejection_surfaces_as_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_frame(r#"{"kind":"rejected","reason":"only the teacher may send slide_update"}"#, &tx);
        assert!(matches!(rx.try_recv(), Ok(TransportEvent::Error(msg)) if msg.starts_with("rejected")));
    }

    #[test]
    fn garbage_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(!handle_frame("{not json", &tx));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscription_fails() {
        let transport = RelayTransport::new(RelayTransportConfig::new("ws://127.0.0.1:1"));
        let room = RoomId::new("classroom", "1");
        let envelope = Envelope::new(Participant::teacher("t1", "T"), ClassroomMessage::CanvasClear);
        assert!(matches!(
            transport.publish(&room, &envelope).await,
            Err(TransportError::NotConnected)
        ));
    }
}
