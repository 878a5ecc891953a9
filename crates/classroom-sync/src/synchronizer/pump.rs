//! Background task that applies `TransportEvent`s to the session state and
//! turns them into `SyncEvent`s.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::client::Inner;
use super::types::SyncEvent;
use crate::protocol::{ClassroomMessage, Envelope};
use crate::transport::TransportEvent;

// ---------------------------------------------------------------------------
// Event Pump
// ---------------------------------------------------------------------------

pub(crate) async fn event_pump(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    let mut consecutive_errors: u32 = 0;

    loop {
        let deadline = inner
            .state
            .read()
            .await
            .resync
            .as_ref()
            .map(|pending| pending.deadline);

        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)), if deadline.is_some() => {
                let retry = inner.state.write().await.retry_resync(&inner.config);
                if let Some(request) = retry {
                    debug!(room = %inner.room_id, "Snapshot request timed out, asking again");
                    publish(&inner, request).await;
                }
                continue;
            }
        };

        match event {
            TransportEvent::Connected => {
                consecutive_errors = 0;
                let request = {
                    let mut state = inner.state.write().await;
                    if state.ended {
                        continue;
                    }
                    state.begin_resync(&inner.config)
                };
                info!(room = %inner.room_id, participant = %inner.me.id, "Connected, requesting snapshot");
                inner.emit(SyncEvent::Connected).await;
                publish(&inner, request).await;
            }
            TransportEvent::Disconnected => {
                let mut state = inner.state.write().await;
                if state.ended {
                    continue;
                }
                state.cancel_resync();
                drop(state);
                warn!(room = %inner.room_id, "Transport disconnected");
                inner.emit(SyncEvent::Reconnecting).await;
            }
            TransportEvent::Error(message) => {
                consecutive_errors += 1;
                warn!(room = %inner.room_id, error = %message, attempts = consecutive_errors, "Transport error");
                if consecutive_errors == inner.config.reconnect_failure_threshold {
                    inner
                        .emit(SyncEvent::ConnectionLost {
                            attempts: consecutive_errors,
                        })
                        .await;
                }
            }
            TransportEvent::PresenceJoin(participant) => {
                let event = inner.state.write().await.presence_join(participant);
                if let Some(event) = event {
                    inner.emit(event).await;
                }
            }
            TransportEvent::PresenceLeave(participant) => {
                let event = inner.state.write().await.presence_leave(participant);
                if let Some(event) = event {
                    inner.emit(event).await;
                }
            }
            TransportEvent::Message(envelope) => {
                let (applied, ended) = {
                    let mut state = inner.state.write().await;
                    let applied = state.apply(&envelope, &inner.me, &inner.config);
                    (applied, state.ended)
                };
                for event in applied.events {
                    inner.emit(event).await;
                }
                if let Some(reply) = applied.reply {
                    publish(&inner, reply).await;
                }
                if ended {
                    inner.detach().await;
                    break;
                }
            }
        }
    }

    debug!(room = %inner.room_id, "Event pump stopped");
}

/// Publish on behalf of the synchronizer itself (handshake traffic).
async fn publish(inner: &Inner, message: ClassroomMessage) {
    let kind = message.kind();
    let envelope = Envelope::new(inner.me.clone(), message);
    if let Err(e) = inner.transport.publish(&inner.room_id, &envelope).await {
        warn!(room = %inner.room_id, kind, error = %e, "Failed to publish");
    }
}
