//! Per-connection handler: join, register, then stamp and fan out envelopes.

use std::net::SocketAddr;
use std::time::Duration;

use classroom_common::RoomId;
use classroom_sync::relay_protocol::{RelayFrame, RelayHello};
use classroom_sync::Participant;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::gate::{stamp_and_authorize, GateError};
use crate::room::{encode, JoinOutcome, RoomStore};

/// Per-server settings every connection reads.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub hello_timeout: Duration,
    pub enforce_roles: bool,
    /// Only rooms `{room_namespace}_{classId}` may be joined.
    pub room_namespace: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            hello_timeout: Duration::from_secs(10),
            enforce_roles: true,
            room_namespace: "classroom".into(),
        }
    }
}

impl RelaySettings {
    fn admits(&self, room_id: &str) -> Result<(), String> {
        let room: RoomId = room_id.parse().map_err(|e| format!("{e}"))?;
        if room.namespace() != self.room_namespace {
            return Err(format!(
                "room `{room_id}` is outside namespace `{}`",
                self.room_namespace
            ));
        }
        Ok(())
    }
}

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
type WsStream<S> = SplitStream<WebSocketStream<S>>;

/// Handle a single WebSocket connection.
pub async fn handle_connection<S>(
    ws: WebSocketStream<S>,
    addr: SocketAddr,
    store: RoomStore,
    settings: RelaySettings,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    // 1. Read the join frame.
    let Some((room_id, participant)) = read_hello(&mut stream, addr, settings.hello_timeout).await
    else {
        return;
    };
    if let Err(reason) = settings.admits(&room_id) {
        tracing::warn!(peer = %addr, room = %room_id, reason = %reason, "Join refused");
        let _ = send_frame(&mut sink, &RelayFrame::Rejected { reason }).await;
        let _ = sink.close().await;
        return;
    }

    // 2. Register.
    let conn_id = classroom_common::new_short_id();
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let others = match store.join(&room_id, &conn_id, participant.clone(), tx).await {
        JoinOutcome::Joined { others } => others,
        JoinOutcome::Closed => {
            tracing::info!(peer = %addr, room = %room_id, "Join refused, room closed");
            let _ = send_frame(&mut sink, &RelayFrame::RoomClosed).await;
            let _ = sink.close().await;
            return;
        }
    };

    tracing::info!(
        peer = %addr,
        room = %room_id,
        participant = %participant.id,
        role = ?participant.role,
        "Client joined"
    );

    // 3. Confirm before anything queued for us goes out.
    let joined = RelayFrame::Joined {
        room_id: room_id.clone(),
        members: others,
    };
    if send_frame(&mut sink, &joined).await.is_ok() {
        let seat = Seat {
            store: &store,
            room_id: &room_id,
            conn_id: &conn_id,
            participant: &participant,
            settings: &settings,
        };
        forward(&mut sink, &mut stream, &mut rx, &seat).await;
    }

    // 4. Cleanup.
    if store.leave(&room_id, &conn_id).await.is_some() {
        tracing::info!(peer = %addr, room = %room_id, participant = %participant.id, "Client left");
    }
}

/// A registered connection's place in a room.
struct Seat<'a> {
    store: &'a RoomStore,
    room_id: &'a str,
    conn_id: &'a str,
    participant: &'a Participant,
    settings: &'a RelaySettings,
}

async fn forward<S>(
    sink: &mut WsSink<S>,
    stream: &mut WsStream<S>,
    rx: &mut mpsc::Receiver<String>,
    seat: &Seat<'_>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            // Frames queued for this client -> its WebSocket
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    // Dropped by the store: replaced, evicted, reaped or closed.
                    let _ = sink.close().await;
                    break;
                };
                if sink.send(Message::Text(msg.into())).await.is_err() {
                    break;
                }
            }

            // Envelopes from this client -> the room
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        relay_envelope(seat, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(room = %seat.room_id, participant = %seat.participant.id, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn relay_envelope(seat: &Seat<'_>, text: &str) {
    let Seat {
        store,
        room_id,
        conn_id,
        participant,
        settings,
    } = *seat;
    match stamp_and_authorize(participant, text, settings.enforce_roles) {
        Ok(stamped) => {
            let frame = RelayFrame::Message {
                envelope: stamped.envelope,
            };
            store.fan_out(room_id, &frame).await;
            if stamped.ends_session {
                store.close(room_id).await;
            }
        }
        Err(e) => {
            let reason = e.to_string();
            match e {
                GateError::Forbidden(_) => {
                    tracing::warn!(room = %room_id, participant = %participant.id, reason = %reason, "Rejected envelope");
                }
                _ => {
                    tracing::debug!(room = %room_id, participant = %participant.id, reason = %reason, "Dropped malformed frame");
                }
            }
            store
                .send_to(room_id, conn_id, &RelayFrame::Rejected { reason })
                .await;
        }
    }
}

/// Read and parse the first message as a [`RelayHello`].
async fn read_hello<S>(
    stream: &mut WsStream<S>,
    addr: SocketAddr,
    timeout: Duration,
) -> Option<(String, Participant)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = tokio::time::timeout(timeout, stream.next()).await;

    match frame {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<RelayHello>(&text) {
            Ok(RelayHello::Join {
                room_id,
                participant,
            }) => Some((room_id, participant)),
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "Invalid join frame");
                None
            }
        },
        Ok(Some(Ok(_))) => {
            tracing::warn!(peer = %addr, "Expected text join frame");
            None
        }
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "WS error during join");
            None
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "Connection closed before join");
            None
        }
        Err(_) => {
            tracing::warn!(peer = %addr, timeout = ?timeout, "Join timeout");
            None
        }
    }
}

/// Send a [`RelayFrame`] as a JSON text frame.
async fn send_frame<S>(
    sink: &mut WsSink<S>,
    frame: &RelayFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sink.send(Message::Text(encode(frame).into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use classroom_sync::{ClassroomMessage, Envelope};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, connect_async};

    type Client = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn serve(store: RoomStore) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let store = store.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        handle_connection(ws, peer, store, RelaySettings::default()).await;
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    async fn next_frame(ws: &mut Client) -> RelayFrame {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn join(url: &str, participant: Participant) -> (Client, RelayFrame) {
        join_room(url, "classroom_1", participant).await
    }

    async fn join_room(url: &str, room_id: &str, participant: Participant) -> (Client, RelayFrame) {
        let (mut ws, _) = connect_async(url).await.unwrap();
        let hello = RelayHello::Join {
            room_id: room_id.into(),
            participant,
        };
        ws.send(Message::Text(serde_json::to_string(&hello).unwrap().into()))
            .await
            .unwrap();
        let first = next_frame(&mut ws).await;
        (ws, first)
    }

    async fn send(ws: &mut Client, envelope: &Envelope) {
        ws.send(Message::Text(serde_json::to_string(envelope).unwrap().into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn join_then_fan_out_to_everyone() {
        let url = serve(RoomStore::new()).await;
        let teacher = Participant::teacher("t1", "T");
        let student = Participant::student("s1", "S");

        let (mut t, first) = join(&url, teacher.clone()).await;
        assert_eq!(
            first,
            RelayFrame::Joined {
                room_id: "classroom_1".into(),
                members: vec![]
            }
        );
        assert_eq!(
            next_frame(&mut t).await,
            RelayFrame::PresenceJoin {
                participant: teacher.clone()
            }
        );

        let (mut s, first) = join(&url, student.clone()).await;
        assert_eq!(
            first,
            RelayFrame::Joined {
                room_id: "classroom_1".into(),
                members: vec![teacher.clone()]
            }
        );
        assert_eq!(
            next_frame(&mut t).await,
            RelayFrame::PresenceJoin {
                participant: student.clone()
            }
        );
        next_frame(&mut s).await;

        let envelope = Envelope::new(
            teacher.clone(),
            ClassroomMessage::SlideUpdate {
                current_slide_index: 2,
            },
        );
        send(&mut t, &envelope).await;

        for ws in [&mut t, &mut s] {
            match next_frame(ws).await {
                RelayFrame::Message { envelope: value } => {
                    let got: Envelope = serde_json::from_value(value).unwrap();
                    assert_eq!(got, envelope);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn rooms_outside_the_namespace_are_refused() {
        let store = RoomStore::new();
        let url = serve(store.clone()).await;

        let (_ws, first) = join_room(&url, "other_1", Participant::teacher("t1", "T")).await;
        assert!(matches!(first, RelayFrame::Rejected { .. }));
        let (_ws, first) = join_room(&url, "classroom", Participant::teacher("t1", "T")).await;
        assert!(matches!(first, RelayFrame::Rejected { .. }));
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn forged_envelope_is_rejected_to_sender_only() {
        let url = serve(RoomStore::new()).await;
        let (mut s, _) = join(&url, Participant::student("s1", "S")).await;
        next_frame(&mut s).await;

        let forged = Envelope::new(
            Participant::teacher("t1", "T"),
            ClassroomMessage::SessionEnd,
        );
        send(&mut s, &forged).await;
        assert!(matches!(next_frame(&mut s).await, RelayFrame::Rejected { .. }));
    }

    #[tokio::test]
    async fn teacher_session_end_closes_room() {
        let store = RoomStore::new();
        let url = serve(store.clone()).await;
        let teacher = Participant::teacher("t1", "T");
        let (mut t, _) = join(&url, teacher.clone()).await;
        next_frame(&mut t).await;

        send(&mut t, &Envelope::new(teacher, ClassroomMessage::SessionEnd)).await;
        assert!(matches!(next_frame(&mut t).await, RelayFrame::Message { .. }));
        assert_eq!(next_frame(&mut t).await, RelayFrame::RoomClosed);

        let (_s, first) = join(&url, Participant::student("s1", "S")).await;
        assert_eq!(first, RelayFrame::RoomClosed);
        assert_eq!(store.count().await, 0);
    }

    async fn until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    #[tokio::test]
    async fn synchronizers_converge_through_relay() {
        use std::sync::Arc;

        use classroom_common::RoomId;
        use classroom_sync::{
            RelayTransport, RelayTransportConfig, SessionSynchronizer, SyncConfig, SyncError,
            SyncEvent, Transport,
        };

        let url = serve(RoomStore::new()).await;
        let room = RoomId::new("classroom", "relay");
        let config = SyncConfig {
            resync_timeout: Duration::from_millis(100),
            ..SyncConfig::default()
        };
        let transport = || -> Arc<dyn Transport> {
            Arc::new(RelayTransport::new(RelayTransportConfig::new(url.clone())))
        };

        let teacher = SessionSynchronizer::new(
            Participant::teacher("t1", "T"),
            room.clone(),
            transport(),
            config.clone(),
        );
        let _teacher_events = teacher.connect().await.unwrap();
        until(|| {
            let teacher = teacher.clone();
            async move { teacher.is_synced().await }
        })
        .await;
        teacher.update_slide(4).await.unwrap();

        let student = SessionSynchronizer::new(
            Participant::student("s1", "S"),
            room,
            transport(),
            config,
        );
        let mut events = student.connect().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if event == SyncEvent::Resynced {
                    break;
                }
            }
        })
        .await
        .expect("student never resynced");
        assert_eq!(student.document().await.current_slide_index, 4);

        teacher.update_slide(6).await.unwrap();
        until(|| {
            let student = student.clone();
            async move { student.document().await.current_slide_index == 6 }
        })
        .await;

        assert!(matches!(
            student.update_slide(0).await,
            Err(SyncError::PermissionDenied(_))
        ));
        teacher.leave().await;
        student.leave().await;
    }
}
