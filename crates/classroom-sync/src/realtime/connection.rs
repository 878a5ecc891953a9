//! The background task that owns the socket: connects, rejoins channels,
//! keeps the heartbeat going and reconnects with backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::handler::dispatch;
use super::types::{ChannelConfig, PhoenixFrame, RealtimeCommand, RealtimeConfig, RealtimeEvent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// A channel we are in, or trying to get into. Survives reconnects.
#[derive(Clone)]
pub(crate) struct ChannelEntry {
    pub(crate) config: ChannelConfig,
    /// Presence meta to re-track after a rejoin.
    pub(crate) tracked: Option<serde_json::Value>,
    /// Ref of the `phx_join` still waiting for its reply.
    pub(crate) join_ref: Option<String>,
}

pub(crate) type ChannelTable = Arc<RwLock<HashMap<String, ChannelEntry>>>;

type Commands = Arc<Mutex<mpsc::Receiver<RealtimeCommand>>>;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Doubling reconnect delay, reset after a successful connect.
struct Backoff {
    base: u64,
    max: u64,
    current: u64,
}

impl Backoff {
    fn new(base: u64, max: u64) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    fn reset(&mut self) {
        self.current = self.base;
    }

    /// The delay to wait now; the next one doubles, up to `max`.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max.max(self.base));
        Duration::from_secs(delay)
    }
}

/// How one connected session ended.
enum SessionEnd {
    /// The socket went away; reconnect.
    Dropped,
    /// Every handle is gone or `Shutdown` was requested.
    Shutdown,
}

async fn send_frame<S>(writer: &Mutex<S>, frame: &PhoenixFrame) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to encode Phoenix frame");
            return false;
        }
    };
    writer.lock().await.send(WsMessage::Text(json.into())).await.is_ok()
}

pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    connected: Arc<RwLock<bool>>,
    event_tx: mpsc::Sender<RealtimeEvent>,
    command_rx: mpsc::Receiver<RealtimeCommand>,
) {
    let commands: Commands = Arc::new(Mutex::new(command_rx));
    let channels: ChannelTable = Arc::new(RwLock::new(HashMap::new()));
    let mut backoff = Backoff::new(config.reconnect_delay_secs, config.max_reconnect_delay_secs);
    let url = config.ws_url();
    let host = url.split('?').next().unwrap_or_default().to_string();

    loop {
        info!(url = %host, "Connecting to Realtime");
        let attempt = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&url)).await;

        let failure = match attempt {
            Ok(Ok((ws, _))) => {
                backoff.reset();
                *connected.write().await = true;
                let _ = event_tx.send(RealtimeEvent::SocketUp).await;

                let end = run_session(ws, &config, &channels, &commands, &event_tx).await;

                *connected.write().await = false;
                let _ = event_tx.send(RealtimeEvent::SocketDown).await;
                if let SessionEnd::Shutdown = end {
                    info!("Realtime client shut down");
                    return;
                }
                None
            }
            Ok(Err(e)) => Some(format!("connection failed: {e}")),
            Err(_) => Some(format!("connection timed out after {CONNECT_TIMEOUT:?}")),
        };

        if let Some(reason) = failure {
            warn!(url = %host, reason = %reason, "Realtime connect attempt failed");
            let _ = event_tx.send(RealtimeEvent::ConnectFailed(reason)).await;
        }
        if event_tx.is_closed() {
            return;
        }

        let delay = backoff.next_delay();
        info!(delay = ?delay, "Reconnecting to Realtime");
        tokio::time::sleep(delay).await;
    }
}

/// Drive one live socket until it drops or the client shuts down.
async fn run_session(
    ws: Socket,
    config: &RealtimeConfig,
    channels: &ChannelTable,
    commands: &Commands,
    event_tx: &mpsc::Sender<RealtimeEvent>,
) -> SessionEnd {
    let (write, mut read) = ws.split();
    let write = Arc::new(Mutex::new(write));

    rejoin(&write, channels, config.access_token.as_deref()).await;

    let heartbeat = tokio::spawn(heartbeat(Arc::clone(&write), config.heartbeat_interval_secs));
    let forwarder = tokio::spawn(forward_commands(
        Arc::clone(commands),
        Arc::clone(&write),
        Arc::clone(channels),
        config.access_token.clone(),
    ));

    let mut end = SessionEnd::Dropped;
    while let Some(incoming) = read.next().await {
        match incoming {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<PhoenixFrame>(&text) {
                Ok(frame) => dispatch(&frame, channels, event_tx).await,
                Err(_) => debug!(text = %text, "Unrecognized frame from Realtime"),
            },
            Ok(WsMessage::Close(_)) => {
                info!("Realtime closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Realtime socket error");
                break;
            }
        }
        if forwarder.is_finished() {
            end = SessionEnd::Shutdown;
            break;
        }
    }

    heartbeat.abort();
    if forwarder.is_finished() {
        end = SessionEnd::Shutdown;
    }
    forwarder.abort();
    end
}

/// Re-send `phx_join`, and the tracked presence, for every known channel.
async fn rejoin<S>(write: &Mutex<S>, channels: &ChannelTable, access_token: Option<&str>)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut channels = channels.write().await;
    for (topic, entry) in channels.iter_mut() {
        let join = PhoenixFrame::join(topic, &entry.config, access_token);
        entry.join_ref = join.reference.clone();
        if !send_frame(write, &join).await {
            continue;
        }
        if let Some(meta) = &entry.tracked {
            send_frame(write, &PhoenixFrame::presence(topic, Some(meta))).await;
        }
        debug!(topic = %topic, "Rejoined channel");
    }
}

async fn heartbeat<S>(write: Arc<Mutex<S>>, interval_secs: u64)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        if !send_frame(&write, &PhoenixFrame::heartbeat()).await {
            break;
        }
    }
}

/// Returns once `Shutdown` arrives or every client handle is dropped.
async fn forward_commands<S>(
    commands: Commands,
    write: Arc<Mutex<S>>,
    channels: ChannelTable,
    access_token: Option<String>,
) where
    S: Sink<WsMessage> + Unpin,
{
    let mut commands = commands.lock().await;
    while let Some(command) = commands.recv().await {
        match command {
            RealtimeCommand::Join { topic, config } => {
                let join = PhoenixFrame::join(&topic, &config, access_token.as_deref());
                // In the table before the frame leaves, so the reply finds it.
                channels.write().await.insert(
                    topic,
                    ChannelEntry {
                        config,
                        tracked: None,
                        join_ref: join.reference.clone(),
                    },
                );
                send_frame(&write, &join).await;
            }
            RealtimeCommand::Leave { topic } => {
                channels.write().await.remove(&topic);
                send_frame(&write, &PhoenixFrame::leave(&topic)).await;
            }
            RealtimeCommand::Broadcast {
                topic,
                event,
                payload,
            } => {
                if !send_frame(&write, &PhoenixFrame::broadcast(&topic, &event, payload)).await {
                    warn!(topic = %topic, event = %event, "Broadcast dropped, socket unavailable");
                }
            }
            RealtimeCommand::Track { topic, meta } => {
                send_frame(&write, &PhoenixFrame::presence(&topic, meta.as_ref())).await;
                if let Some(entry) = channels.write().await.get_mut(&topic) {
                    entry.tracked = meta;
                }
            }
            RealtimeCommand::Shutdown => {
                let topics: Vec<String> = channels.write().await.drain().map(|(t, _)| t).collect();
                for topic in topics {
                    send_frame(&write, &PhoenixFrame::leave(&topic)).await;
                }
                let _ = write.lock().await.send(WsMessage::Close(None)).await;
                return;
            }
        }
    }
}
