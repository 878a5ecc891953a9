//! classroom-relay: WebSocket room relay for classroom sessions.
//!
//! Accepts WebSocket connections, binds each one to the participant named
//! in its join frame, and fans envelopes out to every member of the room.
//! Sender identity is stamped by the relay and teacher-only messages from
//! students are refused before fan-out.

mod connection;
mod gate;
mod room;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use classroom_config::ClassroomConfig;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use crate::connection::{handle_connection, RelaySettings};
use crate::room::RoomStore;

#[derive(Parser)]
#[command(name = "classroom-relay", about = "WebSocket relay for live classroom rooms")]
struct Args {
    /// Port to listen on. Overrides `relay.port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind. Overrides `relay.bind`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Config file. Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load(args: &Args) -> Result<ClassroomConfig, classroom_common::ConfigError> {
    match &args.config {
        Some(path) => {
            let config = classroom_config::toml_loader::load_from_path(path)?;
            classroom_config::validation::validate(&config)?;
            Ok(config)
        }
        None => classroom_config::load_config(),
    }
}

#[tokio::main]
async fn main() -> classroom_common::Result<()> {
    let args = Args::parse();
    let config = load(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_filter().into()),
        )
        .init();

    let store = RoomStore::new();
    let settings = RelaySettings {
        hello_timeout: Duration::from_secs(config.relay.hello_timeout),
        enforce_roles: config.classroom.enforce_roles,
        room_namespace: config.classroom.room_namespace.clone(),
    };

    let bind = args.bind.unwrap_or(config.relay.bind);
    let port = args.port.unwrap_or(config.relay.port);
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(enforce_roles = settings.enforce_roles, "classroom-relay listening on {}", addr);

    // Reaper for rooms the teacher has abandoned.
    let reaper_store = store.clone();
    let ttl = Duration::from_secs(config.relay.room_ttl);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let reaped = reaper_store.reap_stale(ttl).await;
            let count = reaper_store.count().await;
            tracing::debug!(rooms = count, reaped, "Reaper tick");
        }
    });

    // Accept loop.
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let store = store.clone();
                let settings = settings.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, store, settings).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}
