//! Thin Supabase Realtime client over Phoenix Channels v1 protocol.
//!
//! Handles heartbeats, channel join/leave, broadcast, presence tracking,
//! and auto-reconnect with backoff. Channels and tracked presence are
//! restored after every reconnect.

mod client;
mod connection;
mod handler;
mod types;

pub use client::RealtimeClient;
pub use types::{
    ChannelConfig, PhoenixFrame, PresenceChange, PresenceMap, RealtimeConfig, RealtimeEvent,
};
