//! Session synchronizer: binds a transport to the replicated lesson state.
//!
//! Every mutation is published and takes effect when the transport echoes
//! it back, through the same apply path remote messages use. Strokes are
//! the one exception: they are appended locally right away and the echo
//! is deduplicated by id.

mod client;
mod pump;
mod state;
mod types;

pub use client::SessionSynchronizer;
pub use types::{SyncConfig, SyncEvent};
