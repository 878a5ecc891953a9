use classroom_common::ClassroomError;
use thiserror::Error;

use crate::capability::CapabilityError;

/// Failures surfaced by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("transport closed")]
    Closed,

    #[error("already subscribed to room {0}")]
    AlreadySubscribed(String),

    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Failures returned by [`SessionSynchronizer`](crate::SessionSynchronizer) calls.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("permission denied: {0}")]
    PermissionDenied(#[from] CapabilityError),

    #[error("drawing is disabled for students")]
    DrawingDisabled,

    #[error("session has ended")]
    SessionEnded,

    #[error("not connected to the room")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<SyncError> for ClassroomError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Transport(e) => ClassroomError::Transport(e.to_string()),
            other => ClassroomError::Sync(other.to_string()),
        }
    }
}

impl From<TransportError> for ClassroomError {
    fn from(err: TransportError) -> Self {
        ClassroomError::Transport(err.to_string())
    }
}
