//! Configuration and event types for the session synchronizer.

use std::time::Duration;

use classroom_config::ClassroomConfig;

use crate::document::DocumentChange;
use crate::participant::Participant;
use crate::poll::PollPhase;
use crate::quiz::QuizPhase;
use crate::strokes::Stroke;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Every n-th star is a milestone.
    pub milestone_interval: u32,
    /// Consecutive connection errors before `ConnectionLost` is raised.
    pub reconnect_failure_threshold: u32,
    /// Drop received envelopes whose sender lacks the role for them.
    pub enforce_roles: bool,
    /// Wait this long for a snapshot before asking again.
    pub resync_timeout: Duration,
    /// Requests sent before giving up and keeping local state.
    pub resync_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&ClassroomConfig::default())
    }
}

impl From<&ClassroomConfig> for SyncConfig {
    fn from(config: &ClassroomConfig) -> Self {
        Self {
            milestone_interval: config.classroom.milestone_interval.max(1),
            reconnect_failure_threshold: config.classroom.reconnect_failure_threshold.max(1),
            enforce_roles: config.classroom.enforce_roles,
            resync_timeout: Duration::from_millis(config.classroom.resync_timeout_ms),
            resync_attempts: 3,
        }
    }
}

impl SyncConfig {
    pub fn is_milestone(&self, total: u32) -> bool {
        total > 0 && total % self.milestone_interval == 0
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything a UI needs to re-render from.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Joined or rejoined the room. A resync follows.
    Connected,
    /// The link dropped; the transport is retrying.
    Reconnecting,
    /// Reconnection keeps failing. Show a connection-lost banner.
    ConnectionLost { attempts: u32 },
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
    Document(DocumentChange),
    /// Fire-once star animation trigger. Never replayed by a resync.
    Celebration { new_total: u32, is_milestone: bool },
    StrokeAdded(Stroke),
    CanvasCleared,
    QuizChanged { slide_index: usize, phase: QuizPhase },
    PollChanged {
        slide_index: usize,
        phase: PollPhase,
        results_visible: bool,
    },
    /// Local state was replaced by a snapshot; re-read everything.
    Resynced,
    SessionEnded { ended_by: Participant },
}
