//! Wire types for classroom messages.
//!
//! Every message rides inside an [`Envelope`] whose `message` field is an
//! internally tagged union keyed by `type`. Unrecognised kinds decode to
//! [`ClassroomMessage::Unknown`] so older clients skip newer messages
//! instead of failing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::{
    CanvasTab, DocumentPatch, SessionContextPatch, SharedSessionDocument, Tool,
};
use crate::participant::Participant;
use crate::poll::PollInteraction;
use crate::quiz::QuizInteraction;
use crate::strokes::Stroke;

/// Broadcast event name used when the message rides a Realtime channel.
pub const BROADCAST_EVENT: &str = "classroom";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub sender: Participant,
    /// Unix milliseconds at the sender.
    pub sent_at: i64,
    pub message: ClassroomMessage,
}

impl Envelope {
    pub fn new(sender: Participant, message: ClassroomMessage) -> Self {
        Self {
            id: classroom_common::new_id(),
            sender,
            sent_at: chrono::Utc::now().timestamp_millis(),
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassroomMessage {
    SlideUpdate {
        current_slide_index: usize,
    },
    ToolUpdate {
        tool: Tool,
    },
    CanvasTabUpdate {
        tab: CanvasTab,
    },
    PermissionUpdate {
        student_can_draw: bool,
    },
    DisplayUpdate {
        patch: DocumentPatch,
    },
    NotesUpdate {
        text: String,
    },
    ContextUpdate {
        patch: SessionContextPatch,
    },
    StarAwarded {
        new_total: u32,
        is_milestone: bool,
    },
    StrokeAdd {
        stroke: Stroke,
    },
    CanvasClear,
    QuizEvent {
        slide_index: usize,
        action: QuizAction,
    },
    PollEvent {
        slide_index: usize,
        action: PollAction,
    },
    SyncRequest {
        request_id: String,
    },
    SyncSnapshot {
        request_id: String,
        target_id: String,
        snapshot: Box<SessionSnapshot>,
    },
    SessionEnd,
    #[serde(other)]
    Unknown,
}

impl ClassroomMessage {
    /// The `type` discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SlideUpdate { .. } => "slide_update",
            Self::ToolUpdate { .. } => "tool_update",
            Self::CanvasTabUpdate { .. } => "canvas_tab_update",
            Self::PermissionUpdate { .. } => "permission_update",
            Self::DisplayUpdate { .. } => "display_update",
            Self::NotesUpdate { .. } => "notes_update",
            Self::ContextUpdate { .. } => "context_update",
            Self::StarAwarded { .. } => "star_awarded",
            Self::StrokeAdd { .. } => "stroke_add",
            Self::CanvasClear => "canvas_clear",
            Self::QuizEvent { .. } => "quiz_event",
            Self::PollEvent { .. } => "poll_event",
            Self::SyncRequest { .. } => "sync_request",
            Self::SyncSnapshot { .. } => "sync_snapshot",
            Self::SessionEnd => "session_end",
            Self::Unknown => "unknown",
        }
    }

    /// Field-level messages expressed as a document patch, so they merge
    /// through the same path as `display_update`.
    pub fn as_patch(&self) -> Option<DocumentPatch> {
        let patch = match self {
            Self::SlideUpdate {
                current_slide_index,
            } => DocumentPatch {
                current_slide_index: Some(*current_slide_index),
                ..Default::default()
            },
            Self::ToolUpdate { tool } => DocumentPatch {
                active_tool: Some(*tool),
                ..Default::default()
            },
            Self::CanvasTabUpdate { tab } => DocumentPatch {
                active_canvas_tab: Some(*tab),
                ..Default::default()
            },
            Self::PermissionUpdate { student_can_draw } => DocumentPatch {
                student_can_draw: Some(*student_can_draw),
                ..Default::default()
            },
            Self::DisplayUpdate { patch } => patch.clone(),
            Self::NotesUpdate { text } => DocumentPatch {
                shared_notes: Some(text.clone()),
                ..Default::default()
            },
            Self::ContextUpdate { patch } => DocumentPatch {
                session_context: Some(patch.clone()),
                ..Default::default()
            },
            _ => return None,
        };
        Some(patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QuizAction {
    Start {
        options: Vec<String>,
    },
    Lock,
    Reveal {
        correct_option: String,
    },
    Reset,
    Submit {
        response_id: String,
        student_id: String,
        option_id: String,
    },
}

impl QuizAction {
    /// Start, lock, reveal and reset drive the machine; only the teacher sends them.
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Submit { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PollAction {
    Start {
        options: Vec<String>,
    },
    Close,
    SetResultsVisible {
        visible: bool,
    },
    Reset,
    Vote {
        vote_id: String,
        student_id: String,
        option_id: String,
    },
}

impl PollAction {
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Vote { .. })
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Full replicated state for a resync. Celebrations are transient and are
/// never part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    pub document: SharedSessionDocument,
    pub strokes: Vec<Stroke>,
    pub quizzes: BTreeMap<usize, QuizInteraction>,
    pub polls: BTreeMap<usize, PollInteraction>,
}
