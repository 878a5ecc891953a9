//! Public handle UIs use to read lesson state and propose changes.

use std::sync::Arc;

use classroom_common::RoomId;
use classroom_config::ClassroomConfig;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use super::pump::event_pump;
use super::state::SessionState;
use super::types::{SyncConfig, SyncEvent};
use crate::capability;
use crate::document::{
    CanvasTab, DocumentPatch, SessionContextPatch, SharedSessionDocument, Tool,
};
use crate::error::{SyncError, TransportError};
use crate::media::{MediaHandle, MediaKind};
use crate::participant::Participant;
use crate::poll::PollInteraction;
use crate::protocol::{ClassroomMessage, Envelope, PollAction, QuizAction, SessionSnapshot};
use crate::quiz::QuizInteraction;
use crate::room::RosterEntry;
use crate::strokes::{NewStroke, Stroke};
use crate::transport::{SubscriptionId, Transport};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct Inner {
    pub(crate) me: Participant,
    pub(crate) room_id: RoomId,
    pub(crate) config: SyncConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) state: RwLock<SessionState>,
    events: RwLock<Option<mpsc::Sender<SyncEvent>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Inner {
    pub(crate) async fn emit(&self, event: SyncEvent) {
        let tx = self.events.read().await.clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// Drop the transport subscription, if any.
    pub(crate) async fn detach(&self) {
        let id = self.subscription.lock().await.take();
        if let Some(id) = id {
            if let Err(e) = self.transport.unsubscribe(&id).await {
                warn!(room = %self.room_id, error = %e, "Unsubscribe failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

/// One participant's view of one room. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionSynchronizer {
    inner: Arc<Inner>,
}

impl SessionSynchronizer {
    /// Join `class_id` under the configured room namespace, with sync
    /// settings taken from the same config.
    pub fn for_class(
        me: Participant,
        class_id: &str,
        transport: Arc<dyn Transport>,
        config: &ClassroomConfig,
    ) -> Self {
        Self::new(
            me,
            config.classroom.room_id(class_id),
            transport,
            SyncConfig::from(config),
        )
    }

    pub fn new(
        me: Participant,
        room_id: RoomId,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SessionState::new(room_id.clone())),
                me,
                room_id,
                config,
                transport,
                events: RwLock::new(None),
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to the room and start applying its traffic.
    /// Returns the stream UIs re-render from.
    pub async fn connect(&self) -> Result<mpsc::Receiver<SyncEvent>, SyncError> {
        if self.inner.state.read().await.ended {
            return Err(SyncError::SessionEnded);
        }
        let mut subscription = self.inner.subscription.lock().await;
        if subscription.is_some() {
            return Err(TransportError::AlreadySubscribed(self.inner.room_id.to_string()).into());
        }

        let (tx, rx) = mpsc::channel(256);
        *self.inner.events.write().await = Some(tx);

        let sub = self
            .inner
            .transport
            .subscribe(&self.inner.room_id, &self.inner.me)
            .await?;
        *subscription = Some(sub.id);
        drop(subscription);

        tokio::spawn(event_pump(Arc::clone(&self.inner), sub.events));
        info!(
            room = %self.inner.room_id,
            participant = %self.inner.me.id,
            role = ?self.inner.me.role,
            "Joined classroom"
        );
        Ok(rx)
    }

    /// Stop receiving without ending the session for anyone else.
    pub async fn leave(&self) {
        self.inner.detach().await;
        self.inner.state.write().await.cancel_resync();
        info!(room = %self.inner.room_id, participant = %self.inner.me.id, "Left classroom");
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    async fn prepare(&self, message: ClassroomMessage) -> Result<Envelope, SyncError> {
        if self.inner.state.read().await.ended {
            return Err(SyncError::SessionEnded);
        }
        if self.inner.subscription.lock().await.is_none() {
            return Err(SyncError::NotConnected);
        }
        capability::authorize(&self.inner.me, &message)?;
        Ok(Envelope::new(self.inner.me.clone(), message))
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), SyncError> {
        self.inner
            .transport
            .publish(&self.inner.room_id, envelope)
            .await?;
        Ok(())
    }

    async fn publish(&self, message: ClassroomMessage) -> Result<(), SyncError> {
        let envelope = self.prepare(message).await?;
        self.send(&envelope).await
    }

    async fn ensure_can_draw(&self) -> Result<(), SyncError> {
        if self.inner.state.read().await.can_draw(&self.inner.me) {
            Ok(())
        } else {
            Err(SyncError::DrawingDisabled)
        }
    }

    // -----------------------------------------------------------------------
    // Document
    // -----------------------------------------------------------------------

    /// Tell the synchronizer how many slides the deck has, enabling clamping.
    pub async fn set_slide_count(&self, count: usize) {
        self.inner.state.write().await.slide_count = Some(count);
    }

    /// Teacher only. Clamped to the deck when the slide count is known.
    pub async fn update_slide(&self, index: usize) -> Result<(), SyncError> {
        let index = match self.inner.state.read().await.slide_count {
            Some(count) => index.min(count.saturating_sub(1)),
            None => index,
        };
        self.publish(ClassroomMessage::SlideUpdate {
            current_slide_index: index,
        })
        .await
    }

    pub async fn update_tool(&self, tool: Tool) -> Result<(), SyncError> {
        self.publish(ClassroomMessage::ToolUpdate { tool }).await
    }

    pub async fn update_canvas_tab(&self, tab: CanvasTab) -> Result<(), SyncError> {
        self.publish(ClassroomMessage::CanvasTabUpdate { tab }).await
    }

    pub async fn set_student_can_draw(&self, allowed: bool) -> Result<(), SyncError> {
        self.publish(ClassroomMessage::PermissionUpdate {
            student_can_draw: allowed,
        })
        .await
    }

    /// Merge any subset of document fields. An empty patch publishes nothing.
    pub async fn update_shared_display(&self, patch: DocumentPatch) -> Result<(), SyncError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.publish(ClassroomMessage::DisplayUpdate { patch }).await
    }

    pub async fn set_embedded_url(&self, url: Option<String>) -> Result<(), SyncError> {
        self.update_shared_display(DocumentPatch {
            embedded_url: Some(url),
            ..Default::default()
        })
        .await
    }

    pub async fn update_shared_notes(&self, text: impl Into<String>) -> Result<(), SyncError> {
        self.publish(ClassroomMessage::NotesUpdate { text: text.into() })
            .await
    }

    /// Add a line to the shared notes.
    pub async fn append_shared_notes(&self, text: &str) -> Result<(), SyncError> {
        let current = self.inner.state.read().await.document.shared_notes.clone();
        let text = if current.is_empty() {
            text.to_string()
        } else {
            format!("{current}\n{text}")
        };
        self.update_shared_notes(text).await
    }

    pub async fn update_session_context(&self, patch: SessionContextPatch) -> Result<(), SyncError> {
        self.publish(ClassroomMessage::ContextUpdate { patch }).await
    }

    /// Award one star. Returns the new total.
    pub async fn award_star(&self) -> Result<u32, SyncError> {
        // Validate before reserving a number.
        self.prepare(ClassroomMessage::StarAwarded {
            new_total: 0,
            is_milestone: false,
        })
        .await?;

        let (new_total, previous) = {
            let mut state = self.inner.state.write().await;
            let previous = state.stars_published;
            let total = state.document.star_count.max(previous) + 1;
            state.stars_published = total;
            (total, previous)
        };
        let message = ClassroomMessage::StarAwarded {
            new_total,
            is_milestone: self.inner.config.is_milestone(new_total),
        };
        if let Err(e) = self.publish(message).await {
            // Hand the number back unless a later award already claimed past it.
            let mut state = self.inner.state.write().await;
            if state.stars_published == new_total {
                state.stars_published = previous;
            }
            return Err(e);
        }
        Ok(new_total)
    }

    // -----------------------------------------------------------------------
    // Whiteboard
    // -----------------------------------------------------------------------

    /// Stamp, append locally, and publish a finished stroke.
    pub async fn add_stroke(&self, new: NewStroke) -> Result<Stroke, SyncError> {
        self.ensure_can_draw().await?;
        let stroke = Stroke {
            id: classroom_common::new_id(),
            author_id: self.inner.me.id.clone(),
            tool: new.tool,
            color: new.color,
            points: new.points,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let envelope = self
            .prepare(ClassroomMessage::StrokeAdd {
                stroke: stroke.clone(),
            })
            .await?;

        let appended = self.inner.state.write().await.strokes.append(stroke.clone());
        if appended {
            self.inner.emit(SyncEvent::StrokeAdded(stroke.clone())).await;
        }
        self.send(&envelope).await?;
        Ok(stroke)
    }

    /// Wipe the whiteboard for everyone. Not undoable.
    pub async fn clear_canvas(&self) -> Result<(), SyncError> {
        self.ensure_can_draw().await?;
        self.publish(ClassroomMessage::CanvasClear).await
    }

    // -----------------------------------------------------------------------
    // Quiz
    // -----------------------------------------------------------------------

    async fn quiz(&self, slide_index: usize, action: QuizAction) -> Result<(), SyncError> {
        self.publish(ClassroomMessage::QuizEvent {
            slide_index,
            action,
        })
        .await
    }

    pub async fn quiz_start(&self, slide_index: usize, options: Vec<String>) -> Result<(), SyncError> {
        self.quiz(slide_index, QuizAction::Start { options }).await
    }

    pub async fn quiz_lock(&self, slide_index: usize) -> Result<(), SyncError> {
        self.quiz(slide_index, QuizAction::Lock).await
    }

    pub async fn quiz_reveal(&self, slide_index: usize, correct_option: &str) -> Result<(), SyncError> {
        self.quiz(
            slide_index,
            QuizAction::Reveal {
                correct_option: correct_option.to_string(),
            },
        )
        .await
    }

    pub async fn quiz_reset(&self, slide_index: usize) -> Result<(), SyncError> {
        self.quiz(slide_index, QuizAction::Reset).await
    }

    /// Answer as this participant. Ignored by every peer unless the quiz is active.
    pub async fn quiz_submit(&self, slide_index: usize, option_id: &str) -> Result<(), SyncError> {
        self.quiz(
            slide_index,
            QuizAction::Submit {
                response_id: classroom_common::new_id(),
                student_id: self.inner.me.id.clone(),
                option_id: option_id.to_string(),
            },
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Poll
    // -----------------------------------------------------------------------

    async fn poll(&self, slide_index: usize, action: PollAction) -> Result<(), SyncError> {
        self.publish(ClassroomMessage::PollEvent {
            slide_index,
            action,
        })
        .await
    }

    pub async fn poll_start(&self, slide_index: usize, options: Vec<String>) -> Result<(), SyncError> {
        self.poll(slide_index, PollAction::Start { options }).await
    }

    pub async fn poll_close(&self, slide_index: usize) -> Result<(), SyncError> {
        self.poll(slide_index, PollAction::Close).await
    }

    pub async fn poll_set_results_visible(
        &self,
        slide_index: usize,
        visible: bool,
    ) -> Result<(), SyncError> {
        self.poll(slide_index, PollAction::SetResultsVisible { visible })
            .await
    }

    /// Flip results visibility. Sent as the absolute new value.
    pub async fn toggle_results(&self, slide_index: usize) -> Result<bool, SyncError> {
        let visible = !self
            .inner
            .state
            .read()
            .await
            .polls
            .get(&slide_index)
            .is_some_and(|poll| poll.results_visible);
        self.poll_set_results_visible(slide_index, visible).await?;
        Ok(visible)
    }

    pub async fn poll_reset(&self, slide_index: usize) -> Result<(), SyncError> {
        self.poll(slide_index, PollAction::Reset).await
    }

    pub async fn poll_vote(&self, slide_index: usize, option_id: &str) -> Result<(), SyncError> {
        self.poll(
            slide_index,
            PollAction::Vote {
                vote_id: classroom_common::new_id(),
                student_id: self.inner.me.id.clone(),
                option_id: option_id.to_string(),
            },
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Media
    // -----------------------------------------------------------------------

    /// Register a local stream. A screen stream raises `is_screen_sharing`.
    pub async fn set_local_media(&self, handle: MediaHandle) -> Result<(), SyncError> {
        let kind = handle.kind;
        self.inner.state.write().await.media.set_local(handle);
        if kind == MediaKind::Screen {
            self.set_screen_sharing(true).await?;
        }
        Ok(())
    }

    pub async fn clear_local_media(&self, kind: MediaKind) -> Result<(), SyncError> {
        let removed = self.inner.state.write().await.media.clear_local(kind);
        if kind == MediaKind::Screen && removed.is_some() {
            self.set_screen_sharing(false).await?;
        }
        Ok(())
    }

    async fn set_screen_sharing(&self, sharing: bool) -> Result<(), SyncError> {
        self.update_shared_display(DocumentPatch {
            is_screen_sharing: Some(sharing),
            ..Default::default()
        })
        .await
    }

    pub async fn set_remote_media(&self, participant_id: &str, handle: MediaHandle) {
        self.inner
            .state
            .write()
            .await
            .media
            .set_remote(participant_id, handle);
    }

    pub async fn local_media(&self, kind: MediaKind) -> Option<MediaHandle> {
        self.inner.state.read().await.media.local(kind).cloned()
    }

    pub async fn remote_media(&self, participant_id: &str, kind: MediaKind) -> Option<MediaHandle> {
        self.inner
            .state
            .read()
            .await
            .media
            .remote(participant_id, kind)
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Session end
    // -----------------------------------------------------------------------

    /// Teacher only. Ends the lesson for everyone and detaches. Calling it
    /// again is a no-op.
    pub async fn end_session(&self) -> Result<(), SyncError> {
        if self.inner.state.read().await.ended {
            return Ok(());
        }
        let envelope = self.prepare(ClassroomMessage::SessionEnd).await?;
        // Nothing changes locally until the room has it, so a failed send
        // can be retried.
        self.send(&envelope).await?;

        let first = {
            let mut state = self.inner.state.write().await;
            // Our echo may already have been applied by the pump.
            let first = !state.ended;
            state.ended = true;
            state.resync = None;
            first
        };
        info!(room = %self.inner.room_id, "Session ended locally");
        if first {
            self.inner
                .emit(SyncEvent::SessionEnded {
                    ended_by: self.inner.me.clone(),
                })
                .await;
        }
        self.inner.detach().await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn participant(&self) -> &Participant {
        &self.inner.me
    }

    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    pub async fn document(&self) -> SharedSessionDocument {
        self.inner.state.read().await.document.clone()
    }

    pub async fn strokes(&self) -> Vec<Stroke> {
        self.inner.state.read().await.strokes.strokes().to_vec()
    }

    pub async fn quiz_state(&self, slide_index: usize) -> Option<QuizInteraction> {
        self.inner.state.read().await.quizzes.get(&slide_index).cloned()
    }

    pub async fn poll_state(&self, slide_index: usize) -> Option<PollInteraction> {
        self.inner.state.read().await.polls.get(&slide_index).cloned()
    }

    pub async fn roster(&self) -> Vec<RosterEntry> {
        self.inner.state.read().await.room.roster()
    }

    pub async fn connected_participants(&self) -> Vec<Participant> {
        self.inner.state.read().await.room.connected()
    }

    /// Whether the local whiteboard should accept input.
    pub async fn can_draw(&self) -> bool {
        self.inner.state.read().await.can_draw(&self.inner.me)
    }

    pub async fn is_ended(&self) -> bool {
        self.inner.state.read().await.ended
    }

    pub async fn is_synced(&self) -> bool {
        self.inner.state.read().await.synced
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.read().await.snapshot()
    }
}
