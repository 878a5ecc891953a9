//! Replicated session state and the single path every envelope is applied
//! through, local echoes included.

use std::collections::BTreeMap;

use classroom_common::RoomId;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::{SyncConfig, SyncEvent};
use crate::capability;
use crate::document::{DocumentChange, SharedSessionDocument};
use crate::media::MediaSlots;
use crate::participant::Participant;
use crate::poll::{PollError, PollInteraction};
use crate::protocol::{ClassroomMessage, Envelope, PollAction, QuizAction, SessionSnapshot};
use crate::quiz::{QuizError, QuizInteraction};
use crate::room::Room;
use crate::strokes::StrokeLog;

/// An outstanding snapshot request.
#[derive(Debug)]
pub(crate) struct PendingResync {
    pub(crate) request_id: String,
    pub(crate) attempts: u32,
    pub(crate) deadline: Instant,
    /// Envelopes seen since our own request came back, replayed on top of
    /// the snapshot. `None` until the echo arrives.
    pub(crate) buffer: Option<Vec<Envelope>>,
}

/// Result of applying one envelope.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub(crate) events: Vec<SyncEvent>,
    /// Message to publish in response, e.g. a snapshot for a requester.
    pub(crate) reply: Option<ClassroomMessage>,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) document: SharedSessionDocument,
    pub(crate) strokes: StrokeLog,
    pub(crate) quizzes: BTreeMap<usize, QuizInteraction>,
    pub(crate) polls: BTreeMap<usize, PollInteraction>,
    pub(crate) room: Room,
    pub(crate) media: MediaSlots,
    pub(crate) ended: bool,
    /// Highest star total this client has published.
    pub(crate) stars_published: u32,
    /// Whether local state reflects the room. Students only serve
    /// snapshots when synced.
    pub(crate) synced: bool,
    pub(crate) resync: Option<PendingResync>,
    pub(crate) slide_count: Option<usize>,
}

impl SessionState {
    pub(crate) fn new(room_id: RoomId) -> Self {
        Self {
            document: SharedSessionDocument::default(),
            strokes: StrokeLog::new(),
            quizzes: BTreeMap::new(),
            polls: BTreeMap::new(),
            room: Room::new(room_id),
            media: MediaSlots::default(),
            ended: false,
            stars_published: 0,
            synced: false,
            resync: None,
            slide_count: None,
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            document: self.document.clone(),
            strokes: self.strokes.strokes().to_vec(),
            quizzes: self.quizzes.clone(),
            polls: self.polls.clone(),
        }
    }

    pub(crate) fn can_draw(&self, who: &Participant) -> bool {
        who.is_teacher() || self.document.student_can_draw
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    pub(crate) fn presence_join(&mut self, participant: Participant) -> Option<SyncEvent> {
        if self.room.join(participant.clone()) {
            Some(SyncEvent::ParticipantJoined(participant))
        } else {
            None
        }
    }

    pub(crate) fn presence_leave(&mut self, participant: Participant) -> Option<SyncEvent> {
        if self.room.leave(&participant.id) {
            self.media.remove_participant(&participant.id);
            Some(SyncEvent::ParticipantLeft(participant))
        } else {
            None
        }
    }

    // -----------------------------------------------------------------------
    // Resync
    // -----------------------------------------------------------------------

    /// Start a fresh snapshot request and return the message to publish.
    pub(crate) fn begin_resync(&mut self, config: &SyncConfig) -> ClassroomMessage {
        let request_id = classroom_common::new_id();
        self.synced = false;
        self.resync = Some(PendingResync {
            request_id: request_id.clone(),
            attempts: 1,
            deadline: Instant::now() + config.resync_timeout,
            buffer: None,
        });
        ClassroomMessage::SyncRequest { request_id }
    }

    /// Called when the pending request timed out. Returns the request to
    /// re-send, or `None` once attempts are exhausted and local state is kept.
    pub(crate) fn retry_resync(&mut self, config: &SyncConfig) -> Option<ClassroomMessage> {
        let pending = self.resync.as_mut()?;
        if pending.attempts < config.resync_attempts {
            pending.attempts += 1;
            pending.deadline = Instant::now() + config.resync_timeout;
            return Some(ClassroomMessage::SyncRequest {
                request_id: pending.request_id.clone(),
            });
        }
        info!(
            room = %self.room.id(),
            attempts = pending.attempts,
            "No snapshot received, keeping local state"
        );
        self.resync = None;
        self.synced = true;
        None
    }

    pub(crate) fn cancel_resync(&mut self) {
        self.resync = None;
        self.synced = false;
    }

    fn install_snapshot(&mut self, snapshot: SessionSnapshot, me: &Participant, config: &SyncConfig) {
        let buffered = self
            .resync
            .take()
            .and_then(|pending| pending.buffer)
            .unwrap_or_default();

        let star_count = self.document.star_count.max(snapshot.document.star_count);
        self.document = snapshot.document;
        self.document.star_count = star_count;
        self.stars_published = self.stars_published.max(star_count);
        self.strokes.replace_all(snapshot.strokes);
        self.quizzes = snapshot.quizzes;
        self.polls = snapshot.polls;
        self.synced = true;

        // Replayed silently: the Resynced event tells the UI to re-read it all.
        let replayed = buffered.len();
        for envelope in &buffered {
            self.apply_message(envelope, me, config);
        }
        info!(
            room = %self.room.id(),
            strokes = self.strokes.len(),
            replayed,
            "Installed session snapshot"
        );
    }

    // -----------------------------------------------------------------------
    // Apply
    // -----------------------------------------------------------------------

    pub(crate) fn apply(&mut self, envelope: &Envelope, me: &Participant, config: &SyncConfig) -> Applied {
        if self.ended {
            debug!(kind = envelope.message.kind(), "Session ended, ignoring message");
            return Applied::default();
        }

        if config.enforce_roles {
            if let Err(e) = capability::authorize(&envelope.sender, &envelope.message) {
                warn!(
                    room = %self.room.id(),
                    sender = %envelope.sender.id,
                    error = %e,
                    "Dropping unauthorized message"
                );
                return Applied::default();
            }
        }

        match &envelope.message {
            ClassroomMessage::SyncRequest { request_id } => {
                self.handle_sync_request(envelope, request_id, me)
            }
            ClassroomMessage::SyncSnapshot {
                request_id,
                target_id,
                snapshot,
            } => {
                let mine = target_id == &me.id
                    && self
                        .resync
                        .as_ref()
                        .is_some_and(|pending| &pending.request_id == request_id);
                if !mine {
                    return Applied::default();
                }
                self.install_snapshot((**snapshot).clone(), me, config);
                Applied {
                    events: vec![SyncEvent::Resynced],
                    reply: None,
                }
            }
            _ => {
                if let Some(buffer) = self.resync.as_mut().and_then(|p| p.buffer.as_mut()) {
                    buffer.push(envelope.clone());
                }
                Applied {
                    events: self.apply_message(envelope, me, config),
                    reply: None,
                }
            }
        }
    }

    fn handle_sync_request(
        &mut self,
        envelope: &Envelope,
        request_id: &str,
        me: &Participant,
    ) -> Applied {
        if envelope.sender.id == me.id {
            // Our own request is back: everything after it is newer than
            // whatever snapshot answers it.
            if let Some(pending) = self.resync.as_mut() {
                if pending.request_id == request_id && pending.buffer.is_none() {
                    pending.buffer = Some(Vec::new());
                }
            }
            return Applied::default();
        }

        let answer = if me.is_teacher() {
            true
        } else {
            envelope.sender.is_teacher() && self.synced
        };
        if !answer {
            return Applied::default();
        }

        debug!(
            room = %self.room.id(),
            requester = %envelope.sender.id,
            "Answering sync request"
        );
        Applied {
            events: Vec::new(),
            reply: Some(ClassroomMessage::SyncSnapshot {
                request_id: request_id.to_string(),
                target_id: envelope.sender.id.clone(),
                snapshot: Box::new(self.snapshot()),
            }),
        }
    }

    /// State changes for everything except the sync handshake.
    fn apply_message(&mut self, envelope: &Envelope, me: &Participant, config: &SyncConfig) -> Vec<SyncEvent> {
        let message = &envelope.message;

        if let Some(patch) = message.as_patch() {
            return self
                .document
                .apply_patch(&patch)
                .into_iter()
                .map(SyncEvent::Document)
                .collect();
        }

        match message {
            ClassroomMessage::StarAwarded {
                new_total,
                is_milestone,
            } => {
                self.stars_published = self.stars_published.max(*new_total);
                if *new_total <= self.document.star_count {
                    debug!(new_total, current = self.document.star_count, "Stale star award");
                    return Vec::new();
                }
                self.document.star_count = *new_total;
                vec![
                    SyncEvent::Document(DocumentChange::StarCount(*new_total)),
                    SyncEvent::Celebration {
                        new_total: *new_total,
                        is_milestone: *is_milestone || config.is_milestone(*new_total),
                    },
                ]
            }
            ClassroomMessage::StrokeAdd { stroke } => {
                if self.strokes.append(stroke.clone()) {
                    vec![SyncEvent::StrokeAdded(stroke.clone())]
                } else {
                    Vec::new()
                }
            }
            ClassroomMessage::CanvasClear => {
                self.strokes.clear();
                vec![SyncEvent::CanvasCleared]
            }
            ClassroomMessage::QuizEvent {
                slide_index,
                action,
            } => {
                let quiz = self.quizzes.entry(*slide_index).or_default();
                match apply_quiz_action(quiz, action.clone()) {
                    Ok(()) => vec![SyncEvent::QuizChanged {
                        slide_index: *slide_index,
                        phase: quiz.phase,
                    }],
                    Err(e) => {
                        debug!(slide = slide_index, error = %e, "Ignoring quiz action");
                        Vec::new()
                    }
                }
            }
            ClassroomMessage::PollEvent {
                slide_index,
                action,
            } => {
                let poll = self.polls.entry(*slide_index).or_default();
                match apply_poll_action(poll, action.clone()) {
                    Ok(()) => vec![SyncEvent::PollChanged {
                        slide_index: *slide_index,
                        phase: poll.phase,
                        results_visible: poll.results_visible,
                    }],
                    Err(e) => {
                        debug!(slide = slide_index, error = %e, "Ignoring poll action");
                        Vec::new()
                    }
                }
            }
            ClassroomMessage::SessionEnd => {
                self.ended = true;
                self.resync = None;
                info!(room = %self.room.id(), ended_by = %envelope.sender.id, "Session ended");
                vec![SyncEvent::SessionEnded {
                    ended_by: envelope.sender.clone(),
                }]
            }
            ClassroomMessage::Unknown => {
                debug!(sender = %envelope.sender.id, "Ignoring unknown message type");
                Vec::new()
            }
            ClassroomMessage::SyncRequest { .. } | ClassroomMessage::SyncSnapshot { .. } => {
                Vec::new()
            }
            _ => {
                debug!(kind = message.kind(), me = %me.id, "Message has no state effect");
                Vec::new()
            }
        }
    }
}

fn apply_quiz_action(quiz: &mut QuizInteraction, action: QuizAction) -> Result<(), QuizError> {
    match action {
        QuizAction::Start { options } => quiz.start(options),
        QuizAction::Lock => quiz.lock(),
        QuizAction::Reveal { correct_option } => quiz.reveal(correct_option),
        QuizAction::Reset => {
            quiz.reset();
            Ok(())
        }
        QuizAction::Submit {
            response_id,
            student_id,
            option_id,
        } => quiz.submit(response_id, student_id, option_id),
    }
}

fn apply_poll_action(poll: &mut PollInteraction, action: PollAction) -> Result<(), PollError> {
    match action {
        PollAction::Start { options } => poll.start(options),
        PollAction::Close => poll.close(),
        PollAction::SetResultsVisible { visible } => {
            poll.set_results_visible(visible);
            Ok(())
        }
        PollAction::Reset => {
            poll.reset();
            Ok(())
        }
        PollAction::Vote {
            vote_id,
            student_id,
            option_id,
        } => poll.vote(vote_id, student_id, option_id),
    }
}
