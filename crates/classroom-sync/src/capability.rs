//! Which role may publish which message.
//!
//! Checked by the sending synchronizer, by every receiver at apply time, by
//! the in-process hub when built with authorization, and by the relay
//! before fan-out.

use thiserror::Error;

use crate::participant::Participant;
use crate::protocol::{ClassroomMessage, PollAction, QuizAction};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("only the teacher may send {0}")]
    TeacherOnly(&'static str),

    #[error("{0} submitted on behalf of another student")]
    ImpersonatedStudent(&'static str),
}

/// Decide whether `sender` may publish `message`.
pub fn authorize(sender: &Participant, message: &ClassroomMessage) -> Result<(), CapabilityError> {
    let teacher_only = match message {
        ClassroomMessage::SlideUpdate { .. }
        | ClassroomMessage::PermissionUpdate { .. }
        | ClassroomMessage::ContextUpdate { .. }
        | ClassroomMessage::StarAwarded { .. }
        | ClassroomMessage::SessionEnd => true,
        ClassroomMessage::DisplayUpdate { patch } => patch.touches_teacher_fields(),
        ClassroomMessage::QuizEvent { action, .. } => {
            if let QuizAction::Submit { student_id, .. } = action {
                if *student_id != sender.id {
                    return Err(CapabilityError::ImpersonatedStudent("quiz_event"));
                }
            }
            action.is_control()
        }
        ClassroomMessage::PollEvent { action, .. } => {
            if let PollAction::Vote { student_id, .. } = action {
                if *student_id != sender.id {
                    return Err(CapabilityError::ImpersonatedStudent("poll_event"));
                }
            }
            action.is_control()
        }
        ClassroomMessage::NotesUpdate { .. }
        | ClassroomMessage::ToolUpdate { .. }
        | ClassroomMessage::CanvasTabUpdate { .. }
        | ClassroomMessage::StrokeAdd { .. }
        | ClassroomMessage::CanvasClear
        | ClassroomMessage::SyncRequest { .. }
        | ClassroomMessage::SyncSnapshot { .. }
        | ClassroomMessage::Unknown => false,
    };

    if teacher_only && !sender.is_teacher() {
        return Err(CapabilityError::TeacherOnly(message.kind()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{CanvasTab, DocumentPatch, Tool};

    fn teacher() -> Participant {
        Participant::teacher("t1", "Teacher")
    }

    fn student() -> Participant {
        Participant::student("s1", "Student")
    }

    #[test]
    fn student_cannot_change_slide_or_end_session() {
        let slide = ClassroomMessage::SlideUpdate {
            current_slide_index: 1,
        };
        assert_eq!(
            authorize(&student(), &slide),
            Err(CapabilityError::TeacherOnly("slide_update"))
        );
        assert!(authorize(&student(), &ClassroomMessage::SessionEnd).is_err());
        assert!(authorize(&teacher(), &slide).is_ok());
    }

    #[test]
    fn anyone_may_write_notes_and_strokes() {
        let notes = ClassroomMessage::NotesUpdate { text: "hi".into() };
        assert!(authorize(&student(), &notes).is_ok());
        assert!(authorize(&student(), &ClassroomMessage::CanvasClear).is_ok());
        assert!(authorize(&student(), &ClassroomMessage::Unknown).is_ok());
    }

    #[test]
    fn anyone_may_switch_tool_or_canvas_tab() {
        let tool = ClassroomMessage::ToolUpdate {
            tool: Tool::Highlighter,
        };
        let tab = ClassroomMessage::CanvasTabUpdate {
            tab: CanvasTab::Whiteboard,
        };
        assert!(authorize(&student(), &tool).is_ok());
        assert!(authorize(&student(), &tab).is_ok());
    }

    #[test]
    fn display_patch_depends_on_fields() {
        let flag = ClassroomMessage::DisplayUpdate {
            patch: DocumentPatch {
                is_screen_sharing: Some(true),
                ..Default::default()
            },
        };
        assert!(authorize(&student(), &flag).is_ok());

        let stars = ClassroomMessage::DisplayUpdate {
            patch: DocumentPatch {
                star_count: Some(10),
                ..Default::default()
            },
        };
        assert!(authorize(&student(), &stars).is_err());

        let slide = ClassroomMessage::DisplayUpdate {
            patch: DocumentPatch {
                current_slide_index: Some(2),
                active_tool: Some(Tool::Pen),
                ..Default::default()
            },
        };
        assert!(authorize(&student(), &slide).is_err());
        assert!(authorize(&teacher(), &slide).is_ok());

        let tool = ClassroomMessage::DisplayUpdate {
            patch: DocumentPatch {
                active_tool: Some(Tool::Pen),
                active_canvas_tab: Some(CanvasTab::Whiteboard),
                ..Default::default()
            },
        };
        assert!(authorize(&student(), &tool).is_ok());
    }

    #[test]
    fn quiz_control_is_teacher_only_but_submit_is_open() {
        let lock = ClassroomMessage::QuizEvent {
            slide_index: 0,
            action: QuizAction::Lock,
        };
        assert!(authorize(&student(), &lock).is_err());

        let submit = ClassroomMessage::QuizEvent {
            slide_index: 0,
            action: QuizAction::Submit {
                response_id: "r".into(),
                student_id: "s1".into(),
                option_id: "a".into(),
            },
        };
        assert!(authorize(&student(), &submit).is_ok());
    }

    #[test]
    fn votes_for_someone_else_are_rejected() {
        let vote = ClassroomMessage::PollEvent {
            slide_index: 0,
            action: PollAction::Vote {
                vote_id: "v".into(),
                student_id: "s2".into(),
                option_id: "yes".into(),
            },
        };
        assert_eq!(
            authorize(&student(), &vote),
            Err(CapabilityError::ImpersonatedStudent("poll_event"))
        );
    }
}
