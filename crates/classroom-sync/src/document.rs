//! The Shared Session Document: the canonical per-room lesson state.
//!
//! Every participant holds a copy and applies the same ordered stream of
//! [`DocumentPatch`]es. Patches are merged per field (last writer wins per
//! field, not per document), so two participants changing different fields
//! concurrently never clobber each other.

use serde::{Deserialize, Deserializer, Serialize};

/// Whiteboard tool selected by the teacher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    #[default]
    Pointer,
    Pen,
    Highlighter,
    Eraser,
    Laser,
}

/// Which surface the lesson canvas shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasTab {
    #[default]
    Slides,
    Whiteboard,
    Web,
}

/// Student profile snapshot supplied once from an external lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionContext {
    pub level: Option<String>,
    pub cefr_level: Option<String>,
    pub interests: Vec<String>,
    pub mistake_history: Vec<String>,
}

/// Partial update of a [`SessionContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionContextPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cefr_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interests: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mistake_history: Option<Vec<String>>,
}

impl SessionContext {
    /// Merge a patch. Returns `true` if anything changed.
    pub fn merge(&mut self, patch: &SessionContextPatch) -> bool {
        let before = self.clone();
        if let Some(level) = &patch.level {
            self.level = Some(level.clone());
        }
        if let Some(cefr) = &patch.cefr_level {
            self.cefr_level = Some(cefr.clone());
        }
        if let Some(interests) = &patch.interests {
            self.interests = interests.clone();
        }
        if let Some(history) = &patch.mistake_history {
            self.mistake_history = history.clone();
        }
        *self != before
    }
}

/// The canonical mutable lesson state for one room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedSessionDocument {
    pub current_slide_index: usize,
    pub active_tool: Tool,
    pub active_canvas_tab: CanvasTab,
    pub student_can_draw: bool,
    pub embedded_url: Option<String>,
    pub shared_notes: String,
    pub session_context: SessionContext,
    /// Never decreases within a session.
    pub star_count: u32,
    pub is_screen_sharing: bool,
}

/// Any subset of document fields. `None` means "leave untouched".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_slide_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_tool: Option<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_canvas_tab: Option<CanvasTab>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_can_draw: Option<bool>,
    /// `Some(None)` clears the embed; absent leaves it alone.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub embedded_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_context: Option<SessionContextPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub star_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_screen_sharing: Option<bool>,
}

/// Maps a present JSON `null` to `Some(None)` instead of `None`.
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl DocumentPatch {
    /// True when the patch writes a field only the teacher owns.
    pub fn touches_teacher_fields(&self) -> bool {
        self.current_slide_index.is_some()
            || self.student_can_draw.is_some()
            || self.session_context.is_some()
            || self.star_count.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single observable change to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentChange {
    Slide(usize),
    Tool(Tool),
    CanvasTab(CanvasTab),
    StudentCanDraw(bool),
    EmbeddedUrl(Option<String>),
    SharedNotes(String),
    SessionContext(SessionContext),
    StarCount(u32),
    ScreenSharing(bool),
}

impl SharedSessionDocument {
    /// Merge `patch` field by field and report what actually changed.
    ///
    /// A star count lower than the current one is ignored.
    pub fn apply_patch(&mut self, patch: &DocumentPatch) -> Vec<DocumentChange> {
        let mut changes = Vec::new();

        if let Some(index) = patch.current_slide_index {
            if index != self.current_slide_index {
                self.current_slide_index = index;
                changes.push(DocumentChange::Slide(index));
            }
        }
        if let Some(tool) = patch.active_tool {
            if tool != self.active_tool {
                self.active_tool = tool;
                changes.push(DocumentChange::Tool(tool));
            }
        }
        if let Some(tab) = patch.active_canvas_tab {
            if tab != self.active_canvas_tab {
                self.active_canvas_tab = tab;
                changes.push(DocumentChange::CanvasTab(tab));
            }
        }
        if let Some(can_draw) = patch.student_can_draw {
            if can_draw != self.student_can_draw {
                self.student_can_draw = can_draw;
                changes.push(DocumentChange::StudentCanDraw(can_draw));
            }
        }
        if let Some(url) = &patch.embedded_url {
            if *url != self.embedded_url {
                self.embedded_url = url.clone();
                changes.push(DocumentChange::EmbeddedUrl(url.clone()));
            }
        }
        if let Some(notes) = &patch.shared_notes {
            if *notes != self.shared_notes {
                self.shared_notes = notes.clone();
                changes.push(DocumentChange::SharedNotes(notes.clone()));
            }
        }
        if let Some(ctx) = &patch.session_context {
            if self.session_context.merge(ctx) {
                changes.push(DocumentChange::SessionContext(self.session_context.clone()));
            }
        }
        if let Some(stars) = patch.star_count {
            if stars > self.star_count {
                self.star_count = stars;
                changes.push(DocumentChange::StarCount(stars));
            }
        }
        if let Some(sharing) = patch.is_screen_sharing {
            if sharing != self.is_screen_sharing {
                self.is_screen_sharing = sharing;
                changes.push(DocumentChange::ScreenSharing(sharing));
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_merges_only_present_fields() {
        let mut doc = SharedSessionDocument {
            shared_notes: "keep me".into(),
            ..Default::default()
        };
        let changes = doc.apply_patch(&DocumentPatch {
            current_slide_index: Some(3),
            active_tool: Some(Tool::Pen),
            ..Default::default()
        });
        assert_eq!(
            changes,
            vec![DocumentChange::Slide(3), DocumentChange::Tool(Tool::Pen)]
        );
        assert_eq!(doc.shared_notes, "keep me");
        assert_eq!(doc.active_canvas_tab, CanvasTab::Slides);
    }

    #[test]
    fn concurrent_patches_to_different_fields_both_survive() {
        let teacher_patch = DocumentPatch {
            is_screen_sharing: Some(true),
            ..Default::default()
        };
        let student_patch = DocumentPatch {
            shared_notes: Some("vocab: apple".into()),
            ..Default::default()
        };

        let mut a = SharedSessionDocument::default();
        a.apply_patch(&teacher_patch);
        a.apply_patch(&student_patch);

        let mut b = SharedSessionDocument::default();
        b.apply_patch(&student_patch);
        b.apply_patch(&teacher_patch);

        assert_eq!(a, b);
        assert!(a.is_screen_sharing);
        assert_eq!(a.shared_notes, "vocab: apple");
    }

    #[test]
    fn reapplying_a_patch_reports_no_change() {
        let mut doc = SharedSessionDocument::default();
        let patch = DocumentPatch {
            current_slide_index: Some(1),
            ..Default::default()
        };
        assert_eq!(doc.apply_patch(&patch).len(), 1);
        assert!(doc.apply_patch(&patch).is_empty());
    }

    #[test]
    fn star_count_never_decreases() {
        let mut doc = SharedSessionDocument {
            star_count: 4,
            ..Default::default()
        };
        let changes = doc.apply_patch(&DocumentPatch {
            star_count: Some(2),
            ..Default::default()
        });
        assert!(changes.is_empty());
        assert_eq!(doc.star_count, 4);
    }

    #[test]
    fn embedded_url_null_clears_but_absent_keeps() {
        let mut doc = SharedSessionDocument {
            embedded_url: Some("https://example.com/video".into()),
            ..Default::default()
        };

        let absent: DocumentPatch = serde_json::from_str(r#"{"shared_notes":"x"}"#).unwrap();
        assert_eq!(absent.embedded_url, None);
        doc.apply_patch(&absent);
        assert!(doc.embedded_url.is_some());

        let cleared: DocumentPatch = serde_json::from_str(r#"{"embedded_url":null}"#).unwrap();
        assert_eq!(cleared.embedded_url, Some(None));
        let changes = doc.apply_patch(&cleared);
        assert_eq!(changes, vec![DocumentChange::EmbeddedUrl(None)]);
        assert!(doc.embedded_url.is_none());
    }

    #[test]
    fn empty_patch_serializes_to_empty_object() {
        let patch = DocumentPatch::default();
        assert!(patch.is_empty());
        assert_eq!(serde_json::to_string(&patch).unwrap(), "{}");
    }

    #[test]
    fn teacher_owned_fields_are_detected() {
        let notes_only = DocumentPatch {
            shared_notes: Some("hi".into()),
            is_screen_sharing: Some(true),
            active_tool: Some(Tool::Eraser),
            active_canvas_tab: Some(CanvasTab::Slides),
            ..Default::default()
        };
        assert!(!notes_only.touches_teacher_fields());

        let slide = DocumentPatch {
            current_slide_index: Some(0),
            ..Default::default()
        };
        assert!(slide.touches_teacher_fields());
    }

    #[test]
    fn context_merge_keeps_unpatched_fields() {
        let mut ctx = SessionContext {
            level: Some("beginner".into()),
            interests: vec!["football".into()],
            ..Default::default()
        };
        let changed = ctx.merge(&SessionContextPatch {
            cefr_level: Some("A2".into()),
            ..Default::default()
        });
        assert!(changed);
        assert_eq!(ctx.level.as_deref(), Some("beginner"));
        assert_eq!(ctx.cefr_level.as_deref(), Some("A2"));
        assert_eq!(ctx.interests, vec!["football".to_string()]);
        assert!(!ctx.merge(&SessionContextPatch::default()));
    }
}
