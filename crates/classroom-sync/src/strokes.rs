//! Whiteboard stroke log.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::document::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One completed pen gesture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: String,
    pub author_id: String,
    pub tool: Tool,
    pub color: String,
    pub points: Vec<Point>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// A stroke as drawn locally, before the synchronizer assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStroke {
    pub tool: Tool,
    pub color: String,
    pub points: Vec<Point>,
}

/// Append-only log of strokes in receipt order.
///
/// Ids are remembered across [`StrokeLog::clear`] so a replayed stroke from
/// before the clear is never resurrected.
#[derive(Debug, Clone, Default)]
pub struct StrokeLog {
    strokes: Vec<Stroke>,
    seen: HashSet<String>,
}

impl StrokeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stroke. Returns `false` if its id was already seen.
    pub fn append(&mut self, stroke: Stroke) -> bool {
        if !self.seen.insert(stroke.id.clone()) {
            return false;
        }
        self.strokes.push(stroke);
        true
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
    }

    /// Replace the log with a snapshot's strokes. The snapshot becomes the
    /// only history, so ids outside it may be appended again.
    pub fn replace_all(&mut self, strokes: Vec<Stroke>) {
        self.strokes.clear();
        self.seen.clear();
        for stroke in strokes {
            self.seen.insert(stroke.id.clone());
            self.strokes.push(stroke);
        }
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }
}
