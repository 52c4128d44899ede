//! Per-frame layout handed to the renderer.

use serde::Serialize;
use std::sync::Arc;

use crate::record::{CommentId, CommentRecord, StyleClass};

/// Where and how a comment is drawn in this frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Placement {
    /// Moving horizontally; `x` is the left edge
    Scroll {
        x: f64,
        y: f64,
        width: f64,
        speed: f64,
    },
    /// Held centered in a row
    Fixed {
        x: f64,
        y: f64,
        width: f64,
        remaining: f64,
    },
    /// Positioned by the comment's own script
    Scripted { elapsed: f64, remaining: f64 },
}

/// A comment visible in a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutItem {
    pub id: CommentId,
    pub class: StyleClass,
    pub lane: Option<usize>,
    pub placement: Placement,
    pub record: Arc<CommentRecord>,
}

/// Everything visible at one media time, ordered by entry time then id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Media time the layout was computed for
    pub time: Option<f64>,
    pub items: Vec<LayoutItem>,
}

impl Snapshot {
    /// A snapshot with nothing on screen.
    pub fn empty(time: Option<f64>) -> Self {
        Self {
            time,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids in display order.
    pub fn ids(&self) -> Vec<CommentId> {
        self.items.iter().map(|item| item.id).collect()
    }

    /// Number of visible comments of a class.
    pub fn count(&self, class: StyleClass) -> usize {
        self.items.iter().filter(|item| item.class == class).count()
    }
}
