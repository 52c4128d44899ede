//! Comment records and their display styles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on the UTF-8 length of a comment's text.
pub const MAX_TEXT_LEN: usize = 4096;

/// Default comment color (white).
pub const DEFAULT_COLOR: u32 = 0xFF_FF_FF;

/// Stable identifier assigned by the store on insert.
///
/// Ids grow monotonically, so they double as the insertion-order tie-break
/// between records sharing a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub(crate) u64);

impl CommentId {
    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Placement class of a comment. Each class owns an independent lane set
/// and density counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleClass {
    /// Scrolls right to left
    Slide,
    /// Scrolls left to right
    Reverse,
    /// Held centered in a row from the top
    Top,
    /// Held centered in a row from the bottom
    Bottom,
    /// Positioned by an embedded script; never occupies a lane
    Advanced,
}

impl StyleClass {
    /// All classes, in index order.
    pub const ALL: [StyleClass; 5] = [
        StyleClass::Slide,
        StyleClass::Reverse,
        StyleClass::Top,
        StyleClass::Bottom,
        StyleClass::Advanced,
    ];

    /// Dense index for per-class tables.
    pub fn index(self) -> usize {
        match self {
            StyleClass::Slide => 0,
            StyleClass::Reverse => 1,
            StyleClass::Top => 2,
            StyleClass::Bottom => 3,
            StyleClass::Advanced => 4,
        }
    }

    /// Whether comments of this class move horizontally.
    pub fn is_scrolling(self) -> bool {
        matches!(self, StyleClass::Slide | StyleClass::Reverse)
    }

    /// Whether comments of this class are held in place for the life time.
    pub fn is_fixed(self) -> bool {
        matches!(self, StyleClass::Top | StyleClass::Bottom)
    }
}

impl fmt::Display for StyleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StyleClass::Slide => "slide",
            StyleClass::Reverse => "reverse",
            StyleClass::Top => "top",
            StyleClass::Bottom => "bottom",
            StyleClass::Advanced => "advanced",
        };
        f.write_str(name)
    }
}

/// Display style of a comment. Only the advanced variant carries extra data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DanmuStyle {
    #[default]
    Slide,
    Reverse,
    Top,
    Bottom,
    /// Scripted comment, passed through to the renderer untouched
    Advanced { script: String },
}

impl DanmuStyle {
    /// The placement class this style belongs to.
    pub fn class(&self) -> StyleClass {
        match self {
            DanmuStyle::Slide => StyleClass::Slide,
            DanmuStyle::Reverse => StyleClass::Reverse,
            DanmuStyle::Top => StyleClass::Top,
            DanmuStyle::Bottom => StyleClass::Bottom,
            DanmuStyle::Advanced { .. } => StyleClass::Advanced,
        }
    }
}

/// A comment as produced by a loader, a remote source or the editor,
/// before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentDraft {
    /// Seconds from media start
    pub timestamp: f64,
    /// Display text
    pub text: String,
    #[serde(default)]
    pub style: DanmuStyle,
    /// 0xRRGGBB
    #[serde(default = "default_color")]
    pub color: u32,
    /// Size scale relative to the configured font size
    #[serde(default = "default_size")]
    pub size: f32,
    /// Sender id; empty for guests
    #[serde(default)]
    pub sender: String,
    /// Unix time the comment was originally posted, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    /// Imported blocked state
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub blocked: bool,
}

fn default_color() -> u32 {
    DEFAULT_COLOR
}

fn default_size() -> f32 {
    1.0
}

impl CommentDraft {
    /// Create a white, normal-size slide comment.
    pub fn new(timestamp: f64, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
            style: DanmuStyle::Slide,
            color: DEFAULT_COLOR,
            size: 1.0,
            sender: String::new(),
            date: None,
            blocked: false,
        }
    }

    /// Set the display style.
    pub fn with_style(mut self, style: DanmuStyle) -> Self {
        self.style = style;
        self
    }

    /// Set the color.
    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    /// Set the size scale.
    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    /// Set the sender id.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Check the draft can become a record. Returns the rejection reason.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.timestamp.is_nan() || self.timestamp.is_infinite() {
            return Err(format!("timestamp {} is not finite", self.timestamp));
        }
        if self.text.trim().is_empty() {
            return Err("text is missing".to_string());
        }
        if self.text.len() > MAX_TEXT_LEN {
            return Err(format!(
                "text is {} bytes, limit is {}",
                self.text.len(),
                MAX_TEXT_LEN
            ));
        }
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(format!("size {} is not positive", self.size));
        }
        Ok(())
    }
}

/// An immutable comment owned by the store.
///
/// Neither `id` nor `timestamp` can change after creation; per-record mutable
/// state lives in [`RecordFlags`] next to the record inside the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentRecord {
    id: CommentId,
    timestamp: f64,
    text: String,
    style: DanmuStyle,
    color: u32,
    size: f32,
    sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<i64>,
}

impl CommentRecord {
    pub(crate) fn from_draft(id: CommentId, draft: CommentDraft) -> Self {
        Self {
            id,
            timestamp: draft.timestamp,
            text: draft.text,
            style: draft.style,
            color: draft.color,
            size: draft.size,
            sender: draft.sender,
            date: draft.date,
        }
    }

    pub fn id(&self) -> CommentId {
        self.id
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn style(&self) -> &DanmuStyle {
        &self.style
    }

    pub fn class(&self) -> StyleClass {
        self.style.class()
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn date(&self) -> Option<i64> {
        self.date
    }

    /// Whether the sender is anonymous.
    pub fn is_guest(&self) -> bool {
        self.sender.is_empty()
    }

    /// Convert back to a draft, e.g. for export.
    pub fn to_draft(&self, blocked: bool) -> CommentDraft {
        CommentDraft {
            timestamp: self.timestamp,
            text: self.text.clone(),
            style: self.style.clone(),
            color: self.color,
            size: self.size,
            sender: self.sender.clone(),
            date: self.date,
            blocked,
        }
    }
}

/// Mutable per-record state kept by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFlags {
    /// Blocked by the user; retained in the pool but never displayed
    pub blocked: bool,
    /// Posted locally, waiting for the remote side to acknowledge it
    pub pending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_malformed() {
        assert!(CommentDraft::new(1.0, "ok").validate().is_ok());
        assert!(CommentDraft::new(-3.0, "negative is fine").validate().is_ok());
        assert!(CommentDraft::new(1.0, "   ").validate().is_err());
        assert!(CommentDraft::new(f64::NEG_INFINITY, "x").validate().is_err());
        assert!(CommentDraft::new(f64::NAN, "x").validate().is_err());
        assert!(CommentDraft::new(1.0, "x").with_size(0.0).validate().is_err());

        let long = "a".repeat(MAX_TEXT_LEN + 1);
        assert!(CommentDraft::new(1.0, long).validate().is_err());
    }

    #[test]
    fn test_style_class() {
        assert_eq!(DanmuStyle::Top.class(), StyleClass::Top);
        assert_eq!(
            DanmuStyle::Advanced {
                script: "[0,0]".into()
            }
            .class(),
            StyleClass::Advanced
        );
        assert!(StyleClass::Reverse.is_scrolling());
        assert!(StyleClass::Bottom.is_fixed());
        assert!(!StyleClass::Advanced.is_fixed());

        for (i, class) in StyleClass::ALL.iter().enumerate() {
            assert_eq!(class.index(), i);
        }
    }

    #[test]
    fn test_draft_serde_defaults() {
        let draft: CommentDraft =
            serde_json::from_str(r#"{"timestamp": 2.5, "text": "hi"}"#).unwrap();
        assert_eq!(draft.style, DanmuStyle::Slide);
        assert_eq!(draft.color, DEFAULT_COLOR);
        assert_eq!(draft.size, 1.0);
        assert!(!draft.blocked);

        let top: CommentDraft =
            serde_json::from_str(r#"{"timestamp": 0, "text": "t", "style": {"type": "top"}}"#)
                .unwrap();
        assert_eq!(top.style, DanmuStyle::Top);
    }

    #[test]
    fn test_record_round_trip_to_draft() {
        let draft = CommentDraft::new(4.0, "hello")
            .with_style(DanmuStyle::Bottom)
            .with_color(0xFF0000)
            .with_sender("u1");
        let record = CommentRecord::from_draft(CommentId(7), draft.clone());

        assert_eq!(record.id().get(), 7);
        assert!(!record.is_guest());
        assert_eq!(record.to_draft(false), draft);
        assert!(record.to_draft(true).blocked);
    }
}
