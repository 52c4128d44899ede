//! JSON comment files.
//!
//! Export always writes the object form with an `exported_at` timestamp.
//! Import also accepts a bare array of comments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExportOptions;
use crate::error::Result;
use crate::record::CommentDraft;
use crate::store::PooledComment;

/// On-disk JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    pub comments: Vec<CommentDraft>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonInput {
    File(CommentFile),
    Bare(Vec<CommentDraft>),
}

/// Parse a JSON comment file.
pub fn parse_json(input: &str) -> Result<Vec<CommentDraft>> {
    let drafts = match serde_json::from_str(input)? {
        JsonInput::File(file) => file.comments,
        JsonInput::Bare(comments) => comments,
    };
    Ok(drafts)
}

/// Serialize pool entries as a JSON comment file.
pub fn to_json(entries: &[PooledComment], options: &ExportOptions) -> Result<String> {
    let file = CommentFile {
        exported_at: Some(Utc::now()),
        comments: options
            .filter(entries)
            .map(|entry| entry.record.to_draft(entry.flags.blocked))
            .collect(),
    };
    let output = if options.pretty {
        serde_json::to_string_pretty(&file)?
    } else {
        serde_json::to_string(&file)?
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DanmakuError;
    use crate::record::DanmuStyle;
    use crate::store::DanmuStore;

    #[test]
    fn test_parse_object_form() {
        let input = r#"{
            "exported_at": "2024-01-01T12:00:00Z",
            "comments": [
                {"timestamp": 1.5, "text": "hi", "style": {"type": "top"}, "sender": "u1"},
                {"timestamp": 2.0, "text": "gone", "blocked": true}
            ]
        }"#;
        let drafts = parse_json(input).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].style, DanmuStyle::Top);
        assert_eq!(drafts[0].color, 0xFF_FF_FF);
        assert_eq!(drafts[0].size, 1.0);
        assert!(!drafts[0].blocked);
        assert!(drafts[1].blocked);
    }

    #[test]
    fn test_parse_bare_array() {
        let input = r#"[{"timestamp": 0.5, "text": "x", "style": {"type": "advanced", "script": "[1,2]"}}]"#;
        let drafts = parse_json(input).unwrap();
        assert_eq!(
            drafts[0].style,
            DanmuStyle::Advanced {
                script: "[1,2]".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_json("{\"comments\": 3}"),
            Err(DanmakuError::Json(_))
        ));
    }

    #[test]
    fn test_export_carries_blocked_flag() {
        let store = DanmuStore::new();
        let id = store.insert(CommentDraft::new(1.0, "x")).unwrap();
        store.insert(CommentDraft::new(2.0, "y")).unwrap();
        store.mark_blocked(id, true).unwrap();

        let output = to_json(&store.all(), &ExportOptions::default()).unwrap();
        let file: CommentFile = serde_json::from_str(&output).unwrap();
        assert!(file.exported_at.is_some());
        assert_eq!(file.comments.len(), 2);
        assert!(file.comments[0].blocked);
        assert!(!file.comments[1].blocked);

        let drafts = parse_json(&output).unwrap();
        assert_eq!(drafts, file.comments);
    }
}
