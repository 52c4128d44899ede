//! Comment file import and export.
//!
//! Two formats are supported: a JSON document holding [`CommentDraft`]s and
//! the common `<d p="...">` XML danmaku format.

pub mod json;
pub mod xml;

use std::path::Path;
use tracing::debug;

use crate::error::{DanmakuError, Result};
use crate::record::CommentDraft;
use crate::store::PooledComment;

pub use json::{CommentFile, parse_json, to_json};
pub use xml::{escape_xml, parse_xml, style_from_mode, style_to_mode, to_xml};

/// Comment file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Xml,
}

impl Format {
    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "xml" => Some(Self::Xml),
            _ => None,
        }
    }

    /// Parse a document in this format.
    pub fn parse(self, input: &str) -> Result<Vec<CommentDraft>> {
        match self {
            Self::Json => parse_json(input),
            Self::Xml => parse_xml(input),
        }
    }

    /// Serialize pool entries in this format.
    pub fn export(self, entries: &[PooledComment], options: &ExportOptions) -> Result<String> {
        match self {
            Self::Json => to_json(entries, options),
            Self::Xml => Ok(to_xml(entries, options)),
        }
    }
}

impl std::str::FromStr for Format {
    type Err = DanmakuError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            other => Err(DanmakuError::other(format!("unknown format: {other}"))),
        }
    }
}

/// Export options.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Leave blocked comments out of the output
    pub exclude_blocked: bool,
    /// Pretty-print JSON output
    pub pretty: bool,
}

impl ExportOptions {
    /// Entries to write: pending posts are never exported, blocked ones
    /// only when not excluded.
    pub(crate) fn filter<'a>(
        &'a self,
        entries: &'a [PooledComment],
    ) -> impl Iterator<Item = &'a PooledComment> + 'a {
        entries
            .iter()
            .filter(move |entry| !entry.flags.pending && !(self.exclude_blocked && entry.flags.blocked))
    }
}

/// Read a comment file, picking the format from its extension.
pub async fn read_file(path: &Path) -> Result<Vec<CommentDraft>> {
    let format = Format::from_path(path).ok_or_else(|| {
        DanmakuError::other(format!("cannot tell the format of {}", path.display()))
    })?;
    let input = tokio::fs::read_to_string(path).await?;
    let drafts = format.parse(&input)?;
    debug!(path = %path.display(), count = drafts.len(), "Read comment file");
    Ok(drafts)
}

/// Write pool entries to a file, picking the format from its extension.
pub async fn write_file(
    path: &Path,
    entries: &[PooledComment],
    options: &ExportOptions,
) -> Result<()> {
    let format = Format::from_path(path).ok_or_else(|| {
        DanmakuError::other(format!("cannot tell the format of {}", path.display()))
    })?;
    let output = format.export(entries, options)?;
    tokio::fs::write(path, output).await?;
    debug!(path = %path.display(), "Wrote comment file");
    Ok(())
}
