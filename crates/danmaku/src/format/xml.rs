//! XML danmaku files.
//!
//! ```text
//! <i>
//!   <d p="time,mode,size,color,date,pool,sender,id">text</d>
//! </i>
//! ```
//!
//! `size` is the font size in pixels where 25 is normal, possibly
//! fractional. An optional `blocked="1"` attribute carries the blocked flag.
//! The body of an advanced (mode 7/8) entry is its script; a `text`
//! attribute holds its display text when that differs from the script.
//! Entries with a malformed `p` attribute or unusable text are skipped with
//! a warning.

use quick_xml::Reader;
use quick_xml::events::Event;
use std::fmt::Write as _;
use tracing::warn;

use super::ExportOptions;
use crate::error::Result;
use crate::record::{CommentDraft, DanmuStyle};
use crate::store::PooledComment;

/// Font size in pixels that maps to a size scale of 1.0.
const NORMAL_FONT_PX: f32 = 25.0;

/// Map an XML mode number to a style. `text` becomes the script of
/// advanced comments.
pub fn style_from_mode(mode: u8, text: &str) -> Option<DanmuStyle> {
    match mode {
        1..=3 => Some(DanmuStyle::Slide),
        4 => Some(DanmuStyle::Bottom),
        5 => Some(DanmuStyle::Top),
        6 => Some(DanmuStyle::Reverse),
        7 | 8 => Some(DanmuStyle::Advanced {
            script: text.to_string(),
        }),
        _ => None,
    }
}

/// Map a style to its XML mode number.
pub fn style_to_mode(style: &DanmuStyle) -> u8 {
    match style {
        DanmuStyle::Slide => 1,
        DanmuStyle::Bottom => 4,
        DanmuStyle::Top => 5,
        DanmuStyle::Reverse => 6,
        DanmuStyle::Advanced { .. } => 7,
    }
}

/// Escape special XML characters in a string.
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Fields of the `p` attribute.
#[derive(Debug, Clone, PartialEq)]
struct Properties {
    timestamp: f64,
    mode: u8,
    size: f32,
    color: u32,
    date: Option<i64>,
    sender: String,
}

fn parse_properties(p: &str) -> std::result::Result<Properties, String> {
    let fields: Vec<&str> = p.split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(format!("expected at least 4 fields, got {}", fields.len()));
    }
    let timestamp = fields[0]
        .parse::<f64>()
        .map_err(|e| format!("bad time {:?}: {e}", fields[0]))?;
    let mode = fields[1]
        .parse::<u8>()
        .map_err(|e| format!("bad mode {:?}: {e}", fields[1]))?;
    let size_px = fields[2]
        .parse::<f32>()
        .map_err(|e| format!("bad size {:?}: {e}", fields[2]))?;
    let color = fields[3]
        .parse::<u32>()
        .map_err(|e| format!("bad color {:?}: {e}", fields[3]))?;
    // the date is informational; a zero or garbled value means unknown
    let date = fields
        .get(4)
        .and_then(|d| d.parse::<i64>().ok())
        .filter(|d| *d > 0);
    let sender = fields.get(6).map(|s| s.to_string()).unwrap_or_default();

    Ok(Properties {
        timestamp,
        mode,
        size: size_px / NORMAL_FONT_PX,
        color,
        date,
        sender,
    })
}

fn build_draft(
    props: Properties,
    body: String,
    label: Option<String>,
    blocked: bool,
) -> std::result::Result<CommentDraft, String> {
    let style = style_from_mode(props.mode, &body)
        .ok_or_else(|| format!("unknown mode {}", props.mode))?;
    let text = match (&style, label) {
        (DanmuStyle::Advanced { .. }, Some(label)) => label,
        _ => body,
    };
    let draft = CommentDraft {
        timestamp: props.timestamp,
        text,
        style,
        color: props.color,
        size: props.size,
        sender: props.sender,
        date: props.date,
        blocked,
    };
    draft.validate()?;
    Ok(draft)
}

/// An open `<d>` element collecting its text.
struct OpenEntry {
    props: std::result::Result<Properties, String>,
    blocked: bool,
    label: Option<String>,
    text: String,
}

/// Parse an XML danmaku document.
pub fn parse_xml(input: &str) -> Result<Vec<CommentDraft>> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut drafts = Vec::new();
    let mut open: Option<OpenEntry> = None;
    let mut skipped = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"d" => {
                let props = match e
                    .try_get_attribute("p")
                    .map_err(quick_xml::Error::from)?
                {
                    Some(attr) => parse_properties(&attr.unescape_value()?),
                    None => Err("missing p attribute".to_string()),
                };
                let blocked = match e
                    .try_get_attribute("blocked")
                    .map_err(quick_xml::Error::from)?
                {
                    Some(attr) => matches!(&*attr.unescape_value()?, "1" | "true"),
                    None => false,
                };
                let label = e
                    .try_get_attribute("text")
                    .map_err(quick_xml::Error::from)?
                    .map(|attr| attr.unescape_value().map(|v| v.into_owned()))
                    .transpose()?;
                open = Some(OpenEntry {
                    props,
                    blocked,
                    label,
                    text: String::new(),
                });
            }
            Event::Empty(e) if e.name().as_ref() == b"d" => {
                skipped += 1;
                warn!(position = reader.buffer_position(), "Skipping empty danmaku entry");
            }
            Event::Text(t) => {
                if let Some(entry) = open.as_mut() {
                    entry.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(entry) = open.as_mut() {
                    entry.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) if e.name().as_ref() == b"d" => {
                let Some(entry) = open.take() else {
                    continue;
                };
                match entry
                    .props
                    .and_then(|props| build_draft(props, entry.text, entry.label, entry.blocked))
                {
                    Ok(draft) => drafts.push(draft),
                    Err(reason) => {
                        skipped += 1;
                        warn!(position = reader.buffer_position(), %reason, "Skipping malformed danmaku entry");
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if skipped > 0 {
        warn!(skipped, parsed = drafts.len(), "Some danmaku entries were skipped");
    }
    Ok(drafts)
}

/// Serialize pool entries as an XML danmaku document.
pub fn to_xml(entries: &[PooledComment], options: &ExportOptions) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<i>\n");
    for entry in options.filter(entries) {
        let record = &entry.record;
        let size_px = record.size() * NORMAL_FONT_PX;
        let _ = write!(
            out,
            "  <d p=\"{},{},{},{},{},0,{},{}\"",
            record.timestamp(),
            style_to_mode(record.style()),
            size_px,
            record.color(),
            record.date().unwrap_or(0),
            escape_xml(record.sender()),
            record.id().get(),
        );
        if entry.flags.blocked {
            out.push_str(" blocked=\"1\"");
        }
        let body = match record.style() {
            DanmuStyle::Advanced { script } => {
                if script != record.text() {
                    let _ = write!(out, " text=\"{}\"", escape_xml(record.text()));
                }
                script.as_str()
            }
            _ => record.text(),
        };
        let _ = writeln!(out, ">{}</d>", escape_xml(body));
    }
    out.push_str("</i>\n");
    out
}
