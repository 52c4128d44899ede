//! Danmaku: scheduling and collision avoidance for time-synced video comments.
//!
//! This crate decides which comments (danmu/弾幕) are on screen at a given
//! playback position, which lane each one occupies and where it is drawn,
//! and keeps that layout consistent across seeks, rate changes and pool
//! mutations.
//!
//! ## Core Types
//!
//! - [`DanmuStore`] - Thread-safe comment pool with timestamp range queries
//! - [`CommentDraft`] / [`CommentRecord`] - A comment before and after insertion
//! - [`DanmuEngine`] - Playback-side engine: clock handling, policies and lanes
//! - [`Snapshot`] - Per-frame layout consumed by the renderer
//!
//! ## Policies
//!
//! - [`Blocklist`] - Keyword, regex, sender, style and guest rules
//! - [`PolicyEngine`] - Blocking, duplicate suppression and density capping
//! - [`Suppression`] - Why a comment is not shown
//!
//! ## Layout
//!
//! - [`TrackAllocator`] - Per-class lane assignment
//! - [`PlaybackClock`] - Tick/seek classification
//! - [`TextMeasure`] - Pluggable text width estimation
//!
//! ## Loading and Output
//!
//! - [`CommentSource`] / [`DanmuLoader`] - Async batch loading into the store
//! - [`format`] - JSON and XML comment files
//! - [`StatisticsAggregator`] - Pool statistics and density over time

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod layout;
pub mod loader;
pub mod measure;
pub mod policy;
pub mod record;
pub mod statistics;
pub mod store;
pub mod track;

pub use clock::{ClockStep, PlaybackClock};
pub use config::{EngineConfig, SaturationPolicy, ScreenSize, SlideSpeed};
pub use engine::DanmuEngine;
pub use error::{BatchFailure, DanmakuError, Result};
pub use format::{ExportOptions, Format};
pub use layout::{LayoutItem, Placement, Snapshot};
pub use loader::{CommentSource, DanmuLoader, FileSource, LoadReport, VecSource};
pub use measure::{EmWidthMeasure, TextMeasure};
pub use policy::{Blocklist, BlocklistConfig, PolicyEngine, RuleSpec, Suppression};
pub use record::{CommentDraft, CommentId, CommentRecord, DanmuStyle, RecordFlags, StyleClass};
pub use statistics::{
    DensityPoint, PoolStatistics, StatisticsAggregator, StyleCount, TopSender, WordFrequency,
};
pub use store::{DanmuStore, PooledComment};
pub use track::{ActiveDanmu, Phase, TrackAllocator};
