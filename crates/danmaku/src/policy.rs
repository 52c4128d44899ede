//! Blocking rules, duplicate suppression and density capping.
//!
//! Rule evaluation is pure. The only mutable state is the duplicate window,
//! which grows only when a comment is actually placed on screen and is
//! dropped whenever the layout is rebuilt.

use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::error::{DanmakuError, Result};
use crate::record::{CommentRecord, RecordFlags, StyleClass};

/// A serializable blocking rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RuleSpec {
    /// Case-insensitive substring
    Keyword(String),
    /// Regular expression matched against the text
    Regex(String),
    /// Exact sender id
    Sender(String),
    /// Every comment of a class
    Style(StyleClass),
    /// Comments without a sender id
    Guests,
}

/// Serializable form of a [`Blocklist`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocklistConfig {
    /// Hide every comment
    pub block_all: bool,
    pub rules: Vec<RuleSpec>,
}

/// Why a comment is not on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Suppression {
    /// The record itself is flagged as blocked
    Blocked,
    /// Everything is hidden
    All,
    Sender(String),
    Style(StyleClass),
    Guest,
    Keyword(String),
    Pattern(String),
    Duplicate { limit: usize },
    Density { class: StyleClass, limit: usize },
    /// No lane could take the comment within the allowed delay
    Saturated,
}

impl Suppression {
    /// Short machine-readable name, matching the serialized `reason` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Suppression::Blocked => "blocked",
            Suppression::All => "all",
            Suppression::Sender(_) => "sender",
            Suppression::Style(_) => "style",
            Suppression::Guest => "guest",
            Suppression::Keyword(_) => "keyword",
            Suppression::Pattern(_) => "pattern",
            Suppression::Duplicate { .. } => "duplicate",
            Suppression::Density { .. } => "density",
            Suppression::Saturated => "saturated",
        }
    }
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suppression::Blocked => write!(f, "comment is blocked"),
            Suppression::All => write!(f, "all comments are hidden"),
            Suppression::Sender(sender) => write!(f, "sender {sender} is blocked"),
            Suppression::Style(class) => write!(f, "{class} comments are blocked"),
            Suppression::Guest => write!(f, "guest comments are blocked"),
            Suppression::Keyword(keyword) => write!(f, "matches blocked keyword {keyword:?}"),
            Suppression::Pattern(pattern) => write!(f, "matches blocked pattern {pattern:?}"),
            Suppression::Duplicate { limit } => {
                write!(f, "same text already shown {limit} times")
            }
            Suppression::Density { class, limit } => {
                write!(f, "{limit} {class} comments already on screen")
            }
            Suppression::Saturated => write!(f, "no free lane"),
        }
    }
}

/// Compiled blocking rules.
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    block_all: bool,
    specs: Vec<RuleSpec>,
    senders: FxHashSet<String>,
    styles: [bool; 5],
    guests: bool,
    keywords: Vec<(String, String)>,
    patterns: Vec<(String, Regex)>,
}

impl Blocklist {
    /// An empty blocklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a configuration. Fails on the first invalid pattern.
    pub fn from_config(config: &BlocklistConfig) -> Result<Self> {
        let mut blocklist = Self::new();
        blocklist.block_all = config.block_all;
        for spec in &config.rules {
            blocklist.add(spec.clone())?;
        }
        Ok(blocklist)
    }

    /// Serializable view of the rules.
    pub fn to_config(&self) -> BlocklistConfig {
        BlocklistConfig {
            block_all: self.block_all,
            rules: self.specs.clone(),
        }
    }

    pub fn block_all(&self) -> bool {
        self.block_all
    }

    pub fn set_block_all(&mut self, block_all: bool) {
        self.block_all = block_all;
    }

    pub fn rules(&self) -> &[RuleSpec] {
        &self.specs
    }

    /// Add a rule. Adding an existing rule is a no-op.
    pub fn add(&mut self, spec: RuleSpec) -> Result<()> {
        if self.specs.contains(&spec) {
            return Ok(());
        }
        match &spec {
            RuleSpec::Keyword(keyword) => {
                if keyword.is_empty() {
                    return Err(DanmakuError::InvalidRule("empty keyword".to_string()));
                }
                self.keywords.push((keyword.clone(), keyword.to_lowercase()));
            }
            RuleSpec::Regex(pattern) => {
                let regex = Regex::new(pattern)
                    .map_err(|e| DanmakuError::InvalidRule(format!("{pattern}: {e}")))?;
                self.patterns.push((pattern.clone(), regex));
            }
            RuleSpec::Sender(sender) => {
                self.senders.insert(sender.clone());
            }
            RuleSpec::Style(class) => self.styles[class.index()] = true,
            RuleSpec::Guests => self.guests = true,
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Remove a rule. Returns whether it was present.
    pub fn remove(&mut self, spec: &RuleSpec) -> bool {
        let Some(pos) = self.specs.iter().position(|s| s == spec) else {
            return false;
        };
        self.specs.remove(pos);
        match spec {
            RuleSpec::Keyword(keyword) => self.keywords.retain(|(k, _)| k != keyword),
            RuleSpec::Regex(pattern) => self.patterns.retain(|(p, _)| p != pattern),
            RuleSpec::Sender(sender) => {
                self.senders.remove(sender);
            }
            RuleSpec::Style(class) => self.styles[class.index()] = false,
            RuleSpec::Guests => self.guests = false,
        }
        true
    }

    /// First rule the record trips, cheap checks first.
    pub fn check(&self, record: &CommentRecord) -> Option<Suppression> {
        if self.block_all {
            return Some(Suppression::All);
        }
        if !record.sender().is_empty() && self.senders.contains(record.sender()) {
            return Some(Suppression::Sender(record.sender().to_string()));
        }
        let class = record.class();
        if self.styles[class.index()] {
            return Some(Suppression::Style(class));
        }
        if self.guests && record.is_guest() {
            return Some(Suppression::Guest);
        }
        if !self.keywords.is_empty() {
            let text = record.text().to_lowercase();
            if let Some((keyword, _)) = self.keywords.iter().find(|(_, k)| text.contains(k)) {
                return Some(Suppression::Keyword(keyword.clone()));
            }
        }
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(record.text()))
            .map(|(pattern, _)| Suppression::Pattern(pattern.clone()))
    }
}

/// Key used to decide whether two texts are "the same".
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Filter and policy engine.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    blocklist: Blocklist,
    same_limit: usize,
    same_window: f64,
    density_limit: usize,
    /// normalized text -> times it was placed inside the window
    shown: FxHashMap<String, VecDeque<f64>>,
}

impl PolicyEngine {
    /// Create an engine. A limit of 0 disables that policy.
    pub fn new(
        blocklist: Blocklist,
        same_limit: usize,
        same_window: f64,
        density_limit: usize,
    ) -> Self {
        Self {
            blocklist,
            same_limit,
            same_window,
            density_limit,
            shown: FxHashMap::default(),
        }
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    pub fn blocklist_mut(&mut self) -> &mut Blocklist {
        &mut self.blocklist
    }

    pub fn set_blocklist(&mut self, blocklist: Blocklist) {
        self.blocklist = blocklist;
    }

    /// Update the limits, keeping the blocklist.
    pub fn set_limits(&mut self, same_limit: usize, same_window: f64, density_limit: usize) {
        self.same_limit = same_limit;
        self.same_window = same_window;
        self.density_limit = density_limit;
    }

    /// Forget every shown comment.
    pub fn reset(&mut self) {
        self.shown.clear();
    }

    fn repeats(&self, key: &str, at: f64) -> usize {
        self.shown.get(key).map_or(0, |times| {
            times
                .iter()
                .filter(|t| **t <= at && at - **t < self.same_window)
                .count()
        })
    }

    /// Decide whether a comment may be placed at `at`.
    ///
    /// `active_in_class` is the number of comments of the record's class that
    /// are on screen (or scheduled to be) at `at`.
    pub fn evaluate(
        &self,
        record: &CommentRecord,
        flags: RecordFlags,
        at: f64,
        active_in_class: usize,
    ) -> std::result::Result<(), Suppression> {
        if flags.blocked {
            return Err(Suppression::Blocked);
        }
        if let Some(reason) = self.blocklist.check(record) {
            return Err(reason);
        }
        if self.same_limit > 0 && self.repeats(&normalize(record.text()), at) >= self.same_limit {
            return Err(Suppression::Duplicate {
                limit: self.same_limit,
            });
        }
        if self.density_limit > 0 && active_in_class >= self.density_limit {
            return Err(Suppression::Density {
                class: record.class(),
                limit: self.density_limit,
            });
        }
        Ok(())
    }

    /// Boolean form of [`PolicyEngine::evaluate`].
    pub fn is_visible(
        &self,
        record: &CommentRecord,
        flags: RecordFlags,
        at: f64,
        active_in_class: usize,
    ) -> bool {
        self.evaluate(record, flags, at, active_in_class).is_ok()
    }

    /// Count a comment that was just placed on screen.
    pub fn record_shown(&mut self, record: &CommentRecord, at: f64) {
        if self.same_limit == 0 {
            return;
        }
        let window = self.same_window;
        let times = self.shown.entry(normalize(record.text())).or_default();
        while times.front().is_some_and(|t| at - *t >= window) {
            times.pop_front();
        }
        times.push_back(at);
    }
}
