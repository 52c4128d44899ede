//! Danmaku error types.

use thiserror::Error;

use crate::record::CommentId;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, DanmakuError>;

/// A single record rejected while validating a batch insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Position of the record in the submitted batch
    pub index: usize,
    /// Why the record was rejected
    pub reason: String,
}

/// Errors that can occur while managing the comment pool or its layout.
#[derive(Error, Debug)]
pub enum DanmakuError {
    /// A record failed validation and never entered the pool
    #[error("Invalid record: {reason}")]
    InvalidRecord { reason: String },

    /// A batch insert was rejected as a whole; nothing was inserted
    #[error("Invalid batch: {} of the records failed validation", failures.len())]
    InvalidBatch { failures: Vec<BatchFailure> },

    /// Mutation targeted an id that is not in the pool (non-fatal)
    #[error("Comment {0} not found")]
    NotFound(CommentId),

    /// A blocking rule could not be compiled
    #[error("Invalid blocking rule: {0}")]
    InvalidRule(String),

    /// Engine configuration is out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML parsing errors
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DanmakuError {
    /// Create an invalid record error.
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error only signals a mutation of an unknown id.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
