//! Asynchronous comment loading.
//!
//! A [`CommentSource`] yields batches of drafts (from a file, a remote pool,
//! a live feed). [`DanmuLoader`] drains a source into a [`DanmuStore`], one
//! atomic batch at a time, so the playback thread never sees half a batch.
//! Dropping the future returned by [`DanmuLoader::run`] (or aborting the
//! handle from [`DanmuLoader::spawn`]) stops loading between batches.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{DanmakuError, Result};
use crate::format;
use crate::record::CommentDraft;
use crate::store::DanmuStore;

/// Producer of comment batches.
#[async_trait]
pub trait CommentSource: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Next batch, or `None` once the source is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<CommentDraft>>>;
}

/// In-memory source handing out fixed-size chunks.
#[derive(Debug, Clone)]
pub struct VecSource {
    name: String,
    batches: VecDeque<Vec<CommentDraft>>,
}

impl VecSource {
    /// A source that yields `drafts` in chunks of at most `chunk_size`.
    pub fn chunked(name: impl Into<String>, drafts: Vec<CommentDraft>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut batches = VecDeque::new();
        let mut drafts = drafts.into_iter().peekable();
        while drafts.peek().is_some() {
            batches.push_back(drafts.by_ref().take(chunk_size).collect());
        }
        Self {
            name: name.into(),
            batches,
        }
    }

    /// Remaining batches.
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl CommentSource for VecSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<CommentDraft>>> {
        Ok(self.batches.pop_front())
    }
}

/// Source reading a JSON or XML comment file on first use.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    chunk_size: usize,
    inner: Option<VecSource>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
            chunk_size,
            inner: None,
        }
    }
}

#[async_trait]
impl CommentSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<CommentDraft>>> {
        if self.inner.is_none() {
            let drafts = format::read_file(&self.path).await?;
            self.inner = Some(VecSource::chunked(
                self.name.clone(),
                drafts,
                self.chunk_size,
            ));
        }
        match self.inner.as_mut() {
            Some(inner) => inner.next_batch().await,
            None => Ok(None),
        }
    }
}

/// Outcome of draining a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Batches received from the source
    pub batches: usize,
    /// Records inserted into the store
    pub accepted: usize,
    /// Batches that failed validation
    pub rejected_batches: usize,
    /// Records dropped because they failed validation
    pub rejected_records: usize,
}

/// Drains comment sources into a store.
#[derive(Debug, Clone)]
pub struct DanmuLoader {
    store: DanmuStore,
    skip_invalid: bool,
}

impl DanmuLoader {
    /// A loader that rejects whole batches containing invalid records.
    pub fn new(store: DanmuStore) -> Self {
        Self {
            store,
            skip_invalid: false,
        }
    }

    /// Insert the valid part of a rejected batch instead of dropping it.
    pub fn skip_invalid(mut self, skip_invalid: bool) -> Self {
        self.skip_invalid = skip_invalid;
        self
    }

    pub fn store(&self) -> &DanmuStore {
        &self.store
    }

    /// Load every batch from `source`.
    ///
    /// Source errors abort loading; batches already inserted stay in the
    /// store.
    pub async fn run<S>(&self, source: &mut S) -> Result<LoadReport>
    where
        S: CommentSource + ?Sized,
    {
        let mut report = LoadReport::default();
        while let Some(batch) = source.next_batch().await? {
            report.batches += 1;
            if batch.is_empty() {
                continue;
            }
            self.insert(source.name(), batch, &mut report)?;
        }
        info!(
            source = source.name(),
            batches = report.batches,
            accepted = report.accepted,
            rejected = report.rejected_records,
            "Finished loading comments"
        );
        Ok(report)
    }

    fn insert(
        &self,
        source: &str,
        batch: Vec<CommentDraft>,
        report: &mut LoadReport,
    ) -> Result<()> {
        let total = batch.len();
        match self.store.insert_batch(batch.clone()) {
            Ok(ids) => {
                report.accepted += ids.len();
                debug!(source, count = ids.len(), "Loaded comment batch");
                Ok(())
            }
            Err(DanmakuError::InvalidBatch { failures }) => {
                report.rejected_batches += 1;
                report.rejected_records += failures.len();
                for failure in failures.iter().take(5) {
                    warn!(source, index = failure.index, reason = %failure.reason, "Invalid comment");
                }
                if !self.skip_invalid {
                    report.rejected_records += total - failures.len();
                    return Ok(());
                }
                let valid: Vec<CommentDraft> = batch
                    .into_iter()
                    .enumerate()
                    .filter(|(index, _)| failures.iter().all(|f| f.index != *index))
                    .map(|(_, draft)| draft)
                    .collect();
                if !valid.is_empty() {
                    report.accepted += self.store.insert_batch(valid)?.len();
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Load `source` on the tokio runtime.
    pub fn spawn<S>(self, mut source: S) -> JoinHandle<Result<LoadReport>>
    where
        S: CommentSource + 'static,
    {
        tokio::spawn(async move { self.run(&mut source).await })
    }
}
