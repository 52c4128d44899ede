//! Comment record store.
//!
//! The store is the only structure shared between threads: loaders and the
//! editor insert and flag records while the playback thread runs range
//! queries. Every operation takes the lock exactly once, so a query never
//! observes a half-applied batch.

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::error::{BatchFailure, DanmakuError, Result};
use crate::record::{CommentDraft, CommentId, CommentRecord, RecordFlags};

/// Totally ordered wrapper so timestamps can key a `BTreeMap`.
#[derive(Debug, Clone, Copy)]
struct TimeKey(f64);

impl PartialEq for TimeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeKey {}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A record together with its current flags, as returned by queries.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledComment {
    pub record: Arc<CommentRecord>,
    pub flags: RecordFlags,
}

impl PooledComment {
    pub fn id(&self) -> CommentId {
        self.record.id()
    }
}

#[derive(Debug, Default)]
struct Pool {
    by_time: BTreeMap<(TimeKey, CommentId), PooledComment>,
    index: FxHashMap<CommentId, TimeKey>,
    next_id: u64,
    /// Bumped by `clear`
    epoch: u64,
    /// Bumped by every flag change or removal
    revision: u64,
}

impl Pool {
    fn push(&mut self, draft: CommentDraft, pending: bool) -> CommentId {
        let id = CommentId(self.next_id);
        self.next_id += 1;

        let flags = RecordFlags {
            blocked: draft.blocked,
            pending,
        };
        let key = TimeKey(draft.timestamp);
        let record = Arc::new(CommentRecord::from_draft(id, draft));
        self.by_time
            .insert((key, id), PooledComment { record, flags });
        self.index.insert(id, key);
        id
    }

    fn entry_mut(&mut self, id: CommentId) -> Option<&mut PooledComment> {
        let key = *self.index.get(&id)?;
        self.by_time.get_mut(&(key, id))
    }

    fn remove(&mut self, id: CommentId) -> Option<PooledComment> {
        let key = self.index.remove(&id)?;
        self.by_time.remove(&(key, id))
    }
}

/// Thread-safe, cloneable handle to the comment pool.
#[derive(Debug, Clone, Default)]
pub struct DanmuStore {
    inner: Arc<RwLock<Pool>>,
}

impl DanmuStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a single record.
    pub fn insert(&self, draft: CommentDraft) -> Result<CommentId> {
        draft.validate().map_err(DanmakuError::invalid_record)?;
        let id = self.inner.write().push(draft, false);
        trace!(id = %id, "Inserted comment");
        Ok(id)
    }

    /// Insert a batch atomically.
    ///
    /// Every draft is validated before the lock is taken; if any fails, the
    /// whole batch is rejected with the index and reason of each failure.
    pub fn insert_batch(&self, drafts: Vec<CommentDraft>) -> Result<Vec<CommentId>> {
        let failures: Vec<BatchFailure> = drafts
            .iter()
            .enumerate()
            .filter_map(|(index, draft)| {
                draft
                    .validate()
                    .err()
                    .map(|reason| BatchFailure { index, reason })
            })
            .collect();
        if !failures.is_empty() {
            warn!(
                rejected = failures.len(),
                total = drafts.len(),
                "Rejecting comment batch"
            );
            return Err(DanmakuError::InvalidBatch { failures });
        }

        let mut pool = self.inner.write();
        let ids: Vec<CommentId> = drafts
            .into_iter()
            .map(|draft| pool.push(draft, false))
            .collect();
        debug!(count = ids.len(), total = pool.by_time.len(), "Inserted comment batch");
        Ok(ids)
    }

    /// Insert a locally posted comment before the remote side acknowledges it.
    pub fn insert_pending(&self, draft: CommentDraft) -> Result<CommentId> {
        draft.validate().map_err(DanmakuError::invalid_record)?;
        let id = self.inner.write().push(draft, true);
        debug!(id = %id, "Inserted pending comment");
        Ok(id)
    }

    /// Acknowledge a pending comment. The record itself is left untouched.
    pub fn confirm(&self, id: CommentId) -> Result<()> {
        let mut pool = self.inner.write();
        let entry = pool.entry_mut(id).ok_or(DanmakuError::NotFound(id))?;
        if entry.flags.pending {
            entry.flags.pending = false;
            pool.revision += 1;
        }
        Ok(())
    }

    /// Drop a pending comment the remote side refused.
    ///
    /// Confirmed comments are not affected; use [`DanmuStore::mark_deleted`].
    pub fn rollback(&self, id: CommentId) -> Result<()> {
        let mut pool = self.inner.write();
        let pending = pool.entry_mut(id).map(|entry| entry.flags.pending);
        match pending {
            Some(true) => {
                pool.remove(id);
                pool.revision += 1;
                debug!(id = %id, "Rolled back pending comment");
                Ok(())
            }
            Some(false) => Ok(()),
            None => Err(DanmakuError::NotFound(id)),
        }
    }

    /// All records with `timestamp` in `[t0, t1)`, in timestamp order, ties
    /// in insertion order. Blocked records are included with their flags.
    pub fn query_range(&self, t0: f64, t1: f64) -> Vec<PooledComment> {
        // BTreeMap::range panics on an inverted range
        if t0.is_nan() || t1.is_nan() || t0 >= t1 {
            return Vec::new();
        }
        let start = (TimeKey(t0), CommentId(0));
        let end = (TimeKey(t1), CommentId(0));
        self.inner
            .read()
            .by_time
            .range(start..end)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Look up a single record.
    pub fn get(&self, id: CommentId) -> Option<PooledComment> {
        let pool = self.inner.read();
        let key = *pool.index.get(&id)?;
        pool.by_time.get(&(key, id)).cloned()
    }

    /// Whether the id is currently in the pool.
    pub fn contains(&self, id: CommentId) -> bool {
        self.inner.read().index.contains_key(&id)
    }

    /// Of the given ids, those still in the pool and not blocked.
    pub fn displayable<I>(&self, ids: I) -> FxHashSet<CommentId>
    where
        I: IntoIterator<Item = CommentId>,
    {
        let pool = self.inner.read();
        ids.into_iter()
            .filter(|id| {
                pool.index
                    .get(id)
                    .and_then(|key| pool.by_time.get(&(*key, *id)))
                    .is_some_and(|entry| !entry.flags.blocked)
            })
            .collect()
    }

    /// Block or unblock a record. Idempotent.
    pub fn mark_blocked(&self, id: CommentId, blocked: bool) -> Result<()> {
        let mut pool = self.inner.write();
        let Some(entry) = pool.entry_mut(id) else {
            debug!(id = %id, "mark_blocked on unknown comment");
            return Err(DanmakuError::NotFound(id));
        };
        if entry.flags.blocked != blocked {
            entry.flags.blocked = blocked;
            pool.revision += 1;
        }
        Ok(())
    }

    /// Remove a record from the pool.
    pub fn mark_deleted(&self, id: CommentId) -> Result<()> {
        let mut pool = self.inner.write();
        if pool.remove(id).is_none() {
            debug!(id = %id, "mark_deleted on unknown comment");
            return Err(DanmakuError::NotFound(id));
        }
        pool.revision += 1;
        Ok(())
    }

    /// Remove every record. Invalidates all layout state built on them.
    pub fn clear(&self) {
        let mut pool = self.inner.write();
        let removed = pool.by_time.len();
        pool.by_time.clear();
        pool.index.clear();
        pool.epoch += 1;
        pool.revision += 1;
        debug!(removed, epoch = pool.epoch, "Cleared comment pool");
    }

    /// Every record in timestamp order.
    pub fn all(&self) -> Vec<PooledComment> {
        self.inner.read().by_time.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter bumped by every [`DanmuStore::clear`].
    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    /// Counter bumped by every flag change or removal.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Timestamps of the first and last records.
    pub fn time_span(&self) -> Option<(f64, f64)> {
        let pool = self.inner.read();
        let first = pool.by_time.keys().next()?.0.0;
        let last = pool.by_time.keys().next_back()?.0.0;
        Some((first, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn texts(entries: &[PooledComment]) -> Vec<&str> {
        entries.iter().map(|e| e.record.text()).collect()
    }

    #[test]
    fn test_insert_and_query_half_open() {
        let store = DanmuStore::new();
        store.insert(CommentDraft::new(2.0, "b")).unwrap();
        store.insert(CommentDraft::new(1.0, "a")).unwrap();
        store.insert(CommentDraft::new(3.0, "c")).unwrap();

        assert_eq!(texts(&store.query_range(1.0, 3.0)), vec!["a", "b"]);
        assert_eq!(texts(&store.query_range(0.0, 10.0)), vec!["a", "b", "c"]);
        assert!(store.query_range(3.0, 3.0).is_empty());
        assert!(store.query_range(5.0, 1.0).is_empty());
        assert!(store.query_range(f64::NAN, 1.0).is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let store = DanmuStore::new();
        for text in ["first", "second", "third"] {
            store.insert(CommentDraft::new(1.0, text)).unwrap();
        }
        assert_eq!(
            texts(&store.query_range(1.0, 1.5)),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn test_negative_timestamps_are_stored() {
        let store = DanmuStore::new();
        store.insert(CommentDraft::new(-2.0, "early")).unwrap();
        assert_eq!(texts(&store.query_range(f64::NEG_INFINITY, 0.0)), vec!["early"]);
    }

    #[test]
    fn test_insert_rejects_invalid() {
        let store = DanmuStore::new();
        let err = store.insert(CommentDraft::new(1.0, "")).unwrap_err();
        assert!(matches!(err, DanmakuError::InvalidRecord { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_batch_is_atomic() {
        let store = DanmuStore::new();
        store.insert(CommentDraft::new(0.5, "existing")).unwrap();

        let batch = vec![
            CommentDraft::new(1.0, "ok"),
            CommentDraft::new(f64::NEG_INFINITY, "bad time"),
            CommentDraft::new(2.0, ""),
        ];
        match store.insert_batch(batch) {
            Err(DanmakuError::InvalidBatch { failures }) => {
                let indices: Vec<usize> = failures.iter().map(|f| f.index).collect();
                assert_eq!(indices, vec![1, 2]);
            }
            other => panic!("expected InvalidBatch, got {other:?}"),
        }
        assert_eq!(store.len(), 1);

        let ids = store
            .insert_batch(vec![CommentDraft::new(1.0, "x"), CommentDraft::new(2.0, "y")])
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_flags_and_not_found() {
        let store = DanmuStore::new();
        let id = store.insert(CommentDraft::new(1.0, "x")).unwrap();
        let rev = store.revision();

        store.mark_blocked(id, true).unwrap();
        store.mark_blocked(id, true).unwrap();
        assert!(store.get(id).unwrap().flags.blocked);
        assert_eq!(store.revision(), rev + 1);

        // blocked records stay queryable
        assert_eq!(store.query_range(0.0, 2.0).len(), 1);
        assert!(store.displayable([id]).is_empty());

        store.mark_deleted(id).unwrap();
        assert!(store.query_range(0.0, 2.0).is_empty());
        assert!(store.mark_deleted(id).unwrap_err().is_not_found());
        assert!(store.mark_blocked(id, false).unwrap_err().is_not_found());
    }

    #[test]
    fn test_pending_confirm_and_rollback() {
        let store = DanmuStore::new();
        let kept = store.insert_pending(CommentDraft::new(1.0, "kept")).unwrap();
        let dropped = store.insert_pending(CommentDraft::new(1.0, "dropped")).unwrap();
        assert!(store.get(kept).unwrap().flags.pending);

        store.confirm(kept).unwrap();
        assert!(!store.get(kept).unwrap().flags.pending);
        // confirmed records survive a stray rollback
        store.rollback(kept).unwrap();
        assert!(store.contains(kept));

        store.rollback(dropped).unwrap();
        assert!(!store.contains(dropped));
        assert!(store.rollback(dropped).unwrap_err().is_not_found());
    }

    #[test]
    fn test_clear_bumps_epoch() {
        let store = DanmuStore::new();
        store.insert(CommentDraft::new(1.0, "x")).unwrap();
        let epoch = store.epoch();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.epoch(), epoch + 1);
        assert_eq!(store.time_span(), None);
    }

    #[test]
    fn test_concurrent_inserts() {
        let store = DanmuStore::new();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let t = (i * 4 + worker) as f64 * 0.01;
                        store.insert(CommentDraft::new(t, "x")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 1000);
        assert_eq!(store.query_range(0.0, 5.0).len(), 500);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Range queries return exactly the live records inside `[a, b)`,
        /// whatever order they were inserted in.
        #[test]
        fn prop_query_range_matches_filter(
            stamps in prop::collection::vec(-50.0f64..50.0, 0..80),
            deletes in prop::collection::vec(any::<bool>(), 80),
            a in -60.0f64..60.0,
            len in 0.0f64..40.0,
        ) {
            let store = DanmuStore::new();
            let mut live = Vec::new();
            for (i, t) in stamps.iter().enumerate() {
                let id = store.insert(CommentDraft::new(*t, format!("c{i}"))).unwrap();
                if deletes[i] {
                    store.mark_deleted(id).unwrap();
                } else {
                    live.push((*t, id));
                }
            }

            let b = a + len;
            let mut expected: Vec<CommentId> = live
                .iter()
                .filter(|(t, _)| *t >= a && *t < b)
                .map(|(_, id)| *id)
                .collect();
            expected.sort();

            let result = store.query_range(a, b);
            let mut got: Vec<CommentId> = result.iter().map(|e| e.id()).collect();
            got.sort();
            prop_assert_eq!(got, expected);

            for pair in result.windows(2) {
                prop_assert!(pair[0].record.timestamp() <= pair[1].record.timestamp());
            }
        }
    }
}
