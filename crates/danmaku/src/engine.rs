//! Playback-side scheduling engine.
//!
//! The engine is owned by the playback/render thread. It reads the shared
//! [`DanmuStore`] on every tick, feeds newly due comments through the policy
//! engine into the track allocator and keeps the resulting layout as a
//! snapshot until the next tick, seek or mutation.
//!
//! Forward ticks within the continuity threshold admit `[previous, current)`
//! incrementally. Any other move discards all occupancy and replays the
//! lookback window ending at the new position from scratch.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::clock::{ClockStep, PlaybackClock};
use crate::config::EngineConfig;
use crate::error::{DanmakuError, Result};
use crate::layout::Snapshot;
use crate::measure::{EmWidthMeasure, TextMeasure};
use crate::policy::{Blocklist, PolicyEngine, RuleSpec, Suppression};
use crate::record::{CommentDraft, CommentId};
use crate::store::{DanmuStore, PooledComment};
use crate::track::TrackAllocator;

/// Outcome recorded for a comment that became due in the current window.
#[derive(Debug, Clone)]
struct Decision {
    timestamp: f64,
    suppressed: Option<Suppression>,
}

/// Danmaku scheduling engine.
pub struct DanmuEngine {
    store: DanmuStore,
    config: EngineConfig,
    policy: PolicyEngine,
    tracks: TrackAllocator,
    clock: PlaybackClock,
    /// Store epoch the layout was built against
    epoch: u64,
    /// Store revision last reconciled with the layout
    revision: u64,
    decided: FxHashMap<CommentId, Decision>,
    snapshot: Snapshot,
}

impl DanmuEngine {
    /// Create an engine over `store` with the default text measure.
    pub fn new(store: DanmuStore, config: EngineConfig) -> Result<Self> {
        Self::with_measure(store, config, Arc::new(EmWidthMeasure))
    }

    /// Create an engine with a renderer-provided text measure.
    pub fn with_measure(
        store: DanmuStore,
        config: EngineConfig,
        measure: Arc<dyn TextMeasure>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = PolicyEngine::new(
            Blocklist::new(),
            config.same_limit,
            config.same_window,
            config.density_limit,
        );
        let clock = PlaybackClock::new(config.continuity_threshold);
        let tracks = TrackAllocator::new(config.clone(), measure);
        Ok(Self {
            epoch: store.epoch(),
            revision: store.revision(),
            store,
            config,
            policy,
            tracks,
            clock,
            decided: FxHashMap::default(),
            snapshot: Snapshot::default(),
        })
    }

    pub fn store(&self) -> &DanmuStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn blocklist(&self) -> &Blocklist {
        self.policy.blocklist()
    }

    /// Last reported media time.
    pub fn position(&self) -> Option<f64> {
        self.clock.position()
    }

    pub fn rate(&self) -> f64 {
        self.clock.rate()
    }

    fn danmaku_time(&self, media: f64) -> f64 {
        media - self.config.delay
    }

    /// Regular playback tick.
    pub fn on_tick(&mut self, time: f64) {
        if !time.is_finite() {
            warn!(time, "Ignoring non-finite tick");
            return;
        }
        self.sync_store();
        match self.clock.tick(time) {
            ClockStep::Still => {}
            ClockStep::Advance { from, to } => {
                self.advance(self.danmaku_time(from), self.danmaku_time(to));
            }
            ClockStep::Jump { from, to } => {
                debug!(?from, to, "Clock discontinuity, rebuilding layout");
                self.rebuild(self.danmaku_time(to));
            }
        }
        self.refresh();
    }

    /// User or programmatic seek. Always rebuilds the layout.
    pub fn on_seek(&mut self, time: f64) {
        if !time.is_finite() {
            warn!(time, "Ignoring non-finite seek");
            return;
        }
        self.sync_store();
        let from = self.clock.position();
        self.clock.seek(time);
        debug!(?from, to = time, "Seek, rebuilding layout");
        self.rebuild(self.danmaku_time(time));
        self.refresh();
    }

    /// Playback rate change. Comments are laid out in media time, so they
    /// speed up with the video without touching the layout.
    pub fn on_rate_change(&mut self, rate: f64) -> Result<()> {
        self.clock.set_rate(rate)?;
        debug!(rate, "Playback rate changed");
        Ok(())
    }

    /// Playback stopped; nothing is on screen until the next tick.
    pub fn stop(&mut self) {
        self.clock.stop();
        self.reset_layout();
        self.snapshot = Snapshot::empty(None);
    }

    /// The latest completed layout.
    pub fn snapshot(&self) -> Snapshot {
        if self.store.epoch() != self.epoch {
            // the pool was cleared behind our back; nothing we hold is valid
            return Snapshot::empty(self.snapshot.time);
        }
        self.snapshot.clone()
    }

    /// Why a comment that became due in the current window is not shown.
    /// `None` if it was placed or has not been considered.
    pub fn explain(&self, id: CommentId) -> Option<Suppression> {
        self.decided.get(&id)?.suppressed.clone()
    }

    /// Whether the comment was placed in the current window.
    pub fn is_placed(&self, id: CommentId) -> bool {
        self.decided
            .get(&id)
            .is_some_and(|decision| decision.suppressed.is_none())
    }

    /// Post a comment optimistically; see [`DanmuStore::insert_pending`].
    pub fn post(&mut self, draft: CommentDraft) -> Result<CommentId> {
        self.store.insert_pending(draft)
    }

    /// Acknowledge a posted comment without disturbing its lane.
    pub fn confirm(&mut self, id: CommentId) -> Result<()> {
        self.store.confirm(id)?;
        self.sync_store();
        Ok(())
    }

    /// Withdraw a posted comment the remote side refused.
    pub fn rollback(&mut self, id: CommentId) -> Result<()> {
        let result = self.store.rollback(id);
        self.sync_store();
        self.refresh();
        result
    }

    /// Block or unblock a single comment.
    ///
    /// Blocking retires it immediately. Unblocking takes effect at the next
    /// rebuild.
    pub fn mark_blocked(&mut self, id: CommentId, blocked: bool) -> Result<()> {
        let result = self.store.mark_blocked(id, blocked);
        self.sync_store();
        self.refresh();
        result
    }

    /// Delete a single comment from the pool.
    pub fn mark_deleted(&mut self, id: CommentId) -> Result<()> {
        let result = self.store.mark_deleted(id);
        self.sync_store();
        self.refresh();
        result
    }

    /// Empty the pool and the layout.
    pub fn clear_pool(&mut self) {
        self.store.clear();
        self.sync_store();
        self.refresh();
    }

    /// Replace the blocklist and re-derive the layout, revealing comments
    /// the old rules hid.
    pub fn set_blocklist(&mut self, blocklist: Blocklist) {
        self.policy.set_blocklist(blocklist);
        self.relayout();
    }

    /// Add a blocking rule.
    pub fn add_rule(&mut self, spec: RuleSpec) -> Result<()> {
        self.policy.blocklist_mut().add(spec)?;
        self.relayout();
        Ok(())
    }

    /// Remove a blocking rule. Returns whether it was present.
    pub fn remove_rule(&mut self, spec: &RuleSpec) -> bool {
        let removed = self.policy.blocklist_mut().remove(spec);
        if removed {
            self.relayout();
        }
        removed
    }

    /// Hide or show everything.
    pub fn set_block_all(&mut self, block_all: bool) {
        self.policy.blocklist_mut().set_block_all(block_all);
        self.relayout();
    }

    /// Block everything sent by the author of `id`.
    pub fn block_sender_of(&mut self, id: CommentId) -> Result<()> {
        let entry = self.store.get(id).ok_or(DanmakuError::NotFound(id))?;
        if entry.record.is_guest() {
            return Err(DanmakuError::other(format!("comment {id} has no sender")));
        }
        self.add_rule(RuleSpec::Sender(entry.record.sender().to_string()))
    }

    /// Shift every comment by `delay` seconds relative to the media.
    pub fn set_delay(&mut self, delay: f64) -> Result<()> {
        let config = EngineConfig {
            delay,
            ..self.config.clone()
        };
        self.set_config(config)
    }

    /// Apply a new configuration and re-derive the layout.
    pub fn set_config(&mut self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        self.policy
            .set_limits(config.same_limit, config.same_window, config.density_limit);
        self.clock.set_threshold(config.continuity_threshold);
        self.tracks.reconfigure(config.clone());
        self.config = config;
        self.relayout();
        Ok(())
    }

    /// Use different text metrics from now on.
    pub fn set_measure(&mut self, measure: Arc<dyn TextMeasure>) {
        self.tracks.set_measure(measure);
        self.relayout();
    }

    fn reset_layout(&mut self) {
        self.tracks.reset();
        self.policy.reset();
        self.decided.clear();
    }

    /// Rebuild at the current position, if playing.
    fn relayout(&mut self) {
        self.sync_store();
        if let Some(position) = self.clock.position() {
            self.rebuild(self.danmaku_time(position));
        }
        self.refresh();
    }

    /// Reconcile the layout with mutations made to the store since the
    /// last call.
    fn sync_store(&mut self) {
        let epoch = self.store.epoch();
        if epoch != self.epoch {
            debug!(epoch, "Comment pool cleared, dropping layout");
            self.epoch = epoch;
            self.revision = self.store.revision();
            self.reset_layout();
            return;
        }

        let revision = self.store.revision();
        if revision == self.revision {
            return;
        }
        self.revision = revision;
        let live = self
            .store
            .displayable(self.tracks.active().iter().map(|item| item.id()));
        let retired = self.tracks.retain(|item| live.contains(&item.id()));
        if retired.is_empty() {
            return;
        }
        debug!(retired = retired.len(), "Retired blocked or deleted comments");
        for id in retired {
            match self.store.get(id) {
                Some(entry) if entry.flags.blocked => {
                    if let Some(decision) = self.decided.get_mut(&id) {
                        decision.suppressed = Some(Suppression::Blocked);
                    }
                }
                _ => {
                    self.decided.remove(&id);
                }
            }
        }
    }

    fn advance(&mut self, from: f64, to: f64) {
        self.replay(from, to);
        let horizon = to - self.config.lookback();
        self.decided
            .retain(|_, decision| decision.timestamp >= horizon);
    }

    fn rebuild(&mut self, at: f64) {
        self.reset_layout();
        self.replay(at - self.config.lookback(), at);
    }

    /// Admit every comment due in `[from, to)` in timestamp order, each at
    /// its own timestamp.
    fn replay(&mut self, from: f64, to: f64) {
        let due = self.store.query_range(from, to);
        trace!(from, to, due = due.len(), "Admitting due comments");
        for entry in due {
            let at = entry.record.timestamp();
            self.tracks.retire_until(at);
            self.admit(entry, at);
        }
        self.tracks.retire_until(to);
    }

    fn admit(&mut self, entry: PooledComment, at: f64) {
        let id = entry.id();
        if self.decided.contains_key(&id) {
            return;
        }
        let active = self.tracks.active_count(entry.record.class(), at);
        let outcome = self
            .policy
            .evaluate(&entry.record, entry.flags, at, active)
            .and_then(|()| self.tracks.allocate(Arc::clone(&entry.record), at));

        let suppressed = match outcome {
            Ok(()) => {
                self.policy.record_shown(&entry.record, at);
                None
            }
            Err(reason) => {
                trace!(id = %id, %reason, "Comment suppressed");
                Some(reason)
            }
        };
        self.decided.insert(
            id,
            Decision {
                timestamp: at,
                suppressed,
            },
        );
    }

    fn refresh(&mut self) {
        self.snapshot = match self.clock.position() {
            Some(position) => Snapshot {
                time: Some(position),
                items: self.tracks.layout(self.danmaku_time(position)),
            },
            None => Snapshot::empty(None),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DanmuStyle;

    fn engine(config: EngineConfig) -> DanmuEngine {
        let measure = |text: &str, _: f64, _: f32| text.chars().count() as f64 * 10.0;
        DanmuEngine::with_measure(DanmuStore::new(), config, Arc::new(measure)).unwrap()
    }

    #[test]
    fn test_comment_appears_after_its_timestamp() {
        let mut engine = engine(EngineConfig::default());
        let id = engine
            .store()
            .insert(CommentDraft::new(1.0, "hello"))
            .unwrap();

        engine.on_tick(0.0);
        engine.on_tick(1.0);
        assert!(engine.snapshot().is_empty());
        engine.on_tick(1.04);
        assert_eq!(engine.snapshot().ids(), vec![id]);

        // gone once it has crossed the screen
        for step in 1..=50 {
            engine.on_tick(1.04 + step as f64 * 0.1);
        }
        assert!(engine.snapshot().is_empty());
    }

    #[test]
    fn test_tick_outside_threshold_rebuilds() {
        let mut engine = engine(EngineConfig::default());
        let id = engine
            .store()
            .insert(CommentDraft::new(10.0, "x"))
            .unwrap();
        engine.on_tick(0.0);
        // a forward jump past the threshold still finds the comment
        engine.on_tick(11.0);
        assert_eq!(engine.snapshot().ids(), vec![id]);
        // and a backward one drops it
        engine.on_tick(9.0);
        assert!(engine.snapshot().is_empty());
    }

    #[test]
    fn test_delay_shifts_comments() {
        let mut engine = engine(EngineConfig::default());
        let id = engine
            .store()
            .insert(CommentDraft::new(1.0, "x"))
            .unwrap();
        engine.on_tick(2.0);
        assert_eq!(engine.snapshot().ids(), vec![id]);

        engine.set_delay(3.0).unwrap();
        assert!(engine.snapshot().is_empty());
        engine.on_tick(3.5);
        engine.on_tick(4.5);
        assert_eq!(engine.snapshot().ids(), vec![id]);
    }

    #[test]
    fn test_block_retires_and_unblock_reveals_on_rebuild() {
        let mut engine = engine(EngineConfig::default());
        let id = engine
            .store()
            .insert(CommentDraft::new(1.0, "x"))
            .unwrap();
        engine.on_tick(2.0);
        assert!(engine.is_placed(id));

        engine.mark_blocked(id, true).unwrap();
        assert!(engine.snapshot().is_empty());
        assert!(!engine.is_placed(id));
        assert_eq!(engine.explain(id), Some(Suppression::Blocked));

        engine.mark_blocked(id, false).unwrap();
        assert!(engine.snapshot().is_empty());
        engine.on_seek(2.0);
        assert_eq!(engine.snapshot().ids(), vec![id]);
    }

    #[test]
    fn test_delete_forgets_placement() {
        let mut engine = engine(EngineConfig::default());
        let id = engine
            .store()
            .insert(CommentDraft::new(1.0, "x"))
            .unwrap();
        engine.on_tick(2.0);
        assert!(engine.is_placed(id));

        engine.mark_deleted(id).unwrap();
        assert!(engine.snapshot().is_empty());
        assert!(!engine.is_placed(id));
        assert_eq!(engine.explain(id), None);
    }

    #[test]
    fn test_rules_reveal_after_removal() {
        let mut engine = engine(EngineConfig::default());
        let id = engine
            .store()
            .insert(CommentDraft::new(1.0, "spoiler").with_sender("u9"))
            .unwrap();
        engine.add_rule(RuleSpec::Keyword("spoil".into())).unwrap();
        engine.on_tick(2.0);
        assert!(engine.snapshot().is_empty());
        assert_eq!(
            engine.explain(id),
            Some(Suppression::Keyword("spoil".into()))
        );

        assert!(engine.remove_rule(&RuleSpec::Keyword("spoil".into())));
        assert_eq!(engine.snapshot().ids(), vec![id]);

        engine.block_sender_of(id).unwrap();
        assert_eq!(engine.explain(id), Some(Suppression::Sender("u9".into())));
    }

    #[test]
    fn test_block_sender_of_guest_fails() {
        let mut engine = engine(EngineConfig::default());
        let id = engine
            .store()
            .insert(CommentDraft::new(1.0, "x"))
            .unwrap();
        assert!(matches!(
            engine.block_sender_of(id),
            Err(DanmakuError::Other(_))
        ));
    }

    #[test]
    fn test_optimistic_post() {
        let mut engine = engine(EngineConfig::default());
        engine.on_tick(5.0);
        let kept = engine
            .post(CommentDraft::new(5.0, "mine").with_style(DanmuStyle::Top))
            .unwrap();
        let refused = engine
            .post(CommentDraft::new(5.0, "refused").with_style(DanmuStyle::Top))
            .unwrap();
        engine.on_tick(5.1);
        let before = engine.snapshot();
        assert_eq!(before.ids(), vec![kept, refused]);

        engine.confirm(kept).unwrap();
        engine.rollback(refused).unwrap();
        let after = engine.snapshot();
        assert_eq!(after.ids(), vec![kept]);
        assert_eq!(after.items[0].lane, before.items[0].lane);
    }

    #[test]
    fn test_rate_change_keeps_layout() {
        let mut engine = engine(EngineConfig::default());
        engine
            .store()
            .insert(CommentDraft::new(1.0, "x").with_style(DanmuStyle::Top))
            .unwrap();
        engine.on_tick(1.5);
        engine.on_rate_change(2.0).unwrap();
        assert_eq!(engine.snapshot().len(), 1);
        // 3 seconds of media in one tick is continuous at 2x
        engine.on_tick(4.5);
        assert_eq!(engine.snapshot().len(), 1);
        assert!(engine.on_rate_change(-1.0).is_err());
    }

    #[test]
    fn test_stop_clears_snapshot() {
        let mut engine = engine(EngineConfig::default());
        engine
            .store()
            .insert(CommentDraft::new(0.5, "x"))
            .unwrap();
        engine.on_tick(1.0);
        assert_eq!(engine.snapshot().len(), 1);
        engine.stop();
        assert_eq!(engine.snapshot(), Snapshot::empty(None));
        assert_eq!(engine.position(), None);
    }

    #[test]
    fn test_set_config_rejects_invalid() {
        let mut engine = engine(EngineConfig::default());
        let bad = EngineConfig {
            line_height: -1.0,
            ..Default::default()
        };
        assert!(engine.set_config(bad).is_err());
        assert!(engine.set_delay(f64::NAN).is_err());
    }
}
