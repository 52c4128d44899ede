//! Lane allocation and collision avoidance.
//!
//! Every class except `Advanced` owns a fixed set of lanes. A lane keeps the
//! comments placed in it in entry order, and a candidate is checked against
//! every one of them still on screen. Overlap placements under saturation
//! break the spatial order of a lane, so its tail alone is not enough.
//!
//! All times here are danmaku times (media time minus the configured delay).
//! Comments enter at their own timestamp, not at the tick that discovered
//! them, so replaying the same records in the same order always yields the
//! same lanes whether they arrive one tick at a time or in one rebuild.

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::{EngineConfig, SaturationPolicy};
use crate::layout::{LayoutItem, Placement};
use crate::measure::TextMeasure;
use crate::policy::Suppression;
use crate::record::{CommentId, CommentRecord, StyleClass};

/// Tolerance for comparing entry times.
const EPSILON: f64 = 1e-9;

/// Lifecycle of a placed comment relative to a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Placed, but its (possibly delayed) entry time has not come yet
    Pending,
    Active,
    Retired,
}

/// A comment the allocator has placed.
#[derive(Debug, Clone)]
pub struct ActiveDanmu {
    pub record: Arc<CommentRecord>,
    pub class: StyleClass,
    pub lane: Option<usize>,
    pub enter: f64,
    pub exit: f64,
    /// Layout width, clamped to the screen width
    pub width: f64,
    /// Horizontal speed, 0 for held comments
    pub speed: f64,
    /// Placed over another occupant because every lane was saturated
    pub forced: bool,
}

impl ActiveDanmu {
    pub fn id(&self) -> CommentId {
        self.record.id()
    }

    pub fn phase(&self, at: f64) -> Phase {
        if at < self.enter {
            Phase::Pending
        } else if at < self.exit {
            Phase::Active
        } else {
            Phase::Retired
        }
    }

    /// Left edge at `at`.
    pub fn x(&self, at: f64, screen_width: f64) -> f64 {
        let travelled = self.speed * (at - self.enter);
        match self.class {
            StyleClass::Slide => screen_width - travelled,
            StyleClass::Reverse => travelled - self.width,
            _ => (screen_width - self.width) / 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Occupant {
    id: CommentId,
    enter: f64,
    exit: f64,
    width: f64,
    speed: f64,
}

#[derive(Debug, Clone, Default)]
struct Lane {
    occupants: VecDeque<Occupant>,
}

impl Lane {
    fn prune(&mut self, at: f64) {
        self.occupants.retain(|o| o.exit > at);
    }
}

/// Earliest time a candidate may enter a lane after `occupant`.
///
/// Held comments wait for the occupant to expire. A scrolling candidate must
/// wait until the occupant has fully entered the screen (plus the gap), and
/// if it is faster, late enough that its leading edge is still on screen
/// when the occupant's trailing edge leaves.
fn earliest_entry(
    config: &EngineConfig,
    class: StyleClass,
    occupant: &Occupant,
    speed: f64,
) -> f64 {
    if !class.is_scrolling() {
        return occupant.exit;
    }
    let gap = config.lane_gap;
    let entered = occupant.enter + (occupant.width + gap) / occupant.speed;
    if speed > occupant.speed {
        entered.max(occupant.exit - (config.screen.width - gap) / speed)
    } else {
        entered
    }
}

fn build_lanes(config: &EngineConfig) -> [Vec<Lane>; 5] {
    StyleClass::ALL.map(|class| vec![Lane::default(); config.lane_count(class)])
}

/// Assigns lanes and motion to comments of every class.
pub struct TrackAllocator {
    config: EngineConfig,
    measure: Arc<dyn TextMeasure>,
    lanes: [Vec<Lane>; 5],
    active: Vec<ActiveDanmu>,
}

impl TrackAllocator {
    pub fn new(config: EngineConfig, measure: Arc<dyn TextMeasure>) -> Self {
        let lanes = build_lanes(&config);
        Self {
            config,
            measure,
            lanes,
            active: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Swap the configuration. Drops all occupancy.
    pub fn reconfigure(&mut self, config: EngineConfig) {
        self.lanes = build_lanes(&config);
        self.config = config;
        self.active.clear();
    }

    /// Swap the text measure. Drops all occupancy.
    pub fn set_measure(&mut self, measure: Arc<dyn TextMeasure>) {
        self.measure = measure;
        self.reset();
    }

    /// Drop all occupancy.
    pub fn reset(&mut self) {
        for lanes in &mut self.lanes {
            lanes.iter_mut().for_each(|lane| lane.occupants.clear());
        }
        self.active.clear();
    }

    /// Forget comments that have left the screen by `at`.
    pub fn retire_until(&mut self, at: f64) {
        self.active.retain(|item| item.exit > at);
    }

    /// Retire specific comments early, e.g. after they were blocked.
    /// Returns the ids removed.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<CommentId>
    where
        F: FnMut(&ActiveDanmu) -> bool,
    {
        let mut removed = Vec::new();
        self.active.retain(|item| {
            let kept = keep(item);
            if !kept {
                removed.push((item.class, item.lane, item.id()));
            }
            kept
        });
        removed
            .into_iter()
            .map(|(class, lane, id)| {
                if let Some(lane) = lane.and_then(|l| self.lanes[class.index()].get_mut(l)) {
                    lane.occupants.retain(|o| o.id != id);
                }
                id
            })
            .collect()
    }

    /// Comments of `class` on screen, or scheduled to enter, at `at`.
    pub fn active_count(&self, class: StyleClass, at: f64) -> usize {
        self.active
            .iter()
            .filter(|item| item.class == class && item.exit > at)
            .count()
    }

    /// Every placed comment that has not been retired.
    pub fn active(&self) -> &[ActiveDanmu] {
        &self.active
    }

    pub fn contains(&self, id: CommentId) -> bool {
        self.active.iter().any(|item| item.id() == id)
    }

    /// Place a comment that becomes due at `at`.
    pub fn allocate(
        &mut self,
        record: Arc<CommentRecord>,
        at: f64,
    ) -> std::result::Result<(), Suppression> {
        let class = record.class();
        let width = self
            .measure
            .width(record.text(), self.config.font_size, record.size())
            .clamp(0.0, self.config.screen.width);

        if class == StyleClass::Advanced {
            self.active.push(ActiveDanmu {
                record,
                class,
                lane: None,
                enter: at,
                exit: at + self.config.life_time,
                width,
                speed: 0.0,
                forced: false,
            });
            return Ok(());
        }

        let (speed, duration) = if class.is_scrolling() {
            let speed = self.config.scroll_speed(width);
            (speed, (self.config.screen.width + width) / speed)
        } else {
            (0.0, self.config.life_time)
        };

        let lanes = &mut self.lanes[class.index()];
        lanes.iter_mut().for_each(|lane| lane.prune(at));

        let mut free = None;
        let mut soonest: Option<(usize, f64)> = None;
        for (index, lane) in lanes.iter().enumerate() {
            let earliest = lane
                .occupants
                .iter()
                .map(|occupant| earliest_entry(&self.config, class, occupant, speed))
                .fold(f64::NEG_INFINITY, f64::max);
            if earliest <= at + EPSILON {
                free = Some(index);
                break;
            }
            if soonest.is_none_or(|(_, best)| earliest < best) {
                soonest = Some((index, earliest));
            }
        }

        let (lane, enter, forced) = match (free, soonest) {
            (Some(index), _) => (index, at, false),
            (None, None) => return Err(Suppression::Saturated),
            (None, Some((index, earliest))) => match self.config.saturation {
                SaturationPolicy::Overlap => {
                    debug!(
                        id = %record.id(),
                        class = %class,
                        lane = index,
                        "Lanes saturated, accepting overlap"
                    );
                    (index, at, true)
                }
                SaturationPolicy::Delay { max_delay } => {
                    if earliest - at > max_delay + EPSILON {
                        debug!(id = %record.id(), class = %class, wait = earliest - at, "Lanes saturated, dropping");
                        return Err(Suppression::Saturated);
                    }
                    (index, earliest, false)
                }
            },
        };

        trace!(id = %record.id(), class = %class, lane, enter, "Placed comment");
        let exit = enter + duration;
        lanes[lane].occupants.push_back(Occupant {
            id: record.id(),
            enter,
            exit,
            width,
            speed,
        });
        self.active.push(ActiveDanmu {
            record,
            class,
            lane: Some(lane),
            enter,
            exit,
            width,
            speed,
            forced,
        });
        Ok(())
    }

    /// Positions of every comment visible at `at`.
    pub fn layout(&self, at: f64) -> Vec<LayoutItem> {
        let config = &self.config;
        let mut items: Vec<&ActiveDanmu> = self
            .active
            .iter()
            .filter(|item| item.phase(at) == Phase::Active)
            .collect();
        items.sort_by(|a, b| a.enter.total_cmp(&b.enter).then(a.id().cmp(&b.id())));

        items
            .into_iter()
            .map(|item| {
                let placement = match (item.class, item.lane) {
                    (StyleClass::Advanced, _) | (_, None) => Placement::Scripted {
                        elapsed: at - item.enter,
                        remaining: item.exit - at,
                    },
                    (class, Some(lane)) if class.is_scrolling() => Placement::Scroll {
                        x: item.x(at, config.screen.width),
                        y: config.lane_y(class, lane),
                        width: item.width,
                        speed: item.speed,
                    },
                    (class, Some(lane)) => Placement::Fixed {
                        x: item.x(at, config.screen.width),
                        y: config.lane_y(class, lane),
                        width: item.width,
                        remaining: item.exit - at,
                    },
                };
                LayoutItem {
                    id: item.id(),
                    class: item.class,
                    lane: item.lane,
                    placement,
                    record: Arc::clone(&item.record),
                }
            })
            .collect()
    }
}
