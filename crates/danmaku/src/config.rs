//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{DanmakuError, Result};
use crate::record::StyleClass;

/// Logical size of the video surface comments are laid out on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: f64,
    pub height: f64,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self {
            width: 960.0,
            height: 540.0,
        }
    }
}

/// How fast scrolling comments move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SlideSpeed {
    /// Every comment crosses the screen in exactly `life_time` seconds:
    /// `(screen_width + width) / life_time`.
    Lifetime,
    /// `base + per_width * width`, in units per second.
    Linear { base: f64, per_width: f64 },
}

impl Default for SlideSpeed {
    fn default() -> Self {
        Self::Lifetime
    }
}

/// What to do with a comment when no lane admits it at its entry time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Enter immediately in the lane that frees up soonest (lowest index on
    /// ties) and accept the overlap.
    Overlap,
    /// Enter at the earliest time a lane admits the comment. Comments that
    /// would wait longer than `max_delay` seconds are suppressed.
    Delay { max_delay: f64 },
}

impl Default for SaturationPolicy {
    fn default() -> Self {
        Self::Overlap
    }
}

/// Tunables for the scheduling engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub screen: ScreenSize,
    /// Hold duration of top/bottom comments, in seconds
    pub life_time: f64,
    pub slide_speed: SlideSpeed,
    /// Base font size; a comment's size scale multiplies it
    pub font_size: f64,
    /// Height of one lane
    pub line_height: f64,
    /// Upper bound on lanes per class, 0 derives it from the screen height
    pub max_lanes: usize,
    /// Minimum spacing between consecutive comments in a scrolling lane
    pub lane_gap: f64,
    /// Keep the bottom band of the screen free for subtitles
    pub protect_subtitles: bool,
    /// Fraction of the screen height reserved when protecting subtitles
    pub subtitle_band: f64,
    /// Largest forward step, in media seconds at 1x, treated as continuous
    pub continuity_threshold: f64,
    /// Maximum repeats of the same text inside `same_window`, 0 disables
    pub same_limit: usize,
    /// Duplicate window length, in seconds
    pub same_window: f64,
    /// Maximum concurrently displayed comments per class, 0 disables
    pub density_limit: usize,
    pub saturation: SaturationPolicy,
    /// Shift applied to every comment timestamp, in seconds
    pub delay: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            screen: ScreenSize::default(),
            life_time: 5.0,
            slide_speed: SlideSpeed::Lifetime,
            font_size: 25.0,
            line_height: 30.0,
            max_lanes: 0,
            lane_gap: 0.0,
            protect_subtitles: false,
            subtitle_band: 0.15,
            continuity_threshold: 2.0,
            same_limit: 0,
            same_window: 10.0,
            density_limit: 0,
            saturation: SaturationPolicy::Overlap,
            delay: 0.0,
        }
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DanmakuError::config(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DanmakuError::config(format!(
            "{name} must not be negative, got {value}"
        )))
    }
}

impl EngineConfig {
    /// Check every field is in range.
    pub fn validate(&self) -> Result<()> {
        positive("screen.width", self.screen.width)?;
        positive("screen.height", self.screen.height)?;
        positive("life_time", self.life_time)?;
        positive("font_size", self.font_size)?;
        positive("line_height", self.line_height)?;
        non_negative("lane_gap", self.lane_gap)?;
        non_negative("continuity_threshold", self.continuity_threshold)?;
        non_negative("same_window", self.same_window)?;
        if !self.delay.is_finite() {
            return Err(DanmakuError::config("delay must be finite"));
        }
        if !(0.0..1.0).contains(&self.subtitle_band) {
            return Err(DanmakuError::config(format!(
                "subtitle_band must be in [0, 1), got {}",
                self.subtitle_band
            )));
        }
        if let SlideSpeed::Linear { base, per_width } = self.slide_speed {
            positive("slide_speed.base", base)?;
            non_negative("slide_speed.per_width", per_width)?;
        }
        if let SaturationPolicy::Delay { max_delay } = self.saturation {
            non_negative("saturation.max_delay", max_delay)?;
        }
        Ok(())
    }

    /// Height available to lanes.
    fn usable_height(&self) -> f64 {
        if self.protect_subtitles {
            self.screen.height * (1.0 - self.subtitle_band)
        } else {
            self.screen.height
        }
    }

    /// Number of lanes for a class. Advanced comments have none.
    pub fn lane_count(&self, class: StyleClass) -> usize {
        if class == StyleClass::Advanced {
            return 0;
        }
        let rows = ((self.usable_height() / self.line_height).floor() as usize).max(1);
        if self.max_lanes > 0 {
            rows.min(self.max_lanes)
        } else {
            rows
        }
    }

    /// Vertical position of the top of a lane.
    pub fn lane_y(&self, class: StyleClass, lane: usize) -> f64 {
        match class {
            StyleClass::Bottom => self.usable_height() - (lane as f64 + 1.0) * self.line_height,
            _ => lane as f64 * self.line_height,
        }
    }

    /// Scroll speed of a comment of the given layout width.
    pub fn scroll_speed(&self, width: f64) -> f64 {
        match self.slide_speed {
            SlideSpeed::Lifetime => (self.screen.width + width) / self.life_time,
            SlideSpeed::Linear { base, per_width } => base + per_width * width,
        }
    }

    /// Longest time a comment can stay on screen after its timestamp.
    pub fn max_visible_span(&self) -> f64 {
        // layout widths are clamped to the screen width
        let scroll = match self.slide_speed {
            SlideSpeed::Lifetime => self.life_time,
            SlideSpeed::Linear { base, .. } => 2.0 * self.screen.width / base,
        };
        let wait = match self.saturation {
            SaturationPolicy::Overlap => 0.0,
            SaturationPolicy::Delay { max_delay } => max_delay,
        };
        scroll.max(self.life_time) + wait
    }

    /// How far back a from-scratch layout replays history.
    pub fn lookback(&self) -> f64 {
        let window = if self.same_limit > 0 {
            self.same_window
        } else {
            0.0
        };
        self.max_visible_span().max(window)
    }
}
