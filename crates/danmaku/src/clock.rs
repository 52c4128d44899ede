//! Playback clock tracking.
//!
//! Classifies each reported media time as a continuous step or a jump.

use crate::error::{DanmakuError, Result};

/// How the clock moved between two reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockStep {
    /// Same position as before (paused)
    Still,
    /// Small forward step; newly due comments are admitted incrementally
    Advance { from: f64, to: f64 },
    /// Seek, backward step or first report; layout is rebuilt
    Jump { from: Option<f64>, to: f64 },
}

/// Last known playback position and rate.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    position: Option<f64>,
    rate: f64,
    threshold: f64,
}

impl PlaybackClock {
    /// `threshold` is the largest forward step at 1x treated as continuous.
    pub fn new(threshold: f64) -> Self {
        Self {
            position: None,
            rate: 1.0,
            threshold,
        }
    }

    pub fn position(&self) -> Option<f64> {
        self.position
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// Change the playback rate. Ticks arrive at the same wall-clock cadence,
    /// so the continuity bound scales with the rate.
    pub fn set_rate(&mut self, rate: f64) -> Result<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(DanmakuError::config(format!(
                "playback rate must be positive, got {rate}"
            )));
        }
        self.rate = rate;
        Ok(())
    }

    /// Classify a move to `to` without recording it.
    pub fn classify(&self, to: f64) -> ClockStep {
        let Some(from) = self.position else {
            return ClockStep::Jump { from: None, to };
        };
        let delta = to - from;
        if delta == 0.0 {
            ClockStep::Still
        } else if delta > 0.0 && delta <= self.threshold * self.rate {
            ClockStep::Advance { from, to }
        } else {
            ClockStep::Jump {
                from: Some(from),
                to,
            }
        }
    }

    /// Record a regular tick.
    pub fn tick(&mut self, to: f64) -> ClockStep {
        let step = self.classify(to);
        self.position = Some(to);
        step
    }

    /// Record an explicit seek. Always a jump, even to the current position.
    pub fn seek(&mut self, to: f64) -> ClockStep {
        let from = self.position.replace(to);
        ClockStep::Jump { from, to }
    }

    /// Forget the position, e.g. when playback stops.
    pub fn stop(&mut self) {
        self.position = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_is_jump() {
        let mut clock = PlaybackClock::new(2.0);
        assert_eq!(clock.tick(5.0), ClockStep::Jump { from: None, to: 5.0 });
        assert_eq!(clock.position(), Some(5.0));
    }

    #[test]
    fn test_threshold_both_sides() {
        let mut clock = PlaybackClock::new(2.0);
        clock.tick(0.0);
        assert_eq!(clock.tick(2.0), ClockStep::Advance { from: 0.0, to: 2.0 });
        assert_eq!(
            clock.tick(4.5),
            ClockStep::Jump {
                from: Some(2.0),
                to: 4.5
            }
        );
        assert_eq!(clock.tick(4.5), ClockStep::Still);
    }

    #[test]
    fn test_backward_is_jump() {
        let mut clock = PlaybackClock::new(2.0);
        clock.tick(3.0);
        assert!(matches!(clock.tick(2.9), ClockStep::Jump { .. }));
    }

    #[test]
    fn test_rate_scales_threshold() {
        let mut clock = PlaybackClock::new(2.0);
        clock.tick(0.0);
        assert!(matches!(clock.classify(3.0), ClockStep::Jump { .. }));
        clock.set_rate(2.0).unwrap();
        assert!(matches!(clock.classify(3.0), ClockStep::Advance { .. }));
        assert!(clock.set_rate(0.0).is_err());
        assert!(clock.set_rate(f64::NAN).is_err());
        assert_eq!(clock.rate(), 2.0);
    }

    #[test]
    fn test_seek_is_always_jump() {
        let mut clock = PlaybackClock::new(2.0);
        clock.tick(1.0);
        assert_eq!(
            clock.seek(1.0),
            ClockStep::Jump {
                from: Some(1.0),
                to: 1.0
            }
        );
        clock.stop();
        assert_eq!(clock.position(), None);
    }
}
