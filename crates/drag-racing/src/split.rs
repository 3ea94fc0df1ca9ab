//! Split definitions and per-window timing state

use serde::{Deserialize, Serialize};
use std::fmt;

/// One timed speed interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Split {
    #[serde(rename = "0_60")]
    ZeroToSixty,
    #[serde(rename = "0_100")]
    ZeroToHundred,
    #[serde(rename = "60_140")]
    SixtyToHundredForty,
    #[serde(rename = "100_200")]
    HundredToTwoHundred,
}

impl Split {
    pub const ALL: [Split; 4] = [
        Split::ZeroToSixty,
        Split::ZeroToHundred,
        Split::SixtyToHundredForty,
        Split::HundredToTwoHundred,
    ];

    /// Name used in persisted keys
    pub fn key(self) -> &'static str {
        match self {
            Split::ZeroToSixty => "0_60",
            Split::ZeroToHundred => "0_100",
            Split::SixtyToHundredForty => "60_140",
            Split::HundredToTwoHundred => "100_200",
        }
    }

    /// (lower, upper) speed bounds in km/h
    pub fn bounds(self) -> (i64, i64) {
        match self {
            Split::ZeroToSixty => (0, 60),
            Split::ZeroToHundred => (0, 100),
            Split::SixtyToHundredForty => (60, 140),
            Split::HundredToTwoHundred => (100, 200),
        }
    }

    /// Flying splits start while already moving
    pub fn is_flying(self) -> bool {
        self.bounds().0 > 0
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    Idle,
    Armed { start_ms: u64 },
    /// Result emitted; waiting for the re-arm condition
    Finished,
}

/// Timing state of one split
#[derive(Debug, Clone)]
pub struct SplitWindow {
    split: Split,
    state: WindowState,
    last_speed: Option<i64>,
}

impl SplitWindow {
    pub fn new(split: Split) -> Self {
        Self {
            split,
            state: WindowState::Idle,
            last_speed: None,
        }
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn start_ms(&self) -> Option<u64> {
        match self.state {
            WindowState::Armed { start_ms } => Some(start_ms),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = WindowState::Idle;
        self.last_speed = None;
    }

    /// Feed one speed sample; returns the elapsed time when the split completes.
    ///
    /// Standing windows start from the latest sample at rest. Flying windows
    /// arm on a rising crossing of the lower bound and are voided by any dip
    /// below it.
    pub fn observe(&mut self, speed: i64, timestamp_ms: u64) -> Option<u64> {
        let previous = self.last_speed.replace(speed);
        if self.split.is_flying() {
            self.observe_flying(previous, speed, timestamp_ms)
        } else {
            self.observe_standing(speed, timestamp_ms)
        }
    }

    fn observe_standing(&mut self, speed: i64, timestamp_ms: u64) -> Option<u64> {
        let (_, upper) = self.split.bounds();
        if speed == 0 {
            self.state = WindowState::Armed { start_ms: timestamp_ms };
            return None;
        }
        match self.state {
            WindowState::Armed { start_ms } if speed >= upper => {
                self.state = WindowState::Finished;
                Some(timestamp_ms.saturating_sub(start_ms))
            }
            _ => None,
        }
    }

    fn observe_flying(&mut self, previous: Option<i64>, speed: i64, timestamp_ms: u64) -> Option<u64> {
        let (lower, upper) = self.split.bounds();
        if speed < lower {
            self.state = WindowState::Idle;
            return None;
        }
        match self.state {
            WindowState::Armed { start_ms } if speed >= upper => {
                self.state = WindowState::Finished;
                Some(timestamp_ms.saturating_sub(start_ms))
            }
            WindowState::Idle if speed < upper && previous.is_some_and(|p| p < lower) => {
                self.state = WindowState::Armed { start_ms: timestamp_ms };
                None
            }
            _ => None,
        }
    }
}
