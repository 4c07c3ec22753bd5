// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame timing statistics.

use tracing::debug;

use crate::time::{Duration, HostTime};
use crate::timing::PresentFeedback;

/// Exponential moving average tracker.
#[derive(Clone, Copy, Debug)]
struct Ema {
    value: f32,
    alpha: f32,
    initialized: bool,
}

impl Ema {
    const fn new(alpha: f32) -> Self {
        Self {
            value: 0.0,
            alpha,
            initialized: false,
        }
    }

    fn update(&mut self, sample: f32) {
        if self.initialized {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        } else {
            self.value = sample;
            self.initialized = true;
        }
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "smoothed phase durations fit in u64 nanoseconds"
    )]
    fn get(&self) -> Duration {
        Duration(self.value.max(0.0) as u64)
    }
}

/// A frame that presented later than expected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Jank {
    /// Frame counter.
    pub frame_index: u64,
    /// Present time the frame targeted.
    pub expected_present: HostTime,
    /// Present time the hardware reported, if any.
    pub actual_present: Option<HostTime>,
    /// How late it presented.
    pub lateness: Duration,
}

/// Smoothed phase durations and present-miss counters.
#[derive(Clone, Debug)]
pub struct FrameStats {
    commit: Ema,
    composite: Ema,
    presented: u64,
    missed: u64,
    consecutive_missed: u32,
}

impl FrameStats {
    /// EMA smoothing factor for phase durations.
    pub const ALPHA: f32 = 0.2;

    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commit: Ema::new(Self::ALPHA),
            composite: Ema::new(Self::ALPHA),
            presented: 0,
            missed: 0,
            consecutive_missed: 0,
        }
    }

    /// Records how long a commit took.
    #[expect(
        clippy::cast_precision_loss,
        reason = "phase durations are far below f32 precision limits in practice"
    )]
    pub fn record_commit(&mut self, duration: Duration) {
        self.commit.update(duration.nanos() as f32);
    }

    /// Records how long a composite took.
    #[expect(
        clippy::cast_precision_loss,
        reason = "phase durations are far below f32 precision limits in practice"
    )]
    pub fn record_composite(&mut self, duration: Duration) {
        self.composite.update(duration.nanos() as f32);
    }

    /// Smoothed commit duration.
    #[must_use]
    pub fn commit_estimate(&self) -> Duration {
        self.commit.get()
    }

    /// Smoothed composite duration.
    #[must_use]
    pub fn composite_estimate(&self) -> Duration {
        self.composite.get()
    }

    /// Counts a presented frame. Returns the jank if it missed its vsync.
    pub fn observe(&mut self, feedback: &PresentFeedback) -> Option<Jank> {
        self.presented += 1;
        if feedback.missed_deadline != Some(true) {
            self.consecutive_missed = 0;
            return None;
        }
        self.missed += 1;
        self.consecutive_missed += 1;
        debug!(
            frame = feedback.frame_index,
            lateness = feedback.lateness().nanos(),
            consecutive = self.consecutive_missed,
            "frame missed its vsync"
        );
        Some(Jank {
            frame_index: feedback.frame_index,
            expected_present: feedback.expected_present,
            actual_present: feedback.actual_present,
            lateness: feedback.lateness(),
        })
    }

    /// Frames observed.
    #[must_use]
    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    /// Frames that missed their vsync.
    #[must_use]
    pub fn missed_frames(&self) -> u64 {
        self.missed
    }

    /// Length of the current run of missed frames.
    #[must_use]
    pub fn consecutive_missed(&self) -> u32 {
        self.consecutive_missed
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}
