// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-frame timing records.
//!
//! - [`FrameTarget`]: what the scheduler dispatched; lives from the start of
//!   commit to the end of composite.
//! - [`PendingFeedback`]: what the frame driver knows at the end of composite,
//!   held until the frame's present fence signals.
//! - [`PresentFeedback`]: the resolved observation, fed to
//!   [`FrameStats`](crate::scheduler::FrameStats).
//! - [`PresentFenceHistory`]: recent present fences of one display, used to
//!   decide whether compositing now would block on the hardware.
//!
//! # Data flow
//!
//! 1. [`FrameScheduler`](crate::scheduler::FrameScheduler) produces a
//!    [`FrameTarget`] on a pacesetter vsync.
//! 2. Commit and composite run against it.
//! 3. The driver stores a [`PendingFeedback`] with the present fence.
//! 4. Once the fence signals, [`PendingFeedback::resolve`] yields the
//!    [`PresentFeedback`].

use std::collections::VecDeque;

use crate::fence::Fence;
use crate::id::{DisplayId, VsyncId};
use crate::time::{Duration, HostTime};

/// One dispatched frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameTarget {
    /// Monotonic frame counter.
    pub frame_index: u64,
    /// Token identifying this frame's timeline.
    pub vsync_id: VsyncId,
    /// Display whose vsync dispatched the frame.
    pub pacesetter: DisplayId,
    /// Timestamp of the dispatching vsync.
    pub vsync_time: HostTime,
    /// When the frame is expected on screen.
    pub expected_present: HostTime,
    /// Latest time composition should start to make `expected_present`.
    pub deadline: HostTime,
    /// Pacesetter vsync period.
    pub vsync_period: Duration,
    /// A composite was requested even without scene changes.
    pub composite_forced: bool,
    /// The previous frame had not presented when this one started.
    pub previous_frame_pending: bool,
    /// Compositing would block on an older present fence.
    pub backpressured: bool,
}

/// Timing observation of one presented frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PresentFeedback {
    /// Frame counter.
    pub frame_index: u64,
    /// When commit started.
    pub commit_start: HostTime,
    /// When composite finished.
    pub composite_end: HostTime,
    /// Present time the frame targeted.
    pub expected_present: HostTime,
    /// Present time the hardware reported, if any.
    pub actual_present: Option<HostTime>,
    /// Whether the frame missed its vsync, if determinable.
    pub missed_deadline: Option<bool>,
}

impl PresentFeedback {
    /// Builds feedback for `target`.
    ///
    /// With an actual present time the frame is missed when it landed more
    /// than half a period after the expected present. Without one, finishing
    /// composition after the expected present counts as a miss.
    #[must_use]
    pub fn new(
        target: &FrameTarget,
        commit_start: HostTime,
        composite_end: HostTime,
        actual_present: Option<HostTime>,
    ) -> Self {
        let missed_deadline = match actual_present {
            Some(actual) => {
                Some(actual > target.expected_present.saturating_add(target.vsync_period.half()))
            }
            None => Some(composite_end > target.expected_present),
        };
        Self {
            frame_index: target.frame_index,
            commit_start,
            composite_end,
            expected_present: target.expected_present,
            actual_present,
            missed_deadline,
        }
    }

    /// How late the frame presented, or zero.
    #[must_use]
    pub fn lateness(&self) -> Duration {
        self.actual_present
            .map(|actual| actual.saturating_duration_since(self.expected_present))
            .unwrap_or(Duration::ZERO)
    }
}

/// Feedback waiting on a present fence.
#[derive(Clone, Debug)]
pub struct PendingFeedback {
    /// The frame.
    pub target: FrameTarget,
    /// When commit started.
    pub commit_start: HostTime,
    /// When composite finished.
    pub composite_end: HostTime,
    /// The frame's present fence, if the hardware returned one.
    pub present_fence: Option<Fence>,
}

impl PendingFeedback {
    /// Whether [`resolve`](Self::resolve) would produce feedback now.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.present_fence.as_ref().is_none_or(Fence::is_signaled)
    }

    /// The feedback, once the present fence has signaled.
    ///
    /// A frame without a present fence resolves immediately with no actual
    /// present time.
    #[must_use]
    pub fn resolve(&self) -> Option<PresentFeedback> {
        let actual = match &self.present_fence {
            Some(fence) => Some(fence.signal_time()?),
            None => None,
        };
        Some(PresentFeedback::new(
            &self.target,
            self.commit_start,
            self.composite_end,
            actual,
        ))
    }
}

/// The last two present fences of one display.
#[derive(Clone, Debug, Default)]
pub struct PresentFenceHistory {
    fences: VecDeque<Fence>,
}

impl PresentFenceHistory {
    const DEPTH: usize = 2;

    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the present fence of the newest frame.
    pub fn push(&mut self, fence: Fence) {
        if self.fences.len() == Self::DEPTH {
            self.fences.pop_front();
        }
        self.fences.push_back(fence);
    }

    /// The newest frame has not presented yet.
    #[must_use]
    pub fn previous_frame_pending(&self) -> bool {
        self.fences.back().is_some_and(|f| !f.is_signaled())
    }

    /// The frame before the newest one has not presented yet; compositing
    /// another frame now would queue behind it in the hardware.
    #[must_use]
    pub fn would_backpressure(&self) -> bool {
        self.fences.len() == Self::DEPTH && self.fences.front().is_some_and(|f| !f.is_signaled())
    }

    /// Forgets every fence, e.g. after a power cycle.
    pub fn clear(&mut self) {
        self.fences.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    fn target() -> FrameTarget {
        FrameTarget {
            frame_index: 3,
            vsync_id: VsyncId(9),
            pacesetter: DisplayId::Physical(0),
            vsync_time: HostTime(100 * MS),
            expected_present: HostTime(116 * MS),
            deadline: HostTime(108 * MS),
            vsync_period: Duration::from_millis(16),
            composite_forced: false,
            previous_frame_pending: false,
            backpressured: false,
        }
    }

    #[test]
    fn missed_deadline_uses_half_period_tolerance() {
        let t = target();
        let on_time =
            PresentFeedback::new(&t, HostTime(100 * MS), HostTime(105 * MS), Some(HostTime(120 * MS)));
        assert_eq!(on_time.missed_deadline, Some(false));
        assert_eq!(on_time.lateness(), Duration::from_millis(4));

        let late =
            PresentFeedback::new(&t, HostTime(100 * MS), HostTime(105 * MS), Some(HostTime(132 * MS)));
        assert_eq!(late.missed_deadline, Some(true));
    }

    #[test]
    fn without_actual_present_composite_end_decides() {
        let t = target();
        let fb = PresentFeedback::new(&t, HostTime(100 * MS), HostTime(117 * MS), None);
        assert_eq!(fb.missed_deadline, Some(true));
        assert_eq!(fb.lateness(), Duration::ZERO);
    }

    #[test]
    fn pending_feedback_waits_for_fence() {
        let fence = Fence::pending();
        let pending = PendingFeedback {
            target: target(),
            commit_start: HostTime(100 * MS),
            composite_end: HostTime(104 * MS),
            present_fence: Some(fence.clone()),
        };
        assert!(!pending.is_ready());
        assert_eq!(pending.resolve(), None);

        fence.signal(HostTime(116 * MS));
        let fb = pending.resolve().unwrap();
        assert_eq!(fb.actual_present, Some(HostTime(116 * MS)));
        assert_eq!(fb.missed_deadline, Some(false));
    }

    #[test]
    fn backpressure_looks_two_frames_back() {
        let mut history = PresentFenceHistory::new();
        let older = Fence::pending();
        history.push(older.clone());
        assert!(history.previous_frame_pending());
        assert!(!history.would_backpressure());

        history.push(Fence::signaled(HostTime(1)));
        assert!(!history.previous_frame_pending());
        assert!(history.would_backpressure());

        older.signal(HostTime(2));
        assert!(!history.would_backpressure());
    }
}
