// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Optional observers of the frame pipeline.
//!
//! Both hooks are advisory. The pipeline behaves the same with or without
//! them, and never waits on them.

use lamina_core::display::ModeEvent;
use lamina_core::scheduler::Jank;
use lamina_core::time::{Duration, HostTime};
use lamina_core::timing::PresentFeedback;

/// Timing of one frame, reported to a [`WorkloadHintSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkloadHint {
    /// Frame counter.
    pub frame_index: u64,
    /// When commit started.
    pub commit_start: HostTime,
    /// When composite finished, or commit if nothing was composited.
    pub composite_end: HostTime,
    /// When the frame should reach the screen.
    pub expected_present: HostTime,
    /// Pacesetter vsync period.
    pub vsync_period: Duration,
}

impl WorkloadHint {
    /// Time the main thread spent on the frame.
    #[must_use]
    pub fn work_duration(&self) -> Duration {
        self.composite_end.saturating_duration_since(self.commit_start)
    }
}

/// Receives per-frame workload hints, typically for a power or thermal
/// policy.
pub trait WorkloadHintSink {
    /// One frame finished on the main thread.
    fn report_actual_work(&mut self, hint: &WorkloadHint);

    /// The target duration for upcoming frames changed, e.g. after a mode
    /// switch.
    fn update_target_work_duration(&mut self, target: Duration) {
        _ = target;
    }
}

/// Receives present feedback, jank and display mode notifications.
pub trait FrameListener {
    /// A composited frame's present fence resolved.
    ///
    /// Frames are reported in order, once each.
    fn on_present(&mut self, feedback: &PresentFeedback) {
        _ = feedback;
    }

    /// A frame presented after its vsync.
    fn on_jank(&mut self, jank: &Jank) {
        _ = jank;
    }

    /// A display mode changed or a mode request was rejected.
    fn on_mode_event(&mut self, event: &ModeEvent) {
        _ = event;
    }
}
