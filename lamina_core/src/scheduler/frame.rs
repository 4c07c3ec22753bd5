// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Vsync-aligned frame dispatch.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::id::DisplayId;
use crate::time::{Duration, HostTime};
use crate::timing::FrameTarget;

use super::vsync::{FrameTimeline, VsyncModel, VsyncPrediction, VsyncTokenManager};

/// Dispatch state of the frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    /// Nothing requested.
    Idle,
    /// A frame runs on the next pacesetter vsync.
    Scheduled,
    /// A frame is being committed or composited.
    Dispatching,
}

/// Why a dispatched frame went back to the scheduler.
///
/// Each reason keeps its own count of consecutive deferrals, so waiting on
/// one never uses up the budget of the other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeferReason {
    /// The first frame composed in a new display mode has not presented.
    ModeFence,
    /// The present fence from two frames ago is still pending.
    Backpressure,
}

#[derive(Clone, Copy, Debug)]
struct DisplayTiming {
    model: VsyncModel,
    powered: bool,
    physical: bool,
}

/// Turns vsync events into at most one frame per pacesetter vsync.
///
/// Requests made with [`schedule_commit`](Self::schedule_commit) or
/// [`schedule_frame`](Self::schedule_frame) coalesce until the next dispatch.
/// Requests made while a frame is dispatching schedule the following frame.
///
/// # Pacesetter
///
/// The pacesetter is the pinned display if it is powered, otherwise the
/// powered display with the shortest vsync period (lowest id on ties).
/// Only its vsyncs dispatch frames; other displays' models are kept in sync
/// from their own samples.
#[derive(Debug)]
pub struct FrameScheduler {
    state: SchedulerState,
    displays: BTreeMap<DisplayId, DisplayTiming>,
    pinned: Option<DisplayId>,
    composite_requested: bool,
    requested_while_dispatching: bool,
    last_dispatch: Option<HostTime>,
    frame_index: u64,
    mode_fence_deferrals: u32,
    backpressure_deferrals: u32,
    tokens: VsyncTokenManager,
}

impl FrameScheduler {
    /// Creates an idle scheduler that retains `token_retention` vsync
    /// predictions.
    #[must_use]
    pub fn new(token_retention: usize) -> Self {
        Self {
            state: SchedulerState::Idle,
            displays: BTreeMap::new(),
            pinned: None,
            composite_requested: false,
            requested_while_dispatching: false,
            last_dispatch: None,
            frame_index: 0,
            mode_fence_deferrals: 0,
            backpressure_deferrals: 0,
            tokens: VsyncTokenManager::new(token_retention),
        }
    }

    // -- Displays --

    /// Starts tracking a display's vsync. Displays start powered on.
    pub fn add_display(&mut self, id: DisplayId, anchor: HostTime, period: Duration) {
        self.displays.insert(
            id,
            DisplayTiming {
                model: VsyncModel::new(anchor, period),
                powered: true,
                physical: !id.is_virtual(),
            },
        );
    }

    /// Stops tracking a display.
    pub fn remove_display(&mut self, id: DisplayId) {
        self.displays.remove(&id);
        if self.pinned == Some(id) {
            self.pinned = None;
        }
    }

    /// Records a power change. Powering on re-anchors vsync.
    pub fn set_powered(&mut self, id: DisplayId, powered: bool) {
        if let Some(display) = self.displays.get_mut(&id) {
            if powered && !display.powered {
                let period = display.model.period();
                display.model.resync(period);
            }
            display.powered = powered;
        }
    }

    /// Pins the pacesetter, or clears the pin.
    pub fn pin_pacesetter(&mut self, id: Option<DisplayId>) {
        self.pinned = id;
    }

    /// The display whose vsync drives frames.
    #[must_use]
    pub fn pacesetter(&self) -> Option<DisplayId> {
        if let Some(pinned) = self.pinned
            && self.displays.get(&pinned).is_some_and(|d| d.powered)
        {
            return Some(pinned);
        }
        self.displays
            .iter()
            .filter(|(_, d)| d.powered && d.physical)
            .min_by_key(|(id, d)| (d.model.period(), **id))
            .map(|(id, _)| *id)
    }

    /// The pacesetter's vsync period.
    #[must_use]
    pub fn vsync_period(&self) -> Option<Duration> {
        let id = self.pacesetter()?;
        self.displays.get(&id).map(|d| d.model.period())
    }

    /// The vsync model of a display.
    #[must_use]
    pub fn model(&self, id: DisplayId) -> Option<&VsyncModel> {
        self.displays.get(&id).map(|d| &d.model)
    }

    /// Re-anchors a display's vsync, optionally at a new period, on its next
    /// hardware sample.
    pub fn resync_to_hardware_vsync(&mut self, id: DisplayId, period: Option<Duration>) {
        if let Some(display) = self.displays.get_mut(&id) {
            let period = period.unwrap_or(display.model.period());
            debug!(display = ?id, period = period.nanos(), "resyncing to hardware vsync");
            display.model.resync(period);
        }
    }

    // -- Requests --

    /// Requests a commit on the next vsync. Returns `true` if this call
    /// scheduled a new frame.
    pub fn schedule_commit(&mut self) -> bool {
        match self.state {
            SchedulerState::Idle => {
                self.state = SchedulerState::Scheduled;
                true
            }
            SchedulerState::Scheduled => false,
            SchedulerState::Dispatching => {
                let fresh = !self.requested_while_dispatching;
                self.requested_while_dispatching = true;
                fresh
            }
        }
    }

    /// Requests a commit followed by a composite, even if nothing changed.
    pub fn schedule_frame(&mut self) -> bool {
        self.composite_requested = true;
        self.schedule_commit()
    }

    /// Current dispatch state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    // -- Dispatch --

    /// Feeds a hardware vsync. Returns a frame to run if `display` is the
    /// pacesetter and a frame is scheduled.
    pub fn on_vsync(&mut self, display: DisplayId, timestamp: HostTime) -> Option<FrameTarget> {
        let timing = self.displays.get_mut(&display)?;
        timing.model.add_sample(timestamp);
        if self.pacesetter() != Some(display) {
            return None;
        }
        self.dispatch(display, timestamp)
    }

    /// Synthetic vsync for when hardware vsync is unavailable: dispatches
    /// against the pacesetter's last predicted vsync at or before `now`.
    pub fn on_timer(&mut self, now: HostTime) -> Option<FrameTarget> {
        let display = self.pacesetter()?;
        let timestamp = self.displays.get(&display)?.model.previous_vsync(now);
        self.dispatch(display, timestamp)
    }

    fn dispatch(&mut self, display: DisplayId, timestamp: HostTime) -> Option<FrameTarget> {
        if self.state != SchedulerState::Scheduled {
            return None;
        }
        if self.last_dispatch.is_some_and(|last| last >= timestamp) {
            trace!(timestamp = timestamp.nanos(), "vsync already dispatched");
            return None;
        }
        let period = self.displays.get(&display)?.model.period();
        let expected_present = timestamp.saturating_add(period);
        let deadline = timestamp.saturating_add(period.half());
        let vsync_id = self.tokens.generate(VsyncPrediction {
            deadline,
            present: expected_present,
        });
        self.frame_index += 1;
        self.last_dispatch = Some(timestamp);
        self.state = SchedulerState::Dispatching;
        let composite_forced = std::mem::take(&mut self.composite_requested);
        trace!(
            frame = self.frame_index,
            ?vsync_id,
            expected_present = expected_present.nanos(),
            "dispatching frame"
        );
        Some(FrameTarget {
            frame_index: self.frame_index,
            vsync_id,
            pacesetter: display,
            vsync_time: timestamp,
            expected_present,
            deadline,
            vsync_period: period,
            composite_forced,
            previous_frame_pending: false,
            backpressured: false,
        })
    }

    /// Ends the dispatched frame. A request made during it schedules the next
    /// frame.
    pub fn frame_done(&mut self) {
        self.mode_fence_deferrals = 0;
        self.backpressure_deferrals = 0;
        self.state = if std::mem::take(&mut self.requested_while_dispatching) {
            SchedulerState::Scheduled
        } else {
            SchedulerState::Idle
        };
    }

    /// Gives the dispatched frame back to run on the next vsync, keeping its
    /// forced-composite request. Returns the number of consecutive deferrals
    /// for `reason`.
    pub fn defer(&mut self, target: &FrameTarget, reason: DeferReason) -> u32 {
        let count = self.deferral_count(reason);
        *count += 1;
        let deferrals = *count;
        self.composite_requested |= target.composite_forced;
        self.requested_while_dispatching = false;
        self.state = SchedulerState::Scheduled;
        debug!(frame = target.frame_index, ?reason, deferrals, "frame deferred");
        deferrals
    }

    /// Consecutive deferrals of the current frame request for `reason`.
    #[must_use]
    pub fn deferrals(&self, reason: DeferReason) -> u32 {
        match reason {
            DeferReason::ModeFence => self.mode_fence_deferrals,
            DeferReason::Backpressure => self.backpressure_deferrals,
        }
    }

    /// Resets the count for `reason` once the condition behind it cleared.
    pub fn clear_deferrals(&mut self, reason: DeferReason) {
        *self.deferral_count(reason) = 0;
    }

    fn deferral_count(&mut self, reason: DeferReason) -> &mut u32 {
        match reason {
            DeferReason::ModeFence => &mut self.mode_fence_deferrals,
            DeferReason::Backpressure => &mut self.backpressure_deferrals,
        }
    }

    // -- Tokens --

    /// Predictions behind issued vsync ids.
    #[must_use]
    pub fn tokens(&self) -> &VsyncTokenManager {
        &self.tokens
    }

    /// Frame timelines for clients, derived from the pacesetter.
    pub fn frame_timelines(
        &mut self,
        now: HostTime,
        horizon: Duration,
        work_duration: Duration,
    ) -> Vec<FrameTimeline> {
        let Some(model) = self
            .pacesetter()
            .and_then(|id| self.displays.get(&id))
            .map(|d| d.model)
        else {
            return Vec::new();
        };
        self.tokens
            .frame_timelines(&model, now, horizon, work_duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;
    const INTERNAL: DisplayId = DisplayId::Physical(0);
    const EXTERNAL: DisplayId = DisplayId::Physical(1);

    fn scheduler() -> FrameScheduler {
        let mut s = FrameScheduler::new(8);
        s.add_display(INTERNAL, HostTime(0), Duration::from_millis(16));
        s
    }

    #[test]
    fn repeated_requests_coalesce_into_one_frame() {
        let mut s = scheduler();
        assert!(s.schedule_frame());
        assert!(!s.schedule_frame());
        assert!(!s.schedule_commit());

        let target = s.on_vsync(INTERNAL, HostTime(16 * MS)).unwrap();
        assert!(target.composite_forced);
        assert_eq!(target.expected_present, HostTime(32 * MS));
        assert_eq!(s.state(), SchedulerState::Dispatching);
        assert!(s.on_vsync(INTERNAL, HostTime(16 * MS)).is_none());
        s.frame_done();
        assert_eq!(s.state(), SchedulerState::Idle);
        assert!(s.on_vsync(INTERNAL, HostTime(32 * MS)).is_none());
    }

    #[test]
    fn request_during_dispatch_schedules_next_frame() {
        let mut s = scheduler();
        s.schedule_commit();
        let first = s.on_vsync(INTERNAL, HostTime(16 * MS)).unwrap();
        assert!(!first.composite_forced);
        assert!(s.schedule_commit());
        assert!(!s.schedule_commit());
        s.frame_done();
        assert_eq!(s.state(), SchedulerState::Scheduled);
        let second = s.on_vsync(INTERNAL, HostTime(32 * MS)).unwrap();
        assert_eq!(second.frame_index, first.frame_index + 1);
    }

    #[test]
    fn only_pacesetter_dispatches() {
        let mut s = scheduler();
        s.add_display(EXTERNAL, HostTime(0), Duration::from_millis(8));
        assert_eq!(s.pacesetter(), Some(EXTERNAL));
        s.schedule_commit();
        assert!(s.on_vsync(INTERNAL, HostTime(16 * MS)).is_none());
        assert!(s.on_vsync(EXTERNAL, HostTime(16 * MS)).is_some());

        s.pin_pacesetter(Some(INTERNAL));
        assert_eq!(s.pacesetter(), Some(INTERNAL));
        s.set_powered(INTERNAL, false);
        assert_eq!(s.pacesetter(), Some(EXTERNAL));
    }

    #[test]
    fn deferred_frame_keeps_forced_composite() {
        let mut s = scheduler();
        s.schedule_frame();
        let target = s.on_vsync(INTERNAL, HostTime(16 * MS)).unwrap();
        assert_eq!(s.defer(&target, DeferReason::Backpressure), 1);
        let retry = s.on_vsync(INTERNAL, HostTime(32 * MS)).unwrap();
        assert!(retry.composite_forced);
        assert_eq!(s.defer(&retry, DeferReason::Backpressure), 2);
        let _ = s.on_vsync(INTERNAL, HostTime(48 * MS)).unwrap();
        s.frame_done();
        assert_eq!(s.deferrals(DeferReason::Backpressure), 0);
    }

    #[test]
    fn deferral_reasons_count_separately() {
        let mut s = scheduler();
        s.schedule_commit();
        let mut vsync = 16;
        let mut next = |s: &mut FrameScheduler| {
            let target = s.on_vsync(INTERNAL, HostTime(vsync * MS)).unwrap();
            vsync += 16;
            target
        };
        let t = next(&mut s);
        s.defer(&t, DeferReason::ModeFence);
        let t = next(&mut s);
        s.defer(&t, DeferReason::Backpressure);
        let t = next(&mut s);
        assert_eq!(s.defer(&t, DeferReason::ModeFence), 2);
        let t = next(&mut s);
        assert_eq!(s.defer(&t, DeferReason::Backpressure), 2);

        s.clear_deferrals(DeferReason::ModeFence);
        assert_eq!(s.deferrals(DeferReason::ModeFence), 0);
        assert_eq!(
            s.deferrals(DeferReason::Backpressure),
            2,
            "clearing one reason leaves the other"
        );
        let _ = next(&mut s);
        s.frame_done();
        assert_eq!(s.deferrals(DeferReason::Backpressure), 0);
    }

    #[test]
    fn timer_dispatches_on_predicted_grid() {
        let mut s = scheduler();
        s.schedule_commit();
        let target = s.on_timer(HostTime(40 * MS)).unwrap();
        assert_eq!(target.vsync_time, HostTime(32 * MS));
        assert_eq!(
            s.tokens().get(target.vsync_id).map(|p| p.present),
            Some(HostTime(48 * MS))
        );
    }

    #[test]
    fn resync_applies_new_period() {
        let mut s = scheduler();
        s.resync_to_hardware_vsync(INTERNAL, Some(Duration::from_millis(8)));
        s.schedule_commit();
        let target = s.on_vsync(INTERNAL, HostTime(21 * MS)).unwrap();
        assert_eq!(target.vsync_period, Duration::from_millis(8));
        assert_eq!(s.model(INTERNAL).map(VsyncModel::anchor), Some(HostTime(21 * MS)));
    }
}
