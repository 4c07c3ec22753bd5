// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-display mode switch state machine.
//!
//! A switch moves through three slots per display:
//!
//! - **desired**: requested, not yet sent to the HAL. A newer request
//!   overwrites it.
//! - **pending**: sent to the HAL with [`ModeConstraints`]. When the HAL's
//!   [`ModeTimeline`] requires a refresh, a frame has to go out before the
//!   switch can finalize. A pending mode-set always runs to completion; a
//!   request arriving meanwhile waits in **desired** and is sent once the
//!   pending one has finalized.
//! - **active**: what the display runs.
//!
//! The frame driver calls [`finalize_mode_changes`] and
//! [`initiate_mode_changes`] once per commit and
//! [`on_frame_composited`] after each composite.
//!
//! [`finalize_mode_changes`]: DisplayModeController::finalize_mode_changes
//! [`initiate_mode_changes`]: DisplayModeController::initiate_mode_changes
//! [`on_frame_composited`]: DisplayModeController::on_frame_composited

use std::collections::BTreeMap;

use tracing::{debug, error, trace};

use crate::error::ModeError;
use crate::fence::Fence;
use crate::hal::HwComposer;
use crate::id::{DisplayId, ModeId};
use crate::time::HostTime;

use super::mode::{
    ActiveMode, DesiredModeAction, DisplayMode, DisplayModeRequest, ModeConstraints, ModeEvent,
    ModePhase, ModeTimeline,
};

/// A mode-set the HAL has accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingModeChange {
    /// The request being applied.
    pub request: DisplayModeRequest,
    /// Target mode.
    pub mode: DisplayMode,
    /// When the HAL applies it.
    pub timeline: ModeTimeline,
    /// Present fence of the first frame composed in the new mode.
    pub applied_fence: Option<Fence>,
    frame_applied: bool,
}

impl PendingModeChange {
    /// Whether the switch can finalize.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.timeline.refresh_required || self.frame_applied
    }
}

/// Result of [`DisplayModeController::initiate_mode_changes`] for one display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeInitiation {
    /// The HAL accepted the mode-set.
    Initiated {
        /// Display.
        display: DisplayId,
        /// Target mode.
        mode: DisplayMode,
        /// When it applies.
        timeline: ModeTimeline,
    },
    /// The resolution differs from the display size; waiting for a size
    /// transaction before mode-setting.
    AwaitingResize {
        /// Display.
        display: DisplayId,
        /// Target mode.
        mode: DisplayMode,
    },
    /// The resolution changed without a size transaction. The switch is
    /// final and the display must be recreated at the new size.
    Recreate {
        /// Display.
        display: DisplayId,
        /// New mode.
        mode: DisplayMode,
    },
    /// The HAL refused; the request is dropped.
    Rejected {
        /// Display.
        display: DisplayId,
        /// Why.
        error: ModeError,
    },
}

#[derive(Clone, Debug)]
struct DisplayModes {
    modes: Vec<DisplayMode>,
    active: ActiveMode,
    desired: Option<DisplayModeRequest>,
    pending: Option<PendingModeChange>,
    synced_resolution_switch: bool,
}

impl DisplayModes {
    fn find(&self, id: ModeId) -> Option<DisplayMode> {
        self.modes.iter().copied().find(|m| m.id == id)
    }
}

/// Mode switch state of every physical display.
#[derive(Clone, Debug)]
pub struct DisplayModeController {
    displays: BTreeMap<DisplayId, DisplayModes>,
    events: Vec<ModeEvent>,
    report_rejections: bool,
}

impl DisplayModeController {
    /// Creates a controller. With `report_rejections`, HAL refusals surface
    /// as [`ModeEvent::Rejected`].
    #[must_use]
    pub fn new(report_rejections: bool) -> Self {
        Self {
            displays: BTreeMap::new(),
            events: Vec::new(),
            report_rejections,
        }
    }

    /// Registers a display with the modes the HAL reported.
    ///
    /// # Errors
    ///
    /// [`ModeError::UnknownMode`] if `active` is not among `modes`.
    pub fn register_display(
        &mut self,
        display: DisplayId,
        modes: Vec<DisplayMode>,
        active: ModeId,
    ) -> Result<(), ModeError> {
        let Some(mode) = modes.iter().copied().find(|m| m.id == active) else {
            return Err(ModeError::UnknownMode {
                display,
                mode: active,
            });
        };
        self.displays.insert(
            display,
            DisplayModes {
                modes,
                active: ActiveMode {
                    mode,
                    render_rate: mode.vsync_rate,
                },
                desired: None,
                pending: None,
                synced_resolution_switch: false,
            },
        );
        Ok(())
    }

    /// Forgets a display and any switch in flight.
    pub fn unregister_display(&mut self, display: DisplayId) {
        self.displays.remove(&display);
    }

    /// With `synced`, a resolution change waits for a display size
    /// transaction instead of recreating the display.
    pub fn set_synced_resolution_switch(&mut self, display: DisplayId, synced: bool) {
        if let Some(entry) = self.displays.get_mut(&display) {
            entry.synced_resolution_switch = synced;
        }
    }

    /// Requests a mode switch.
    ///
    /// A request may replace an earlier desired one. While a mode-set is in
    /// flight, a different request is queued as the next desired mode.
    ///
    /// # Errors
    ///
    /// [`ModeError::UnknownDisplay`] or [`ModeError::UnknownMode`].
    pub fn set_desired_mode(
        &mut self,
        display: DisplayId,
        request: DisplayModeRequest,
    ) -> Result<DesiredModeAction, ModeError> {
        let entry = self
            .displays
            .get_mut(&display)
            .ok_or(ModeError::UnknownDisplay(display))?;
        let mode = entry.find(request.mode).ok_or(ModeError::UnknownMode {
            display,
            mode: request.mode,
        })?;
        let render_rate = request.render_rate.unwrap_or(mode.vsync_rate);
        let request = DisplayModeRequest {
            render_rate: Some(render_rate),
            ..request
        };

        if !request.force && entry.pending.is_none() && mode.id == entry.active.mode.id {
            entry.desired = None;
            if render_rate == entry.active.render_rate {
                let display_id = &display;
                trace!(display = ?display_id, mode = ?mode.id, "mode already active");
                return Ok(DesiredModeAction::None);
            }
            entry.active.render_rate = render_rate;
            let display_id = &display;
            debug!(display = ?display_id, ?render_rate, "render rate switch");
            if request.emit_event {
                self.events.push(ModeEvent::Changed {
                    display,
                    mode: mode.id,
                    render_rate,
                });
            }
            return Ok(DesiredModeAction::InitiateRenderRateSwitch);
        }

        if let Some(pending) = &entry.pending {
            if !request.force && pending.request == request {
                entry.desired = None;
                return Ok(DesiredModeAction::None);
            }
            let display_id = &display;
            debug!(
                display = ?display_id,
                in_flight = ?pending.mode.id,
                next = ?mode.id,
                "mode queued behind in-flight mode-set"
            );
        }
        let display_id = &display;
        debug!(display = ?display_id, mode = ?mode.id, "desired mode set");
        entry.desired = Some(request);
        Ok(DesiredModeAction::InitiateDisplayModeSwitch)
    }

    /// Drops a request that has not reached the HAL yet.
    pub fn clear_desired_mode(&mut self, display: DisplayId) -> Option<DisplayModeRequest> {
        self.displays.get_mut(&display)?.desired.take()
    }

    /// Sends every desired mode to the HAL.
    ///
    /// `display_size` reports each display's committed framebuffer size.
    pub fn initiate_mode_changes(
        &mut self,
        hal: &mut dyn HwComposer,
        display_size: impl Fn(DisplayId) -> Option<(u32, u32)>,
        now: HostTime,
    ) -> Vec<ModeInitiation> {
        let mut out = Vec::new();
        for (&display, entry) in &mut self.displays {
            let Some(request) = entry.desired else {
                continue;
            };
            if let Some(pending) = &entry.pending {
                let display_id = &display;
                trace!(
                    display = ?display_id,
                    in_flight = ?pending.mode.id,
                    "desired mode waits for in-flight mode-set"
                );
                continue;
            }
            let Some(mode) = entry.find(request.mode) else {
                entry.desired = None;
                continue;
            };
            let resized = display_size(display).is_some_and(|size| size != mode.resolution());
            if resized && entry.synced_resolution_switch {
                let display_id = &display;
                trace!(display = ?display_id, mode = ?mode.id, "mode-set waits for resize");
                out.push(ModeInitiation::AwaitingResize { display, mode });
                continue;
            }

            entry.desired = None;
            let constraints = ModeConstraints {
                desired_time: now,
                seamless_required: !request.force && mode.group == entry.active.mode.group,
            };
            let timeline = match hal.set_active_mode_with_constraints(display, mode.id, &constraints) {
                Ok(timeline) => timeline,
                Err(source) => {
                    let err = ModeError::Rejected {
                        mode: mode.id,
                        source,
                    };
                    let display_id = &display;
                    error!(display = ?display_id, %err, "mode-set rejected");
                    if self.report_rejections {
                        self.events.push(ModeEvent::Rejected {
                            display,
                            error: err,
                        });
                    }
                    out.push(ModeInitiation::Rejected {
                        display,
                        error: err,
                    });
                    continue;
                }
            };

            if resized {
                let display_id = &display;
                debug!(display = ?display_id, mode = ?mode.id, "resolution change recreates display");
                let render_rate = request.render_rate.unwrap_or(mode.vsync_rate);
                entry.active = ActiveMode { mode, render_rate };
                entry.pending = None;
                if request.emit_event {
                    self.events.push(ModeEvent::Changed {
                        display,
                        mode: mode.id,
                        render_rate,
                    });
                }
                out.push(ModeInitiation::Recreate { display, mode });
                continue;
            }

            let display_id = &display;
            debug!(
                display = ?display_id,
                mode = ?mode.id,
                refresh_required = timeline.refresh_required,
                "mode-set initiated"
            );
            entry.pending = Some(PendingModeChange {
                request,
                mode,
                timeline,
                applied_fence: None,
                frame_applied: false,
            });
            out.push(ModeInitiation::Initiated {
                display,
                mode,
                timeline,
            });
        }
        out
    }

    /// Records that a frame was composed on `display`.
    pub fn on_frame_composited(&mut self, display: DisplayId, present_fence: Option<Fence>) {
        let Some(pending) = self
            .displays
            .get_mut(&display)
            .and_then(|e| e.pending.as_mut())
        else {
            return;
        };
        if pending.frame_applied {
            return;
        }
        pending.frame_applied = true;
        pending.applied_fence = present_fence;
    }

    /// Updates the timeline of an in-flight mode-set.
    pub fn on_timeline_changed(&mut self, display: DisplayId, timeline: ModeTimeline) {
        if let Some(pending) = self
            .displays
            .get_mut(&display)
            .and_then(|e| e.pending.as_mut())
        {
            pending.timeline = timeline;
        }
    }

    /// An unsignaled present fence of a frame composed in a new mode.
    /// Commits wait for it, up to a bounded number of deferrals.
    #[must_use]
    pub fn unsignaled_mode_fence(&self) -> Option<(DisplayId, &Fence)> {
        self.displays.iter().find_map(|(&display, e)| {
            let fence = e.pending.as_ref()?.applied_fence.as_ref()?;
            (!fence.is_signaled()).then_some((display, fence))
        })
    }

    /// Finalizes every ready mode-set. Returns the displays whose mode
    /// changed.
    pub fn finalize_mode_changes(&mut self) -> Vec<(DisplayId, DisplayMode)> {
        let mut finalized = Vec::new();
        for (&display, entry) in &mut self.displays {
            if !entry.pending.as_ref().is_some_and(PendingModeChange::is_ready) {
                continue;
            }
            let Some(pending) = entry.pending.take() else {
                continue;
            };
            let render_rate = pending.request.render_rate.unwrap_or(pending.mode.vsync_rate);
            entry.active = ActiveMode {
                mode: pending.mode,
                render_rate,
            };
            let display_id = &display;
            debug!(display = ?display_id, mode = ?pending.mode.id, "mode-set finalized");
            if pending.request.emit_event {
                self.events.push(ModeEvent::Changed {
                    display,
                    mode: pending.mode.id,
                    render_rate,
                });
            }
            finalized.push((display, pending.mode));
        }
        finalized
    }

    /// Where `display` is in a switch. An in-flight mode-set takes precedence
    /// over a request queued behind it.
    #[must_use]
    pub fn phase(&self, display: DisplayId) -> Option<ModePhase> {
        let entry = self.displays.get(&display)?;
        Some(match (&entry.pending, &entry.desired) {
            (Some(p), _) if p.frame_applied => ModePhase::PendingApply(p.mode.id),
            (Some(p), _) => ModePhase::Initiated(p.mode.id),
            (None, Some(desired)) => ModePhase::DesiredSet(desired.mode),
            (None, None) => ModePhase::Stable(entry.active.mode.id),
        })
    }

    /// The mode `display` runs.
    #[must_use]
    pub fn active_mode(&self, display: DisplayId) -> Option<ActiveMode> {
        self.displays.get(&display).map(|e| e.active)
    }

    /// The request waiting for the next commit.
    #[must_use]
    pub fn desired_mode(&self, display: DisplayId) -> Option<DisplayModeRequest> {
        self.displays.get(&display)?.desired
    }

    /// The mode-set in flight.
    #[must_use]
    pub fn pending_mode(&self, display: DisplayId) -> Option<&PendingModeChange> {
        self.displays.get(&display)?.pending.as_ref()
    }

    /// Modes `display` supports.
    #[must_use]
    pub fn modes(&self, display: DisplayId) -> &[DisplayMode] {
        self.displays.get(&display).map_or(&[], |e| &e.modes)
    }

    /// Whether any display has a desired or in-flight switch.
    #[must_use]
    pub fn has_mode_change_pending(&self) -> bool {
        self.displays
            .values()
            .any(|e| e.desired.is_some() || e.pending.is_some())
    }

    /// Takes events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<ModeEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Default for DisplayModeController {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::PowerMode;
    use crate::error::HalError;
    use crate::hal::{
        DeviceCompositionChanges, HalCapabilities, LayerComposition, PresentResult,
    };
    use crate::time::Fps;

    const PRIMARY: DisplayId = DisplayId::Physical(0);
    const M60: ModeId = ModeId(0);
    const M90: ModeId = ModeId(1);
    const M120: ModeId = ModeId(2);
    const M4K: ModeId = ModeId(3);

    #[derive(Default)]
    struct Hal {
        mode_sets: Vec<ModeId>,
        refresh_required: bool,
        reject: Option<HalError>,
    }

    impl HwComposer for Hal {
        fn capabilities(&self) -> HalCapabilities {
            HalCapabilities::empty()
        }
        fn display_modes(&mut self, _: DisplayId) -> Result<Vec<DisplayMode>, HalError> {
            Ok(modes())
        }
        fn active_mode(&mut self, _: DisplayId) -> Result<ModeId, HalError> {
            Ok(M60)
        }
        fn set_power_mode(&mut self, _: DisplayId, _: PowerMode) -> Result<(), HalError> {
            Ok(())
        }
        fn set_vsync_enabled(&mut self, _: DisplayId, _: bool) -> Result<(), HalError> {
            Ok(())
        }
        fn set_active_mode_with_constraints(
            &mut self,
            _: DisplayId,
            mode: ModeId,
            constraints: &ModeConstraints,
        ) -> Result<ModeTimeline, HalError> {
            if let Some(err) = self.reject {
                return Err(err);
            }
            self.mode_sets.push(mode);
            Ok(ModeTimeline {
                new_vsync_applied_time: constraints.desired_time,
                refresh_required: self.refresh_required,
                refresh_time: constraints.desired_time,
            })
        }
        fn get_device_composition_changes(
            &mut self,
            _: DisplayId,
            _: &[LayerComposition],
        ) -> Result<DeviceCompositionChanges, HalError> {
            Ok(DeviceCompositionChanges::default())
        }
        fn present_and_get_release_fences(&mut self, _: DisplayId) -> Result<PresentResult, HalError> {
            Err(HalError::Unsupported)
        }
    }

    fn modes() -> Vec<DisplayMode> {
        vec![
            DisplayMode::new(M60, 1080, 1920, Fps::from_hz(60)),
            DisplayMode::new(M90, 1080, 1920, Fps::from_hz(90)),
            DisplayMode::new(M120, 1080, 1920, Fps::from_hz(120)),
            DisplayMode::new(M4K, 2160, 3840, Fps::from_hz(60)).with_group(1),
        ]
    }

    fn controller() -> DisplayModeController {
        let mut c = DisplayModeController::new(true);
        c.register_display(PRIMARY, modes(), M60).unwrap();
        c
    }

    fn size(_: DisplayId) -> Option<(u32, u32)> {
        Some((1080, 1920))
    }

    /// One commit: finalize what is ready, then initiate what is desired,
    /// then finalize switches that need no frame.
    fn commit(c: &mut DisplayModeController, hal: &mut Hal) -> Vec<ModeInitiation> {
        c.finalize_mode_changes();
        let initiated = c.initiate_mode_changes(hal, size, HostTime(0));
        c.finalize_mode_changes();
        initiated
    }

    #[test]
    fn switch_with_refresh_takes_two_commits() {
        let mut c = controller();
        let mut hal = Hal {
            refresh_required: true,
            ..Hal::default()
        };
        assert_eq!(
            c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M90)),
            Ok(DesiredModeAction::InitiateDisplayModeSwitch)
        );
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::DesiredSet(M90)));

        commit(&mut c, &mut hal);
        assert_eq!(hal.mode_sets, vec![M90]);
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Initiated(M90)));
        assert!(c.take_events().is_empty());

        c.on_frame_composited(PRIMARY, Some(Fence::signaled(HostTime(5))));
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::PendingApply(M90)));

        commit(&mut c, &mut hal);
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Stable(M90)));
        assert_eq!(hal.mode_sets, vec![M90]);
        assert_eq!(
            c.take_events(),
            vec![ModeEvent::Changed {
                display: PRIMARY,
                mode: M90,
                render_rate: Fps::from_hz(90),
            }]
        );
    }

    #[test]
    fn switch_without_refresh_settles_in_one_commit() {
        let mut c = controller();
        let mut hal = Hal::default();
        c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M120)).unwrap();
        commit(&mut c, &mut hal);
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Stable(M120)));
        assert_eq!(c.take_events().len(), 1);
    }

    #[test]
    fn later_request_waits_for_in_flight_switch() {
        let mut c = controller();
        let mut hal = Hal {
            refresh_required: true,
            ..Hal::default()
        };
        c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M90)).unwrap();
        commit(&mut c, &mut hal);
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Initiated(M90)));

        assert_eq!(
            c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M120)),
            Ok(DesiredModeAction::InitiateDisplayModeSwitch)
        );
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Initiated(M90)));
        assert_eq!(c.pending_mode(PRIMARY).map(|p| p.mode.id), Some(M90));
        assert_eq!(c.desired_mode(PRIMARY).map(|r| r.mode), Some(M120));

        commit(&mut c, &mut hal);
        assert_eq!(
            hal.mode_sets,
            vec![M90],
            "no second mode-set while one is in flight"
        );
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Initiated(M90)));

        c.on_frame_composited(PRIMARY, None);
        commit(&mut c, &mut hal);
        assert_eq!(c.active_mode(PRIMARY).map(|a| a.mode.id), Some(M90));
        assert_eq!(hal.mode_sets, vec![M90, M120]);
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Initiated(M120)));

        c.on_frame_composited(PRIMARY, None);
        commit(&mut c, &mut hal);
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Stable(M120)));
        let modes: Vec<_> = c
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                ModeEvent::Changed { mode, .. } => Some(mode),
                ModeEvent::Rejected { .. } => None,
            })
            .collect();
        assert_eq!(modes, vec![M90, M120], "both switches finalize in order");
    }

    #[test]
    fn repeating_the_in_flight_request_is_a_no_op() {
        let mut c = controller();
        let mut hal = Hal {
            refresh_required: true,
            ..Hal::default()
        };
        c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M90)).unwrap();
        commit(&mut c, &mut hal);
        assert_eq!(
            c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M90)),
            Ok(DesiredModeAction::None)
        );
        assert_eq!(c.desired_mode(PRIMARY), None);
    }

    #[test]
    fn active_mode_request_is_bookkeeping_only() {
        let mut c = controller();
        let mut hal = Hal::default();
        assert_eq!(
            c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M60)),
            Ok(DesiredModeAction::None)
        );
        commit(&mut c, &mut hal);
        assert!(hal.mode_sets.is_empty());
        assert!(c.take_events().is_empty());

        assert_eq!(
            c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M60).force()),
            Ok(DesiredModeAction::InitiateDisplayModeSwitch)
        );
        commit(&mut c, &mut hal);
        assert_eq!(hal.mode_sets, vec![M60]);
    }

    #[test]
    fn render_rate_switch_applies_immediately() {
        let mut c = controller();
        c.register_display(PRIMARY, modes(), M120).unwrap();
        assert_eq!(
            c.set_desired_mode(
                PRIMARY,
                DisplayModeRequest::new(M120).render_rate(Fps::from_hz(60))
            ),
            Ok(DesiredModeAction::InitiateRenderRateSwitch)
        );
        assert_eq!(
            c.active_mode(PRIMARY).map(|a| a.render_rate),
            Some(Fps::from_hz(60))
        );
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Stable(M120)));
        assert_eq!(c.take_events().len(), 1);
    }

    #[test]
    fn rejection_drops_request_and_reports() {
        let mut c = controller();
        let mut hal = Hal {
            reject: Some(HalError::SeamlessNotPossible),
            ..Hal::default()
        };
        c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M90)).unwrap();
        let out = commit(&mut c, &mut hal);
        assert!(matches!(out[..], [ModeInitiation::Rejected { .. }]));
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Stable(M60)));
        assert_eq!(
            c.take_events(),
            vec![ModeEvent::Rejected {
                display: PRIMARY,
                error: ModeError::Rejected {
                    mode: M90,
                    source: HalError::SeamlessNotPossible,
                },
            }]
        );

        let mut quiet = DisplayModeController::new(false);
        quiet.register_display(PRIMARY, modes(), M60).unwrap();
        quiet.set_desired_mode(PRIMARY, DisplayModeRequest::new(M90)).unwrap();
        commit(&mut quiet, &mut hal);
        assert!(quiet.take_events().is_empty());
    }

    #[test]
    fn unsynced_resolution_change_recreates() {
        let mut c = controller();
        let mut hal = Hal::default();
        c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M4K)).unwrap();
        let out = commit(&mut c, &mut hal);
        assert!(matches!(out[..], [ModeInitiation::Recreate { .. }]));
        assert_eq!(hal.mode_sets, vec![M4K]);
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Stable(M4K)));
    }

    #[test]
    fn synced_resolution_change_waits_for_resize() {
        let mut c = controller();
        c.set_synced_resolution_switch(PRIMARY, true);
        let mut hal = Hal::default();
        c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M4K)).unwrap();

        for _ in 0..2 {
            let out = commit(&mut c, &mut hal);
            assert!(matches!(out[..], [ModeInitiation::AwaitingResize { .. }]));
            assert_eq!(c.phase(PRIMARY), Some(ModePhase::DesiredSet(M4K)));
        }
        assert!(hal.mode_sets.is_empty());

        c.finalize_mode_changes();
        let out = c.initiate_mode_changes(&mut hal, |_| Some((2160, 3840)), HostTime(0));
        assert!(matches!(out[..], [ModeInitiation::Initiated { .. }]));
        c.finalize_mode_changes();
        assert_eq!(c.phase(PRIMARY), Some(ModePhase::Stable(M4K)));
    }

    #[test]
    fn unsignaled_fence_is_reported() {
        let mut c = controller();
        let mut hal = Hal {
            refresh_required: true,
            ..Hal::default()
        };
        c.set_desired_mode(PRIMARY, DisplayModeRequest::new(M90)).unwrap();
        commit(&mut c, &mut hal);
        let fence = Fence::pending();
        c.on_frame_composited(PRIMARY, Some(fence.clone()));
        assert_eq!(c.unsignaled_mode_fence().map(|(d, _)| d), Some(PRIMARY));
        fence.signal(HostTime(1));
        assert!(c.unsignaled_mode_fence().is_none());
    }

    #[test]
    fn unknown_targets_are_errors() {
        let mut c = controller();
        assert_eq!(
            c.set_desired_mode(DisplayId::Physical(7), DisplayModeRequest::new(M60)),
            Err(ModeError::UnknownDisplay(DisplayId::Physical(7)))
        );
        assert_eq!(
            c.set_desired_mode(PRIMARY, DisplayModeRequest::new(ModeId(42))),
            Err(ModeError::UnknownMode {
                display: PRIMARY,
                mode: ModeId(42)
            })
        );
    }
}
