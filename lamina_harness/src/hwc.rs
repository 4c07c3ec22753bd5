// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scripted hardware composer.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use lamina_core::display::{DisplayMode, ModeConstraints, ModeTimeline, PowerMode};
use lamina_core::error::HalError;
use lamina_core::fence::Fence;
use lamina_core::hal::{
    DeviceCompositionChanges, HalCapabilities, HwComposer, LayerComposition, PresentResult,
};
use lamina_core::id::{DisplayId, LayerId, ModeId};
use lamina_core::time::{Clock, HostTime};
use parking_lot::Mutex;
use tracing::trace;

/// One call the pipeline made into the fake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HwcCall {
    /// `set_power_mode`.
    SetPowerMode {
        /// Display.
        display: DisplayId,
        /// Requested state.
        mode: PowerMode,
    },
    /// `set_vsync_enabled`.
    SetVsyncEnabled {
        /// Display.
        display: DisplayId,
        /// On or off.
        enabled: bool,
    },
    /// `set_active_mode_with_constraints`.
    SetActiveMode {
        /// Display.
        display: DisplayId,
        /// Requested mode.
        mode: ModeId,
        /// Whether the switch had to be seamless.
        seamless_required: bool,
    },
    /// `get_device_composition_changes`.
    Validate {
        /// Display.
        display: DisplayId,
        /// Layers offered, in order.
        layers: Vec<LayerId>,
    },
    /// `present_and_get_release_fences`.
    Present {
        /// Display.
        display: DisplayId,
    },
}

/// How present fences returned by the fake behave.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FenceMode {
    /// Signaled at the clock's time of the present.
    #[default]
    Immediate,
    /// Left pending; the test signals them through
    /// [`FakeHwc::present_fences`].
    Manual,
}

#[derive(Clone, Debug)]
struct FakeDisplay {
    modes: Vec<DisplayMode>,
    active: ModeId,
    power: PowerMode,
    vsync_enabled: bool,
    presents: Vec<Fence>,
}

#[derive(Default)]
struct State {
    capabilities: HalCapabilities,
    displays: BTreeMap<DisplayId, FakeDisplay>,
    calls: Vec<HwcCall>,
    mode_results: VecDeque<Result<ModeTimeline, HalError>>,
    composition_changes: VecDeque<DeviceCompositionChanges>,
    present_errors: VecDeque<(DisplayId, HalError)>,
    fence_mode: FenceMode,
}

/// A scripted [`HwComposer`].
///
/// Unless scripted otherwise, mode-sets complete immediately without a
/// refresh, validation changes nothing and presents succeed.
#[derive(Clone)]
pub struct FakeHwc {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for FakeHwc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeHwc")
            .field("displays", &state.displays.keys().collect::<Vec<_>>())
            .field("calls", &state.calls.len())
            .finish_non_exhaustive()
    }
}

impl FakeHwc {
    /// A fake with no displays, timestamping fences with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    // -- Scripting --

    /// Connects a display with its mode list.
    pub fn add_display(&self, display: DisplayId, modes: Vec<DisplayMode>, active: ModeId) {
        self.state.lock().displays.insert(
            display,
            FakeDisplay {
                modes,
                active,
                power: PowerMode::Off,
                vsync_enabled: false,
                presents: Vec::new(),
            },
        );
    }

    /// Disconnects a display; later calls for it fail with `BadDisplay`.
    pub fn remove_display(&self, display: DisplayId) {
        self.state.lock().displays.remove(&display);
    }

    /// Sets the advertised capabilities.
    pub fn set_capabilities(&self, capabilities: HalCapabilities) {
        self.state.lock().capabilities = capabilities;
    }

    /// Sets how present fences behave.
    pub fn set_fence_mode(&self, mode: FenceMode) {
        self.state.lock().fence_mode = mode;
    }

    /// Queues the answer to the next mode-set.
    pub fn push_mode_result(&self, result: Result<ModeTimeline, HalError>) {
        self.state.lock().mode_results.push_back(result);
    }

    /// Queues the answer to the next validation.
    pub fn push_composition_changes(&self, changes: DeviceCompositionChanges) {
        self.state.lock().composition_changes.push_back(changes);
    }

    /// Makes the next present on `display` fail.
    pub fn fail_next_present(&self, display: DisplayId, error: HalError) {
        self.state.lock().present_errors.push_back((display, error));
    }

    // -- Inspection --

    /// Every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<HwcCall> {
        self.state.lock().calls.clone()
    }

    /// Takes the call log.
    pub fn take_calls(&self) -> Vec<HwcCall> {
        std::mem::take(&mut self.state.lock().calls)
    }

    /// Modes requested from the HAL, in order.
    #[must_use]
    pub fn mode_sets(&self) -> Vec<ModeId> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                HwcCall::SetActiveMode { mode, .. } => Some(*mode),
                _ => None,
            })
            .collect()
    }

    /// Number of presents on `display`.
    #[must_use]
    pub fn present_count(&self, display: DisplayId) -> usize {
        self.state
            .lock()
            .displays
            .get(&display)
            .map_or(0, |d| d.presents.len())
    }

    /// Present fences handed out for `display`, oldest first.
    #[must_use]
    pub fn present_fences(&self, display: DisplayId) -> Vec<Fence> {
        self.state
            .lock()
            .displays
            .get(&display)
            .map(|d| d.presents.clone())
            .unwrap_or_default()
    }

    /// The power state last set on `display`.
    #[must_use]
    pub fn power_mode(&self, display: DisplayId) -> Option<PowerMode> {
        self.state.lock().displays.get(&display).map(|d| d.power)
    }

    /// Whether vsync callbacks are on for `display`.
    #[must_use]
    pub fn vsync_enabled(&self, display: DisplayId) -> bool {
        self.state
            .lock()
            .displays
            .get(&display)
            .is_some_and(|d| d.vsync_enabled)
    }

    /// The mode the fake display runs.
    #[must_use]
    pub fn hal_active_mode(&self, display: DisplayId) -> Option<ModeId> {
        self.state.lock().displays.get(&display).map(|d| d.active)
    }

    fn now(&self) -> HostTime {
        self.clock.now()
    }
}

impl State {
    fn display(&mut self, display: DisplayId) -> Result<&mut FakeDisplay, HalError> {
        self.displays
            .get_mut(&display)
            .ok_or(HalError::BadDisplay(display))
    }
}

impl HwComposer for FakeHwc {
    fn capabilities(&self) -> HalCapabilities {
        self.state.lock().capabilities
    }

    fn display_modes(&mut self, display: DisplayId) -> Result<Vec<DisplayMode>, HalError> {
        Ok(self.state.lock().display(display)?.modes.clone())
    }

    fn active_mode(&mut self, display: DisplayId) -> Result<ModeId, HalError> {
        Ok(self.state.lock().display(display)?.active)
    }

    fn set_power_mode(&mut self, display: DisplayId, mode: PowerMode) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.calls.push(HwcCall::SetPowerMode { display, mode });
        state.display(display)?.power = mode;
        Ok(())
    }

    fn set_vsync_enabled(&mut self, display: DisplayId, enabled: bool) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.calls.push(HwcCall::SetVsyncEnabled { display, enabled });
        state.display(display)?.vsync_enabled = enabled;
        Ok(())
    }

    fn set_active_mode_with_constraints(
        &mut self,
        display: DisplayId,
        mode: ModeId,
        constraints: &ModeConstraints,
    ) -> Result<ModeTimeline, HalError> {
        let mut state = self.state.lock();
        state.calls.push(HwcCall::SetActiveMode {
            display,
            mode,
            seamless_required: constraints.seamless_required,
        });
        let scripted = state.mode_results.pop_front();
        let target = state.display(display)?;
        if !target.modes.iter().any(|m| m.id == mode) {
            return Err(HalError::BadConfig(mode.0));
        }
        let timeline = scripted.unwrap_or(Ok(ModeTimeline::immediate(constraints.desired_time)))?;
        target.active = mode;
        Ok(timeline)
    }

    fn get_device_composition_changes(
        &mut self,
        display: DisplayId,
        layers: &[LayerComposition],
    ) -> Result<DeviceCompositionChanges, HalError> {
        let mut state = self.state.lock();
        state.calls.push(HwcCall::Validate {
            display,
            layers: layers.iter().map(|l| l.layer).collect(),
        });
        state.display(display)?;
        Ok(state.composition_changes.pop_front().unwrap_or_default())
    }

    fn present_and_get_release_fences(&mut self, display: DisplayId) -> Result<PresentResult, HalError> {
        let now = self.now();
        let mut state = self.state.lock();
        state.calls.push(HwcCall::Present { display });
        if let Some(i) = state.present_errors.iter().position(|(d, _)| *d == display) {
            if let Some((_, error)) = state.present_errors.remove(i) {
                return Err(error);
            }
        }
        let fence = match state.fence_mode {
            FenceMode::Immediate => Fence::signaled(now),
            FenceMode::Manual => Fence::pending(),
        };
        state.display(display)?.presents.push(fence.clone());
        let display_id = &display;
        trace!(display = ?display_id, "fake present");
        Ok(PresentResult {
            present_fence: fence,
            release_fences: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use lamina_core::time::Fps;

    use super::*;
    use crate::ManualClock;

    const D: DisplayId = DisplayId::Physical(0);

    fn fake() -> FakeHwc {
        let hwc = FakeHwc::new(Arc::new(ManualClock::new(HostTime(7))));
        hwc.add_display(
            D,
            vec![
                DisplayMode::new(ModeId(0), 100, 100, Fps::from_hz(60)),
                DisplayMode::new(ModeId(1), 100, 100, Fps::from_hz(120)),
            ],
            ModeId(0),
        );
        hwc
    }

    #[test]
    fn mode_sets_are_logged_and_applied() {
        let mut hwc = fake();
        let constraints = ModeConstraints {
            desired_time: HostTime(0),
            seamless_required: true,
        };
        let timeline = hwc.set_active_mode_with_constraints(D, ModeId(1), &constraints);
        assert_eq!(timeline, Ok(ModeTimeline::immediate(HostTime(0))));
        assert_eq!(hwc.hal_active_mode(D), Some(ModeId(1)));
        assert_eq!(
            hwc.set_active_mode_with_constraints(D, ModeId(9), &constraints),
            Err(HalError::BadConfig(9))
        );
        assert_eq!(hwc.mode_sets(), vec![ModeId(1), ModeId(9)]);
    }

    #[test]
    fn scripted_present_failure_is_one_shot() {
        let mut hwc = fake();
        hwc.fail_next_present(D, HalError::NoResources);
        assert_eq!(
            hwc.present_and_get_release_fences(D),
            Err(HalError::NoResources)
        );
        let ok = hwc.present_and_get_release_fences(D);
        assert_eq!(
            ok.map(|r| r.present_fence.signal_time()),
            Ok(Some(HostTime(7)))
        );
        assert_eq!(hwc.present_count(D), 1);
    }

    #[test]
    fn manual_fences_stay_pending() {
        let mut hwc = fake();
        hwc.set_fence_mode(FenceMode::Manual);
        assert!(hwc.present_and_get_release_fences(D).is_ok());
        let fences = hwc.present_fences(D);
        assert!(!fences[0].is_signaled());
        fences[0].signal(HostTime(9));
        assert!(hwc.present_fences(D)[0].is_signaled(), "clones share the fence");
    }

    #[test]
    fn unknown_display_is_bad_display() {
        let mut hwc = fake();
        let other = DisplayId::Physical(4);
        assert_eq!(hwc.active_mode(other), Err(HalError::BadDisplay(other)));
    }
}
