// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display modes and mode requests.

use crate::error::ModeError;
use crate::id::{DisplayId, ModeId};
use crate::time::{Duration, Fps, HostTime};

/// A hardware-supported configuration of a physical display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DisplayMode {
    /// HAL identifier.
    pub id: ModeId,
    /// Horizontal resolution.
    pub width: u32,
    /// Vertical resolution.
    pub height: u32,
    /// Hardware vsync rate.
    pub vsync_rate: Fps,
    /// Modes in the same group switch seamlessly.
    pub group: u32,
}

impl DisplayMode {
    /// A mode in group 0.
    #[must_use]
    pub const fn new(id: ModeId, width: u32, height: u32, vsync_rate: Fps) -> Self {
        Self {
            id,
            width,
            height,
            vsync_rate,
            group: 0,
        }
    }

    /// Sets the group.
    #[must_use]
    pub const fn with_group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    /// Hardware vsync period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.vsync_rate.period()
    }

    /// `(width, height)`.
    #[must_use]
    pub const fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// The mode a display is running and the rate frames are rendered at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActiveMode {
    /// Hardware mode.
    pub mode: DisplayMode,
    /// Rate frames are produced at; divides the vsync rate.
    pub render_rate: Fps,
}

/// A request to switch a display's mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DisplayModeRequest {
    /// Target mode.
    pub mode: ModeId,
    /// Render rate; `None` renders at the vsync rate.
    pub render_rate: Option<Fps>,
    /// Emit [`ModeEvent::Changed`] once the switch finalizes.
    pub emit_event: bool,
    /// Mode-set even if `mode` is already active.
    pub force: bool,
}

impl DisplayModeRequest {
    /// A request for `mode` that emits an event and is not forced.
    #[must_use]
    pub const fn new(mode: ModeId) -> Self {
        Self {
            mode,
            render_rate: None,
            emit_event: true,
            force: false,
        }
    }

    /// Sets the render rate.
    #[must_use]
    pub const fn render_rate(mut self, rate: Fps) -> Self {
        self.render_rate = Some(rate);
        self
    }

    /// Sets whether an event is emitted on completion.
    #[must_use]
    pub const fn emit_event(mut self, emit: bool) -> Self {
        self.emit_event = emit;
        self
    }

    /// Forces a hardware mode-set.
    #[must_use]
    pub const fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Timing constraints passed to the HAL with a mode-set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModeConstraints {
    /// Earliest time the new vsync period may apply.
    pub desired_time: HostTime,
    /// The switch must not produce visual artifacts.
    pub seamless_required: bool,
}

/// When the HAL will apply a mode-set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModeTimeline {
    /// When the new vsync period takes effect.
    pub new_vsync_applied_time: HostTime,
    /// A frame must be presented before the switch completes.
    pub refresh_required: bool,
    /// Latest time for that frame.
    pub refresh_time: HostTime,
}

impl ModeTimeline {
    /// A switch that completes at `time` without a frame.
    #[must_use]
    pub const fn immediate(time: HostTime) -> Self {
        Self {
            new_vsync_applied_time: time,
            refresh_required: false,
            refresh_time: time,
        }
    }
}

/// What the caller of
/// [`DisplayModeController::set_desired_mode`](super::DisplayModeController::set_desired_mode)
/// must do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DesiredModeAction {
    /// Nothing; the request matched the active mode.
    None,
    /// Schedule a composite and resync vsync; the next commit mode-sets.
    InitiateDisplayModeSwitch,
    /// The render rate changed in place; no hardware mode-set.
    InitiateRenderRateSwitch,
}

/// Where a display is in a mode switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModePhase {
    /// Running the given mode, nothing requested.
    Stable(ModeId),
    /// A switch is requested but the HAL has not been told.
    DesiredSet(ModeId),
    /// The HAL accepted the switch.
    Initiated(ModeId),
    /// A frame went out in the new mode; waiting to finalize.
    PendingApply(ModeId),
}

/// Outcome of a mode request, reported to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModeEvent {
    /// The display now runs `mode` at `render_rate`.
    Changed {
        /// Display.
        display: DisplayId,
        /// New mode.
        mode: ModeId,
        /// New render rate.
        render_rate: Fps,
    },
    /// The request was dropped.
    Rejected {
        /// Display.
        display: DisplayId,
        /// Why.
        error: ModeError,
    },
}
