// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display state and mode switching.
//!
//! [`DisplayStateStore`] keeps the current and drawing generations of every
//! display and diffs them once per commit. [`DisplayModeController`] runs the
//! refresh-rate and resolution switch state machine of each physical
//! display.

mod controller;
mod mode;
mod state;

pub use controller::{DisplayModeController, ModeInitiation, PendingModeChange};
pub use mode::{
    ActiveMode, DesiredModeAction, DisplayMode, DisplayModeRequest, ModeConstraints, ModeEvent,
    ModePhase, ModeTimeline,
};
pub use state::{
    DisplayChange, DisplayDeviceState, DisplayFlags, DisplayState, DisplayStateStore, DisplayWhat,
    PowerMode, Rotation,
};
