// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame scheduling.
//!
//! - [`VsyncModel`] predicts one display's vsyncs from hardware samples.
//! - [`VsyncTokenManager`] names predictions with [`VsyncId`](crate::id::VsyncId)s
//!   that clients attach to transactions.
//! - [`FrameScheduler`] dispatches at most one [`FrameTarget`](crate::timing::FrameTarget)
//!   per pacesetter vsync and coalesces requests in between.
//! - [`FrameStats`] smooths phase durations and counts missed presents.
//! - [`LayerHistory`] tracks per-layer update cadence and frame-rate votes.

mod frame;
mod history;
mod stats;
mod vsync;

pub use frame::{DeferReason, FrameScheduler, SchedulerState};
pub use history::{LayerActivity, LayerHistory, LayerRequirement};
pub use stats::{FrameStats, Jank};
pub use vsync::{FrameTimeline, VsyncModel, VsyncPrediction, VsyncTokenManager};
