// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Test doubles and pacing metrics for lamina.
//!
//! - [`ManualClock`]: a [`Clock`](lamina_core::time::Clock) tests advance by
//!   hand.
//! - [`FakeHwc`]: a scripted [`HwComposer`](lamina_core::hal::HwComposer)
//!   that logs every call.
//! - [`FakeEngine`]: a [`CompositionEngine`](lamina_render::CompositionEngine)
//!   that records what it was asked to draw.
//! - [`RecordingListener`]: a
//!   [`TransactionListener`](lamina_core::listener::TransactionListener) that
//!   keeps every callback.
//! - [`PresentTracker`]: grades frame pacing from present feedback.
//!
//! All doubles are cheap to clone; clones share state, so a test can hand
//! one clone to the compositor and inspect another.

mod clock;
mod engine;
mod hwc;
mod listener;
mod tracker;

pub use clock::ManualClock;
pub use engine::{ComposeRecord, FakeEngine};
pub use hwc::{FakeHwc, FenceMode, HwcCall};
pub use listener::{ListenerEvent, RecordingListener};
pub use tracker::{PacingGrade, PacingReport, PresentTracker};
