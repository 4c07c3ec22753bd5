// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The lamina frame driver.
//!
//! [`Compositor`] ties [`lamina_core`] and [`lamina_render`] together into a
//! running compositor: it owns the main-thread state, runs one
//! commit/composite cycle per pacesetter vsync, and presents on every
//! [`Display`].
//!
//! ```text
//!   ClientHandle ─┐                  ┌─► PhysicalDisplay ─► HwComposer
//!   HalEventSender├─► Compositor ────┤
//!   ExecutorHandle┘    (main thread) └─► VirtualDisplay ──► CompositionEngine
//! ```
//!
//! Other threads never touch compositor state directly. Clients go through
//! a [`ClientHandle`], HAL callbacks through a
//! [`HalEventSender`](lamina_core::hal::HalEventSender), and anything else
//! (screenshots, debug dumps) through an [`ExecutorHandle`] whose closures
//! run on the main thread between frames.
//!
//! # Crate features
//!
//! - `trace` (disabled by default): forwards frame instrumentation to the
//!   installed [`TraceSink`](lamina_core::trace::TraceSink).

#![cfg_attr(docsrs, feature(doc_cfg))]

mod context;
mod display;
mod driver;
mod executor;
mod hooks;
mod ingress;

pub use context::PipelineContext;
pub use display::{
    Display, ModeSwitchable, PhysicalDisplay, PresentError, PresentOutcome, PresentTarget,
    Presentable, ScreenshotRequest, Screenshottable, VirtualDisplay,
};
pub use driver::{Compositor, FrameOutcome, VirtualDisplayArgs};
pub use executor::{ExecutorHandle, MainThreadExecutor, PendingTasks, TaskResult, WaitError};
pub use hooks::{FrameListener, WorkloadHint, WorkloadHintSink};
pub use ingress::{ClientHandle, LayerRequest};
