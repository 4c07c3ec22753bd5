// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process-wide pipeline state.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use lamina_core::config::PipelineConfig;
use lamina_core::display::Rotation;
use lamina_core::id::DisplayId;
use lamina_core::time::{Clock, HostTime};
use tracing::debug;

/// State every pipeline component may read: tuning, the clock, the active
/// display and its rotation.
///
/// # Single writer
///
/// The thread that creates the context is the main thread. Only it may
/// mutate the context; mutators check this in debug builds. Other threads
/// reach pipeline state through the
/// [`MainThreadExecutor`](crate::MainThreadExecutor).
pub struct PipelineContext {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    main_thread: ThreadId,
    active_display: Option<DisplayId>,
    rotation_flags: Rotation,
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("main_thread", &self.main_thread)
            .field("active_display", &self.active_display)
            .field("rotation_flags", &self.rotation_flags)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    /// Creates a context owned by the calling thread.
    #[must_use]
    pub fn new(config: PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            main_thread: thread::current().id(),
            active_display: None,
            rotation_flags: Rotation::Rot0,
        }
    }

    /// Tuning.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Reads the clock.
    #[must_use]
    pub fn now(&self) -> HostTime {
        self.clock.now()
    }

    /// Whether the caller runs on the main thread.
    #[must_use]
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    /// The display clients should treat as primary.
    #[must_use]
    pub fn active_display(&self) -> Option<DisplayId> {
        self.active_display
    }

    /// Rotation of the active display, used as a buffer transform hint.
    #[must_use]
    pub fn rotation_flags(&self) -> Rotation {
        self.rotation_flags
    }

    /// Makes `display` the active display.
    pub fn set_active_display(&mut self, display: Option<DisplayId>, rotation: Rotation) {
        debug_assert!(self.is_main_thread(), "context mutated off the main thread");
        if self.active_display != display || self.rotation_flags != rotation {
            let display_id = &display;
            debug!(display = ?display_id, ?rotation, "active display changed");
        }
        self.active_display = display;
        self.rotation_flags = rotation;
    }

    /// Replaces the tuning. Takes effect from the next frame.
    pub fn set_config(&mut self, config: PipelineConfig) {
        debug_assert!(self.is_main_thread(), "context mutated off the main thread");
        self.config = config;
    }
}

#[cfg(test)]
mod tests {
    use lamina_core::time::MonotonicClock;

    use super::*;

    #[test]
    fn creator_is_main_thread() {
        let ctx = PipelineContext::new(PipelineConfig::standard(), Arc::new(MonotonicClock::new()));
        assert!(ctx.is_main_thread());
        let main = thread::scope(|s| s.spawn(|| ctx.is_main_thread()).join());
        assert_eq!(main.ok(), Some(false));
    }

    #[test]
    fn active_display_carries_rotation() {
        let mut ctx =
            PipelineContext::new(PipelineConfig::low_latency(), Arc::new(MonotonicClock::new()));
        assert_eq!(ctx.active_display(), None);
        ctx.set_active_display(Some(DisplayId::Physical(2)), Rotation::Rot90);
        assert_eq!(ctx.active_display(), Some(DisplayId::Physical(2)));
        assert_eq!(ctx.rotation_flags(), Rotation::Rot90);
    }
}
