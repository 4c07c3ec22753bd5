// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pipeline tuning values.
//!
//! Staleness windows and back-pressure switches vary with hardware and
//! vendor, so they live in one [`PipelineConfig`] passed to every component
//! rather than in constants.

use crate::time::Duration;

/// Whether a buffer whose acquire fence has not signaled may be latched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LatchUnsignaledConfig {
    /// Never latch an unsignaled buffer.
    #[default]
    Disabled,
    /// Latch an unsignaled buffer only when it is the sole buffer update of
    /// the first transaction in a flush, the update touches nothing but
    /// buffer-class state, and no display mode change is pending.
    AutoSingleLayer,
    /// Always latch unsignaled buffers.
    Always,
}

/// Tuning values for the frame pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Desired-present times further out than this are treated as bogus and
    /// applied immediately.
    pub transaction_window: Duration,
    /// An unsignaled acquire fence older than this is reported once.
    pub buffer_stall_timeout: Duration,
    /// Threshold past the expected present time at which a transaction's
    /// frame timeline is considered early. `None` uses half the pacesetter
    /// vsync period.
    pub early_latch_threshold: Option<Duration>,
    /// Frame timelines further out than this are not offered to clients.
    pub max_frame_timeline_horizon: Duration,
    /// Defer a second buffer for a layer with an unpresented buffer.
    pub propagate_backpressure: bool,
    /// Defer a commit when the present fence from two frames ago is still
    /// pending.
    pub gpu_backpressure: bool,
    /// Policy for unsignaled acquire fences.
    pub latch_unsignaled: LatchUnsignaledConfig,
    /// How many commits may be postponed waiting on a mode-set fence before
    /// the pipeline assumes the hardware missed its deadline.
    pub max_mode_fence_deferrals: u32,
    /// How many commits in a row may be postponed by GPU back-pressure
    /// before committing anyway. `None` waits for the fence however long it
    /// takes. Counted separately from mode-set fence deferrals.
    pub max_backpressure_deferrals: Option<u32>,
    /// Surface rejected mode requests as events instead of dropping them
    /// silently.
    pub report_mode_rejections: bool,
    /// Number of vsync predictions kept for token lookup.
    pub vsync_token_retention: usize,
}

impl PipelineConfig {
    /// Default tuning.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            transaction_window: Duration::from_secs(1),
            buffer_stall_timeout: Duration::from_secs(4),
            early_latch_threshold: None,
            max_frame_timeline_horizon: Duration::from_millis(100),
            propagate_backpressure: true,
            gpu_backpressure: true,
            latch_unsignaled: LatchUnsignaledConfig::Disabled,
            max_mode_fence_deferrals: 3,
            max_backpressure_deferrals: None,
            report_mode_rejections: true,
            vsync_token_retention: 120,
        }
    }

    /// Tuning that prefers latency over smoothness: single-layer unsignaled
    /// latching and no GPU back-pressure.
    #[must_use]
    pub const fn low_latency() -> Self {
        Self {
            latch_unsignaled: LatchUnsignaledConfig::AutoSingleLayer,
            gpu_backpressure: false,
            ..Self::standard()
        }
    }

    /// Resolves the early-latch threshold for a vsync period.
    #[must_use]
    pub const fn early_latch_threshold_for(&self, vsync_period: Duration) -> Duration {
        match self.early_latch_threshold {
            Some(d) => d,
            None => vsync_period.half(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_windows() {
        let config = PipelineConfig::default();
        assert_eq!(config.transaction_window, Duration::from_secs(1));
        assert_eq!(config.buffer_stall_timeout, Duration::from_secs(4));
        assert_eq!(config.max_mode_fence_deferrals, 3);
        assert_eq!(config.max_backpressure_deferrals, None);
        assert_eq!(
            config.early_latch_threshold_for(Duration::from_millis(16)),
            Duration::from_millis(8)
        );
    }

    #[test]
    fn fixed_early_latch_threshold() {
        let config = PipelineConfig {
            early_latch_threshold: Some(Duration::from_millis(2)),
            ..PipelineConfig::low_latency()
        };
        assert_eq!(
            config.early_latch_threshold_for(Duration::from_millis(16)),
            Duration::from_millis(2)
        );
        assert_eq!(
            config.latch_unsignaled,
            LatchUnsignaledConfig::AutoSingleLayer
        );
    }
}
