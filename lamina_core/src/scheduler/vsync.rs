// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Vsync prediction and frame timeline tokens.

use std::collections::VecDeque;

use tracing::debug;

use crate::id::VsyncId;
use crate::time::{Duration, HostTime};

/// A predicted vsync: when work must be done and when it reaches the screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VsyncPrediction {
    /// Latest time for the frame's work to be submitted.
    pub deadline: HostTime,
    /// Expected present time.
    pub present: HostTime,
}

/// A frame timeline offered to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameTimeline {
    /// Token to attach to a transaction.
    pub vsync_id: VsyncId,
    /// The prediction behind the token.
    pub prediction: VsyncPrediction,
}

/// Linear vsync model of one display: `anchor + k * period`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VsyncModel {
    anchor: HostTime,
    period: Duration,
    awaiting_resync: bool,
}

impl VsyncModel {
    /// A model anchored at `anchor`.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    #[must_use]
    pub fn new(anchor: HostTime, period: Duration) -> Self {
        assert!(period > Duration::ZERO, "vsync period must be non-zero");
        Self {
            anchor,
            period,
            awaiting_resync: false,
        }
    }

    /// Current vsync period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Last timestamp the model was anchored to.
    #[must_use]
    pub fn anchor(&self) -> HostTime {
        self.anchor
    }

    /// The first predicted vsync strictly after `t`.
    #[must_use]
    pub fn next_vsync(&self, t: HostTime) -> HostTime {
        if t < self.anchor {
            return self.anchor;
        }
        let elapsed = t.saturating_duration_since(self.anchor).nanos();
        let periods = elapsed / self.period.nanos() + 1;
        self.anchor
            .saturating_add(self.period.saturating_mul(periods))
    }

    /// The last predicted vsync at or before `t`.
    #[must_use]
    pub fn previous_vsync(&self, t: HostTime) -> HostTime {
        if t < self.anchor {
            return self.anchor;
        }
        let elapsed = t.saturating_duration_since(self.anchor).nanos();
        let periods = elapsed / self.period.nanos();
        self.anchor
            .saturating_add(self.period.saturating_mul(periods))
    }

    /// Feeds a hardware vsync timestamp.
    ///
    /// After a resync request the first sample re-anchors the model
    /// unconditionally. Otherwise the sample re-anchors the model when it is
    /// within a quarter period of a prediction; returns `false` for samples
    /// that do not fit, which means the model needs a resync.
    pub fn add_sample(&mut self, timestamp: HostTime) -> bool {
        if self.awaiting_resync {
            self.anchor = timestamp;
            self.awaiting_resync = false;
            return true;
        }
        let previous = self.previous_vsync(timestamp);
        let next = self.next_vsync(timestamp);
        let error = timestamp
            .saturating_duration_since(previous)
            .min(next.saturating_duration_since(timestamp));
        if error <= Duration(self.period.nanos() / 4) {
            self.anchor = timestamp;
            true
        } else {
            debug!(
                timestamp = timestamp.nanos(),
                error = error.nanos(),
                "vsync sample off model"
            );
            false
        }
    }

    /// Switches to a new period; the next sample re-anchors the model.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn resync(&mut self, period: Duration) {
        assert!(period > Duration::ZERO, "vsync period must be non-zero");
        self.period = period;
        self.awaiting_resync = true;
    }

    /// A resync is waiting for its first hardware sample.
    #[must_use]
    pub fn is_resyncing(&self) -> bool {
        self.awaiting_resync
    }
}

/// Hands out [`VsyncId`]s and remembers their predictions for a bounded
/// number of tokens.
#[derive(Clone, Debug)]
pub struct VsyncTokenManager {
    next: i64,
    retention: usize,
    predictions: VecDeque<(VsyncId, VsyncPrediction)>,
}

impl VsyncTokenManager {
    /// Keeps the newest `retention` predictions (at least one).
    #[must_use]
    pub fn new(retention: usize) -> Self {
        let retention = retention.max(1);
        Self {
            next: 1,
            retention,
            predictions: VecDeque::with_capacity(retention),
        }
    }

    /// Issues a token for `prediction`.
    pub fn generate(&mut self, prediction: VsyncPrediction) -> VsyncId {
        let id = VsyncId(self.next);
        self.next += 1;
        if self.predictions.len() == self.retention {
            self.predictions.pop_front();
        }
        self.predictions.push_back((id, prediction));
        id
    }

    /// The prediction behind `id`, if it is still retained.
    #[must_use]
    pub fn get(&self, id: VsyncId) -> Option<VsyncPrediction> {
        // Ids are issued in increasing order, so the deque is sorted.
        let i = self
            .predictions
            .binary_search_by_key(&id, |(token, _)| *token)
            .ok()?;
        Some(self.predictions[i].1)
    }

    /// Number of retained predictions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    /// Whether no prediction is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    /// Issues tokens for the upcoming vsyncs of `model`, from the first one
    /// after `now` up to `now + horizon`. At least one timeline is returned.
    ///
    /// `work_duration` is how long before present a frame's work is due.
    pub fn frame_timelines(
        &mut self,
        model: &VsyncModel,
        now: HostTime,
        horizon: Duration,
        work_duration: Duration,
    ) -> Vec<FrameTimeline> {
        let limit = now.saturating_add(horizon);
        let mut present = model.next_vsync(now.saturating_add(work_duration));
        let mut timelines = Vec::new();
        loop {
            let prediction = VsyncPrediction {
                deadline: present.checked_sub(work_duration).unwrap_or(HostTime(0)),
                present,
            };
            timelines.push(FrameTimeline {
                vsync_id: self.generate(prediction),
                prediction,
            });
            present = present.saturating_add(model.period());
            if present > limit {
                break;
            }
        }
        timelines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    #[test]
    fn model_predicts_on_period_grid() {
        let model = VsyncModel::new(HostTime(100 * MS), Duration::from_millis(10));
        assert_eq!(model.next_vsync(HostTime(100 * MS)), HostTime(110 * MS));
        assert_eq!(model.next_vsync(HostTime(125 * MS)), HostTime(130 * MS));
        assert_eq!(model.previous_vsync(HostTime(125 * MS)), HostTime(120 * MS));
        assert_eq!(model.next_vsync(HostTime(50 * MS)), HostTime(100 * MS));
    }

    #[test]
    fn samples_reanchor_or_are_rejected() {
        let mut model = VsyncModel::new(HostTime(0), Duration::from_millis(10));
        assert!(model.add_sample(HostTime(20 * MS + 500_000)));
        assert_eq!(model.anchor(), HostTime(20 * MS + 500_000));
        assert!(!model.add_sample(HostTime(35 * MS)));

        model.resync(Duration::from_millis(8));
        assert!(model.is_resyncing());
        assert!(model.add_sample(HostTime(35 * MS)));
        assert_eq!(model.next_vsync(HostTime(35 * MS)), HostTime(43 * MS));
    }

    #[test]
    fn tokens_are_bounded() {
        let mut tokens = VsyncTokenManager::new(2);
        let prediction = |p| VsyncPrediction {
            deadline: HostTime(p - 1),
            present: HostTime(p),
        };
        let a = tokens.generate(prediction(10));
        let b = tokens.generate(prediction(20));
        let c = tokens.generate(prediction(30));
        assert!(a < b && b < c);
        assert_eq!(tokens.get(a), None);
        assert_eq!(tokens.get(b).map(|p| p.present), Some(HostTime(20)));
        assert_eq!(tokens.get(c).map(|p| p.present), Some(HostTime(30)));
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn timelines_stop_at_horizon() {
        let model = VsyncModel::new(HostTime(0), Duration::from_millis(10));
        let mut tokens = VsyncTokenManager::new(16);
        let timelines = tokens.frame_timelines(
            &model,
            HostTime(0),
            Duration::from_millis(35),
            Duration::from_millis(5),
        );
        let presents: Vec<_> = timelines.iter().map(|t| t.prediction.present.nanos() / MS).collect();
        assert_eq!(presents, vec![10, 20, 30]);
        assert_eq!(timelines[0].prediction.deadline, HostTime(5 * MS));
        assert_eq!(
            tokens.get(timelines[2].vsync_id),
            Some(timelines[2].prediction)
        );
    }
}
