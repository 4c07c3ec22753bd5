// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-layer content history for refresh-rate policy.

use std::collections::{HashMap, VecDeque};

use crate::id::LayerId;
use crate::layer::{FrameRateCompatibility, FrameRateVote, LayerSnapshot};
use crate::time::{Duration, Fps, HostTime};

/// One visible layer as seen by a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerActivity {
    /// The layer.
    pub layer: LayerId,
    /// Latched buffer frame number.
    pub frame_number: u64,
    /// Effective vote after inheritance.
    pub vote: FrameRateVote,
}

impl LayerActivity {
    /// Activity for a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &LayerSnapshot) -> Self {
        Self {
            layer: snapshot.layer_id(),
            frame_number: snapshot.frame_number,
            vote: snapshot.frame_rate,
        }
    }
}

/// What one active layer asks of the display refresh rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerRequirement {
    /// The layer.
    pub layer: LayerId,
    /// Explicit vote, when the layer set one.
    pub vote: Option<FrameRateVote>,
    /// Rate inferred from the layer's update cadence.
    pub inferred: Option<Fps>,
}

#[derive(Debug)]
struct Record {
    frame_number: u64,
    updates: VecDeque<HostTime>,
    vote: FrameRateVote,
    last_active: HostTime,
}

/// Bounded update history for every visible layer.
#[derive(Debug)]
pub struct LayerHistory {
    records: HashMap<LayerId, Record>,
    active_window: Duration,
}

impl Default for LayerHistory {
    fn default() -> Self {
        Self::new(Self::ACTIVE_WINDOW)
    }
}

impl LayerHistory {
    /// Updates kept per layer.
    pub const CAPACITY: usize = 8;
    /// Updates needed before a cadence is inferred.
    pub const MIN_SAMPLES: usize = 3;
    /// Default inactivity after which a layer stops voting.
    pub const ACTIVE_WINDOW: Duration = Duration::from_secs(1);

    /// Creates an empty history.
    #[must_use]
    pub fn new(active_window: Duration) -> Self {
        Self {
            records: HashMap::new(),
            active_window,
        }
    }

    /// Records one commit. Layers absent from `visible` are forgotten.
    pub fn record(&mut self, visible: impl IntoIterator<Item = LayerActivity>, now: HostTime) {
        let mut seen = Vec::new();
        for activity in visible {
            seen.push(activity.layer);
            let record = self.records.entry(activity.layer).or_insert_with(|| Record {
                frame_number: activity.frame_number,
                updates: VecDeque::with_capacity(Self::CAPACITY),
                vote: activity.vote,
                last_active: now,
            });
            if record.frame_number != activity.frame_number {
                record.frame_number = activity.frame_number;
                if record.updates.len() == Self::CAPACITY {
                    record.updates.pop_front();
                }
                record.updates.push_back(now);
                record.last_active = now;
            }
            if record.vote != activity.vote {
                record.vote = activity.vote;
                record.last_active = now;
            }
        }
        self.records.retain(|id, _| seen.contains(id));
    }

    /// Requirements of layers active within the window ending at `now`.
    ///
    /// Sorted by layer id.
    #[must_use]
    pub fn summarize(&self, now: HostTime) -> Vec<LayerRequirement> {
        let mut out: Vec<_> = self
            .records
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.last_active) <= self.active_window)
            .filter(|(_, r)| r.vote.compatibility != FrameRateCompatibility::NoVote)
            .map(|(&layer, r)| LayerRequirement {
                layer,
                vote: r.vote.rate.is_valid().then_some(r.vote),
                inferred: self.cadence(r, now),
            })
            .filter(|req| req.vote.is_some() || req.inferred.is_some())
            .collect();
        out.sort_by_key(|req| req.layer);
        out
    }

    /// Number of tracked layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no layer is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn cadence(&self, record: &Record, now: HostTime) -> Option<Fps> {
        let recent: Vec<HostTime> = record
            .updates
            .iter()
            .copied()
            .filter(|t| now.saturating_duration_since(*t) <= self.active_window)
            .collect();
        if recent.len() < Self::MIN_SAMPLES {
            return None;
        }
        let (first, last) = (recent[0], recent[recent.len() - 1]);
        let intervals = recent.len() as u64 - 1;
        let mean = Duration(last.saturating_duration_since(first).nanos() / intervals);
        Some(Fps::from_period(mean)).filter(|fps| fps.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    fn activity(layer: u32, frame_number: u64) -> LayerActivity {
        LayerActivity {
            layer: LayerId(layer),
            frame_number,
            vote: FrameRateVote::default(),
        }
    }

    #[test]
    fn steady_updates_infer_a_rate() {
        let mut history = LayerHistory::default();
        for frame in 0..6 {
            history.record([activity(1, frame)], HostTime(frame * 33 * MS));
        }
        let reqs = history.summarize(HostTime(5 * 33 * MS));
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].vote, None);
        let hz = reqs[0].inferred.map(Fps::millihertz);
        assert_eq!(hz, Some(Fps::from_period(Duration(33 * MS)).millihertz()));
    }

    #[test]
    fn unchanged_frames_are_not_updates() {
        let mut history = LayerHistory::default();
        for tick in 0..6 {
            history.record([activity(1, 7)], HostTime(tick * 16 * MS));
        }
        assert_eq!(history.len(), 1);
        assert!(history.summarize(HostTime(80 * MS)).is_empty());
    }

    #[test]
    fn explicit_votes_are_reported_without_updates() {
        let mut history = LayerHistory::default();
        let vote = FrameRateVote {
            rate: Fps::from_hz(24),
            compatibility: FrameRateCompatibility::Exact,
        };
        history.record(
            [LayerActivity {
                vote,
                ..activity(3, 0)
            }],
            HostTime(0),
        );
        let reqs = history.summarize(HostTime(10 * MS));
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].vote, Some(vote));
        assert_eq!(reqs[0].inferred, None);
    }

    #[test]
    fn idle_and_hidden_layers_drop_out() {
        let mut history = LayerHistory::new(Duration::from_millis(100));
        for frame in 0..4 {
            history.record([activity(1, frame), activity(2, frame)], HostTime(frame * 10 * MS));
        }
        assert_eq!(history.summarize(HostTime(40 * MS)).len(), 2);
        assert!(
            history.summarize(HostTime(500 * MS)).is_empty(),
            "stale layers stop voting"
        );
        history.record([activity(2, 4)], HostTime(50 * MS));
        assert_eq!(history.len(), 1, "layer 1 is no longer visible");
    }

    #[test]
    fn no_vote_layers_are_excluded() {
        let mut history = LayerHistory::default();
        let vote = FrameRateVote {
            rate: Fps::default(),
            compatibility: FrameRateCompatibility::NoVote,
        };
        for frame in 0..5 {
            history.record(
                [LayerActivity {
                    vote,
                    ..activity(1, frame)
                }],
                HostTime(frame * 16 * MS),
            );
        }
        assert!(history.summarize(HostTime(64 * MS)).is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let mut history = LayerHistory::default();
        for frame in 0..50 {
            history.record([activity(1, frame)], HostTime(frame * 8 * MS));
        }
        let record = &history.records[&LayerId(1)];
        assert_eq!(record.updates.len(), LayerHistory::CAPACITY);
    }
}
