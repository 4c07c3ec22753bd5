// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame pacing grades from present feedback.

use lamina_core::time::{Duration, HostTime};
use lamina_core::timing::PresentFeedback;

const NANOS_PER_MS: f64 = 1_000_000.0;

/// Letter grade for frame pacing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PacingGrade {
    /// Practically no misses.
    A,
    /// Occasional misses.
    B,
    /// Noticeable stutter.
    C,
    /// Poor pacing.
    D,
}

/// Aggregate returned by [`PresentTracker::observe`].
#[derive(Clone, Copy, Debug)]
pub struct PacingReport {
    /// Current grade.
    pub grade: PacingGrade,
    /// Misses per 1000 observed frames.
    pub miss_rate_per_1000: f64,
    /// How late this frame presented, in ms.
    pub lateness_ms: f64,
    /// Frames observed.
    pub total_frames: u64,
    /// Frames that missed their vsync.
    pub missed_frames: u64,
}

/// Rolling pacing tracker with a fixed-size history of present intervals.
#[derive(Debug)]
pub struct PresentTracker<const N: usize> {
    intervals_ms: [f64; N],
    cursor: usize,
    last_present: Option<HostTime>,
    total_frames: u64,
    missed_frames: u64,
}

impl<const N: usize> Default for PresentTracker<N> {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}

impl<const N: usize> PresentTracker<N> {
    /// Creates a tracker whose interval history starts at `period`.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            intervals_ms: [period.nanos() as f64 / NANOS_PER_MS; N],
            cursor: 0,
            last_present: None,
            total_frames: 0,
            missed_frames: 0,
        }
    }

    /// Observes one resolved frame.
    pub fn observe(&mut self, feedback: &PresentFeedback) -> PacingReport {
        self.total_frames = self.total_frames.saturating_add(1);
        if feedback.missed_deadline == Some(true) {
            self.missed_frames = self.missed_frames.saturating_add(1);
        }
        if let Some(actual) = feedback.actual_present {
            if let Some(last) = self.last_present {
                self.intervals_ms[self.cursor % N] =
                    actual.saturating_duration_since(last).nanos() as f64 / NANOS_PER_MS;
                self.cursor = (self.cursor + 1) % N;
            }
            self.last_present = Some(actual);
        }

        let miss_rate = self.missed_frames as f64 * 1000.0 / self.total_frames as f64;
        let lateness_ms = feedback.lateness().nanos() as f64 / NANOS_PER_MS;
        PacingReport {
            grade: grade_for(miss_rate, self.jitter_ms()),
            miss_rate_per_1000: miss_rate,
            lateness_ms,
            total_frames: self.total_frames,
            missed_frames: self.missed_frames,
        }
    }

    /// Present intervals, oldest to newest.
    #[must_use]
    pub fn intervals(&self) -> [f64; N] {
        let mut out = [0.0; N];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.intervals_ms[(self.cursor + i) % N];
        }
        out
    }

    /// Largest deviation of an interval from the mean, in ms.
    #[must_use]
    pub fn jitter_ms(&self) -> f64 {
        if N == 0 {
            return 0.0;
        }
        let mean = self.intervals_ms.iter().sum::<f64>() / N as f64;
        self.intervals_ms
            .iter()
            .map(|i| (i - mean).abs())
            .fold(0.0, f64::max)
    }
}

fn grade_for(miss_rate_per_1000: f64, jitter_ms: f64) -> PacingGrade {
    if miss_rate_per_1000 < 1.0 && jitter_ms < 2.0 {
        PacingGrade::A
    } else if miss_rate_per_1000 < 10.0 && jitter_ms < 5.0 {
        PacingGrade::B
    } else if miss_rate_per_1000 < 50.0 {
        PacingGrade::C
    } else {
        PacingGrade::D
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    fn feedback(index: u64, expected: u64, actual: u64) -> PresentFeedback {
        PresentFeedback {
            frame_index: index,
            commit_start: HostTime(0),
            composite_end: HostTime(0),
            expected_present: HostTime(expected),
            actual_present: Some(HostTime(actual)),
            missed_deadline: Some(actual > expected + 8 * MS),
        }
    }

    #[test]
    fn steady_presents_grade_a() {
        let mut t = PresentTracker::<4>::new(Duration::from_millis(16));
        let mut report = None;
        for i in 0..10 {
            let at = 16 * MS * (i + 1);
            report = Some(t.observe(&feedback(i, at, at)));
        }
        let report = report.unwrap();
        assert_eq!(report.grade, PacingGrade::A);
        assert_eq!(report.missed_frames, 0);
        assert!(t.jitter_ms() < 1e-9, "equal intervals have no jitter");
    }

    #[test]
    fn misses_accumulate() {
        let mut t = PresentTracker::<8>::new(Duration::from_millis(16));
        let mut last = None;
        for i in 0..10 {
            let expected = 16 * MS * (i + 1);
            let actual = if i < 2 { expected + 16 * MS } else { expected };
            last = Some(t.observe(&feedback(i, expected, actual)));
        }
        let report = last.unwrap();
        assert!((report.miss_rate_per_1000 - 200.0).abs() < 1e-6, "2 of 10 missed");
        assert_eq!(report.grade, PacingGrade::D);
    }
}
