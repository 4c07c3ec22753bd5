// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame pipeline instrumentation.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that
//! the frame driver calls at each stage. All method bodies default to no-ops,
//! so implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing. When **on**, each
//! method performs a single `Option` branch before dispatching.
//!
//! [`FrameSummaryBuilder`] collects phase timestamps during a frame and
//! produces a [`FrameSummary`] at the end.
//!
//! These hooks are separate from the `tracing` log output: they carry typed
//! events for profilers and test recorders.

use crate::display::ModePhase;
use crate::id::{DisplayId, TransactionId, VsyncId};
use crate::listener::DropReason;
use crate::time::{Duration, HostTime};
use crate::timing::{FrameTarget, PresentFeedback};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which phase of the frame is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Collecting and filtering queued transactions.
    Flush,
    /// Applying ready transactions to layers and displays.
    Apply,
    /// Rebuilding the hierarchy and snapshots.
    Snapshot,
    /// Composition engine and HAL present.
    Composite,
    /// Fences, callbacks and statistics after present.
    PostComposite,
}

const PHASE_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when the scheduler dispatches a frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameBeginEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Timeline token of the frame.
    pub vsync_id: VsyncId,
    /// Display whose vsync dispatched it.
    pub pacesetter: DisplayId,
    /// Dispatching vsync.
    pub vsync_time: HostTime,
    /// When the frame is expected on screen.
    pub expected_present: HostTime,
    /// Composition deadline.
    pub deadline: HostTime,
}

impl From<&FrameTarget> for FrameBeginEvent {
    fn from(target: &FrameTarget) -> Self {
        Self {
            frame_index: target.frame_index,
            vsync_id: target.vsync_id,
            pacesetter: target.pacesetter,
            vsync_time: target.vsync_time,
            expected_present: target.expected_present,
            deadline: target.deadline,
        }
    }
}

/// Marks the beginning of a phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseBeginEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which phase is starting.
    pub phase: PhaseKind,
    /// Host time at the start of the phase.
    pub timestamp: HostTime,
}

/// Marks the end of a phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseEndEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which phase is ending.
    pub phase: PhaseKind,
    /// Host time at the end of the phase.
    pub timestamp: HostTime,
}

/// A transaction was applied in a frame.
#[derive(Clone, Copy, Debug)]
pub struct TransactionAppliedEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Transaction.
    pub transaction_id: TransactionId,
    /// Layer states it carried.
    pub layer_states: usize,
}

/// A transaction was dropped without being applied.
#[derive(Clone, Copy, Debug)]
pub struct TransactionDroppedEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Transaction.
    pub transaction_id: TransactionId,
    /// Why.
    pub reason: DropReason,
}

/// A display moved between mode switch phases.
#[derive(Clone, Copy, Debug)]
pub struct ModeTransitionEvent {
    /// Display.
    pub display: DisplayId,
    /// Phase it entered.
    pub phase: ModePhase,
    /// When.
    pub timestamp: HostTime,
}

/// Emitted when a frame's present fence resolves.
#[derive(Clone, Copy, Debug)]
pub struct PresentFeedbackEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Actual present time, if reported.
    pub actual_present: Option<HostTime>,
    /// Whether the frame missed its vsync, if determinable.
    pub missed_deadline: Option<bool>,
}

impl From<&PresentFeedback> for PresentFeedbackEvent {
    fn from(feedback: &PresentFeedback) -> Self {
        Self {
            frame_index: feedback.frame_index,
            actual_present: feedback.actual_present,
            missed_deadline: feedback.missed_deadline,
        }
    }
}

/// Per-frame timing summary produced by [`FrameSummaryBuilder`].
#[derive(Clone, Copy, Debug)]
pub struct FrameSummary {
    /// Frame counter.
    pub frame_index: u64,
    /// Timeline token.
    pub vsync_id: VsyncId,
    /// Expected present time.
    pub expected_present: HostTime,
    /// Composition deadline.
    pub deadline: HostTime,
    /// Flush duration (zero if not measured).
    pub flush: Duration,
    /// Apply duration (zero if not measured).
    pub apply: Duration,
    /// Snapshot duration (zero if not measured).
    pub snapshot: Duration,
    /// Composite duration (zero if not measured).
    pub composite: Duration,
    /// Post-composition duration (zero if not measured).
    pub post_composite: Duration,
    /// Transactions applied this frame.
    pub transactions_applied: usize,
    /// Whether the frame composited.
    pub composited: bool,
    /// Whether composition finished after the deadline.
    pub missed_deadline: bool,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the frame driver.
///
/// All methods have default no-op implementations.
pub trait TraceSink {
    /// Called when a frame is dispatched.
    fn on_frame_begin(&mut self, e: &FrameBeginEvent) {
        _ = e;
    }

    /// Called at the beginning of a phase.
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of a phase.
    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called for each applied transaction.
    fn on_transaction_applied(&mut self, e: &TransactionAppliedEvent) {
        _ = e;
    }

    /// Called for each dropped transaction.
    fn on_transaction_dropped(&mut self, e: &TransactionDroppedEvent) {
        _ = e;
    }

    /// Called when a display enters a mode switch phase.
    fn on_mode_transition(&mut self, e: &ModeTransitionEvent) {
        _ = e;
    }

    /// Called when present feedback resolves.
    fn on_present_feedback(&mut self, e: &PresentFeedbackEvent) {
        _ = e;
    }

    /// Called with a per-frame timing summary.
    fn on_frame_summary(&mut self, s: &FrameSummary) {
        _ = s;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: std::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl std::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

macro_rules! dispatch {
    ($self:ident, $method:ident, $e:expr) => {{
        #[cfg(feature = "trace")]
        if let Some(s) = &mut $self.sink {
            s.$method($e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = $e;
        }
    }};
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: std::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: std::marker::PhantomData,
            }
        }
    }

    /// Emits a [`FrameBeginEvent`].
    #[inline]
    pub fn frame_begin(&mut self, e: &FrameBeginEvent) {
        dispatch!(self, on_frame_begin, e);
    }

    /// Emits a [`PhaseBeginEvent`].
    #[inline]
    pub fn phase_begin(&mut self, e: &PhaseBeginEvent) {
        dispatch!(self, on_phase_begin, e);
    }

    /// Emits a [`PhaseEndEvent`].
    #[inline]
    pub fn phase_end(&mut self, e: &PhaseEndEvent) {
        dispatch!(self, on_phase_end, e);
    }

    /// Emits a [`TransactionAppliedEvent`].
    #[inline]
    pub fn transaction_applied(&mut self, e: &TransactionAppliedEvent) {
        dispatch!(self, on_transaction_applied, e);
    }

    /// Emits a [`TransactionDroppedEvent`].
    #[inline]
    pub fn transaction_dropped(&mut self, e: &TransactionDroppedEvent) {
        dispatch!(self, on_transaction_dropped, e);
    }

    /// Emits a [`ModeTransitionEvent`].
    #[inline]
    pub fn mode_transition(&mut self, e: &ModeTransitionEvent) {
        dispatch!(self, on_mode_transition, e);
    }

    /// Emits a [`PresentFeedbackEvent`].
    #[inline]
    pub fn present_feedback(&mut self, e: &PresentFeedbackEvent) {
        dispatch!(self, on_present_feedback, e);
    }

    /// Emits a [`FrameSummary`].
    #[inline]
    pub fn frame_summary(&mut self, s: &FrameSummary) {
        dispatch!(self, on_frame_summary, s);
    }
}

// ---------------------------------------------------------------------------
// FrameSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps during a frame and produces a [`FrameSummary`].
#[derive(Debug)]
pub struct FrameSummaryBuilder {
    begin: FrameBeginEvent,
    phase_starts: [Option<HostTime>; PHASE_COUNT],
    phase_ends: [Option<HostTime>; PHASE_COUNT],
    transactions_applied: usize,
    composited: bool,
    missed_deadline: bool,
}

impl FrameSummaryBuilder {
    /// Starts building a summary for the given frame.
    #[must_use]
    pub fn new(begin: &FrameBeginEvent) -> Self {
        Self {
            begin: *begin,
            phase_starts: [None; PHASE_COUNT],
            phase_ends: [None; PHASE_COUNT],
            transactions_applied: 0,
            composited: false,
            missed_deadline: false,
        }
    }

    /// Records the start of a phase.
    pub fn phase_begin(&mut self, phase: PhaseKind, t: HostTime) {
        self.phase_starts[phase_index(phase)] = Some(t);
    }

    /// Records the end of a phase.
    pub fn phase_end(&mut self, phase: PhaseKind, t: HostTime) {
        self.phase_ends[phase_index(phase)] = Some(t);
    }

    /// Adds to the applied transaction count.
    pub fn add_applied(&mut self, count: usize) {
        self.transactions_applied += count;
    }

    /// Marks the frame as composited.
    pub fn set_composited(&mut self, composited: bool) {
        self.composited = composited;
    }

    /// Sets whether the deadline was missed.
    pub fn set_missed_deadline(&mut self, missed: bool) {
        self.missed_deadline = missed;
    }

    /// Consumes the builder and produces the final [`FrameSummary`].
    #[must_use]
    pub fn finish(self) -> FrameSummary {
        FrameSummary {
            frame_index: self.begin.frame_index,
            vsync_id: self.begin.vsync_id,
            expected_present: self.begin.expected_present,
            deadline: self.begin.deadline,
            flush: self.phase_duration(PhaseKind::Flush),
            apply: self.phase_duration(PhaseKind::Apply),
            snapshot: self.phase_duration(PhaseKind::Snapshot),
            composite: self.phase_duration(PhaseKind::Composite),
            post_composite: self.phase_duration(PhaseKind::PostComposite),
            transactions_applied: self.transactions_applied,
            composited: self.composited,
            missed_deadline: self.missed_deadline,
        }
    }

    fn phase_duration(&self, phase: PhaseKind) -> Duration {
        let idx = phase_index(phase);
        match (self.phase_starts[idx], self.phase_ends[idx]) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }
}

const fn phase_index(phase: PhaseKind) -> usize {
    match phase {
        PhaseKind::Flush => 0,
        PhaseKind::Apply => 1,
        PhaseKind::Snapshot => 2,
        PhaseKind::Composite => 3,
        PhaseKind::PostComposite => 4,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
