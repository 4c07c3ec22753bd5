// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The frame driver.
//!
//! [`Compositor`] owns every piece of main-thread state and runs one frame
//! per pacesetter vsync in three steps:
//!
//! 1. **Commit**: flush ready transactions, apply them to the layer
//!    lifecycle manager, commit display state, advance mode switches,
//!    rebuild the hierarchy and the snapshot set, and decide whether the
//!    frame must composite. Commit never touches the composition engine.
//! 2. **Composite**: build the refresh arguments from the snapshot set and
//!    present them on every enabled display. A display that fails is
//!    skipped; the others still present.
//! 3. **Post-composition**: fire on-complete callbacks and buffer releases
//!    behind the present fence, then resolve timing feedback for frames
//!    whose fences have signaled.
//!
//! Other threads reach the compositor through [`ClientHandle`]s, the HAL
//! event sender and the main-thread executor. The embedding loop calls
//! [`pump`](Compositor::pump) (or [`wait_and_pump`](Compositor::wait_and_pump))
//! whenever its wake hook fires.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use lamina_core::display::{
    DesiredModeAction, DisplayChange, DisplayDeviceState, DisplayModeController,
    DisplayModeRequest, DisplayStateStore, ModeEvent, ModeInitiation, PowerMode,
};
use lamina_core::error::{HalError, ModeError};
use lamina_core::fence::Fence;
use lamina_core::hal::{HalEvent, HalEventQueue, HalEventSender, HwComposer};
use lamina_core::id::{
    DisplayId, LayerId, LayerIdAllocator, LayerStack, TransactionIdAllocator,
};
use lamina_core::layer::{
    BuildArgs, LayerCreationArgs, LayerHierarchy, LayerLifecycleManager, LayerSnapshotBuilder,
    SnapshotSet,
};
use lamina_core::listener::DropReason;
use lamina_core::scheduler::{
    DeferReason, FrameScheduler, FrameStats, FrameTimeline, LayerActivity, LayerHistory,
};
use lamina_core::time::{Duration, HostTime};
use lamina_core::timing::{FrameTarget, PendingFeedback};
use lamina_core::trace::{
    FrameBeginEvent, FrameSummaryBuilder, ModeTransitionEvent, PhaseBeginEvent, PhaseEndEvent,
    PhaseKind, PresentFeedbackEvent, TraceSink, Tracer, TransactionAppliedEvent,
    TransactionDroppedEvent,
};
use lamina_core::transaction::{
    FlushContext, TransactionCallbackInvoker, TransactionQueue, WakeHook,
};
use lamina_render::{
    ColorMatrix, CompositionEngine, OutputConfig, OutputDamage, RefreshArgs, RefreshRequest,
};
use tracing::{debug, error, info, trace, warn};

use crate::context::PipelineContext;
use crate::display::{
    Display, PhysicalDisplay, PresentOutcome, PresentTarget, ScreenshotRequest, VirtualDisplay,
};
use crate::executor::{ExecutorHandle, MainThreadExecutor};
use crate::hooks::{FrameListener, WorkloadHint, WorkloadHintSink};
use crate::ingress::{ClientHandle, LayerRequest, LayerRequestQueue};

/// Frames whose present fences are still pending before the oldest is
/// given up on.
const MAX_PENDING_FEEDBACK: usize = 8;

/// What a dispatched frame did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameOutcome {
    /// The frame was handed back to the scheduler for the next vsync.
    Deferred,
    /// Scene state was committed; nothing needed compositing.
    Committed,
    /// The frame was committed and composited.
    Composited,
}

/// A display rendered into a client surface.
#[derive(Clone, Copy, Debug)]
pub struct VirtualDisplayArgs<'a> {
    /// Debug name.
    pub name: &'a str,
    /// Surface width.
    pub width: u32,
    /// Surface height.
    pub height: u32,
    /// Layer stack shown.
    pub layer_stack: LayerStack,
    /// Compose every `frame_divisor`-th frame.
    pub frame_divisor: u32,
}

struct CommitResult {
    must_composite: bool,
}

/// The main-thread compositor.
pub struct Compositor {
    ctx: PipelineContext,
    hal: Box<dyn HwComposer>,
    engine: Box<dyn CompositionEngine>,

    // -- Ingress --
    hal_events: HalEventQueue,
    transactions: TransactionQueue,
    layer_requests: LayerRequestQueue,
    pending_layer_requests: Vec<LayerRequest>,
    executor: MainThreadExecutor<Self>,
    layer_ids: Arc<LayerIdAllocator>,
    transaction_ids: Arc<TransactionIdAllocator>,

    // -- Scene --
    lifecycle: LayerLifecycleManager,
    hierarchy: LayerHierarchy,
    snapshot_builder: LayerSnapshotBuilder,
    snapshots: Arc<SnapshotSet>,

    // -- Displays --
    display_state: DisplayStateStore,
    displays: BTreeMap<DisplayId, Display>,
    modes: DisplayModeController,
    next_virtual_id: u64,

    // -- Frame --
    scheduler: FrameScheduler,
    stats: FrameStats,
    layer_history: LayerHistory,
    callbacks: TransactionCallbackInvoker,
    damage: OutputDamage,
    unpresented: HashSet<LayerId>,
    pending_feedback: VecDeque<PendingFeedback>,
    color_transform: Option<ColorMatrix>,
    force_full_damage: bool,
    hal_refresh_pending: bool,
    mode_events: Vec<ModeEvent>,

    // -- Observers --
    frame_listener: Option<Box<dyn FrameListener>>,
    workload_hints: Option<Box<dyn WorkloadHintSink>>,
    trace_sink: Option<Box<dyn TraceSink>>,
}

impl fmt::Debug for Compositor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compositor")
            .field("ctx", &self.ctx)
            .field("layers", &self.lifecycle.len())
            .field("displays", &self.displays.keys().collect::<Vec<_>>())
            .field("scheduler", &self.scheduler.state())
            .field("pending_transactions", &self.transactions.pending_len())
            .finish_non_exhaustive()
    }
}

impl Compositor {
    /// Creates a compositor on the calling thread, which becomes the main
    /// thread.
    #[must_use]
    pub fn new(
        ctx: PipelineContext,
        hal: Box<dyn HwComposer>,
        engine: Box<dyn CompositionEngine>,
    ) -> Self {
        let config = *ctx.config();
        let snapshot_builder = LayerSnapshotBuilder::new();
        let snapshots = Arc::clone(snapshot_builder.snapshots());
        Self {
            hal,
            engine,
            hal_events: HalEventQueue::new(),
            transactions: TransactionQueue::new(),
            layer_requests: LayerRequestQueue::new(),
            pending_layer_requests: Vec::new(),
            executor: MainThreadExecutor::new(),
            layer_ids: Arc::new(LayerIdAllocator::new()),
            transaction_ids: Arc::new(TransactionIdAllocator::new()),
            lifecycle: LayerLifecycleManager::new(),
            hierarchy: LayerHierarchy::new(),
            snapshot_builder,
            snapshots,
            display_state: DisplayStateStore::new(),
            displays: BTreeMap::new(),
            modes: DisplayModeController::new(config.report_mode_rejections),
            next_virtual_id: 0,
            scheduler: FrameScheduler::new(config.vsync_token_retention),
            stats: FrameStats::new(),
            layer_history: LayerHistory::default(),
            callbacks: TransactionCallbackInvoker::new(),
            damage: OutputDamage::new(),
            unpresented: HashSet::new(),
            pending_feedback: VecDeque::new(),
            color_transform: None,
            force_full_damage: false,
            hal_refresh_pending: false,
            mode_events: Vec::new(),
            frame_listener: None,
            workload_hints: None,
            trace_sink: None,
            ctx,
        }
    }

    // -----------------------------------------------------------------------
    // Wiring
    // -----------------------------------------------------------------------

    /// A handle for one client.
    #[must_use]
    pub fn client_handle(&self) -> ClientHandle {
        ClientHandle::new(
            Arc::clone(&self.layer_ids),
            Arc::clone(&self.transaction_ids),
            self.transactions.sender(),
            &self.layer_requests,
        )
    }

    /// A handle for running closures on the main thread.
    #[must_use]
    pub fn executor_handle(&self) -> ExecutorHandle<Self> {
        self.executor.handle()
    }

    /// A handle for HAL callback threads.
    #[must_use]
    pub fn hal_event_sender(&self) -> HalEventSender {
        self.hal_events.sender()
    }

    /// Installs the hook run whenever another thread hands work to the main
    /// thread.
    pub fn set_wake_hook(&self, hook: WakeHook) {
        self.transactions.set_wake_hook(Arc::clone(&hook));
        self.layer_requests.set_wake_hook(Arc::clone(&hook));
        self.hal_events.set_wake_hook(Arc::clone(&hook));
        self.executor.set_wake_hook(hook);
    }

    /// Installs a jank and mode event listener.
    pub fn set_frame_listener(&mut self, listener: Box<dyn FrameListener>) {
        self.frame_listener = Some(listener);
    }

    /// Installs a workload hint sink.
    pub fn set_workload_hint_sink(&mut self, sink: Box<dyn WorkloadHintSink>) {
        self.workload_hints = Some(sink);
    }

    /// Installs a trace sink. Events reach it only with the `trace` feature.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.trace_sink = Some(sink);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Pipeline context.
    #[must_use]
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Mutable pipeline context.
    pub fn context_mut(&mut self) -> &mut PipelineContext {
        &mut self.ctx
    }

    /// The snapshot set of the last commit.
    #[must_use]
    pub fn snapshots(&self) -> &Arc<SnapshotSet> {
        &self.snapshots
    }

    /// Layer lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> &LayerLifecycleManager {
        &self.lifecycle
    }

    /// The frame scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Mode switch state.
    #[must_use]
    pub fn modes(&self) -> &DisplayModeController {
        &self.modes
    }

    /// Committed display state.
    #[must_use]
    pub fn display_state(&self) -> &DisplayStateStore {
        &self.display_state
    }

    /// A display.
    #[must_use]
    pub fn display(&self, id: DisplayId) -> Option<&Display> {
        self.displays.get(&id)
    }

    /// A display, mutably; e.g. to detach a virtual display's surface.
    pub fn display_mut(&mut self, id: DisplayId) -> Option<&mut Display> {
        self.displays.get_mut(&id)
    }

    /// The pacesetter's vsync period, if any display is powered.
    #[must_use]
    pub fn vsync_period(&self) -> Option<Duration> {
        self.scheduler.vsync_period()
    }

    /// Frame statistics.
    #[must_use]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Per-layer update cadence and votes, as of the last commit.
    #[must_use]
    pub fn layer_history(&self) -> &LayerHistory {
        &self.layer_history
    }

    /// Takes mode events emitted since the last call.
    pub fn take_mode_events(&mut self) -> Vec<ModeEvent> {
        std::mem::take(&mut self.mode_events)
    }

    /// Frame timelines to offer clients, bounded by the configured horizon.
    pub fn frame_timelines(&mut self) -> Vec<FrameTimeline> {
        let work = self
            .stats
            .commit_estimate()
            .saturating_add(self.stats.composite_estimate());
        let horizon = self.ctx.config().max_frame_timeline_horizon;
        self.scheduler.frame_timelines(self.ctx.now(), horizon, work)
    }

    // -----------------------------------------------------------------------
    // Displays
    // -----------------------------------------------------------------------

    /// Adds a hardware display with the modes the HAL reports and powers it
    /// on. The display composites from the next commit on.
    ///
    /// # Errors
    ///
    /// The HAL did not describe the display.
    pub fn add_physical_display(
        &mut self,
        id: DisplayId,
        name: &str,
        internal: bool,
    ) -> Result<(), HalError> {
        let modes = self.hal.display_modes(id)?;
        let active = self.hal.active_mode(id)?;
        let Some(mode) = modes.iter().copied().find(|m| m.id == active) else {
            error!(display = ?id, mode = ?active, "active mode not among reported modes");
            return Err(HalError::BadConfig(active.0));
        };
        if let Err(err) = self.modes.register_display(id, modes, active) {
            error!(display = ?id, %err, "display modes rejected");
            return Err(HalError::BadConfig(active.0));
        }

        let mut state = DisplayDeviceState::new(id, name, mode.width, mode.height);
        if internal {
            state = state.internal();
        }
        let display = PhysicalDisplay::new(&state, mode);
        let orientation = state.orientation;
        self.display_state.add_display(state);
        self.displays.insert(id, Display::Physical(display));
        self.scheduler
            .add_display(id, self.ctx.now(), mode.vsync_rate.period());
        info!(display = ?id, name, mode = ?mode.id, "physical display added");

        if internal && self.ctx.active_display().is_none() {
            self.ctx.set_active_display(Some(id), orientation);
        }
        self.set_power_mode(id, PowerMode::On)
    }

    /// Adds a virtual display. It composites from the next commit on.
    pub fn add_virtual_display(&mut self, args: VirtualDisplayArgs<'_>) -> DisplayId {
        let id = DisplayId::Virtual(self.next_virtual_id);
        self.next_virtual_id += 1;
        let state = DisplayDeviceState::new(id, args.name, args.width, args.height)
            .with_layer_stack(args.layer_stack);
        let display = VirtualDisplay::new(&state, args.frame_divisor);
        self.display_state.add_display(state);
        self.displays.insert(id, Display::Virtual(display));
        info!(display = ?id, name = args.name, "virtual display added");
        id
    }

    /// Removes a display. Its state goes away at the next commit.
    pub fn remove_display(&mut self, id: DisplayId) {
        if self.displays.remove(&id).is_none() {
            debug!(display = ?id, "removing unknown display");
            return;
        }
        self.display_state.remove_display(id);
        self.modes.unregister_display(id);
        self.scheduler.remove_display(id);
        if self.ctx.active_display() == Some(id) {
            let rotation = self.ctx.rotation_flags();
            self.ctx.set_active_display(None, rotation);
        }
        info!(display = ?id, "display removed");
    }

    /// Changes a hardware display's power mode.
    ///
    /// Powering off does not abort a mode-set in flight. Powering on
    /// re-anchors vsync and repaints the display.
    ///
    /// # Errors
    ///
    /// The display is unknown or virtual, or the HAL refused.
    pub fn set_power_mode(&mut self, id: DisplayId, mode: PowerMode) -> Result<(), HalError> {
        let Some(display) = self
            .displays
            .get_mut(&id)
            .and_then(|d| d.as_physical_mut())
        else {
            return Err(HalError::BadDisplay(id));
        };
        if display.power_mode() == mode {
            return Ok(());
        }
        self.hal.set_power_mode(id, mode)?;
        display.set_power_mode(mode);
        self.display_state.set_power_mode(id, mode);
        self.scheduler.set_powered(id, mode.is_on());
        if let Err(err) = self.hal.set_vsync_enabled(id, mode.is_on()) {
            warn!(display = ?id, %err, "vsync enable failed");
        }
        if mode.is_on() {
            self.damage.invalidate(id);
            self.scheduler.schedule_frame();
        }
        debug!(display = ?id, ?mode, "power mode set");
        Ok(())
    }

    /// Requests a mode switch on a hardware display.
    ///
    /// # Errors
    ///
    /// The display is unknown or virtual, or it has no such mode.
    pub fn request_mode(
        &mut self,
        id: DisplayId,
        request: DisplayModeRequest,
    ) -> Result<DesiredModeAction, ModeError> {
        let display = self
            .displays
            .get_mut(&id)
            .and_then(Display::mode_switchable)
            .ok_or(ModeError::UnknownDisplay(id))?;
        let action = display.request_mode(&mut self.modes, request)?;
        match action {
            DesiredModeAction::None => {}
            DesiredModeAction::InitiateDisplayModeSwitch => {
                self.scheduler.resync_to_hardware_vsync(id, None);
                self.scheduler.schedule_frame();
            }
            DesiredModeAction::InitiateRenderRateSwitch => {
                self.scheduler.schedule_frame();
            }
        }
        self.dispatch_mode_events();
        Ok(action)
    }

    /// With `synced`, a resolution change on `id` waits for a display size
    /// transaction instead of recreating the display.
    pub fn set_synced_resolution_switch(&mut self, id: DisplayId, synced: bool) {
        self.modes.set_synced_resolution_switch(id, synced);
    }

    /// Sets the color transform applied to composed output.
    pub fn set_color_transform(&mut self, transform: Option<ColorMatrix>) {
        if self.color_transform == transform {
            return;
        }
        self.color_transform = transform;
        self.force_full_damage = true;
        self.scheduler.schedule_frame();
    }

    /// Requests a composite on the next vsync even if nothing changed.
    pub fn schedule_frame(&mut self) -> bool {
        self.scheduler.schedule_frame()
    }

    /// Builds a scoped snapshot set of `display` for a screenshot.
    ///
    /// The next frame's snapshots are unaffected. Threads other than the
    /// main thread call this through the
    /// [`executor_handle`](Self::executor_handle).
    pub fn capture(
        &mut self,
        display: DisplayId,
        request: &ScreenshotRequest,
    ) -> Option<Arc<SnapshotSet>> {
        let scope = self
            .displays
            .get(&display)?
            .screenshottable()
            .screenshot_scope(request);
        let set = self.snapshot_builder.capture(
            BuildArgs {
                lifecycle: &self.lifecycle,
                hierarchy: &self.hierarchy,
                force_update: false,
            },
            &scope,
        );
        let display_id = &display;
        debug!(display = ?display_id, snapshots = set.len(), "screenshot scope built");
        Some(set)
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    /// Runs main-thread tasks, takes in client requests and handles HAL
    /// events, running a frame for each pacesetter vsync. Returns the number
    /// of frames run.
    pub fn pump(&mut self) -> usize {
        self.executor.drain().run(self);
        self.drain_ingress();
        if !self.pending_layer_requests.is_empty()
            || self.transactions.has_pending()
            || self.display_state.has_pending_changes()
        {
            self.scheduler.schedule_commit();
        }
        let mut frames = 0;
        for event in self.hal_events.drain() {
            if self.handle_hal_event(event).is_some() {
                frames += 1;
            }
        }
        frames
    }

    /// Blocks up to `timeout` for a main-thread task, then
    /// [`pump`](Self::pump)s.
    pub fn wait_and_pump(&mut self, timeout: std::time::Duration) -> usize {
        self.executor.wait_for_tasks(timeout).run(self);
        self.pump()
    }

    /// Feeds a hardware vsync; runs a frame if it dispatches one.
    pub fn on_vsync(&mut self, display: DisplayId, timestamp: HostTime) -> Option<FrameOutcome> {
        let target = self.scheduler.on_vsync(display, timestamp)?;
        Some(self.run_frame(target))
    }

    /// Synthetic vsync for when hardware vsync is off.
    pub fn on_timer(&mut self) -> Option<FrameOutcome> {
        let target = self.scheduler.on_timer(self.ctx.now())?;
        Some(self.run_frame(target))
    }

    /// Drops every queued transaction with [`DropReason::Shutdown`] and
    /// flushes outstanding callbacks.
    pub fn shutdown(&mut self) {
        self.drain_ingress();
        let dropped = self.transactions.close();
        for transaction in &dropped {
            self.callbacks.add_dropped(transaction, DropReason::Shutdown);
        }
        self.callbacks.send_complete_callbacks(None);
        info!(dropped = dropped.len(), "compositor shut down");
    }

    fn drain_ingress(&mut self) {
        self.pending_layer_requests
            .extend(self.layer_requests.drain());
        self.transactions.collect();
    }

    fn handle_hal_event(&mut self, event: HalEvent) -> Option<FrameOutcome> {
        match event {
            HalEvent::Vsync {
                display,
                timestamp,
                period,
            } => {
                if let Some(period) = period
                    && self
                        .scheduler
                        .model(display)
                        .is_some_and(|m| m.period() != period)
                {
                    let display_id = &display;
                    trace!(display = ?display_id, period = period.nanos(), "hal reports a new vsync period");
                }
                return self.on_vsync(display, timestamp);
            }
            HalEvent::Hotplug {
                display,
                connected: true,
            } => {
                if !self.displays.contains_key(&display)
                    && let Err(err) = self.add_physical_display(display, "external", false)
                {
                    let display_id = &display;
                    error!(display = ?display_id, %err, "hotplugged display could not be added");
                }
            }
            HalEvent::Hotplug {
                display,
                connected: false,
            } => self.remove_display(display),
            HalEvent::VsyncPeriodTimingChanged { display, timeline } => {
                let display_id = &display;
                debug!(display = ?display_id, refresh_required = timeline.refresh_required, "mode timeline changed");
                self.modes.on_timeline_changed(display, timeline);
                self.scheduler.schedule_frame();
            }
            HalEvent::RefreshRateChangedDebug { display, period } => {
                let display_id = &display;
                debug!(display = ?display_id, period = period.nanos(), "panel refresh rate changed");
            }
            HalEvent::Refresh { display } => {
                self.hal_refresh_pending = true;
                self.damage.invalidate(display);
                self.scheduler.schedule_frame();
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Frame
    // -----------------------------------------------------------------------

    fn run_frame(&mut self, target: FrameTarget) -> FrameOutcome {
        let mut sink = self.trace_sink.take();
        let mut tracer = match sink.as_deref_mut() {
            Some(sink) => Tracer::new(sink),
            None => Tracer::none(),
        };
        let outcome = self.frame(target, &mut tracer);
        drop(tracer);
        self.trace_sink = sink;
        outcome
    }

    fn frame(&mut self, mut target: FrameTarget, tracer: &mut Tracer<'_>) -> FrameOutcome {
        let commit_start = self.ctx.now();
        let begin = FrameBeginEvent::from(&target);
        tracer.frame_begin(&begin);
        let mut summary = FrameSummaryBuilder::new(&begin);

        let Some(commit) = self.commit(&mut target, tracer, &mut summary) else {
            return FrameOutcome::Deferred;
        };
        let commit_end = self.ctx.now();
        self.stats
            .record_commit(commit_end.saturating_duration_since(commit_start));

        let present_fence = if commit.must_composite {
            let fence = self.composite(&target, tracer, &mut summary);
            self.stats
                .record_composite(self.ctx.now().saturating_duration_since(commit_end));
            Some(fence)
        } else {
            trace!(frame = target.frame_index, "nothing to composite");
            None
        };
        let composite_end = self.ctx.now();
        self.post_composite(&target, commit_start, composite_end, present_fence, tracer, &mut summary);

        if self.has_follow_up_work() {
            self.scheduler.schedule_commit();
        }
        self.scheduler.frame_done();
        summary.set_composited(commit.must_composite);
        tracer.frame_summary(&summary.finish());
        if commit.must_composite {
            FrameOutcome::Composited
        } else {
            FrameOutcome::Committed
        }
    }

    fn has_follow_up_work(&self) -> bool {
        !self.pending_layer_requests.is_empty()
            || self.transactions.has_pending()
            || self.display_state.has_pending_changes()
            || self
                .displays
                .keys()
                .any(|&id| self.modes.pending_mode(id).is_some())
    }

    fn phase_begin(
        &self,
        phase: PhaseKind,
        target: &FrameTarget,
        tracer: &mut Tracer<'_>,
        summary: &mut FrameSummaryBuilder,
    ) {
        let timestamp = self.ctx.now();
        summary.phase_begin(phase, timestamp);
        tracer.phase_begin(&PhaseBeginEvent {
            frame_index: target.frame_index,
            phase,
            timestamp,
        });
    }

    fn phase_end(
        &self,
        phase: PhaseKind,
        target: &FrameTarget,
        tracer: &mut Tracer<'_>,
        summary: &mut FrameSummaryBuilder,
    ) {
        let timestamp = self.ctx.now();
        summary.phase_end(phase, timestamp);
        tracer.phase_end(&PhaseEndEvent {
            frame_index: target.frame_index,
            phase,
            timestamp,
        });
    }

    // -- Commit --

    /// Whether the newest frame of any powered hardware display is still
    /// pending, and whether the one before it is.
    fn present_pressure(&self) -> (bool, bool) {
        self.displays
            .values()
            .filter_map(Display::as_physical)
            .filter(|d| d.power_mode().is_on())
            .fold((false, false), |(pending, backpressure), d| {
                let history = d.present_history();
                (
                    pending || history.previous_frame_pending(),
                    backpressure || history.would_backpressure(),
                )
            })
    }

    fn commit(
        &mut self,
        target: &mut FrameTarget,
        tracer: &mut Tracer<'_>,
        summary: &mut FrameSummaryBuilder,
    ) -> Option<CommitResult> {
        let config = *self.ctx.config();
        if let Some((display, _)) = self.modes.unsignaled_mode_fence() {
            let deferred = self.scheduler.deferrals(DeferReason::ModeFence);
            if deferred < config.max_mode_fence_deferrals {
                let display_id = &display;
                trace!(display = ?display_id, frame = target.frame_index, "waiting on mode-set present fence");
                self.scheduler.defer(target, DeferReason::ModeFence);
                return None;
            }
            let display_id = &display;
            warn!(
                display = ?display_id,
                deferrals = deferred,
                "mode-set present fence missed its deadline, committing anyway"
            );
        } else {
            self.scheduler.clear_deferrals(DeferReason::ModeFence);
        }

        let (pending, backpressure) = self.present_pressure();
        target.previous_frame_pending = pending;
        target.backpressured = backpressure;
        if backpressure && config.gpu_backpressure {
            let deferred = self.scheduler.deferrals(DeferReason::Backpressure);
            if config
                .max_backpressure_deferrals
                .is_none_or(|max| deferred < max)
            {
                debug!(frame = target.frame_index, "present fence back-pressure, deferring frame");
                self.scheduler.defer(target, DeferReason::Backpressure);
                return None;
            }
            warn!(deferrals = deferred, "present fence back-pressure persists, committing anyway");
        } else {
            self.scheduler.clear_deferrals(DeferReason::Backpressure);
        }

        // Layers created since the last frame must exist before their first
        // transaction is checked.
        self.drain_ingress();
        let mut destroyed_handles = Vec::new();
        let mut created: Vec<LayerCreationArgs> = Vec::new();
        for request in std::mem::take(&mut self.pending_layer_requests) {
            match request {
                LayerRequest::Create(args) => created.push(args),
                LayerRequest::DestroyHandle(id) => destroyed_handles.push(id),
            }
        }
        self.lifecycle.add_layers(created);

        self.phase_begin(PhaseKind::Flush, target, tracer, summary);
        let now = self.ctx.now();
        let outcome = {
            let mut flush = FlushContext::new(
                target.expected_present,
                target.vsync_period,
                now,
                self.ctx.config(),
                &self.lifecycle,
                self.scheduler.tokens(),
                &self.unpresented,
            );
            flush.mode_change_pending = self.modes.has_mode_change_pending();
            self.transactions.flush(&mut flush)
        };
        for (transaction, reason) in &outcome.dropped {
            self.callbacks.add_dropped(transaction, *reason);
            tracer.transaction_dropped(&TransactionDroppedEvent {
                frame_index: target.frame_index,
                transaction_id: transaction.id,
                reason: *reason,
            });
        }
        if outcome.latched_unsignaled {
            debug!(frame = target.frame_index, "latched an unsignaled buffer");
        }
        self.phase_end(PhaseKind::Flush, target, tracer, summary);

        self.phase_begin(PhaseKind::Apply, target, tracer, summary);
        let latch_time = self.ctx.now();
        let applied = self.lifecycle.apply_transactions(&outcome.ready);
        self.callbacks.add_replaced(applied.replaced);
        self.unpresented
            .extend(applied.surfaces.iter().map(|(_, s)| s.layer));
        for transaction in &outcome.ready {
            self.callbacks
                .add_applied(transaction, latch_time, &applied.surfaces);
            for display_state in &transaction.display_states {
                self.display_state.apply(display_state);
            }
            tracer.transaction_applied(&TransactionAppliedEvent {
                frame_index: target.frame_index,
                transaction_id: transaction.id,
                layer_states: transaction.states.len(),
            });
        }
        summary.add_applied(outcome.ready.len());
        self.lifecycle.on_handles_destroyed(destroyed_handles);

        let display_changes = self.display_state.commit_display_transactions();
        for change in &display_changes {
            self.on_display_change(*change);
        }
        let (mode_changed, mode_forces_composite) = self.advance_mode_changes(tracer);
        self.phase_end(PhaseKind::Apply, target, tracer, summary);

        self.phase_begin(PhaseKind::Snapshot, target, tracer, summary);
        let hierarchy_rebuilt = self.hierarchy.update(&mut self.lifecycle);
        let changes = self.lifecycle.global_changes();
        self.snapshots = self.snapshot_builder.update(BuildArgs {
            lifecycle: &self.lifecycle,
            hierarchy: &self.hierarchy,
            force_update: false,
        });
        self.lifecycle.commit_changes();
        self.layer_history.record(
            self.snapshots.visible().map(LayerActivity::from_snapshot),
            target.vsync_time,
        );
        self.phase_end(PhaseKind::Snapshot, target, tracer, summary);

        let hal_refresh = std::mem::take(&mut self.hal_refresh_pending);
        let must_composite = !changes.is_empty()
            || target.composite_forced
            || hal_refresh
            || !display_changes.is_empty()
            || mode_changed
            || mode_forces_composite;
        debug!(
            frame = target.frame_index,
            applied = outcome.ready.len(),
            dropped = outcome.dropped.len(),
            ?changes,
            hierarchy_rebuilt,
            must_composite,
            "committed"
        );
        self.callbacks.send_commit_callbacks();
        Some(CommitResult { must_composite })
    }

    fn on_display_change(&mut self, change: DisplayChange) {
        let id = match change {
            DisplayChange::Removed(id) => {
                trace!(display = ?id, "display removal committed");
                return;
            }
            DisplayChange::Added(id)
            | DisplayChange::LayerStackChanged(id)
            | DisplayChange::ProjectionChanged(id)
            | DisplayChange::FlagsChanged(id)
            | DisplayChange::Resized { display: id, .. } => id,
        };
        let (Some(display), Some(state)) = (self.displays.get_mut(&id), self.display_state.drawing(id))
        else {
            return;
        };
        display.update_from(state);
        self.damage.invalidate(id);
        self.force_full_damage = true;
    }

    /// Finalizes, initiates, then finalizes again, so a switch the HAL
    /// applies immediately completes within one commit. Returns whether a
    /// mode changed and whether the frame must composite for a mode-set.
    fn advance_mode_changes(&mut self, tracer: &mut Tracer<'_>) -> (bool, bool) {
        let now = self.ctx.now();
        let mut changed = self.finalize_mode_changes(tracer);
        let mut force_composite = false;

        let display_state = &self.display_state;
        let initiations = self.modes.initiate_mode_changes(
            self.hal.as_mut(),
            |id| display_state.drawing(id).map(|s| (s.width, s.height)),
            now,
        );
        for initiation in initiations {
            match initiation {
                ModeInitiation::Initiated {
                    display,
                    mode,
                    timeline,
                } => {
                    self.scheduler
                        .resync_to_hardware_vsync(display, Some(mode.vsync_rate.period()));
                    force_composite = true;
                    let display_id = &display;
                    trace!(
                        display = ?display_id,
                        applies_at = timeline.new_vsync_applied_time.nanos(),
                        "mode-set accepted"
                    );
                    self.trace_mode_phase(display, tracer);
                }
                ModeInitiation::AwaitingResize { display, mode } => {
                    let display_id = &display;
                    trace!(display = ?display_id, mode = ?mode.id, "mode-set waits for a size transaction");
                }
                ModeInitiation::Recreate { display, mode } => {
                    let display_id = &display;
                    info!(display = ?display_id, mode = ?mode.id, width = mode.width, height = mode.height, "recreating display for new resolution");
                    self.display_state
                        .recreate(display, mode.width, mode.height);
                    if let Some(d) = self.displays.get_mut(&display) {
                        if let Some(switchable) = d.mode_switchable() {
                            switchable.on_mode_changed(mode);
                        }
                        if let Some(state) = self.display_state.drawing(display) {
                            d.update_from(state);
                        }
                    }
                    self.scheduler
                        .resync_to_hardware_vsync(display, Some(mode.vsync_rate.period()));
                    self.damage.invalidate(display);
                    self.force_full_damage = true;
                    self.trace_mode_phase(display, tracer);
                    changed = true;
                }
                ModeInitiation::Rejected { display, error } => {
                    let display_id = &display;
                    debug!(display = ?display_id, %error, "mode request dropped");
                    self.trace_mode_phase(display, tracer);
                }
            }
        }

        changed |= self.finalize_mode_changes(tracer);
        self.dispatch_mode_events();
        (changed, force_composite)
    }

    fn finalize_mode_changes(&mut self, tracer: &mut Tracer<'_>) -> bool {
        let finalized = self.modes.finalize_mode_changes();
        for &(display, mode) in &finalized {
            if let Some(switchable) = self
                .displays
                .get_mut(&display)
                .and_then(Display::mode_switchable)
            {
                switchable.on_mode_changed(mode);
            }
            self.scheduler
                .resync_to_hardware_vsync(display, Some(mode.vsync_rate.period()));
            self.damage.invalidate(display);
            self.trace_mode_phase(display, tracer);
        }
        !finalized.is_empty()
    }

    fn trace_mode_phase(&self, display: DisplayId, tracer: &mut Tracer<'_>) {
        if let Some(phase) = self.modes.phase(display) {
            tracer.mode_transition(&ModeTransitionEvent {
                display,
                phase,
                timestamp: self.ctx.now(),
            });
        }
    }

    fn dispatch_mode_events(&mut self) {
        for event in self.modes.take_events() {
            if let ModeEvent::Changed {
                display,
                render_rate,
                ..
            } = event
                && self.scheduler.pacesetter() == Some(display)
                && let Some(sink) = self.workload_hints.as_mut()
            {
                sink.update_target_work_duration(render_rate.period());
            }
            if let Some(listener) = self.frame_listener.as_mut() {
                listener.on_mode_event(&event);
            }
            self.mode_events.push(event);
        }
    }

    // -- Composite --

    /// Presents on every enabled display. Returns the present fence of the
    /// pacesetter, or of the first display that presented.
    fn composite(
        &mut self,
        target: &FrameTarget,
        tracer: &mut Tracer<'_>,
        summary: &mut FrameSummaryBuilder,
    ) -> Option<Fence> {
        self.phase_begin(PhaseKind::Composite, target, tracer, summary);
        let outputs: Vec<OutputConfig> = self
            .displays
            .values()
            .filter(|d| self.display_state.drawing(d.id()).is_some())
            .map(|d| d.output_config(target.frame_index))
            .collect();
        let mut args = RefreshArgs::build(
            RefreshRequest {
                frame_index: target.frame_index,
                expected_present: target.expected_present,
                snapshots: &self.snapshots,
                outputs: &outputs,
                force_full_damage: std::mem::take(&mut self.force_full_damage),
                color_transform: self.color_transform,
            },
            &mut self.damage,
        );

        let mut presented: Vec<(DisplayId, PresentOutcome)> = Vec::new();
        for refresh in &mut args.outputs {
            let id = refresh.output.display;
            let Some(display) = self.displays.get_mut(&id) else {
                continue;
            };
            let mut present_target = PresentTarget {
                hal: self.hal.as_mut(),
                engine: self.engine.as_mut(),
                color_transform: args.color_transform,
            };
            match display.presentable().present(&mut present_target, refresh) {
                Ok(outcome) => {
                    if !id.is_virtual() {
                        self.modes
                            .on_frame_composited(id, outcome.present_fence.clone());
                        self.trace_mode_phase(id, tracer);
                    }
                    trace!(
                        display = ?id,
                        releases = outcome.release_fences.len(),
                        client = outcome.client_composed,
                        "display presented"
                    );
                    presented.push((id, outcome));
                }
                Err(err) => {
                    error!(display = ?id, %err, "present failed, display skipped this frame");
                    self.damage.invalidate(id);
                }
            }
        }
        self.phase_end(PhaseKind::Composite, target, tracer, summary);

        let pacesetter = presented
            .iter()
            .position(|(id, _)| *id == target.pacesetter)
            .unwrap_or(0);
        presented
            .into_iter()
            .nth(pacesetter)
            .and_then(|(_, outcome)| outcome.present_fence)
    }

    // -- Post-composition --

    fn post_composite(
        &mut self,
        target: &FrameTarget,
        commit_start: HostTime,
        composite_end: HostTime,
        present_fence: Option<Option<Fence>>,
        tracer: &mut Tracer<'_>,
        summary: &mut FrameSummaryBuilder,
    ) {
        self.phase_begin(PhaseKind::PostComposite, target, tracer, summary);
        let composited = present_fence.is_some();
        let present_fence = present_fence.flatten();
        self.callbacks
            .send_complete_callbacks(present_fence.as_ref());
        if composited {
            self.unpresented.clear();
            if self.pending_feedback.len() == MAX_PENDING_FEEDBACK
                && let Some(stale) = self.pending_feedback.pop_front()
            {
                warn!(frame = stale.target.frame_index, "present fence never signaled");
            }
            self.pending_feedback.push_back(PendingFeedback {
                target: *target,
                commit_start,
                composite_end,
                present_fence,
            });
        }
        self.resolve_feedback(target, tracer, summary);

        if let Some(sink) = self.workload_hints.as_mut() {
            sink.report_actual_work(&WorkloadHint {
                frame_index: target.frame_index,
                commit_start,
                composite_end,
                expected_present: target.expected_present,
                vsync_period: target.vsync_period,
            });
        }
        self.phase_end(PhaseKind::PostComposite, target, tracer, summary);
    }

    /// Resolves feedback in frame order, stopping at the first frame whose
    /// present fence is still pending.
    fn resolve_feedback(
        &mut self,
        target: &FrameTarget,
        tracer: &mut Tracer<'_>,
        summary: &mut FrameSummaryBuilder,
    ) {
        while self
            .pending_feedback
            .front()
            .is_some_and(PendingFeedback::is_ready)
        {
            let Some(pending) = self.pending_feedback.pop_front() else {
                break;
            };
            let Some(feedback) = pending.resolve() else {
                continue;
            };
            tracer.present_feedback(&PresentFeedbackEvent::from(&feedback));
            if feedback.frame_index == target.frame_index {
                summary.set_missed_deadline(feedback.missed_deadline == Some(true));
            }
            let jank = self.stats.observe(&feedback);
            if let Some(listener) = self.frame_listener.as_mut() {
                listener.on_present(&feedback);
                if let Some(jank) = jank {
                    listener.on_jank(&jank);
                }
            }
        }
    }
}
