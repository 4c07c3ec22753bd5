// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hardware composer boundary.
//!
//! The HAL is a black box with two directions:
//!
//! - **Calls** go through the [`HwComposer`] trait. The pipeline only relies
//!   on the methods here and checks [`HalCapabilities`] at runtime for
//!   anything optional.
//!
//! - **Callbacks** (vsync, hotplug, timing changes) arrive on HAL threads as
//!   [`HalEvent`]s. They are posted to a [`HalEventQueue`] and drained once
//!   per loop iteration on the main thread, so no pipeline state is touched
//!   from a HAL thread.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::display::{DisplayMode, ModeConstraints, ModeTimeline, PowerMode};
use crate::error::{HalError, IngressError};
use crate::fence::Fence;
use crate::id::{DisplayId, LayerId, ModeId};
use crate::time::{Duration, HostTime};
use crate::transaction::WakeHook;

bitflags! {
    /// Optional HAL behavior, queried once at startup.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HalCapabilities: u32 {
        /// Present may be called without a prior validate.
        const SKIP_VALIDATE = 1 << 0;
        /// Present fences may signal early; do not use them for pacing.
        const PRESENT_FENCE_IS_NOT_RELIABLE = 1 << 1;
        /// The HAL reports refresh rate changes for debugging.
        const REFRESH_RATE_CHANGED_DEBUG = 1 << 2;
    }
}

/// How a layer is composed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompositionType {
    /// Rendered by the composition engine into the client target.
    Client,
    /// Scanned out by the display hardware.
    #[default]
    Device,
    /// A solid color the hardware fills.
    SolidColor,
}

/// A layer and the composition type requested or chosen for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerComposition {
    /// Layer.
    pub layer: LayerId,
    /// Composition type.
    pub composition: CompositionType,
}

/// The HAL's answer to a composition request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceCompositionChanges {
    /// Layers whose composition type the HAL changed.
    pub changed_types: Vec<LayerComposition>,
}

impl DeviceCompositionChanges {
    /// Whether any layer must be composed by the engine.
    #[must_use]
    pub fn needs_client_composition(&self, requested: &[LayerComposition]) -> bool {
        requested
            .iter()
            .map(|l| {
                self.changed_types
                    .iter()
                    .find(|c| c.layer == l.layer)
                    .map_or(l.composition, |c| c.composition)
            })
            .any(|c| c == CompositionType::Client)
    }
}

/// Fences returned by a present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresentResult {
    /// Signals when the frame is on screen.
    pub present_fence: Fence,
    /// Per layer: signals when the previous buffer is no longer read.
    pub release_fences: Vec<(LayerId, Fence)>,
}

/// Calls into the hardware composer.
///
/// Every method is called on the main thread.
pub trait HwComposer {
    /// Optional behavior supported by this HAL.
    fn capabilities(&self) -> HalCapabilities;

    /// Modes a display supports. Queried on every hotplug.
    fn display_modes(&mut self, display: DisplayId) -> Result<Vec<DisplayMode>, HalError>;

    /// The mode a display currently runs.
    fn active_mode(&mut self, display: DisplayId) -> Result<ModeId, HalError>;

    /// Changes a display's power state.
    fn set_power_mode(&mut self, display: DisplayId, mode: PowerMode) -> Result<(), HalError>;

    /// Turns hardware vsync callbacks on or off.
    fn set_vsync_enabled(&mut self, display: DisplayId, enabled: bool) -> Result<(), HalError>;

    /// Starts a mode-set and reports when it applies.
    fn set_active_mode_with_constraints(
        &mut self,
        display: DisplayId,
        mode: ModeId,
        constraints: &ModeConstraints,
    ) -> Result<ModeTimeline, HalError>;

    /// Validates a frame; the HAL may move layers to client composition.
    fn get_device_composition_changes(
        &mut self,
        display: DisplayId,
        layers: &[LayerComposition],
    ) -> Result<DeviceCompositionChanges, HalError>;

    /// Presents the validated frame.
    fn present_and_get_release_fences(&mut self, display: DisplayId) -> Result<PresentResult, HalError>;
}

/// A callback from the HAL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HalEvent {
    /// Hardware vsync.
    Vsync {
        /// Display.
        display: DisplayId,
        /// When it happened.
        timestamp: HostTime,
        /// Period the HAL reports, if any.
        period: Option<Duration>,
    },
    /// A display connected or disconnected.
    Hotplug {
        /// Display.
        display: DisplayId,
        /// Connected or disconnected.
        connected: bool,
    },
    /// A pending mode-set's timeline moved.
    VsyncPeriodTimingChanged {
        /// Display.
        display: DisplayId,
        /// New timeline.
        timeline: ModeTimeline,
    },
    /// The panel changed its refresh rate on its own.
    RefreshRateChangedDebug {
        /// Display.
        display: DisplayId,
        /// New period.
        period: Duration,
    },
    /// The HAL wants a new frame.
    Refresh {
        /// Display.
        display: DisplayId,
    },
}

/// Posts [`HalEvent`]s from HAL threads.
#[derive(Clone)]
pub struct HalEventSender {
    tx: mpsc::Sender<HalEvent>,
    wake: Arc<Mutex<Option<WakeHook>>>,
}

impl HalEventSender {
    /// Posts an event and wakes the main thread.
    ///
    /// # Errors
    ///
    /// Fails once the queue has been dropped.
    pub fn send(&self, event: HalEvent) -> Result<(), IngressError> {
        self.tx.send(event).map_err(|_| IngressError("hal events"))?;
        let wake = self.wake.lock().clone();
        if let Some(wake) = wake {
            wake();
        }
        Ok(())
    }
}

impl fmt::Debug for HalEventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HalEventSender").finish_non_exhaustive()
    }
}

/// Main-thread end of the HAL callback channel.
pub struct HalEventQueue {
    tx: mpsc::Sender<HalEvent>,
    rx: mpsc::Receiver<HalEvent>,
    wake: Arc<Mutex<Option<WakeHook>>>,
}

impl HalEventQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            wake: Arc::new(Mutex::new(None)),
        }
    }

    /// A handle for HAL threads.
    #[must_use]
    pub fn sender(&self) -> HalEventSender {
        HalEventSender {
            tx: self.tx.clone(),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Called after each posted event.
    pub fn set_wake_hook(&self, hook: WakeHook) {
        *self.wake.lock() = Some(hook);
    }

    /// Takes every event posted so far, in order.
    pub fn drain(&self) -> Vec<HalEvent> {
        self.rx.try_iter().collect()
    }
}

impl Default for HalEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HalEventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HalEventQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const PRIMARY: DisplayId = DisplayId::Physical(0);

    #[test]
    fn events_drain_in_order_across_threads() {
        let queue = HalEventQueue::new();
        let woken = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&woken);
        queue.set_wake_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        }));

        let sender = queue.sender();
        std::thread::spawn(move || {
            for t in 1..=3 {
                sender
                    .send(HalEvent::Vsync {
                        display: PRIMARY,
                        timestamp: HostTime(t),
                        period: None,
                    })
                    .unwrap();
            }
        })
        .join()
        .unwrap();

        let stamps: Vec<_> = queue
            .drain()
            .into_iter()
            .map(|e| match e {
                HalEvent::Vsync { timestamp, .. } => timestamp.nanos(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(stamps, vec![1, 2, 3]);
        assert_eq!(woken.load(Ordering::Relaxed), 3);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn send_fails_after_queue_drop() {
        let queue = HalEventQueue::new();
        let sender = queue.sender();
        drop(queue);
        assert!(sender.send(HalEvent::Refresh { display: PRIMARY }).is_err());
    }

    #[test]
    fn client_composition_follows_changes() {
        let requested = [
            LayerComposition {
                layer: LayerId(1),
                composition: CompositionType::Device,
            },
            LayerComposition {
                layer: LayerId(2),
                composition: CompositionType::Device,
            },
        ];
        let mut changes = DeviceCompositionChanges::default();
        assert!(!changes.needs_client_composition(&requested));
        changes.changed_types.push(LayerComposition {
            layer: LayerId(2),
            composition: CompositionType::Client,
        });
        assert!(changes.needs_client_composition(&requested));
    }
}
