// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display variants and their capabilities.
//!
//! A [`Display`] is either [`Physical`](Display::Physical), driven by the
//! hardware composer, or [`Virtual`](Display::Virtual), composed entirely by
//! the composition engine into a client surface. What the frame driver does
//! with a display goes through three small traits:
//!
//! - [`Presentable`]: output configuration and present.
//! - [`ModeSwitchable`]: refresh-rate and resolution switching. Physical
//!   displays only.
//! - [`Screenshottable`]: the snapshot scope of a capture.

use std::fmt;
use std::sync::Arc;

use kurbo::Rect;
use lamina_core::display::{
    DesiredModeAction, DisplayDeviceState, DisplayMode, DisplayModeController, DisplayModeRequest,
    PowerMode,
};
use lamina_core::error::{HalError, ModeError};
use lamina_core::fence::Fence;
use lamina_core::hal::{HalCapabilities, HwComposer};
use lamina_core::id::{DisplayId, LayerId, LayerStack};
use lamina_core::layer::SnapshotScope;
use lamina_core::timing::PresentFenceHistory;
use lamina_render::{
    ClientCompositionRequest, ColorMatrix, CompositionEngine, DamageRegion, OutputConfig,
    OutputRefresh, RenderError,
};
use thiserror::Error;
use tracing::{debug, trace};

/// Present failed on one display. The frame goes on for the others.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum PresentError {
    /// The hardware composer refused.
    #[error("hardware composer: {0}")]
    Hal(#[from] HalError),
    /// The composition engine failed.
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Collaborators a present needs.
pub struct PresentTarget<'a> {
    /// Hardware composer.
    pub hal: &'a mut dyn HwComposer,
    /// Composition engine.
    pub engine: &'a mut dyn CompositionEngine,
    /// Color transform of this frame.
    pub color_transform: Option<ColorMatrix>,
}

impl fmt::Debug for PresentTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentTarget")
            .field("color_transform", &self.color_transform)
            .finish_non_exhaustive()
    }
}

/// Fences from one display's present.
#[derive(Clone, Debug, Default)]
pub struct PresentOutcome {
    /// Signals when the frame is visible.
    pub present_fence: Option<Fence>,
    /// Per layer: signals when the previous buffer is no longer read.
    pub release_fences: Vec<(LayerId, Fence)>,
    /// The composition engine drew part of the frame.
    pub client_composed: bool,
}

/// A display that frames are presented to.
pub trait Presentable {
    /// What the display shows in frame `frame_index`.
    fn output_config(&self, frame_index: u64) -> OutputConfig;

    /// Presents one frame.
    ///
    /// # Errors
    ///
    /// A HAL or engine failure; nothing was presented.
    fn present(
        &mut self,
        target: &mut PresentTarget<'_>,
        refresh: &mut OutputRefresh,
    ) -> Result<PresentOutcome, PresentError>;
}

/// A display whose mode can be switched.
pub trait ModeSwitchable {
    /// Hands `request` to the mode controller.
    ///
    /// # Errors
    ///
    /// The display or mode is unknown to the controller.
    fn request_mode(
        &mut self,
        modes: &mut DisplayModeController,
        request: DisplayModeRequest,
    ) -> Result<DesiredModeAction, ModeError>;

    /// The mode the display runs.
    fn mode(&self) -> DisplayMode;

    /// A switch finalized.
    fn on_mode_changed(&mut self, mode: DisplayMode);
}

/// What a capture of a display contains.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScreenshotRequest {
    /// Capture this subtree instead of the display's layer stack.
    pub root: Option<LayerId>,
    /// Leave these layers out.
    pub excluded: Vec<LayerId>,
    /// With `root`, leave the root layer itself out.
    pub children_only: bool,
}

/// A display that can be captured.
pub trait Screenshottable {
    /// The snapshot scope for `request`.
    fn screenshot_scope(&self, request: &ScreenshotRequest) -> SnapshotScope;
}

fn scope_for(layer_stack: LayerStack, request: &ScreenshotRequest) -> SnapshotScope {
    let mut scope = match request.root {
        Some(root) => SnapshotScope {
            children_only: request.children_only,
            ..SnapshotScope::subtree(root)
        },
        None => SnapshotScope::layer_stack(layer_stack),
    };
    scope.excluded.extend(request.excluded.iter().copied());
    scope
}

// ---------------------------------------------------------------------------
// Physical
// ---------------------------------------------------------------------------

/// A display driven by the hardware composer.
#[derive(Clone, Debug)]
pub struct PhysicalDisplay {
    id: DisplayId,
    name: Arc<str>,
    internal: bool,
    layer_stack: LayerStack,
    bounds: Rect,
    power: PowerMode,
    mode: DisplayMode,
    history: PresentFenceHistory,
}

impl PhysicalDisplay {
    /// A display shown as `state` describes, running `mode`.
    #[must_use]
    pub fn new(state: &DisplayDeviceState, mode: DisplayMode) -> Self {
        Self {
            id: state.id,
            name: Arc::clone(&state.name),
            internal: state.is_internal,
            layer_stack: state.layer_stack,
            bounds: state.layer_stack_rect,
            power: state.power_mode,
            mode,
            history: PresentFenceHistory::new(),
        }
    }

    /// Identity.
    #[must_use]
    pub fn id(&self) -> DisplayId {
        self.id
    }

    /// Debug name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Power state.
    #[must_use]
    pub fn power_mode(&self) -> PowerMode {
        self.power
    }

    /// Records a power change. Powering off forgets pending present fences.
    pub fn set_power_mode(&mut self, mode: PowerMode) {
        if !mode.is_on() {
            self.history.clear();
        }
        self.power = mode;
    }

    /// Recent present fences.
    #[must_use]
    pub fn present_history(&self) -> &PresentFenceHistory {
        &self.history
    }
}

impl Presentable for PhysicalDisplay {
    fn output_config(&self, _frame_index: u64) -> OutputConfig {
        OutputConfig {
            display: self.id,
            layer_stack: self.layer_stack,
            bounds: self.bounds,
            internal: self.internal,
            enabled: self.power.is_on(),
        }
    }

    fn present(
        &mut self,
        target: &mut PresentTarget<'_>,
        refresh: &mut OutputRefresh,
    ) -> Result<PresentOutcome, PresentError> {
        let skip_validate = target
            .hal
            .capabilities()
            .contains(HalCapabilities::SKIP_VALIDATE)
            && !refresh.plan.client_composition;
        if !skip_validate {
            let layers = refresh.plan.layer_compositions();
            let changes = target.hal.get_device_composition_changes(self.id, &layers)?;
            refresh.plan.apply_device_changes(&changes);
        }

        let client_composed = refresh.plan.client_composition;
        if client_composed {
            let request = refresh.client_request(target.color_transform);
            target.engine.compose(&request)?;
        }

        let result = target.hal.present_and_get_release_fences(self.id)?;
        self.history.push(result.present_fence.clone());
        trace!(display = ?self.id, client_composed, "presented");
        Ok(PresentOutcome {
            present_fence: Some(result.present_fence),
            release_fences: result.release_fences,
            client_composed,
        })
    }
}

impl ModeSwitchable for PhysicalDisplay {
    fn request_mode(
        &mut self,
        modes: &mut DisplayModeController,
        request: DisplayModeRequest,
    ) -> Result<DesiredModeAction, ModeError> {
        modes.set_desired_mode(self.id, request)
    }

    fn mode(&self) -> DisplayMode {
        self.mode
    }

    fn on_mode_changed(&mut self, mode: DisplayMode) {
        debug!(display = ?self.id, mode = ?mode.id, rate = ?mode.vsync_rate, "display mode changed");
        self.mode = mode;
    }
}

impl Screenshottable for PhysicalDisplay {
    fn screenshot_scope(&self, request: &ScreenshotRequest) -> SnapshotScope {
        scope_for(self.layer_stack, request)
    }
}

// ---------------------------------------------------------------------------
// Virtual
// ---------------------------------------------------------------------------

/// A display composed by the engine into a client surface.
#[derive(Clone, Debug)]
pub struct VirtualDisplay {
    id: DisplayId,
    name: Arc<str>,
    layer_stack: LayerStack,
    bounds: Rect,
    frame_divisor: u64,
    surface_attached: bool,
}

impl VirtualDisplay {
    /// A virtual display shown as `state` describes, composing every
    /// `frame_divisor`-th frame.
    #[must_use]
    pub fn new(state: &DisplayDeviceState, frame_divisor: u32) -> Self {
        Self {
            id: state.id,
            name: Arc::clone(&state.name),
            layer_stack: state.layer_stack,
            bounds: state.layer_stack_rect,
            frame_divisor: u64::from(frame_divisor.max(1)),
            surface_attached: true,
        }
    }

    /// Identity.
    #[must_use]
    pub fn id(&self) -> DisplayId {
        self.id
    }

    /// Debug name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches or detaches the client surface. A detached display is not
    /// composed.
    pub fn set_surface_attached(&mut self, attached: bool) {
        self.surface_attached = attached;
    }

    /// Whether frame `frame_index` is composed on this display.
    #[must_use]
    pub fn is_on_cadence(&self, frame_index: u64) -> bool {
        frame_index % self.frame_divisor == 0
    }
}

impl Presentable for VirtualDisplay {
    fn output_config(&self, frame_index: u64) -> OutputConfig {
        OutputConfig {
            display: self.id,
            layer_stack: self.layer_stack,
            bounds: self.bounds,
            internal: false,
            enabled: self.surface_attached && self.is_on_cadence(frame_index),
        }
    }

    fn present(
        &mut self,
        target: &mut PresentTarget<'_>,
        refresh: &mut OutputRefresh,
    ) -> Result<PresentOutcome, PresentError> {
        let damage = if refresh.plan.force_full_damage {
            DamageRegion::Full
        } else {
            refresh.damage.clone()
        };
        let request = ClientCompositionRequest {
            display: self.id,
            bounds: refresh.output.bounds,
            items: refresh.plan.items.iter().collect(),
            damage,
            color_transform: target.color_transform,
        };
        let fence = target.engine.compose(&request)?;
        trace!(display = ?self.id, items = request.items.len(), "virtual display composed");
        Ok(PresentOutcome {
            present_fence: Some(fence),
            release_fences: Vec::new(),
            client_composed: true,
        })
    }
}

impl Screenshottable for VirtualDisplay {
    fn screenshot_scope(&self, request: &ScreenshotRequest) -> SnapshotScope {
        scope_for(self.layer_stack, request)
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// A display of either kind.
#[derive(Clone, Debug)]
pub enum Display {
    /// Hardware display.
    Physical(PhysicalDisplay),
    /// Engine-composed display.
    Virtual(VirtualDisplay),
}

impl Display {
    /// Identity.
    #[must_use]
    pub fn id(&self) -> DisplayId {
        match self {
            Self::Physical(d) => d.id,
            Self::Virtual(d) => d.id,
        }
    }

    /// Layer stack shown.
    #[must_use]
    pub fn layer_stack(&self) -> LayerStack {
        match self {
            Self::Physical(d) => d.layer_stack,
            Self::Virtual(d) => d.layer_stack,
        }
    }

    /// Present capability.
    pub fn presentable(&mut self) -> &mut dyn Presentable {
        match self {
            Self::Physical(d) => d,
            Self::Virtual(d) => d,
        }
    }

    /// The output configuration for frame `frame_index`.
    #[must_use]
    pub fn output_config(&self, frame_index: u64) -> OutputConfig {
        match self {
            Self::Physical(d) => d.output_config(frame_index),
            Self::Virtual(d) => d.output_config(frame_index),
        }
    }

    /// Mode switch capability; virtual displays have none.
    pub fn mode_switchable(&mut self) -> Option<&mut dyn ModeSwitchable> {
        match self {
            Self::Physical(d) => Some(d),
            Self::Virtual(_) => None,
        }
    }

    /// Capture capability.
    #[must_use]
    pub fn screenshottable(&self) -> &dyn Screenshottable {
        match self {
            Self::Physical(d) => d,
            Self::Virtual(d) => d,
        }
    }

    /// The physical display, if this is one.
    #[must_use]
    pub fn as_physical(&self) -> Option<&PhysicalDisplay> {
        match self {
            Self::Physical(d) => Some(d),
            Self::Virtual(_) => None,
        }
    }

    /// Mutable access to the physical display, if this is one.
    pub fn as_physical_mut(&mut self) -> Option<&mut PhysicalDisplay> {
        match self {
            Self::Physical(d) => Some(d),
            Self::Virtual(_) => None,
        }
    }

    /// Picks up committed display state.
    pub fn update_from(&mut self, state: &DisplayDeviceState) {
        let (layer_stack, bounds) = match self {
            Self::Physical(d) => (&mut d.layer_stack, &mut d.bounds),
            Self::Virtual(d) => (&mut d.layer_stack, &mut d.bounds),
        };
        *layer_stack = state.layer_stack;
        *bounds = state.layer_stack_rect;
        if let Self::Physical(d) = self {
            d.internal = state.is_internal;
        }
    }
}
