// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display state deltas and the current/drawing generations.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitflags::bitflags;
use kurbo::{Rect, Size};
use tracing::{debug, warn};

use crate::id::{DisplayId, LayerStack};

bitflags! {
    /// Which fields of a [`DisplayState`] are set.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DisplayWhat: u32 {
        /// Layer stack.
        const LAYER_STACK = 1 << 0;
        /// Orientation and rects.
        const PROJECTION = 1 << 1;
        /// Framebuffer size.
        const SIZE = 1 << 2;
        /// Display flags.
        const FLAGS = 1 << 3;
    }
}

bitflags! {
    /// Display properties.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DisplayFlags: u32 {
        /// May show secure layers.
        const SECURE = 1 << 0;
        /// Content is protected end to end.
        const PROTECTED = 1 << 1;
    }
}

/// Display rotation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    /// Natural orientation.
    #[default]
    Rot0,
    /// Quarter turn.
    Rot90,
    /// Half turn.
    Rot180,
    /// Three quarter turn.
    Rot270,
}

/// Power state of a display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PowerMode {
    /// Off; no vsync.
    #[default]
    Off,
    /// Low-power always-on mode.
    Doze,
    /// On.
    On,
}

impl PowerMode {
    /// The display produces frames.
    #[must_use]
    pub fn is_on(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// One display delta inside a transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayState {
    /// Target display.
    pub display: DisplayId,
    /// Fields that are set.
    pub what: DisplayWhat,
    /// Layer stack to show.
    pub layer_stack: LayerStack,
    /// Rotation.
    pub orientation: Rotation,
    /// Region of the layer stack to show.
    pub layer_stack_rect: Rect,
    /// Where on the display to show it.
    pub display_rect: Rect,
    /// Framebuffer width.
    pub width: u32,
    /// Framebuffer height.
    pub height: u32,
    /// Display flags.
    pub flags: DisplayFlags,
}

impl DisplayState {
    /// An empty delta for `display`.
    #[must_use]
    pub fn new(display: DisplayId) -> Self {
        Self {
            display,
            what: DisplayWhat::empty(),
            layer_stack: LayerStack::default(),
            orientation: Rotation::Rot0,
            layer_stack_rect: Rect::ZERO,
            display_rect: Rect::ZERO,
            width: 0,
            height: 0,
            flags: DisplayFlags::empty(),
        }
    }

    /// Sets the layer stack.
    #[must_use]
    pub fn layer_stack(mut self, stack: LayerStack) -> Self {
        self.layer_stack = stack;
        self.what |= DisplayWhat::LAYER_STACK;
        self
    }

    /// Sets the projection.
    #[must_use]
    pub fn projection(mut self, orientation: Rotation, layer_stack_rect: Rect, display_rect: Rect) -> Self {
        self.orientation = orientation;
        self.layer_stack_rect = layer_stack_rect;
        self.display_rect = display_rect;
        self.what |= DisplayWhat::PROJECTION;
        self
    }

    /// Sets the framebuffer size.
    #[must_use]
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self.what |= DisplayWhat::SIZE;
        self
    }

    /// Sets the flags.
    #[must_use]
    pub fn flags(mut self, flags: DisplayFlags) -> Self {
        self.flags = flags;
        self.what |= DisplayWhat::FLAGS;
        self
    }
}

/// Everything the pipeline knows about one display.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayDeviceState {
    /// Identity.
    pub id: DisplayId,
    /// Debug name.
    pub name: Arc<str>,
    /// Built into the device.
    pub is_internal: bool,
    /// Layer stack to show.
    pub layer_stack: LayerStack,
    /// Rotation.
    pub orientation: Rotation,
    /// Region of the layer stack to show.
    pub layer_stack_rect: Rect,
    /// Where on the display to show it.
    pub display_rect: Rect,
    /// Framebuffer width.
    pub width: u32,
    /// Framebuffer height.
    pub height: u32,
    /// Display flags.
    pub flags: DisplayFlags,
    /// Power state.
    pub power_mode: PowerMode,
    /// Bumped when the display is recreated in place.
    pub sequence: u32,
}

impl DisplayDeviceState {
    /// A display showing `layer_stack` at full size.
    #[must_use]
    pub fn new(id: DisplayId, name: &str, width: u32, height: u32) -> Self {
        let full = Rect::from_origin_size((0.0, 0.0), Size::new(f64::from(width), f64::from(height)));
        Self {
            id,
            name: name.into(),
            is_internal: false,
            layer_stack: LayerStack::default(),
            orientation: Rotation::Rot0,
            layer_stack_rect: full,
            display_rect: full,
            width,
            height,
            flags: DisplayFlags::empty(),
            power_mode: PowerMode::Off,
            sequence: 0,
        }
    }

    /// Marks the display as built in.
    #[must_use]
    pub fn internal(mut self) -> Self {
        self.is_internal = true;
        self
    }

    /// Sets the layer stack.
    #[must_use]
    pub fn with_layer_stack(mut self, stack: LayerStack) -> Self {
        self.layer_stack = stack;
        self
    }

    /// Framebuffer size.
    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(f64::from(self.width), f64::from(self.height))
    }

    fn merge(&mut self, state: &DisplayState) -> bool {
        let before = self.clone();
        if state.what.contains(DisplayWhat::LAYER_STACK) {
            self.layer_stack = state.layer_stack;
        }
        if state.what.contains(DisplayWhat::PROJECTION) {
            self.orientation = state.orientation;
            self.layer_stack_rect = state.layer_stack_rect;
            self.display_rect = state.display_rect;
        }
        if state.what.contains(DisplayWhat::SIZE) {
            self.width = state.width;
            self.height = state.height;
        }
        if state.what.contains(DisplayWhat::FLAGS) {
            self.flags = state.flags;
        }
        *self != before
    }
}

/// What a display commit changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayChange {
    /// A display appeared.
    Added(DisplayId),
    /// A display went away.
    Removed(DisplayId),
    /// The layer stack changed.
    LayerStackChanged(DisplayId),
    /// Orientation or rects changed.
    ProjectionChanged(DisplayId),
    /// The framebuffer size changed.
    Resized {
        /// Display.
        display: DisplayId,
        /// New width.
        width: u32,
        /// New height.
        height: u32,
    },
    /// Flags changed.
    FlagsChanged(DisplayId),
}

/// Current (latest committed intent) and drawing (visible) display state.
#[derive(Clone, Debug, Default)]
pub struct DisplayStateStore {
    current: BTreeMap<DisplayId, DisplayDeviceState>,
    drawing: BTreeMap<DisplayId, DisplayDeviceState>,
}

impl DisplayStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a display to the current generation.
    pub fn add_display(&mut self, state: DisplayDeviceState) {
        self.current.insert(state.id, state);
    }

    /// Removes a display from the current generation.
    pub fn remove_display(&mut self, id: DisplayId) -> Option<DisplayDeviceState> {
        self.current.remove(&id)
    }

    /// Applies a delta to the current generation. Returns whether anything
    /// changed.
    pub fn apply(&mut self, state: &DisplayState) -> bool {
        let Some(display) = self.current.get_mut(&state.display) else {
            warn!(display = ?state.display, "display state for unknown display");
            return false;
        };
        display.merge(state)
    }

    /// Sets the power mode in both generations; power changes are not
    /// transactional.
    pub fn set_power_mode(&mut self, id: DisplayId, mode: PowerMode) {
        for generation in [&mut self.current, &mut self.drawing] {
            if let Some(display) = generation.get_mut(&id) {
                display.power_mode = mode;
            }
        }
    }

    /// Replaces a display's framebuffer size in both generations and bumps
    /// its sequence, as when the display is recreated.
    pub fn recreate(&mut self, id: DisplayId, width: u32, height: u32) {
        for generation in [&mut self.current, &mut self.drawing] {
            if let Some(display) = generation.get_mut(&id) {
                display.width = width;
                display.height = height;
                display.sequence += 1;
            }
        }
    }

    /// Whether current differs from drawing.
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        self.current != self.drawing
    }

    /// Diffs current against drawing, then makes drawing equal current.
    pub fn commit_display_transactions(&mut self) -> Vec<DisplayChange> {
        let mut changes = Vec::new();
        for id in self.drawing.keys() {
            if !self.current.contains_key(id) {
                changes.push(DisplayChange::Removed(*id));
            }
        }
        for (id, current) in &self.current {
            let Some(drawing) = self.drawing.get(id) else {
                changes.push(DisplayChange::Added(*id));
                continue;
            };
            if current.layer_stack != drawing.layer_stack {
                changes.push(DisplayChange::LayerStackChanged(*id));
            }
            if current.orientation != drawing.orientation
                || current.layer_stack_rect != drawing.layer_stack_rect
                || current.display_rect != drawing.display_rect
            {
                changes.push(DisplayChange::ProjectionChanged(*id));
            }
            if (current.width, current.height) != (drawing.width, drawing.height) {
                changes.push(DisplayChange::Resized {
                    display: *id,
                    width: current.width,
                    height: current.height,
                });
            }
            if current.flags != drawing.flags {
                changes.push(DisplayChange::FlagsChanged(*id));
            }
        }
        if !changes.is_empty() {
            debug!(?changes, "display transactions committed");
        }
        self.drawing.clone_from(&self.current);
        changes
    }

    /// Latest committed intent.
    #[must_use]
    pub fn current(&self, id: DisplayId) -> Option<&DisplayDeviceState> {
        self.current.get(&id)
    }

    /// Visible state.
    #[must_use]
    pub fn drawing(&self, id: DisplayId) -> Option<&DisplayDeviceState> {
        self.drawing.get(&id)
    }

    /// Visible displays in id order.
    pub fn drawing_displays(&self) -> impl Iterator<Item = &DisplayDeviceState> {
        self.drawing.values()
    }
}
