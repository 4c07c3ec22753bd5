// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Requested layer state and the deltas clients send to change it.
//!
//! A [`LayerState`] is a sparse delta: its [`What`] mask names the fields
//! that are set. [`RequestedLayerState::merge`] folds a delta into the
//! authoritative state and records which derived properties were affected
//! in a [`Changes`] mask. The snapshot builder uses those bits to decide
//! what to recompute; the lifecycle manager folds them into the frame's
//! global change set.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitflags::bitflags;
use kurbo::{Affine, Point, Rect, Size};
use tracing::error;

use crate::id::{LayerId, LayerStack, ProducerId};
use crate::time::Fps;

use super::buffer::BufferData;

bitflags! {
    /// Fields set in a [`LayerState`] delta.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct What: u32 {
        /// Position.
        const POSITION = 1 << 0;
        /// Z order among siblings.
        const LAYER = 1 << 1;
        /// Alpha.
        const ALPHA = 1 << 2;
        /// 2x2 transform matrix.
        const MATRIX = 1 << 3;
        /// Layer flags (under a mask).
        const FLAGS = 1 << 4;
        /// Layer stack.
        const LAYER_STACK = 1 << 5;
        /// Crop rectangle.
        const CROP = 1 << 6;
        /// Relative-z parent and z.
        const RELATIVE_LAYER = 1 << 7;
        /// Parent.
        const REPARENT = 1 << 8;
        /// Buffer.
        const BUFFER = 1 << 9;
        /// Dataspace.
        const DATASPACE = 1 << 10;
        /// Solid color fill.
        const COLOR = 1 << 11;
        /// Metadata entries.
        const METADATA = 1 << 12;
        /// Frame-rate vote.
        const FRAME_RATE = 1 << 13;
        /// Background blur radius.
        const BACKGROUND_BLUR = 1 << 14;
    }
}

impl What {
    /// Fields that move a layer in the hierarchy.
    pub const HIERARCHY_CHANGES: Self = Self::LAYER
        .union(Self::RELATIVE_LAYER)
        .union(Self::REPARENT)
        .union(Self::LAYER_STACK);
    /// Fields that change the layer's geometry.
    pub const GEOMETRY_CHANGES: Self = Self::POSITION.union(Self::MATRIX).union(Self::CROP);
    /// Fields that change what the layer draws.
    pub const CONTENT_CHANGES: Self = Self::ALPHA
        .union(Self::BUFFER)
        .union(Self::COLOR)
        .union(Self::DATASPACE)
        .union(Self::BACKGROUND_BLUR);
    /// Fields inherited by children.
    pub const AFFECTS_CHILDREN: Self = Self::FLAGS
        .union(Self::LAYER_STACK)
        .union(Self::CROP)
        .union(Self::FRAME_RATE);
    /// Fields that change what the layer covers on screen.
    pub const VISIBLE_REGION_CHANGES: Self = Self::GEOMETRY_CHANGES
        .union(Self::HIERARCHY_CHANGES)
        .union(Self::ALPHA)
        .union(Self::BACKGROUND_BLUR);
    /// Fields a delta may not set and still count as a plain buffer update.
    pub const SIMPLE_BUFFER_DENIED: Self = Self::LAYER
        .union(Self::RELATIVE_LAYER)
        .union(Self::LAYER_STACK)
        .union(Self::REPARENT)
        .union(Self::FLAGS);
    /// Fields a plain buffer update may set only to their current value.
    pub const SIMPLE_BUFFER_DENIED_CHANGES: Self = Self::POSITION
        .union(Self::ALPHA)
        .union(Self::MATRIX)
        .union(Self::CROP)
        .union(Self::DATASPACE)
        .union(Self::COLOR)
        .union(Self::BACKGROUND_BLUR);
}

bitflags! {
    /// Derived properties affected since the last commit.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Changes: u32 {
        /// The layer was created.
        const CREATED = 1 << 0;
        /// The layer was destroyed.
        const DESTROYED = 1 << 1;
        /// The tree shape changed.
        const HIERARCHY = 1 << 2;
        /// Transform, crop or bounds changed.
        const GEOMETRY = 1 << 3;
        /// Drawn content changed.
        const CONTENT = 1 << 4;
        /// A property children inherit changed.
        const AFFECTS_CHILDREN = 1 << 5;
        /// Frame-rate vote changed.
        const FRAME_RATE = 1 << 6;
        /// Covered screen area changed.
        const VISIBLE_REGION = 1 << 7;
        /// Z order changed.
        const Z = 1 << 8;
        /// Parent changed.
        const PARENT = 1 << 9;
        /// Relative-z parent changed.
        const RELATIVE_PARENT = 1 << 10;
        /// Visibility may have flipped.
        const VISIBILITY = 1 << 11;
        /// Input-relevant properties changed.
        const INPUT = 1 << 12;
        /// A new buffer was set.
        const BUFFER = 1 << 13;
        /// The buffer dimensions changed.
        const BUFFER_SIZE = 1 << 14;
        /// Metadata changed.
        const METADATA = 1 << 15;
        /// Mirror sources changed.
        const MIRROR = 1 << 16;
        /// An animation transaction touched the layer.
        const ANIMATION = 1 << 17;
    }
}

impl Changes {
    /// Per-layer changes that require the hierarchy to be rebuilt.
    pub const HIERARCHY_TRIGGERS: Self = Self::CREATED
        .union(Self::DESTROYED)
        .union(Self::PARENT)
        .union(Self::RELATIVE_PARENT)
        .union(Self::Z)
        .union(Self::MIRROR);
}

bitflags! {
    /// Client-controlled layer flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct LayerFlags: u32 {
        /// The layer and its subtree are hidden.
        const HIDDEN = 1 << 0;
        /// The layer covers its bounds completely.
        const OPAQUE = 1 << 1;
        /// The layer may only be shown on internal displays.
        const SECURE = 1 << 2;
        /// The layer is excluded from screenshots.
        const SKIP_SCREENSHOT = 1 << 3;
        /// A second buffer waits until the first one has been presented.
        const ENABLE_BACKPRESSURE = 1 << 4;
    }
}

/// Color encoding of a layer's buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Dataspace {
    /// Unspecified; treated as sRGB.
    Unknown,
    /// sRGB.
    #[default]
    Srgb,
    /// Display P3.
    DisplayP3,
    /// BT.2020 with PQ transfer.
    Bt2020Pq,
    /// BT.2020 with HLG transfer.
    Bt2020Hlg,
}

/// How a frame-rate vote should be honored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrameRateCompatibility {
    /// The layer has no preference beyond its content.
    #[default]
    Default,
    /// An exact rate or a multiple of it.
    ExactOrMultiple,
    /// Exactly the requested rate.
    Exact,
    /// The layer does not vote.
    NoVote,
}

/// A layer's preferred refresh rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FrameRateVote {
    /// Requested rate; zero means no explicit rate.
    pub rate: Fps,
    /// How strictly the rate applies.
    pub compatibility: FrameRateCompatibility,
}

impl FrameRateVote {
    /// Whether the vote asks for anything.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.rate.is_valid() || self.compatibility == FrameRateCompatibility::NoVote
    }
}

/// Solid RGB fill in linear `[0, 1]` components.
pub type Rgb = [f32; 3];

/// A sparse update to one layer.
///
/// Only fields named by [`what`](Self::what) are read. Construct with
/// [`LayerState::new`] and the builder methods, which set the bits.
#[derive(Clone, Debug, Default)]
pub struct LayerState {
    /// Set fields.
    pub what: What,
    /// Position of the layer origin in parent space.
    pub position: Point,
    /// Z order.
    pub z: i32,
    /// Relative-z parent, with [`What::RELATIVE_LAYER`].
    pub relative_parent: LayerId,
    /// New parent, with [`What::REPARENT`]. Unassigned detaches the layer.
    pub parent: LayerId,
    /// Alpha in `[0, 1]`.
    pub alpha: f32,
    /// Linear part of the transform, applied before the position.
    pub matrix: Affine,
    /// New values for the flags in [`flags_mask`](Self::flags_mask).
    pub flags: LayerFlags,
    /// Flags to overwrite.
    pub flags_mask: LayerFlags,
    /// Layer stack.
    pub layer_stack: LayerStack,
    /// Crop in layer space; `None` clears it.
    pub crop: Option<Rect>,
    /// New buffer; `None` removes the current one.
    pub buffer: Option<BufferData>,
    /// Buffer dataspace.
    pub dataspace: Dataspace,
    /// Fill color; `None` disables the fill.
    pub color: Option<Rgb>,
    /// Metadata entries; an empty value removes the key.
    pub metadata: BTreeMap<u32, Vec<u8>>,
    /// Frame-rate vote.
    pub frame_rate: FrameRateVote,
    /// Background blur radius in pixels.
    pub background_blur_radius: u32,
}

impl LayerState {
    /// An empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alpha: 1.0,
            matrix: Affine::IDENTITY,
            ..Self::default()
        }
    }

    /// Sets the position.
    #[must_use]
    pub fn position(mut self, x: f64, y: f64) -> Self {
        self.position = Point::new(x, y);
        self.what |= What::POSITION;
        self
    }

    /// Sets the z order and drops any relative-z link.
    #[must_use]
    pub fn z(mut self, z: i32) -> Self {
        self.z = z;
        self.what |= What::LAYER;
        self
    }

    /// Orders the layer relative to `relative_parent` at `z`.
    #[must_use]
    pub fn relative_z(mut self, relative_parent: LayerId, z: i32) -> Self {
        self.relative_parent = relative_parent;
        self.z = z;
        self.what |= What::RELATIVE_LAYER;
        self
    }

    /// Moves the layer under `parent`.
    #[must_use]
    pub fn reparent(mut self, parent: LayerId) -> Self {
        self.parent = parent;
        self.what |= What::REPARENT;
        self
    }

    /// Sets alpha.
    #[must_use]
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self.what |= What::ALPHA;
        self
    }

    /// Sets the 2x2 matrix `[dsdx, dtdx, dtdy, dsdy]`.
    #[must_use]
    pub fn matrix(mut self, dsdx: f64, dtdx: f64, dtdy: f64, dsdy: f64) -> Self {
        self.matrix = Affine::new([dsdx, dtdx, dtdy, dsdy, 0.0, 0.0]);
        self.what |= What::MATRIX;
        self
    }

    /// Overwrites the flags in `mask` with `flags`.
    #[must_use]
    pub fn flags(mut self, flags: LayerFlags, mask: LayerFlags) -> Self {
        self.flags = flags;
        self.flags_mask = mask;
        self.what |= What::FLAGS;
        self
    }

    /// Shows or hides the layer.
    #[must_use]
    pub fn hidden(self, hidden: bool) -> Self {
        let flags = if hidden {
            LayerFlags::HIDDEN
        } else {
            LayerFlags::empty()
        };
        self.flags(flags, LayerFlags::HIDDEN)
    }

    /// Sets the layer stack.
    #[must_use]
    pub fn layer_stack(mut self, stack: LayerStack) -> Self {
        self.layer_stack = stack;
        self.what |= What::LAYER_STACK;
        self
    }

    /// Sets or clears the crop.
    #[must_use]
    pub fn crop(mut self, crop: Option<Rect>) -> Self {
        self.crop = crop;
        self.what |= What::CROP;
        self
    }

    /// Sets or removes the buffer.
    #[must_use]
    pub fn buffer(mut self, buffer: Option<BufferData>) -> Self {
        self.buffer = buffer;
        self.what |= What::BUFFER;
        self
    }

    /// Sets the dataspace.
    #[must_use]
    pub fn dataspace(mut self, dataspace: Dataspace) -> Self {
        self.dataspace = dataspace;
        self.what |= What::DATASPACE;
        self
    }

    /// Sets or clears the color fill.
    #[must_use]
    pub fn color(mut self, color: Option<Rgb>) -> Self {
        self.color = color;
        self.what |= What::COLOR;
        self
    }

    /// Sets one metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: u32, value: Vec<u8>) -> Self {
        self.metadata.insert(key, value);
        self.what |= What::METADATA;
        self
    }

    /// Sets the frame-rate vote.
    #[must_use]
    pub fn frame_rate(mut self, vote: FrameRateVote) -> Self {
        self.frame_rate = vote;
        self.what |= What::FRAME_RATE;
        self
    }

    /// Sets the background blur radius.
    #[must_use]
    pub fn background_blur(mut self, radius: u32) -> Self {
        self.background_blur_radius = radius;
        self.what |= What::BACKGROUND_BLUR;
        self
    }

    /// Whether the delta carries a buffer.
    #[must_use]
    pub fn has_buffer(&self) -> bool {
        self.what.contains(What::BUFFER) && self.buffer.is_some()
    }
}

/// Parameters for a new layer.
#[derive(Clone, Debug)]
pub struct LayerCreationArgs {
    /// Id allocated on the client thread.
    pub id: LayerId,
    /// Debug name.
    pub name: Arc<str>,
    /// Initial parent, or unassigned.
    pub parent_id: LayerId,
    /// Layer whose subtree this layer mirrors, or unassigned.
    pub mirror_of: LayerId,
    /// Place the layer under the root when it has no parent.
    pub add_to_root: bool,
    /// Initial flags.
    pub flags: LayerFlags,
    /// Initial color fill.
    pub color: Option<Rgb>,
    /// Owning client uid.
    pub owner_uid: u32,
}

impl LayerCreationArgs {
    /// Arguments for a root-attachable layer with no parent.
    #[must_use]
    pub fn new(id: LayerId, name: &str) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id: LayerId::UNASSIGNED,
            mirror_of: LayerId::UNASSIGNED,
            add_to_root: true,
            flags: LayerFlags::empty(),
            color: None,
            owner_uid: 0,
        }
    }

    /// Sets the initial parent.
    #[must_use]
    pub fn with_parent(mut self, parent: LayerId) -> Self {
        self.parent_id = parent;
        self
    }

    /// Makes this a mirror of `source`.
    #[must_use]
    pub fn mirroring(mut self, source: LayerId) -> Self {
        self.mirror_of = source;
        self
    }

    /// Sets the initial color fill.
    #[must_use]
    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = Some(color);
        self
    }
}

/// The authoritative state of one layer, owned by the lifecycle manager.
#[derive(Clone, Debug)]
pub struct RequestedLayerState {
    /// Layer id.
    pub id: LayerId,
    /// Debug name.
    pub name: Arc<str>,
    /// Owning client uid.
    pub owner_uid: u32,

    // -- Topology --
    /// Parent, or unassigned.
    pub parent_id: LayerId,
    /// Relative-z parent, or unassigned.
    pub relative_parent_id: LayerId,
    /// The layer was given a relative-z parent.
    pub is_relative_of: bool,
    /// Layer this one was created to mirror, or unassigned.
    pub layer_id_to_mirror: LayerId,
    /// Layers mirrored under this one.
    pub mirror_ids: Vec<LayerId>,
    /// Without a parent, the layer sits under the root rather than offscreen.
    pub can_be_root: bool,
    /// The client still holds a handle.
    pub handle_alive: bool,
    /// Z order among siblings.
    pub z: i32,
    /// Layer stack.
    pub layer_stack: LayerStack,

    // -- Geometry --
    /// Position of the layer origin in parent space.
    pub position: Point,
    /// Linear part of the transform.
    pub matrix: Affine,
    /// `position` applied after `matrix`.
    pub transform: Affine,
    /// The transform is invertible and finite.
    pub transform_is_valid: bool,
    /// Crop in layer space.
    pub crop: Option<Rect>,

    // -- Content --
    /// Client flags.
    pub flags: LayerFlags,
    /// Alpha.
    pub alpha: f32,
    /// Color fill.
    pub color: Option<Rgb>,
    /// Current buffer.
    pub buffer: Option<BufferData>,
    /// Buffer dataspace.
    pub dataspace: Dataspace,
    /// Background blur radius.
    pub background_blur_radius: u32,
    /// Metadata.
    pub metadata: BTreeMap<u32, Vec<u8>>,
    /// Frame-rate vote.
    pub frame_rate: FrameRateVote,

    // -- Buffer ordering --
    /// Newest producer seen on this layer.
    pub barrier_producer_id: ProducerId,
    /// Newest frame number seen on this layer.
    pub barrier_frame_number: u64,

    // -- Change tracking --
    /// Fields set since the last commit.
    pub what: What,
    /// Derived properties affected since the last commit.
    pub changes: Changes,
}

impl RequestedLayerState {
    /// Creates the state for a new layer.
    #[must_use]
    pub fn new(args: &LayerCreationArgs) -> Self {
        let mut changes = Changes::CREATED | Changes::METADATA;
        if args.mirror_of.is_assigned() {
            changes |= Changes::MIRROR;
        }
        Self {
            id: args.id,
            name: args.name.clone(),
            owner_uid: args.owner_uid,
            parent_id: args.parent_id,
            relative_parent_id: LayerId::UNASSIGNED,
            is_relative_of: false,
            layer_id_to_mirror: args.mirror_of,
            mirror_ids: Vec::new(),
            can_be_root: args.add_to_root && !args.parent_id.is_assigned(),
            handle_alive: true,
            z: 0,
            layer_stack: LayerStack(0),
            position: Point::ZERO,
            matrix: Affine::IDENTITY,
            transform: Affine::IDENTITY,
            transform_is_valid: true,
            crop: None,
            flags: args.flags,
            alpha: 1.0,
            color: args.color,
            buffer: None,
            dataspace: Dataspace::Srgb,
            background_blur_radius: 0,
            metadata: BTreeMap::new(),
            frame_rate: FrameRateVote::default(),
            barrier_producer_id: ProducerId(0),
            barrier_frame_number: 0,
            what: What::empty(),
            changes,
        }
    }

    /// Folds `state` into this layer and returns the buffer it replaced.
    ///
    /// `parent_id` and `relative_parent_id` carry the resolved ids for
    /// [`What::REPARENT`] and [`What::RELATIVE_LAYER`]; they are unassigned
    /// when the referenced layer no longer exists.
    pub fn merge(
        &mut self,
        state: &LayerState,
        parent_id: LayerId,
        relative_parent_id: LayerId,
    ) -> Option<BufferData> {
        let transform_was_valid = self.transform_is_valid;
        let old_flags = self.flags;
        let old_alpha = self.alpha;
        let had_buffer = self.buffer.is_some();
        let old_frame_number = self
            .buffer
            .as_ref()
            .and_then(|b| b.frame_number)
            .unwrap_or(0);
        let old_buffer_size = self.buffer.as_ref().map(BufferData::size);
        let old_opaque_format = self.buffer.as_ref().is_some_and(|b| b.opaque_format);
        let had_something_to_draw = self.has_something_to_draw();

        let client_changes = self.what | self.diff(state);
        let w = state.what;
        let mut replaced = None;

        if w.contains(What::POSITION) {
            self.position = state.position;
        }
        if w.contains(What::LAYER) || w.contains(What::RELATIVE_LAYER) {
            self.z = state.z;
        }
        if w.contains(What::ALPHA) {
            self.alpha = state.alpha;
        }
        if w.contains(What::MATRIX) {
            self.matrix = state.matrix;
        }
        if w.contains(What::FLAGS) {
            self.flags = (self.flags & !state.flags_mask) | (state.flags & state.flags_mask);
            let changed = old_flags ^ self.flags;
            if changed.intersects(LayerFlags::HIDDEN | LayerFlags::OPAQUE | LayerFlags::SECURE) {
                self.changes |= Changes::VISIBILITY | Changes::VISIBLE_REGION;
            }
        }
        if w.contains(What::LAYER_STACK) {
            self.layer_stack = state.layer_stack;
        }
        if w.contains(What::CROP) {
            self.crop = state.crop;
        }
        if w.contains(What::DATASPACE) {
            self.dataspace = state.dataspace;
        }
        if w.contains(What::COLOR) {
            self.color = state.color;
        }
        if w.contains(What::BACKGROUND_BLUR) {
            self.background_blur_radius = state.background_blur_radius;
        }

        if w.contains(What::BUFFER) {
            replaced = self.buffer.take();
            self.buffer = state.buffer.clone();
            let has_buffer = self.buffer.is_some();
            if has_buffer || has_buffer != had_buffer {
                self.changes |= Changes::BUFFER;
                if old_buffer_size != self.buffer.as_ref().map(BufferData::size) {
                    self.changes |= Changes::BUFFER_SIZE | Changes::GEOMETRY;
                }
            }
            if has_buffer != had_buffer {
                self.changes |= Changes::GEOMETRY
                    | Changes::VISIBLE_REGION
                    | Changes::VISIBILITY
                    | Changes::INPUT;
            }
            if let Some(buffer) = &mut self.buffer {
                let frame_number = buffer.frame_number.unwrap_or(old_frame_number + 1);
                buffer.frame_number = Some(frame_number);
                if self.barrier_producer_id > buffer.producer_id
                    || (self.barrier_producer_id == buffer.producer_id
                        && self.barrier_frame_number > frame_number)
                {
                    error!(
                        layer = ?self.id,
                        barrier_producer = ?self.barrier_producer_id,
                        barrier_frame = self.barrier_frame_number,
                        producer = ?buffer.producer_id,
                        frame = frame_number,
                        "out of order buffers"
                    );
                }
                self.barrier_producer_id = self.barrier_producer_id.max(buffer.producer_id);
                self.barrier_frame_number = self.barrier_frame_number.max(frame_number);
            }
            let opaque_format = self.buffer.as_ref().is_some_and(|b| b.opaque_format);
            if opaque_format != old_opaque_format {
                self.changes |= Changes::VISIBILITY | Changes::VISIBLE_REGION;
            }
        }

        if client_changes.contains(What::ALPHA) && (old_alpha == 0.0 || self.alpha == 0.0) {
            self.changes |= Changes::VISIBILITY;
        }
        if had_something_to_draw != self.has_something_to_draw() {
            self.changes |= Changes::VISIBILITY | Changes::VISIBLE_REGION;
        }
        if client_changes.intersects(What::HIERARCHY_CHANGES) {
            self.changes |= Changes::HIERARCHY;
        }
        if client_changes.intersects(What::CONTENT_CHANGES) {
            self.changes |= Changes::CONTENT;
        }
        if client_changes.intersects(What::GEOMETRY_CHANGES) {
            self.changes |= Changes::GEOMETRY;
        }
        if client_changes.intersects(What::AFFECTS_CHILDREN) {
            self.changes |= Changes::AFFECTS_CHILDREN;
        }
        if client_changes.intersects(What::VISIBLE_REGION_CHANGES) {
            self.changes |= Changes::VISIBLE_REGION;
        }
        if w.intersects(What::LAYER | What::RELATIVE_LAYER | What::LAYER_STACK) {
            self.changes |= Changes::Z;
        }
        if w.contains(What::REPARENT) {
            self.changes |= Changes::PARENT;
            self.parent_id = parent_id;
            // A reparented layer never returns to the root.
            self.can_be_root = false;
        }
        if w.contains(What::RELATIVE_LAYER) {
            self.changes |= Changes::RELATIVE_PARENT;
            self.relative_parent_id = relative_parent_id;
            self.is_relative_of = true;
        }
        if (w.contains(What::LAYER)
            || (w.contains(What::REPARENT) && !self.parent_id.is_assigned()))
            && self.is_relative_of
        {
            self.relative_parent_id = LayerId::UNASSIGNED;
            self.is_relative_of = false;
            self.changes |= Changes::RELATIVE_PARENT;
        }
        if w.contains(What::REPARENT) && self.parent_id == self.relative_parent_id {
            self.changes |= Changes::RELATIVE_PARENT;
        }
        if w.contains(What::METADATA) {
            for (key, value) in &state.metadata {
                if value.is_empty() {
                    self.metadata.remove(key);
                } else {
                    self.metadata.insert(*key, value.clone());
                }
            }
            self.changes |= Changes::METADATA;
        }
        if w.contains(What::FRAME_RATE) {
            self.frame_rate = state.frame_rate;
            self.changes |= Changes::FRAME_RATE;
        }

        self.what = client_changes;
        self.transform = Affine::translate(self.position.to_vec2()) * self.matrix;
        self.transform_is_valid = is_transform_valid(self.transform);
        if !transform_was_valid && self.transform_is_valid {
            self.changes |= Changes::VISIBILITY;
        }
        replaced
    }

    /// Fields in `state` whose value differs from the current one.
    #[must_use]
    pub fn diff(&self, state: &LayerState) -> What {
        let w = state.what;
        let mut diff = What::empty();
        let mut check = |bit: What, changed: bool| {
            if w.contains(bit) && changed {
                diff |= bit;
            }
        };
        check(What::POSITION, self.position != state.position);
        check(What::LAYER, self.z != state.z || self.is_relative_of);
        check(What::ALPHA, self.alpha != state.alpha);
        check(What::MATRIX, self.matrix != state.matrix);
        check(
            What::FLAGS,
            (self.flags & state.flags_mask) != (state.flags & state.flags_mask),
        );
        check(What::LAYER_STACK, self.layer_stack != state.layer_stack);
        check(What::CROP, self.crop != state.crop);
        check(What::DATASPACE, self.dataspace != state.dataspace);
        check(What::COLOR, self.color != state.color);
        check(
            What::BACKGROUND_BLUR,
            self.background_blur_radius != state.background_blur_radius,
        );
        check(What::FRAME_RATE, self.frame_rate != state.frame_rate);
        // These always count as changes.
        diff |= w & (What::RELATIVE_LAYER | What::REPARENT | What::BUFFER | What::METADATA);
        diff
    }

    /// Whether `state` only swaps the buffer and leaves every other visible
    /// property as it is.
    #[must_use]
    pub fn is_simple_buffer_update(&self, state: &LayerState) -> bool {
        if !state.what.contains(What::BUFFER) {
            return false;
        }
        if state.what.intersects(What::SIMPLE_BUFFER_DENIED) {
            return false;
        }
        !self
            .diff(state)
            .intersects(What::SIMPLE_BUFFER_DENIED_CHANGES)
    }

    /// The frame number a buffer will get once merged into this layer.
    #[must_use]
    pub fn resolve_frame_number(&self, buffer: &BufferData) -> u64 {
        buffer.frame_number.unwrap_or_else(|| {
            self.buffer
                .as_ref()
                .and_then(|b| b.frame_number)
                .unwrap_or(0)
                + 1
        })
    }

    /// Clears per-commit tracking.
    pub fn clear_changes(&mut self) {
        self.what = What::empty();
        self.changes = Changes::empty();
    }

    /// A handle-less layer with no parent can be destroyed.
    #[must_use]
    pub fn can_be_destroyed(&self) -> bool {
        !self.handle_alive && !self.parent_id.is_assigned()
    }

    /// The layer attaches directly to the root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.can_be_root && !self.parent_id.is_assigned()
    }

    /// The hidden flag is set.
    #[must_use]
    pub fn is_hidden_by_policy(&self) -> bool {
        self.flags.contains(LayerFlags::HIDDEN)
    }

    /// The layer has a relative-z parent distinct from its real parent.
    ///
    /// A relative link to the real parent is a client error and is ignored.
    /// An unassigned relative parent still counts: the layer becomes
    /// unreachable rather than falling back to its parent.
    #[must_use]
    pub fn has_valid_relative_parent(&self) -> bool {
        self.is_relative_of
            && (self.parent_id != self.relative_parent_id || !self.relative_parent_id.is_assigned())
    }

    /// There is a buffer, a fill or a blur to draw.
    #[must_use]
    pub fn has_something_to_draw(&self) -> bool {
        self.buffer.is_some() || self.background_blur_radius > 0 || self.fills_color()
    }

    /// The layer draws a solid color instead of a buffer.
    #[must_use]
    pub fn fills_color(&self) -> bool {
        self.buffer.is_none() && self.color.is_some()
    }

    /// Back-pressure is enabled for this layer.
    #[must_use]
    pub fn backpressure_enabled(&self) -> bool {
        self.flags.contains(LayerFlags::ENABLE_BACKPRESSURE)
    }

    /// Bounds in layer space: the buffer size intersected with the crop, or
    /// the crop alone.
    #[must_use]
    pub fn cropped_buffer_bounds(&self) -> Option<Rect> {
        let buffer = self
            .buffer
            .as_ref()
            .map(|b| Rect::from_origin_size(Point::ZERO, b.size()));
        match (buffer, self.crop) {
            (Some(b), Some(c)) => Some(b.intersect(c)),
            (Some(b), None) => Some(b),
            (None, crop) => crop,
        }
    }

    /// The buffer's dimensions, if any.
    #[must_use]
    pub fn buffer_size(&self) -> Option<Size> {
        self.buffer.as_ref().map(BufferData::size)
    }
}

/// A transform is usable when it is finite and invertible.
#[must_use]
pub fn is_transform_valid(transform: Affine) -> bool {
    let det = transform.determinant();
    transform.is_finite() && det.is_finite() && det != 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::BufferId;

    fn layer() -> RequestedLayerState {
        let mut state = RequestedLayerState::new(&LayerCreationArgs::new(LayerId(1), "test"));
        state.clear_changes();
        state
    }

    fn buffer(id: u64, w: u32, h: u32) -> BufferData {
        BufferData::new(BufferId(id), w, h)
    }

    #[test]
    fn creation_marks_created() {
        let state = RequestedLayerState::new(&LayerCreationArgs::new(LayerId(0), "a"));
        assert!(state.changes.contains(Changes::CREATED));
        assert!(state.is_root());
        assert!(state.handle_alive);

        let child = RequestedLayerState::new(
            &LayerCreationArgs::new(LayerId(2), "b").with_parent(LayerId(0)),
        );
        assert!(!child.can_be_root);

        let mirror = RequestedLayerState::new(
            &LayerCreationArgs::new(LayerId(3), "m").mirroring(LayerId(0)),
        );
        assert!(mirror.changes.contains(Changes::MIRROR));
    }

    #[test]
    fn first_buffer_changes_geometry_and_visibility() {
        let mut state = layer();
        let replaced = state.merge(
            &LayerState::new().buffer(Some(buffer(1, 100, 50))),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert!(replaced.is_none());
        assert!(state.changes.contains(
            Changes::BUFFER
                | Changes::BUFFER_SIZE
                | Changes::GEOMETRY
                | Changes::VISIBILITY
                | Changes::VISIBLE_REGION
        ));
        assert_eq!(state.buffer.as_ref().and_then(|b| b.frame_number), Some(1));
        assert_eq!(state.barrier_frame_number, 1);
    }

    #[test]
    fn same_size_buffer_swap_is_content_only() {
        let mut state = layer();
        state.merge(
            &LayerState::new().buffer(Some(buffer(1, 100, 50))),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        state.clear_changes();
        let replaced = state.merge(
            &LayerState::new().buffer(Some(buffer(2, 100, 50))),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert_eq!(replaced.map(|b| b.id), Some(BufferId(1)));
        assert!(state.changes.contains(Changes::BUFFER | Changes::CONTENT));
        assert!(!state.changes.contains(Changes::BUFFER_SIZE));
        assert!(!state.changes.contains(Changes::VISIBILITY));
        assert_eq!(state.buffer.as_ref().and_then(|b| b.frame_number), Some(2));
    }

    #[test]
    fn explicit_frame_number_raises_barrier() {
        let mut state = layer();
        state.merge(
            &LayerState::new().buffer(Some(buffer(1, 1, 1).with_frame_number(9))),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert_eq!(state.barrier_frame_number, 9);
        // Out-of-order frames are logged and keep the barrier.
        state.merge(
            &LayerState::new().buffer(Some(buffer(2, 1, 1).with_frame_number(3))),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert_eq!(state.barrier_frame_number, 9);
    }

    #[test]
    fn alpha_crossing_zero_marks_visibility() {
        let mut state = layer();
        state.merge(
            &LayerState::new().alpha(0.5),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert!(!state.changes.contains(Changes::VISIBILITY));
        state.merge(
            &LayerState::new().alpha(0.0),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert!(state.changes.contains(Changes::VISIBILITY));
    }

    #[test]
    fn reparent_clears_root_and_relative_link() {
        let mut state = layer();
        state.merge(
            &LayerState::new().relative_z(LayerId(5), 2),
            LayerId::UNASSIGNED,
            LayerId(5),
        );
        assert!(state.has_valid_relative_parent());
        assert!(state.changes.contains(Changes::RELATIVE_PARENT | Changes::Z));

        state.clear_changes();
        state.merge(
            &LayerState::new().reparent(LayerId::UNASSIGNED),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert!(!state.can_be_root);
        assert!(!state.is_relative_of);
        assert!(state.changes.contains(Changes::PARENT | Changes::RELATIVE_PARENT));
    }

    #[test]
    fn relative_parent_equal_to_parent_is_ignored() {
        let mut state = layer();
        state.merge(
            &LayerState::new().reparent(LayerId(4)),
            LayerId(4),
            LayerId::UNASSIGNED,
        );
        state.merge(
            &LayerState::new().relative_z(LayerId(4), 1),
            LayerId::UNASSIGNED,
            LayerId(4),
        );
        assert!(state.is_relative_of);
        assert!(!state.has_valid_relative_parent());
    }

    #[test]
    fn plain_z_drops_relative_link() {
        let mut state = layer();
        state.merge(
            &LayerState::new().relative_z(LayerId(5), 2),
            LayerId::UNASSIGNED,
            LayerId(5),
        );
        state.merge(
            &LayerState::new().z(3),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert!(!state.is_relative_of);
        assert_eq!(state.relative_parent_id, LayerId::UNASSIGNED);
        assert_eq!(state.z, 3);
    }

    #[test]
    fn singular_matrix_invalidates_transform() {
        let mut state = layer();
        state.merge(
            &LayerState::new().matrix(0.0, 0.0, 0.0, 0.0),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert!(!state.transform_is_valid);
        state.clear_changes();
        state.merge(
            &LayerState::new().matrix(2.0, 0.0, 0.0, 2.0).position(10.0, 0.0),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert!(state.transform_is_valid);
        assert!(state.changes.contains(Changes::VISIBILITY | Changes::GEOMETRY));
        assert_eq!(state.transform * Point::new(1.0, 1.0), Point::new(12.0, 2.0));
    }

    #[test]
    fn hidden_flag_marks_visibility() {
        let mut state = layer();
        state.merge(
            &LayerState::new().hidden(true),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert!(state.is_hidden_by_policy());
        assert!(state.changes.contains(Changes::VISIBILITY));
    }

    #[test]
    fn simple_buffer_update_detection() {
        let state = layer();
        assert!(state.is_simple_buffer_update(&LayerState::new().buffer(Some(buffer(1, 1, 1)))));
        // Setting a field to its current value is still simple.
        assert!(
            state.is_simple_buffer_update(
                &LayerState::new()
                    .buffer(Some(buffer(1, 1, 1)))
                    .position(0.0, 0.0)
            )
        );
        assert!(
            !state.is_simple_buffer_update(
                &LayerState::new()
                    .buffer(Some(buffer(1, 1, 1)))
                    .position(3.0, 0.0)
            )
        );
        assert!(!state.is_simple_buffer_update(&LayerState::new().z(1)));
    }

    #[test]
    fn metadata_empty_value_removes() {
        let mut state = layer();
        state.merge(
            &LayerState::new().metadata(1, vec![7]),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert_eq!(state.metadata.get(&1), Some(&vec![7]));
        state.merge(
            &LayerState::new().metadata(1, Vec::new()),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert!(state.metadata.is_empty());
    }

    #[test]
    fn cropped_bounds() {
        let mut state = layer();
        assert_eq!(state.cropped_buffer_bounds(), None);
        state.merge(
            &LayerState::new()
                .buffer(Some(buffer(1, 100, 100)))
                .crop(Some(Rect::new(50.0, 50.0, 200.0, 200.0))),
            LayerId::UNASSIGNED,
            LayerId::UNASSIGNED,
        );
        assert_eq!(
            state.cropped_buffer_bounds(),
            Some(Rect::new(50.0, 50.0, 100.0, 100.0))
        );
    }
}
