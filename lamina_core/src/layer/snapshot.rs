// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Immutable per-frame layer records.
//!
//! A [`SnapshotSet`] is the only scene description composition ever sees.
//! It is built once per commit by the
//! [`LayerSnapshotBuilder`](super::LayerSnapshotBuilder) and never mutated
//! afterwards; the next commit that changes anything produces a new set.
//! Individual snapshots are reference counted so that an unchanged layer
//! shares its record with the previous set.

use std::collections::HashMap;
use std::sync::Arc;

use kurbo::{Affine, Rect, Size};

use crate::fence::Fence;
use crate::id::{BufferId, LayerId, LayerStack};

use super::hierarchy::TraversalPath;
use super::state::{Changes, Dataspace, FrameRateVote, Rgb};

/// How a snapshot was reached from the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reachability {
    /// Drawn.
    Reachable,
    /// Only reachable through its real parent while a relative-z link
    /// places it elsewhere.
    ReachableByRelativeParent,
    /// Offscreen.
    Unreachable,
}

/// How composition blends the layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Opaque with full alpha: no blending.
    None,
    /// Premultiplied alpha blending.
    Premultiplied,
}

/// Which outputs may show a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputFilter {
    /// Layer stack of the nearest ancestor that set one.
    pub layer_stack: LayerStack,
    /// Secure content: internal displays only.
    pub to_internal_display_only: bool,
}

impl OutputFilter {
    /// Whether an output showing `layer_stack` may show this snapshot.
    #[must_use]
    pub fn accepts(&self, layer_stack: LayerStack, internal: bool) -> bool {
        self.layer_stack == layer_stack && (internal || !self.to_internal_display_only)
    }
}

/// Buffer details captured at latch time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotBuffer {
    /// Buffer identity.
    pub id: BufferId,
    /// Frame number.
    pub frame_number: u64,
    /// Buffer dimensions in pixels.
    pub width: u32,
    /// Buffer dimensions in pixels.
    pub height: u32,
    /// Acquire fence composition must wait on.
    pub acquire_fence: Option<Fence>,
    /// Content is protected.
    pub protected: bool,
}

impl SnapshotBuffer {
    /// Buffer dimensions.
    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(f64::from(self.width), f64::from(self.height))
    }
}

/// Resolved state of one layer for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSnapshot {
    /// How the layer was reached.
    pub path: TraversalPath,
    /// Debug name.
    pub name: Arc<str>,
    /// Position in draw order among reachable snapshots.
    pub global_z: u32,
    /// Layer-to-screen transform.
    pub transform: Affine,
    /// The transform is singular or not finite.
    pub invalid_transform: bool,
    /// Bounds in layer space.
    pub bounds: Rect,
    /// Bounds in screen space, clipped by ancestors.
    pub transformed_bounds: Rect,
    /// Alpha multiplied down the tree.
    pub alpha: f32,
    /// Solid fill.
    pub color: Option<Rgb>,
    /// Hidden by the layer's flag or an ancestor's.
    pub hidden_by_parent: bool,
    /// Hidden because the relative-z parent is hidden.
    pub hidden_by_relative_parent: bool,
    /// How the layer was reached.
    pub reachability: Reachability,
    /// Composition should draw this snapshot.
    pub is_visible: bool,
    /// Output routing.
    pub output_filter: OutputFilter,
    /// Buffer, if any.
    pub buffer: Option<SnapshotBuffer>,
    /// Frame number of the buffer, or 0.
    pub frame_number: u64,
    /// Buffer dataspace.
    pub dataspace: Dataspace,
    /// Blending.
    pub blend_mode: BlendMode,
    /// The content covers its bounds.
    pub content_opaque: bool,
    /// Opaque content at full alpha.
    pub is_opaque: bool,
    /// Secure flag set here or above.
    pub is_secure: bool,
    /// Excluded from screenshots.
    pub skip_screenshot: bool,
    /// Background blur radius.
    pub background_blur_radius: u32,
    /// Effective frame-rate vote.
    pub frame_rate: FrameRateVote,
    /// Innermost mirror layer, or unassigned.
    pub mirror_root: LayerId,
    /// What changed for this snapshot in the build that produced it.
    pub changes: Changes,
}

impl LayerSnapshot {
    /// Layer id.
    #[must_use]
    pub fn layer_id(&self) -> LayerId {
        self.path.id
    }

    /// There is a buffer, fill or blur.
    #[must_use]
    pub fn has_something_to_draw(&self) -> bool {
        self.buffer.is_some() || self.color.is_some() || self.background_blur_radius > 0
    }

    /// Hidden by policy: a flag, a relative parent or a bad transform.
    #[must_use]
    pub fn is_hidden_by_policy(&self) -> bool {
        self.invalid_transform || self.hidden_by_parent || self.hidden_by_relative_parent
    }

    pub(crate) fn compute_visibility(&self) -> bool {
        self.reachability == Reachability::Reachable
            && self.has_something_to_draw()
            && !self.is_hidden_by_policy()
            && (self.alpha > 0.0 || self.background_blur_radius > 0)
    }

    /// Human-readable reason for [`is_visible`](Self::is_visible).
    #[must_use]
    pub fn visibility_reason(&self) -> &'static str {
        match self.reachability {
            Reachability::Unreachable => return "not reachable from root",
            Reachability::ReachableByRelativeParent => return "only reachable via relative parent",
            Reachability::Reachable => {}
        }
        if self.hidden_by_parent {
            "hidden by parent or layer flag"
        } else if self.hidden_by_relative_parent {
            "hidden by relative parent"
        } else if self.invalid_transform {
            "invalid transform"
        } else if self.alpha == 0.0 && self.background_blur_radius == 0 {
            "alpha is zero"
        } else if !self.has_something_to_draw() {
            "nothing to draw"
        } else {
            "visible"
        }
    }
}

/// One frame's snapshots in draw order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotSet {
    snapshots: Vec<Arc<LayerSnapshot>>,
    index: HashMap<TraversalPath, usize>,
    /// Indices of snapshots that differ from the previous set.
    pub updated: Vec<usize>,
    /// Screen bounds of snapshots that disappeared or stopped being visible,
    /// per layer stack.
    pub vacated: Vec<(LayerStack, Rect)>,
    /// The build was limited in scope.
    pub scoped: bool,
}

impl SnapshotSet {
    pub(crate) fn from_parts(
        snapshots: Vec<Arc<LayerSnapshot>>,
        updated: Vec<usize>,
        vacated: Vec<(LayerStack, Rect)>,
        scoped: bool,
    ) -> Self {
        let index = snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.path.clone(), i))
            .collect();
        Self {
            snapshots,
            index,
            updated,
            vacated,
            scoped,
        }
    }

    /// Snapshots in draw order; unreachable ones trail.
    pub fn iter(&self) -> impl Iterator<Item = &LayerSnapshot> {
        self.snapshots.iter().map(AsRef::as_ref)
    }

    /// Visible snapshots in draw order.
    pub fn visible(&self) -> impl Iterator<Item = &LayerSnapshot> {
        self.iter().filter(|s| s.is_visible)
    }

    /// Shared handle to the snapshot at `index`.
    #[must_use]
    pub fn shared(&self, index: usize) -> &Arc<LayerSnapshot> {
        &self.snapshots[index]
    }

    /// Number of snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Looks up a snapshot by path.
    #[must_use]
    pub fn find(&self, path: &TraversalPath) -> Option<&LayerSnapshot> {
        self.index.get(path).map(|&i| self.snapshots[i].as_ref())
    }

    /// Looks up the unmirrored snapshot of a layer.
    #[must_use]
    pub fn find_layer(&self, id: LayerId) -> Option<&LayerSnapshot> {
        self.find(&TraversalPath::for_layer(id))
    }

    /// Looks up a snapshot that must exist.
    ///
    /// # Panics
    ///
    /// Panics if there is no snapshot for `path`; the snapshot set and the
    /// layer set have diverged.
    #[must_use]
    pub fn get(&self, path: &TraversalPath) -> &LayerSnapshot {
        match self.find(path) {
            Some(snapshot) => snapshot,
            None => panic!("no snapshot for {path:?}"),
        }
    }

    pub(crate) fn shared_by_path(&self, path: &TraversalPath) -> Option<&Arc<LayerSnapshot>> {
        self.index.get(path).map(|&i| &self.snapshots[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: u32) -> LayerSnapshot {
        LayerSnapshot {
            path: TraversalPath::for_layer(LayerId(id)),
            name: "s".into(),
            global_z: 0,
            transform: Affine::IDENTITY,
            invalid_transform: false,
            bounds: Rect::new(0.0, 0.0, 10.0, 10.0),
            transformed_bounds: Rect::new(0.0, 0.0, 10.0, 10.0),
            alpha: 1.0,
            color: Some([1.0, 0.0, 0.0]),
            hidden_by_parent: false,
            hidden_by_relative_parent: false,
            reachability: Reachability::Reachable,
            is_visible: true,
            output_filter: OutputFilter {
                layer_stack: LayerStack(0),
                to_internal_display_only: false,
            },
            buffer: None,
            frame_number: 0,
            dataspace: Dataspace::Srgb,
            blend_mode: BlendMode::None,
            content_opaque: true,
            is_opaque: true,
            is_secure: false,
            skip_screenshot: false,
            background_blur_radius: 0,
            frame_rate: FrameRateVote::default(),
            mirror_root: LayerId::UNASSIGNED,
            changes: Changes::empty(),
        }
    }

    #[test]
    fn visibility_rules() {
        let mut s = snapshot(1);
        assert!(s.compute_visibility());
        s.alpha = 0.0;
        assert!(!s.compute_visibility());
        assert_eq!(s.visibility_reason(), "alpha is zero");
        s.alpha = 1.0;
        s.color = None;
        assert!(!s.compute_visibility());
        s.color = Some([0.0; 3]);
        s.invalid_transform = true;
        assert!(!s.compute_visibility());
        s.invalid_transform = false;
        s.reachability = Reachability::Unreachable;
        assert!(!s.compute_visibility());
    }

    #[test]
    fn secure_filter_limits_outputs() {
        let filter = OutputFilter {
            layer_stack: LayerStack(2),
            to_internal_display_only: true,
        };
        assert!(filter.accepts(LayerStack(2), true));
        assert!(!filter.accepts(LayerStack(2), false));
        assert!(!filter.accepts(LayerStack(1), true));
    }

    #[test]
    #[should_panic(expected = "no snapshot for")]
    fn missing_snapshot_panics() {
        let set = SnapshotSet::from_parts(vec![Arc::new(snapshot(1))], Vec::new(), Vec::new(), false);
        assert_eq!(set.find_layer(LayerId(1)).map(|s| s.layer_id()), Some(LayerId(1)));
        let _ = set.get(&TraversalPath::for_layer(LayerId(2)));
    }
}
