// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-frame snapshot building.
//!
//! A build runs two passes over the [`LayerHierarchy`]:
//!
//! 1. **Inheritance** walks real-parent edges (`Attached`, `Detached` and
//!    `Mirror`) from both roots and resolves everything a layer inherits
//!    from its parent: transform, bounds, alpha, hidden-by-policy, layer
//!    stack, secure and skip-screenshot bits, and the frame-rate vote.
//! 2. **Z order** walks the drawable tree (`Attached`, `Relative`, `Mirror`)
//!    from the root, assigns `global_z` and reachability, and resolves
//!    hidden-by-relative-parent.
//!
//! Paths seen in the first pass but not the second trail the set as
//! unreachable.
//!
//! Between hierarchy changes, a [`DirtyTracker`] keyed by layer id decides
//! which snapshots are recomputed; the rest are shared with the previous
//! set. A build with no pending changes returns the previous set itself.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kurbo::{Affine, Rect};
use tracing::{debug, trace};
use understory_dirty::{Channel, CycleHandling, DirtyTracker, EagerPolicy};

use crate::dirty;
use crate::id::{LayerId, LayerStack};

use super::hierarchy::{LayerHierarchy, OFFSCREEN_ROOT, ROOT, TraversalPath, Variant};
use super::lifecycle::LayerLifecycleManager;
use super::snapshot::{
    BlendMode, LayerSnapshot, OutputFilter, Reachability, SnapshotBuffer, SnapshotSet,
};
use super::state::{Changes, FrameRateVote, LayerFlags, RequestedLayerState};

/// Half-extent of the bounds given to layers with no crop or buffer anywhere
/// up their parent chain.
const MAX_BOUNDS: f64 = 1.0e7;

/// Traversals deeper than this indicate a cycle.
const MAX_DEPTH: u32 = 50;

/// Changes a child takes over from its parent.
const INHERITED_CHANGES: Changes = Changes::GEOMETRY
    .union(Changes::VISIBILITY)
    .union(Changes::AFFECTS_CHILDREN);

/// Inputs to one build.
#[derive(Clone, Copy, Debug)]
pub struct BuildArgs<'a> {
    /// Authoritative layer states.
    pub lifecycle: &'a LayerLifecycleManager,
    /// Tree derived from `lifecycle`.
    pub hierarchy: &'a LayerHierarchy,
    /// Recompute every snapshot even if nothing changed.
    pub force_update: bool,
}

/// Limits a build to part of the tree, for screenshots.
#[derive(Clone, Debug, Default)]
pub struct SnapshotScope {
    /// Build only this layer's subtree.
    pub root: Option<LayerId>,
    /// Keep only snapshots on this layer stack.
    pub layer_stack: Option<LayerStack>,
    /// Skip these layers and their subtrees.
    pub excluded: HashSet<LayerId>,
    /// Leave the scope root itself out of the result.
    pub children_only: bool,
}

impl SnapshotScope {
    /// Everything on one layer stack.
    #[must_use]
    pub fn layer_stack(stack: LayerStack) -> Self {
        Self {
            layer_stack: Some(stack),
            ..Self::default()
        }
    }

    /// One layer's subtree.
    #[must_use]
    pub fn subtree(root: LayerId) -> Self {
        Self {
            root: Some(root),
            ..Self::default()
        }
    }

    /// Adds a layer to skip.
    #[must_use]
    pub fn excluding(mut self, id: LayerId) -> Self {
        self.excluded.insert(id);
        self
    }
}

/// Values a layer inherits from its real parent.
#[derive(Clone, Copy, Debug)]
struct ParentContext {
    transform: Affine,
    invalid_transform: bool,
    /// Bounds in the parent's layer space.
    bounds: Rect,
    alpha: f32,
    hidden: bool,
    layer_stack: LayerStack,
    secure: bool,
    skip_screenshot: bool,
    frame_rate: FrameRateVote,
    changes: Changes,
    is_root: bool,
    recomputed: bool,
}

impl ParentContext {
    fn root() -> Self {
        Self {
            transform: Affine::IDENTITY,
            invalid_transform: false,
            bounds: Rect::new(-MAX_BOUNDS, -MAX_BOUNDS, MAX_BOUNDS, MAX_BOUNDS),
            alpha: 1.0,
            hidden: false,
            layer_stack: LayerStack::default(),
            secure: false,
            skip_screenshot: false,
            frame_rate: FrameRateVote::default(),
            changes: Changes::empty(),
            is_root: true,
            recomputed: false,
        }
    }

    fn for_child(snapshot: &LayerSnapshot, recomputed: bool) -> Self {
        Self {
            transform: snapshot.transform,
            invalid_transform: snapshot.invalid_transform,
            bounds: snapshot.bounds,
            alpha: snapshot.alpha,
            hidden: snapshot.hidden_by_parent,
            layer_stack: snapshot.output_filter.layer_stack,
            secure: snapshot.is_secure,
            skip_screenshot: snapshot.skip_screenshot,
            frame_rate: snapshot.frame_rate,
            changes: snapshot.changes,
            is_root: false,
            recomputed,
        }
    }
}

/// Result of the inheritance pass for one path.
#[derive(Clone, Debug)]
enum Slot {
    /// Carried over from the previous set.
    Reused(Arc<LayerSnapshot>),
    /// Computed this build; z-order fields are still to be filled.
    Fresh(LayerSnapshot),
}

impl Slot {
    fn snapshot(&self) -> &LayerSnapshot {
        match self {
            Self::Reused(s) => s,
            Self::Fresh(s) => s,
        }
    }
}

/// Which layers need a fresh snapshot in an incremental build.
#[derive(Debug)]
enum Dirty {
    All,
    Only(HashSet<u32>),
}

impl Dirty {
    fn contains(&self, id: LayerId) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(&id.0),
        }
    }
}

/// Working state of one build.
struct Build<'a> {
    args: BuildArgs<'a>,
    previous: &'a SnapshotSet,
    dirty: Dirty,
    scope: Option<&'a SnapshotScope>,
    slots: HashMap<TraversalPath, Slot>,
    /// Inheritance-pass order, for trailing unreachable snapshots.
    order: Vec<TraversalPath>,
    /// Paths reached from the root in the inheritance pass.
    under_root: HashSet<TraversalPath>,
}

/// Builds [`SnapshotSet`]s from the layer front end.
#[derive(Debug)]
pub struct LayerSnapshotBuilder {
    current: Arc<SnapshotSet>,
    dirty: DirtyTracker<u32>,
    initialized: bool,
}

impl Default for LayerSnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerSnapshotBuilder {
    /// Creates a builder with an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Arc::new(SnapshotSet::default()),
            dirty: DirtyTracker::with_cycle_handling(CycleHandling::Error),
            initialized: false,
        }
    }

    /// The most recent full-scope set.
    #[must_use]
    pub fn snapshots(&self) -> &Arc<SnapshotSet> {
        &self.current
    }

    /// Brings the snapshot set in line with `args` and returns it.
    ///
    /// Returns the previous set unchanged (the same `Arc`) when nothing is
    /// pending and no update is forced.
    ///
    /// # Panics
    ///
    /// Panics if the hierarchy names a layer the lifecycle manager does not
    /// hold, or if the tree is deeper than 50 levels.
    pub fn update(&mut self, args: BuildArgs<'_>) -> Arc<SnapshotSet> {
        let global = args.lifecycle.global_changes();
        if self.initialized && !args.force_update && global.is_empty() {
            trace!("snapshot set unchanged");
            return Arc::clone(&self.current);
        }

        let full =
            !self.initialized || args.force_update || global.contains(Changes::HIERARCHY);
        let dirty = if full {
            self.rebuild_dependencies(args);
            Dirty::All
        } else {
            Dirty::Only(self.mark_and_drain(args.lifecycle))
        };

        let set = Build::new(args, &self.current, dirty, None).run();
        debug!(
            snapshots = set.len(),
            updated = set.updated.len(),
            vacated = set.vacated.len(),
            full,
            "snapshots built"
        );
        self.current = Arc::new(set);
        self.initialized = true;
        Arc::clone(&self.current)
    }

    /// Builds a scoped set for a screenshot, then restores the full scope.
    ///
    /// The returned set is never stored. The full set is rebuilt against the
    /// previous one, so the next frame sees no spurious updates.
    ///
    /// # Panics
    ///
    /// As for [`update`](Self::update).
    pub fn capture(&mut self, args: BuildArgs<'_>, scope: &SnapshotScope) -> Arc<SnapshotSet> {
        let scoped = Build::new(args, &self.current, Dirty::All, Some(scope)).run();
        debug!(snapshots = scoped.len(), root = ?scope.root, "scoped snapshots built");
        self.update(BuildArgs {
            force_update: true,
            ..args
        });
        Arc::new(scoped)
    }

    /// Resets dependency edges to match the hierarchy.
    fn rebuild_dependencies(&mut self, args: BuildArgs<'_>) {
        self.dirty = DirtyTracker::with_cycle_handling(CycleHandling::Error);
        for layer in args.lifecycle.layers() {
            let child = layer.id;
            if layer.parent_id.is_assigned() {
                self.depend(child, layer.parent_id, dirty::GEOMETRY, "parent");
                self.depend(child, layer.parent_id, dirty::VISIBILITY, "parent");
            }
            if layer.has_valid_relative_parent() && layer.relative_parent_id.is_assigned() {
                self.depend(child, layer.relative_parent_id, dirty::VISIBILITY, "relative parent");
            }
            for &source in &layer.mirror_ids {
                self.depend(source, child, dirty::GEOMETRY, "mirror");
                self.depend(source, child, dirty::VISIBILITY, "mirror");
            }
        }
    }

    /// Makes `dependent` follow `on` on `channel`. Edges that would form a
    /// cycle or point at the layer itself are skipped and logged. Returns
    /// whether the edge was added.
    fn depend(
        &mut self,
        dependent: LayerId,
        on: LayerId,
        channel: Channel,
        edge: &'static str,
    ) -> bool {
        let added = self.dirty.add_dependency(dependent.0, on.0, channel).is_ok();
        if !added {
            debug!(?dependent, ?on, edge, "dependency skipped, it would form a cycle");
        }
        added
    }

    /// Marks channels from per-layer changes and drains them.
    fn mark_and_drain(&mut self, lifecycle: &LayerLifecycleManager) -> HashSet<u32> {
        for layer in lifecycle.layers() {
            let ch = layer.changes;
            if ch.is_empty() {
                continue;
            }
            let key = layer.id.0;
            if ch.intersects(Changes::GEOMETRY | Changes::BUFFER_SIZE) {
                self.dirty.mark_with(key, dirty::GEOMETRY, &EagerPolicy);
            }
            if ch.intersects(
                Changes::VISIBILITY | Changes::AFFECTS_CHILDREN | Changes::VISIBLE_REGION,
            ) {
                self.dirty.mark_with(key, dirty::VISIBILITY, &EagerPolicy);
            }
            if ch.intersects(Changes::CONTENT | Changes::BUFFER) {
                self.dirty.mark(key, dirty::CONTENT);
            }
            if ch.intersects(
                Changes::METADATA | Changes::FRAME_RATE | Changes::ANIMATION | Changes::INPUT,
            ) {
                self.dirty.mark(key, dirty::METADATA);
            }
        }
        let mut out = HashSet::new();
        out.extend(
            self.dirty
                .drain(dirty::GEOMETRY)
                .affected()
                .deterministic()
                .run(),
        );
        out.extend(
            self.dirty
                .drain(dirty::VISIBILITY)
                .affected()
                .deterministic()
                .run(),
        );
        out.extend(self.dirty.drain(dirty::CONTENT).deterministic().run());
        out.extend(self.dirty.drain(dirty::METADATA).deterministic().run());
        out
    }
}

impl<'a> Build<'a> {
    fn new(
        args: BuildArgs<'a>,
        previous: &'a SnapshotSet,
        dirty: Dirty,
        scope: Option<&'a SnapshotScope>,
    ) -> Self {
        Self {
            args,
            previous,
            dirty,
            scope,
            slots: HashMap::new(),
            order: Vec::new(),
            under_root: HashSet::new(),
        }
    }

    fn run(mut self) -> SnapshotSet {
        let hierarchy = self.args.hierarchy;
        let scope_root = self.scope.and_then(|s| s.root);
        match scope_root {
            Some(root) => {
                let Some(node) = hierarchy.node_of(root) else {
                    debug!(?root, "screenshot root is gone");
                    return SnapshotSet::from_parts(Vec::new(), Vec::new(), Vec::new(), true);
                };
                let path = TraversalPath::for_layer(root);
                self.inherit(node, &path, ParentContext::root(), 0);
            }
            None => {
                self.inherit_children(ROOT, &TraversalPath::root(), ParentContext::root(), 0);
                self.under_root = self.order.iter().cloned().collect();
                self.inherit_children(
                    OFFSCREEN_ROOT,
                    &TraversalPath::root(),
                    ParentContext::root(),
                    0,
                );
            }
        }

        let mut z_order = Vec::new();
        match scope_root.and_then(|root| hierarchy.node_of(root).map(|n| (root, n))) {
            Some((root, node)) => {
                self.z_visit(node, &TraversalPath::for_layer(root), false, 0, &mut z_order);
            }
            None => self.z_children(ROOT, &TraversalPath::root(), false, 0, &mut z_order),
        }
        self.assemble(z_order)
    }

    fn excluded(&self, id: LayerId) -> bool {
        self.scope.is_some_and(|s| s.excluded.contains(&id))
    }

    fn inherit_children(&mut self, node: u32, path: &TraversalPath, ctx: ParentContext, depth: u32) {
        let hierarchy = self.args.hierarchy;
        for &(child, variant) in hierarchy.children(node) {
            if variant == Variant::Relative {
                continue;
            }
            let child_path = path.make_child(hierarchy.layer_at(child), variant);
            self.inherit(child, &child_path, ctx, depth + 1);
        }
    }

    fn inherit(&mut self, node: u32, path: &TraversalPath, parent: ParentContext, depth: u32) {
        assert!(depth <= MAX_DEPTH, "cycle detected in layer hierarchy");
        if self.excluded(path.id) || self.slots.contains_key(path) {
            return;
        }
        let lifecycle = self.args.lifecycle;
        let previous = self.previous;
        let Some(layer) = lifecycle.get(path.id) else {
            panic!("layer {:?} is in the hierarchy but not in the lifecycle manager", path.id);
        };

        let reuse = !parent.recomputed && !self.dirty.contains(path.id);
        let slot = match (reuse, previous.shared_by_path(path)) {
            (true, Some(previous)) => Slot::Reused(Arc::clone(previous)),
            _ => Slot::Fresh(resolve(layer, path, &parent)),
        };
        let recomputed = matches!(slot, Slot::Fresh(_));
        let ctx = ParentContext::for_child(slot.snapshot(), recomputed);
        self.slots.insert(path.clone(), slot);
        self.order.push(path.clone());
        self.inherit_children(node, path, ctx, depth);
    }

    fn z_children(
        &mut self,
        node: u32,
        path: &TraversalPath,
        relative_hidden: bool,
        depth: u32,
        out: &mut Vec<(TraversalPath, bool)>,
    ) {
        let hierarchy = self.args.hierarchy;
        let hidden_here = self
            .slots
            .get(path)
            .map(|s| s.snapshot().hidden_by_parent)
            .unwrap_or(false);
        let mut self_pending = hierarchy.layer_at(node).is_assigned();
        for &(child, variant) in hierarchy.children(node) {
            if self_pending && self.child_z(child) >= 0 {
                self_pending = false;
                out.push((path.clone(), relative_hidden));
            }
            if variant == Variant::Detached {
                continue;
            }
            let child_path = path.make_child(hierarchy.layer_at(child), variant);
            if child_path.has_rel_z_loop() {
                continue;
            }
            let child_hidden = match variant {
                Variant::Relative => hidden_here || relative_hidden,
                _ => relative_hidden,
            };
            self.z_visit(child, &child_path, child_hidden, depth + 1, out);
        }
        if self_pending {
            out.push((path.clone(), relative_hidden));
        }
    }

    fn z_visit(
        &mut self,
        node: u32,
        path: &TraversalPath,
        relative_hidden: bool,
        depth: u32,
        out: &mut Vec<(TraversalPath, bool)>,
    ) {
        assert!(depth <= MAX_DEPTH, "cycle detected in layer hierarchy");
        if self.excluded(path.id) {
            return;
        }
        if !self.slots.contains_key(path) {
            // A relative link that leaves a mirrored subtree has no
            // inherited state under this mirror root.
            trace!(?path, "z path without inherited state");
            return;
        }
        self.z_children(node, path, relative_hidden, depth, out);
    }

    fn child_z(&self, node: u32) -> i32 {
        let id = self.args.hierarchy.layer_at(node);
        self.args.lifecycle.get(id).map_or(0, |l| l.z)
    }

    fn assemble(mut self, z_order: Vec<(TraversalPath, bool)>) -> SnapshotSet {
        let scoped = self.scope.is_some();
        let mut snapshots = Vec::with_capacity(self.slots.len());
        let mut updated = Vec::new();
        let mut global_z = 0_u32;
        let mut reached = HashSet::new();

        for (path, relative_hidden) in z_order {
            if !reached.insert(path.clone()) {
                continue;
            }
            let Some(slot) = self.slots.remove(&path) else {
                continue;
            };
            if let Some(scope) = self.scope {
                let snapshot = slot.snapshot();
                if scope.children_only && scope.root == Some(path.id) && !path.is_clone() {
                    continue;
                }
                if scope
                    .layer_stack
                    .is_some_and(|stack| snapshot.output_filter.layer_stack != stack)
                {
                    continue;
                }
            }
            let entry =
                self.finish(slot, global_z, Reachability::Reachable, relative_hidden);
            global_z += 1;
            push(&mut snapshots, &mut updated, entry);
        }

        if !scoped {
            let order = core::mem::take(&mut self.order);
            for path in order {
                let Some(slot) = self.slots.remove(&path) else {
                    continue;
                };
                let reachability = if path.detached && self.under_root.contains(&path) {
                    Reachability::ReachableByRelativeParent
                } else {
                    Reachability::Unreachable
                };
                let entry = self.finish(slot, global_z, reachability, false);
                global_z += 1;
                push(&mut snapshots, &mut updated, entry);
            }
        }

        let vacated = if scoped {
            Vec::new()
        } else {
            vacated(self.previous, &snapshots)
        };
        SnapshotSet::from_parts(snapshots, updated, vacated, scoped)
    }

    /// Fills z-order fields and shares the previous snapshot when equal.
    fn finish(
        &self,
        slot: Slot,
        global_z: u32,
        reachability: Reachability,
        relative_hidden: bool,
    ) -> (Arc<LayerSnapshot>, bool) {
        let mut snapshot = match slot {
            Slot::Reused(shared)
                if shared.global_z == global_z
                    && shared.reachability == reachability
                    && shared.hidden_by_relative_parent == relative_hidden =>
            {
                return (shared, false);
            }
            Slot::Reused(shared) => LayerSnapshot::clone(&shared),
            Slot::Fresh(snapshot) => snapshot,
        };
        snapshot.global_z = global_z;
        snapshot.reachability = reachability;
        snapshot.hidden_by_relative_parent = relative_hidden;
        snapshot.is_visible = snapshot.compute_visibility();
        if self.scope.is_none()
            && let Some(previous) = self.previous.shared_by_path(&snapshot.path)
        {
            // Equal apart from the change bits: keep sharing the old record.
            let changes = core::mem::replace(&mut snapshot.changes, previous.changes);
            if **previous == snapshot {
                return (Arc::clone(previous), false);
            }
            snapshot.changes = changes;
        }
        (Arc::new(snapshot), true)
    }
}

fn push(
    snapshots: &mut Vec<Arc<LayerSnapshot>>,
    updated: &mut Vec<usize>,
    (snapshot, changed): (Arc<LayerSnapshot>, bool),
) {
    if changed {
        updated.push(snapshots.len());
    }
    snapshots.push(snapshot);
}

/// Screen areas that visible snapshots of `previous` no longer cover.
fn vacated(previous: &SnapshotSet, next: &[Arc<LayerSnapshot>]) -> Vec<(LayerStack, Rect)> {
    let next: HashMap<&TraversalPath, &LayerSnapshot> =
        next.iter().map(|s| (&s.path, s.as_ref())).collect();
    previous
        .visible()
        .filter(|old| {
            next.get(&old.path).is_none_or(|new| {
                !new.is_visible
                    || new.transformed_bounds != old.transformed_bounds
                    || new.output_filter.layer_stack != old.output_filter.layer_stack
            })
        })
        .map(|old| (old.output_filter.layer_stack, old.transformed_bounds))
        .collect()
}

/// Resolves the inherited fields of one snapshot.
fn resolve(layer: &RequestedLayerState, path: &TraversalPath, parent: &ParentContext) -> LayerSnapshot {
    let transform = parent.transform * layer.transform;
    let invalid_transform = parent.invalid_transform || !layer.transform_is_valid;
    let parent_bounds = if layer.transform_is_valid {
        layer.transform.inverse().transform_rect_bbox(parent.bounds)
    } else {
        parent.bounds
    };
    let bounds = match layer.cropped_buffer_bounds() {
        Some(own) => own.intersect(parent_bounds),
        None => parent_bounds,
    };
    let transformed_bounds = if invalid_transform {
        Rect::ZERO
    } else {
        transform.transform_rect_bbox(bounds)
    };

    let alpha = parent.alpha * layer.alpha;
    let color = if layer.fills_color() { layer.color } else { None };
    let content_opaque = match &layer.buffer {
        Some(buffer) => layer.flags.contains(LayerFlags::OPAQUE) || buffer.opaque_format,
        None => color.is_some(),
    };
    let is_opaque = content_opaque && alpha >= 1.0;
    let is_secure = parent.secure || layer.flags.contains(LayerFlags::SECURE);
    let layer_stack = if parent.is_root {
        layer.layer_stack
    } else {
        parent.layer_stack
    };
    let frame_rate = if layer.frame_rate.is_valid() {
        layer.frame_rate
    } else {
        parent.frame_rate
    };
    let buffer = layer.buffer.as_ref().map(|b| SnapshotBuffer {
        id: b.id,
        frame_number: b.frame_number.unwrap_or(0),
        width: b.width,
        height: b.height,
        acquire_fence: b.acquire_fence.clone(),
        protected: b.protected,
    });

    LayerSnapshot {
        path: path.clone(),
        name: layer.name.clone(),
        global_z: 0,
        transform,
        invalid_transform,
        bounds,
        transformed_bounds,
        alpha,
        color,
        hidden_by_parent: parent.hidden || layer.is_hidden_by_policy(),
        hidden_by_relative_parent: false,
        reachability: Reachability::Unreachable,
        is_visible: false,
        output_filter: OutputFilter {
            layer_stack,
            to_internal_display_only: is_secure,
        },
        frame_number: buffer.as_ref().map_or(0, |b| b.frame_number),
        buffer,
        dataspace: layer.dataspace,
        blend_mode: if is_opaque {
            BlendMode::None
        } else {
            BlendMode::Premultiplied
        },
        content_opaque,
        is_opaque,
        is_secure,
        skip_screenshot: parent.skip_screenshot
            || layer.flags.contains(LayerFlags::SKIP_SCREENSHOT),
        background_blur_radius: layer.background_blur_radius,
        frame_rate,
        mirror_root: path.mirror_root(),
        changes: layer.changes | (parent.changes & INHERITED_CHANGES),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ApplyToken, BufferId, TransactionId};
    use crate::layer::{BufferData, LayerCreationArgs, LayerState};
    use crate::transaction::TransactionState;

    struct Fixture {
        lifecycle: LayerLifecycleManager,
        hierarchy: LayerHierarchy,
        builder: LayerSnapshotBuilder,
    }

    impl Fixture {
        fn new(layers: &[(u32, Option<u32>)]) -> Self {
            let mut lifecycle = LayerLifecycleManager::new();
            lifecycle.add_layers(layers.iter().map(|&(id, parent)| {
                let args = LayerCreationArgs::new(LayerId(id), "l").with_color([1.0, 1.0, 1.0]);
                match parent {
                    Some(p) => args.with_parent(LayerId(p)),
                    None => args,
                }
            }));
            Self {
                lifecycle,
                hierarchy: LayerHierarchy::new(),
                builder: LayerSnapshotBuilder::new(),
            }
        }

        fn apply(&mut self, id: u32, state: LayerState) {
            self.lifecycle.apply_transactions(&[TransactionState::new(
                TransactionId(1),
                ApplyToken(0),
            )
            .layer(LayerId(id), state)]);
        }

        fn frame(&mut self) -> Arc<SnapshotSet> {
            self.hierarchy.update(&mut self.lifecycle);
            let set = self.builder.update(BuildArgs {
                lifecycle: &self.lifecycle,
                hierarchy: &self.hierarchy,
                force_update: false,
            });
            self.lifecycle.commit_changes();
            set
        }

        fn capture(&mut self, scope: &SnapshotScope) -> Arc<SnapshotSet> {
            self.builder.capture(
                BuildArgs {
                    lifecycle: &self.lifecycle,
                    hierarchy: &self.hierarchy,
                    force_update: false,
                },
                scope,
            )
        }
    }

    fn ids(set: &SnapshotSet) -> Vec<u32> {
        set.visible().map(|s| s.layer_id().0).collect()
    }

    #[test]
    fn cyclic_dependencies_are_skipped() {
        let mut builder = LayerSnapshotBuilder::new();
        assert!(builder.depend(LayerId(2), LayerId(1), dirty::GEOMETRY, "parent"));
        assert!(
            !builder.depend(LayerId(1), LayerId(2), dirty::GEOMETRY, "relative parent"),
            "2 already follows 1"
        );
        assert!(!builder.depend(LayerId(3), LayerId(3), dirty::VISIBILITY, "mirror"));
    }

    #[test]
    fn inherits_transform_and_alpha() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1))]);
        f.apply(1, LayerState::new().position(10.0, 20.0).alpha(0.5));
        f.apply(2, LayerState::new().position(1.0, 1.0).alpha(0.5));
        let set = f.frame();
        let child = set.get(&TraversalPath::for_layer(LayerId(2)));
        assert_eq!(child.transform, Affine::translate((11.0, 21.0)));
        assert!((child.alpha - 0.25).abs() < f32::EPSILON);
        assert_eq!(child.blend_mode, BlendMode::Premultiplied);
        assert!(child.is_visible);
    }

    #[test]
    fn draw_order_matches_z() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1)), (3, Some(1))]);
        f.apply(2, LayerState::new().z(1));
        f.apply(3, LayerState::new().z(-1));
        let set = f.frame();
        assert_eq!(ids(&set), vec![3, 1, 2]);
        let z: Vec<u32> = set.iter().map(|s| s.global_z).collect();
        assert_eq!(z, vec![0, 1, 2]);
    }

    #[test]
    fn hidden_parent_hides_subtree() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1))]);
        f.apply(1, LayerState::new().hidden(true));
        let set = f.frame();
        assert!(ids(&set).is_empty());
        assert_eq!(
            set.find_layer(LayerId(2)).map(LayerSnapshot::visibility_reason),
            Some("hidden by parent or layer flag")
        );
    }

    #[test]
    fn no_changes_returns_same_set() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1))]);
        let first = f.frame();
        let second = f.frame();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[test]
    fn incremental_build_shares_unchanged_snapshots() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1)), (3, None)]);
        let first = f.frame();
        f.apply(3, LayerState::new().alpha(0.5));
        let second = f.frame();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(first.shared(0), second.shared(0)));
        assert!(Arc::ptr_eq(first.shared(1), second.shared(1)));
        assert_eq!(second.updated, vec![2]);
        assert!(
            second.shared(2).changes.contains(Changes::CONTENT),
            "alpha change is carried on the snapshot"
        );
    }

    #[test]
    fn parent_geometry_change_reaches_children() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1))]);
        f.frame();
        f.apply(1, LayerState::new().position(5.0, 0.0));
        let set = f.frame();
        let child = set.get(&TraversalPath::for_layer(LayerId(2)));
        assert_eq!(child.transform, Affine::translate((5.0, 0.0)));
        assert!(child.changes.contains(Changes::GEOMETRY));
        assert_eq!(set.updated, vec![0, 1]);
    }

    #[test]
    fn crop_bounds_clip_children() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1))]);
        f.apply(1, LayerState::new().crop(Some(Rect::new(0.0, 0.0, 100.0, 100.0))));
        f.apply(2, LayerState::new().position(50.0, 50.0));
        let set = f.frame();
        let child = set.get(&TraversalPath::for_layer(LayerId(2)));
        assert_eq!(child.bounds, Rect::new(-50.0, -50.0, 50.0, 50.0));
        assert_eq!(child.transformed_bounds, Rect::new(0.0, 0.0, 100.0, 100.0));
    }

    #[test]
    fn layer_stack_and_secure_are_inherited() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1))]);
        f.apply(
            1,
            LayerState::new()
                .layer_stack(LayerStack(3))
                .flags(LayerFlags::SECURE, LayerFlags::SECURE),
        );
        // A child's own stack is ignored below the root.
        f.apply(2, LayerState::new().layer_stack(LayerStack(9)));
        let set = f.frame();
        let child = set.get(&TraversalPath::for_layer(LayerId(2)));
        assert_eq!(child.output_filter.layer_stack, LayerStack(3));
        assert!(child.output_filter.to_internal_display_only);
    }

    #[test]
    fn opaque_buffer_blends_none() {
        let mut f = Fixture::new(&[(1, None)]);
        f.apply(
            1,
            LayerState::new().buffer(Some(BufferData::new(BufferId(1), 10, 10).with_opaque_format())),
        );
        let set = f.frame();
        let s = set.get(&TraversalPath::for_layer(LayerId(1)));
        assert_eq!(s.blend_mode, BlendMode::None);
        assert_eq!(s.frame_number, 1);
        assert_eq!(s.bounds, Rect::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn relative_child_hidden_by_relative_parent() {
        let mut f = Fixture::new(&[(1, None), (2, None), (3, Some(2))]);
        f.apply(3, LayerState::new().relative_z(LayerId(1), 1));
        f.apply(1, LayerState::new().hidden(true));
        let set = f.frame();
        let rel = set.get(&TraversalPath::for_layer(LayerId(3)));
        assert!(rel.hidden_by_relative_parent);
        assert!(!rel.hidden_by_parent);
        assert!(!rel.is_visible);
        assert_eq!(ids(&set), vec![2]);
    }

    #[test]
    fn relative_child_with_missing_relative_parent() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1)), (3, None)]);
        f.apply(2, LayerState::new().relative_z(LayerId(3), 1));
        f.lifecycle.on_handles_destroyed([LayerId(3)]);
        let set = f.frame();
        let s = set.get(&TraversalPath::for_layer(LayerId(2)));
        assert_eq!(s.reachability, Reachability::ReachableByRelativeParent);
        assert!(!s.is_visible);
    }

    #[test]
    fn offscreen_layers_trail_as_unreachable() {
        let mut f = Fixture::new(&[(1, None), (2, None)]);
        f.apply(2, LayerState::new().reparent(LayerId::UNASSIGNED));
        let set = f.frame();
        assert_eq!(set.len(), 2);
        let last = set.iter().last().map(|s| (s.layer_id(), s.reachability));
        assert_eq!(last, Some((LayerId(2), Reachability::Unreachable)));
    }

    #[test]
    fn mirror_produces_second_snapshot() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1)), (4, None)]);
        f.apply(4, LayerState::new().layer_stack(LayerStack(1)).position(100.0, 0.0));
        f.lifecycle
            .add_layers([LayerCreationArgs::new(LayerId(5), "mirror")
                .mirroring(LayerId(1))
                .with_parent(LayerId(4))]);
        let set = f.frame();
        let copies: Vec<&LayerSnapshot> =
            set.iter().filter(|s| s.layer_id() == LayerId(2)).collect();
        assert_eq!(copies.len(), 2);
        let mirrored = copies.iter().find(|s| s.path.is_clone());
        assert_eq!(mirrored.map(|s| s.mirror_root), Some(LayerId(5)));
        assert_eq!(
            mirrored.map(|s| s.output_filter.layer_stack),
            Some(LayerStack(1))
        );
        assert_eq!(
            mirrored.map(|s| s.transform),
            Some(Affine::translate((100.0, 0.0)))
        );
    }

    #[test]
    fn capture_is_scoped_and_restores_full_set() {
        let mut f = Fixture::new(&[(1, None), (2, Some(1)), (3, Some(1)), (4, None)]);
        let full = f.frame();
        let scoped = f.capture(&SnapshotScope::subtree(LayerId(1)).excluding(LayerId(3)));
        assert!(scoped.scoped);
        assert_eq!(ids(&scoped), vec![1, 2]);

        let mut children = SnapshotScope::subtree(LayerId(1));
        children.children_only = true;
        assert_eq!(ids(&f.capture(&children)), vec![2, 3]);

        let after = f.builder.snapshots();
        assert!(!after.scoped);
        assert!(after.updated.is_empty());
        assert_eq!(ids(after), ids(&full));
    }

    #[test]
    fn capture_by_layer_stack() {
        let mut f = Fixture::new(&[(1, None), (2, None)]);
        f.apply(2, LayerState::new().layer_stack(LayerStack(7)));
        f.frame();
        let scoped = f.capture(&SnapshotScope::layer_stack(LayerStack(7)));
        assert_eq!(ids(&scoped), vec![2]);
    }

    #[test]
    fn vacated_area_reported_when_layer_hides() {
        let mut f = Fixture::new(&[(1, None)]);
        f.apply(1, LayerState::new().crop(Some(Rect::new(0.0, 0.0, 10.0, 10.0))));
        f.frame();
        f.apply(1, LayerState::new().hidden(true));
        let set = f.frame();
        assert_eq!(
            set.vacated,
            vec![(LayerStack(0), Rect::new(0.0, 0.0, 10.0, 10.0))]
        );
    }

    #[test]
    #[should_panic(expected = "not in the lifecycle manager")]
    fn desynchronized_hierarchy_panics() {
        let mut f = Fixture::new(&[(1, None)]);
        f.hierarchy.update(&mut f.lifecycle);
        let other = LayerLifecycleManager::new();
        let _ = f.builder.update(BuildArgs {
            lifecycle: &other,
            hierarchy: &f.hierarchy,
            force_update: true,
        });
    }
}
