// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Parent/child tree derived from the lifecycle manager's flat layer set.
//!
//! The tree lives in an arena of nodes addressed by `u32` indices. Node 0 is
//! the root, node 1 the offscreen root; every other node refers to a layer
//! by id and never owns its state. Each child edge carries a [`Variant`]:
//!
//! - `Attached`: a plain child.
//! - `Detached`: a child drawn elsewhere through a relative-z link. It still
//!   inherits geometry from this parent but is skipped in z order.
//! - `Relative`: a layer ordered under this node by a relative-z link.
//! - `Mirror`: a subtree drawn again under a mirror layer.
//!
//! The tree is rebuilt from scratch whenever the lifecycle manager reports a
//! hierarchy change. A full rebuild always yields the same tree for the same
//! layer set.

use core::fmt;
use core::hash::{Hash, Hasher};
use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::{debug, error};

use crate::id::{LayerId, LayerStack};

use super::lifecycle::LayerLifecycleManager;
use super::state::{Changes, RequestedLayerState};

/// Arena index of the root node.
pub const ROOT: u32 = 0;
/// Arena index of the offscreen root node.
pub const OFFSCREEN_ROOT: u32 = 1;

/// Traversals deeper than this indicate a cycle.
const MAX_DEPTH: u32 = 50;

/// How a child hangs off its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Ordinary child.
    Attached,
    /// Child drawn through a relative-z parent instead.
    Detached,
    /// Child placed here by a relative-z link.
    Relative,
    /// Mirrored subtree.
    Mirror,
}

/// One arena entry.
#[derive(Clone, Debug)]
struct Node {
    layer: LayerId,
    key: (LayerStack, i32, LayerId),
    children: Vec<(u32, Variant)>,
    parent: u32,
    relative_parent: Option<u32>,
}

impl Node {
    fn root() -> Self {
        Self {
            layer: LayerId::UNASSIGNED,
            key: (LayerStack(0), 0, LayerId::UNASSIGNED),
            children: Vec::new(),
            parent: u32::MAX,
            relative_parent: None,
        }
    }
}

/// The route by which a traversal reached a layer.
///
/// Two paths are equal when they name the same layer under the same mirror
/// roots; one layer mirrored twice has two distinct paths.
#[derive(Clone)]
pub struct TraversalPath {
    /// Layer reached.
    pub id: LayerId,
    /// Edge used to reach it.
    pub variant: Variant,
    /// Mirror layers crossed on the way, outermost first.
    pub mirror_root_ids: SmallVec<[LayerId; 2]>,
    /// Relative-z edges crossed on the way.
    pub relative_root_ids: SmallVec<[LayerId; 4]>,
    /// Set when a relative-z edge led back to a layer already on the path.
    pub invalid_relative_root: LayerId,
    /// A detached edge was crossed.
    pub detached: bool,
}

impl TraversalPath {
    /// The path of the root.
    #[must_use]
    pub fn root() -> Self {
        Self {
            id: LayerId::UNASSIGNED,
            variant: Variant::Attached,
            mirror_root_ids: SmallVec::new(),
            relative_root_ids: SmallVec::new(),
            invalid_relative_root: LayerId::UNASSIGNED,
            detached: false,
        }
    }

    /// A path for a layer uniquely identified by id (no mirrors).
    #[must_use]
    pub fn for_layer(id: LayerId) -> Self {
        Self {
            id,
            ..Self::root()
        }
    }

    /// Extends the path by one edge.
    #[must_use]
    pub fn make_child(&self, id: LayerId, variant: Variant) -> Self {
        let mut child = self.clone();
        child.id = id;
        child.variant = variant;
        match variant {
            Variant::Mirror => child.mirror_root_ids.push(self.id),
            Variant::Relative => {
                if self.relative_root_ids.contains(&id) {
                    child.invalid_relative_root = id;
                }
                child.relative_root_ids.push(id);
            }
            Variant::Detached => child.detached = true,
            Variant::Attached => {}
        }
        child
    }

    /// A relative-z loop was found on this path.
    #[must_use]
    pub fn has_rel_z_loop(&self) -> bool {
        self.invalid_relative_root.is_assigned()
    }

    /// The layer is reached through a mirror.
    #[must_use]
    pub fn is_clone(&self) -> bool {
        !self.mirror_root_ids.is_empty()
    }

    /// The last edge was a relative-z edge.
    #[must_use]
    pub fn is_relative(&self) -> bool {
        self.variant == Variant::Relative
    }

    /// Innermost mirror layer, or unassigned.
    #[must_use]
    pub fn mirror_root(&self) -> LayerId {
        self.mirror_root_ids
            .last()
            .copied()
            .unwrap_or(LayerId::UNASSIGNED)
    }
}

impl PartialEq for TraversalPath {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.mirror_root_ids == other.mirror_root_ids
    }
}

impl Eq for TraversalPath {}

impl Hash for TraversalPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.mirror_root_ids.hash(state);
    }
}

impl fmt::Debug for TraversalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.id.is_assigned() {
            return f.write_str("TraversalPath(root)");
        }
        let mut s = f.debug_struct("TraversalPath");
        s.field("id", &self.id.0);
        if !self.mirror_root_ids.is_empty() {
            s.field("mirror_roots", &self.mirror_root_ids);
        }
        if !self.relative_root_ids.is_empty() {
            s.field("relative_roots", &self.relative_root_ids);
        }
        if self.has_rel_z_loop() {
            s.field("invalid_relative_root", &self.invalid_relative_root);
        }
        s.finish()
    }
}

/// The layer tree.
#[derive(Clone, Debug)]
pub struct LayerHierarchy {
    nodes: Vec<Node>,
    index: HashMap<LayerId, u32>,
    initialized: bool,
}

impl Default for LayerHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerHierarchy {
    /// Creates an empty tree holding only the two roots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::root(), Node::root()],
            index: HashMap::new(),
            initialized: false,
        }
    }

    /// Brings the tree in line with `lifecycle`.
    ///
    /// Does nothing unless this is the first update or a hierarchy change
    /// is pending. Relative-z loops are broken by clearing the offending
    /// link in `lifecycle` and rebuilding. Returns whether the tree was
    /// rebuilt.
    pub fn update(&mut self, lifecycle: &mut LayerLifecycleManager) -> bool {
        if self.initialized && !lifecycle.global_changes().contains(Changes::HIERARCHY) {
            return false;
        }
        self.rebuild(lifecycle.layers());
        while let Some(invalid) = self.find_rel_z_loop() {
            error!(layer = ?invalid, "relative z loop detected, clearing relative parent");
            lifecycle.fix_relative_z_loop(invalid);
            self.rebuild(lifecycle.layers());
        }
        true
    }

    /// Rebuilds the tree from a layer set.
    pub fn rebuild<'a>(&mut self, layers: impl IntoIterator<Item = &'a RequestedLayerState>) {
        self.nodes.clear();
        self.nodes.push(Node::root());
        self.nodes.push(Node::root());
        self.index.clear();

        let layers: Vec<&RequestedLayerState> = layers.into_iter().collect();
        for layer in &layers {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "layer count is bounded far below u32::MAX"
            )]
            let idx = self.nodes.len() as u32;
            self.nodes.push(Node {
                layer: layer.id,
                key: (layer.layer_stack, layer.z, layer.id),
                children: Vec::new(),
                parent: u32::MAX,
                relative_parent: None,
            });
            self.index.insert(layer.id, idx);
        }
        for layer in &layers {
            self.on_layer_added(layer);
        }
        for node in 0..self.nodes.len() {
            let mut children = core::mem::take(&mut self.nodes[node].children);
            children.sort_by_key(|&(child, _)| self.nodes[child as usize].key);
            self.nodes[node].children = children;
        }
        self.detach_subtree_from_relative_parents(OFFSCREEN_ROOT);
        self.initialized = true;
        debug!(layers = layers.len(), "layer hierarchy rebuilt");
    }

    fn on_layer_added(&mut self, layer: &RequestedLayerState) {
        let idx = self.node_index(layer.id);
        self.attach_to_parent(idx, layer);
        self.attach_to_relative_parent(idx, layer);
        for mirror in &layer.mirror_ids {
            if let Some(&source) = self.index.get(mirror) {
                self.nodes[idx as usize]
                    .children
                    .push((source, Variant::Mirror));
            }
        }
    }

    fn attach_to_parent(&mut self, idx: u32, layer: &RequestedLayerState) {
        let variant = if layer.has_valid_relative_parent() {
            Variant::Detached
        } else {
            Variant::Attached
        };
        let parent = if layer.parent_id.is_assigned() {
            self.index
                .get(&layer.parent_id)
                .copied()
                .unwrap_or(OFFSCREEN_ROOT)
        } else if layer.can_be_root {
            ROOT
        } else {
            OFFSCREEN_ROOT
        };
        self.nodes[parent as usize].children.push((idx, variant));
        self.nodes[idx as usize].parent = parent;
    }

    fn attach_to_relative_parent(&mut self, idx: u32, layer: &RequestedLayerState) {
        if !layer.has_valid_relative_parent() || self.nodes[idx as usize].relative_parent.is_some()
        {
            return;
        }
        let relative = self
            .index
            .get(&layer.relative_parent_id)
            .copied()
            .unwrap_or(OFFSCREEN_ROOT);
        self.nodes[relative as usize]
            .children
            .push((idx, Variant::Relative));
        self.nodes[idx as usize].relative_parent = Some(relative);
    }

    /// Offscreen layers do not draw through relative parents: their
    /// relative edges are dropped and they reattach to their real parent.
    fn detach_subtree_from_relative_parents(&mut self, root: u32) {
        for idx in self.descendants(root) {
            if let Some(relative) = self.nodes[idx as usize].relative_parent.take() {
                self.nodes[relative as usize]
                    .children
                    .retain(|&(c, v)| !(c == idx && v == Variant::Relative));
            }
            let parent = self.nodes[idx as usize].parent;
            if let Some(edge) = self.nodes[parent as usize]
                .children
                .iter_mut()
                .find(|(c, _)| *c == idx)
            {
                edge.1 = Variant::Attached;
            }
        }
    }

    fn descendants(&self, root: u32) -> Vec<u32> {
        let mut queue = vec![root];
        let mut out = Vec::new();
        let mut i = 0;
        while i < queue.len() {
            let idx = queue[i];
            i += 1;
            if self.nodes[idx as usize].layer.is_assigned() {
                out.push(idx);
            }
            for &(child, variant) in &self.nodes[idx as usize].children {
                if matches!(variant, Variant::Attached | Variant::Detached) {
                    queue.push(child);
                }
            }
        }
        out
    }

    fn node_index(&self, id: LayerId) -> u32 {
        match self.index.get(&id) {
            Some(&idx) => idx,
            None => panic!("no hierarchy node for {id:?}"),
        }
    }

    /// The first relative-z loop reachable from the root, if any.
    #[must_use]
    pub fn find_rel_z_loop(&self) -> Option<LayerId> {
        let mut invalid = None;
        self.traverse(ROOT, |path| {
            if path.has_rel_z_loop() {
                invalid = Some(path.invalid_relative_root);
                return false;
            }
            true
        });
        invalid
    }

    /// Visits every node below `node` depth-first, in stored child order,
    /// including detached edges. The visitor returns `false` to prune.
    ///
    /// # Panics
    ///
    /// Panics if the tree is deeper than 50 levels, which indicates a cycle.
    pub fn traverse(&self, node: u32, mut visitor: impl FnMut(&TraversalPath) -> bool) {
        self.traverse_inner(node, &TraversalPath::root(), 0, &mut visitor);
    }

    fn traverse_inner(
        &self,
        node: u32,
        path: &TraversalPath,
        depth: u32,
        visitor: &mut impl FnMut(&TraversalPath) -> bool,
    ) {
        assert!(depth <= MAX_DEPTH, "cycle detected in layer hierarchy");
        if self.nodes[node as usize].layer.is_assigned() && !visitor(path) {
            return;
        }
        for &(child, variant) in &self.nodes[node as usize].children {
            let child_path = path.make_child(self.nodes[child as usize].layer, variant);
            self.traverse_inner(child, &child_path, depth + 1, visitor);
        }
    }

    /// Visits the drawable tree in z order: negative-z children, then the
    /// node, then the rest. Detached edges are skipped.
    ///
    /// # Panics
    ///
    /// Panics if the tree is deeper than 50 levels.
    pub fn traverse_in_z_order(&self, node: u32, mut visitor: impl FnMut(&TraversalPath) -> bool) {
        self.z_order_inner(node, &TraversalPath::root(), 0, &mut visitor);
    }

    fn z_order_inner(
        &self,
        node: u32,
        path: &TraversalPath,
        depth: u32,
        visitor: &mut impl FnMut(&TraversalPath) -> bool,
    ) -> bool {
        assert!(depth <= MAX_DEPTH, "cycle detected in layer hierarchy");
        let mut visit_self = self.nodes[node as usize].layer.is_assigned();
        for &(child, variant) in &self.nodes[node as usize].children {
            let child_node = &self.nodes[child as usize];
            if visit_self && child_node.key.1 >= 0 {
                visit_self = false;
                if !visitor(path) {
                    return false;
                }
            }
            if variant == Variant::Detached {
                continue;
            }
            let child_path = path.make_child(child_node.layer, variant);
            if child_path.has_rel_z_loop() {
                continue;
            }
            if !self.z_order_inner(child, &child_path, depth + 1, visitor) {
                return false;
            }
        }
        if visit_self {
            return visitor(path);
        }
        true
    }

    /// Children of `node` with their edge variants, in z order.
    #[must_use]
    pub fn children(&self, node: u32) -> &[(u32, Variant)] {
        &self.nodes[node as usize].children
    }

    /// Layer at `node`; unassigned for the two roots.
    #[must_use]
    pub fn layer_at(&self, node: u32) -> LayerId {
        self.nodes[node as usize].layer
    }

    /// Arena index for a layer.
    #[must_use]
    pub fn node_of(&self, id: LayerId) -> Option<u32> {
        self.index.get(&id).copied()
    }

    /// Real parent node of `node`.
    #[must_use]
    pub fn parent_of(&self, node: u32) -> Option<u32> {
        match self.nodes[node as usize].parent {
            u32::MAX => None,
            p => Some(p),
        }
    }

    /// Relative-z parent node of `node`.
    #[must_use]
    pub fn relative_parent_of(&self, node: u32) -> Option<u32> {
        self.nodes[node as usize].relative_parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ApplyToken, TransactionId};
    use crate::layer::{LayerCreationArgs, LayerState};
    use crate::transaction::TransactionState;

    fn lifecycle(layers: &[(u32, Option<u32>)]) -> LayerLifecycleManager {
        let mut m = LayerLifecycleManager::new();
        m.add_layers(layers.iter().map(|&(id, parent)| {
            let args = LayerCreationArgs::new(LayerId(id), "l");
            match parent {
                Some(p) => args.with_parent(LayerId(p)),
                None => args,
            }
        }));
        m
    }

    fn apply(m: &mut LayerLifecycleManager, id: u32, state: LayerState) {
        m.apply_transactions(&[
            TransactionState::new(TransactionId(1), ApplyToken(0)).layer(LayerId(id), state)
        ]);
    }

    fn z_order(h: &LayerHierarchy) -> Vec<u32> {
        let mut out = Vec::new();
        h.traverse_in_z_order(ROOT, |path| {
            out.push(path.id.0);
            true
        });
        out
    }

    #[test]
    fn children_sorted_by_z_and_negative_z_first() {
        let mut m = lifecycle(&[(1, None), (2, Some(1)), (3, Some(1)), (4, Some(1))]);
        apply(&mut m, 2, LayerState::new().z(5));
        apply(&mut m, 3, LayerState::new().z(-1));
        let mut h = LayerHierarchy::new();
        h.update(&mut m);
        assert_eq!(z_order(&h), vec![3, 1, 4, 2]);
    }

    #[test]
    fn update_without_hierarchy_change_is_noop() {
        let mut m = lifecycle(&[(1, None)]);
        let mut h = LayerHierarchy::new();
        assert!(h.update(&mut m));
        m.commit_changes();
        apply(&mut m, 1, LayerState::new().alpha(0.5));
        assert!(!h.update(&mut m));
    }

    #[test]
    fn rebuild_is_deterministic() {
        let mut m = lifecycle(&[(1, None), (2, Some(1)), (3, None), (4, Some(3))]);
        apply(&mut m, 4, LayerState::new().relative_z(LayerId(2), 1));
        let mut a = LayerHierarchy::new();
        a.update(&mut m);
        let mut b = LayerHierarchy::new();
        b.rebuild(m.layers());
        assert_eq!(z_order(&a), z_order(&b));
    }

    #[test]
    fn relative_child_draws_under_relative_parent() {
        let mut m = lifecycle(&[(1, None), (2, Some(1)), (3, None), (4, Some(3))]);
        apply(&mut m, 4, LayerState::new().relative_z(LayerId(2), 1));
        let mut h = LayerHierarchy::new();
        h.update(&mut m);
        assert_eq!(z_order(&h), vec![1, 2, 4, 3]);

        let mut detached = Vec::new();
        h.traverse(ROOT, |path| {
            if path.detached {
                detached.push(path.id.0);
            }
            true
        });
        assert!(detached.contains(&4));
    }

    #[test]
    fn relative_parent_unassigned_is_unreachable() {
        let mut m = lifecycle(&[(1, None), (2, Some(1)), (3, None)]);
        apply(&mut m, 2, LayerState::new().relative_z(LayerId(3), 1));
        m.on_handles_destroyed([LayerId(3)]);
        let mut h = LayerHierarchy::new();
        h.update(&mut m);
        assert_eq!(z_order(&h), vec![1]);
    }

    #[test]
    fn offscreen_layers_are_not_drawn() {
        let mut m = lifecycle(&[(1, None), (2, None)]);
        apply(&mut m, 2, LayerState::new().reparent(LayerId::UNASSIGNED));
        let mut h = LayerHierarchy::new();
        h.update(&mut m);
        assert_eq!(z_order(&h), vec![1]);
        let mut offscreen = Vec::new();
        h.traverse(OFFSCREEN_ROOT, |p| {
            offscreen.push(p.id.0);
            true
        });
        assert_eq!(offscreen, vec![2]);
    }

    #[test]
    fn mirror_yields_distinct_paths() {
        let mut m = lifecycle(&[(1, None), (2, Some(1))]);
        m.add_layers([LayerCreationArgs::new(LayerId(5), "mirror").mirroring(LayerId(1))]);
        let mut h = LayerHierarchy::new();
        h.update(&mut m);
        let mut paths = Vec::new();
        h.traverse_in_z_order(ROOT, |p| {
            paths.push(p.clone());
            true
        });
        let twos: Vec<_> = paths.iter().filter(|p| p.id == LayerId(2)).collect();
        assert_eq!(twos.len(), 2);
        assert_ne!(twos[0], twos[1]);
        assert_eq!(twos[1].mirror_root(), LayerId(5));
    }

    #[test]
    fn relative_z_loop_is_repaired() {
        let mut m = lifecycle(&[(1, None), (2, Some(1)), (3, Some(1))]);
        apply(&mut m, 2, LayerState::new().relative_z(LayerId(3), 1));
        apply(&mut m, 3, LayerState::new().relative_z(LayerId(2), 1));
        let mut h = LayerHierarchy::new();
        h.update(&mut m);
        assert!(h.find_rel_z_loop().is_none());
        assert!(
            m.layers()
                .any(|l| l.is_relative_of && !l.relative_parent_id.is_assigned())
        );
    }

    #[test]
    fn destroyed_parent_moves_children_offscreen() {
        let mut m = lifecycle(&[(1, None), (2, Some(1))]);
        m.on_handles_destroyed([LayerId(1)]);
        let mut h = LayerHierarchy::new();
        h.update(&mut m);
        assert!(z_order(&h).is_empty());
        assert_eq!(h.node_of(LayerId(2)).and_then(|n| h.parent_of(n)), Some(OFFSCREEN_ROOT));
    }

    #[test]
    #[should_panic(expected = "cycle detected")]
    fn parent_cycle_panics() {
        let mut m = lifecycle(&[(1, None), (2, Some(1))]);
        apply(&mut m, 1, LayerState::new().reparent(LayerId(2)));
        let mut h = LayerHierarchy::new();
        h.rebuild(m.layers());
        h.traverse(OFFSCREEN_ROOT, |_| true);
        h.traverse(ROOT, |_| true);
        // A parent cycle is unreachable from either root; walk it directly.
        let start = h.node_of(LayerId(1)).unwrap_or(ROOT);
        h.traverse(start, |_| true);
    }
}
