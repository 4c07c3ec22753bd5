// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Authoritative layer set.
//!
//! [`LayerLifecycleManager`] owns every [`RequestedLayerState`]. Layers are
//! created from [`LayerCreationArgs`], mutated by transactions and destroyed
//! once their handle is gone and they have no parent. Destruction cascades
//! to handle-less children; children that still have a handle move
//! offscreen.
//!
//! Every mutation accumulates per-layer [`Changes`] and a global change
//! mask. Both are cleared by [`commit_changes`](LayerLifecycleManager::commit_changes)
//! once the hierarchy and snapshot builders have observed them.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::id::{LayerId, TransactionId};
use crate::listener::{ReleaseReason, SurfaceStats};
use crate::transaction::{TransactionFlags, TransactionState};

use super::buffer::BufferData;
use super::state::{Changes, LayerCreationArgs, RequestedLayerState, What};

/// A buffer replaced by a newer one during apply.
#[derive(Clone, Debug)]
pub struct ReplacedBuffer {
    /// Layer that held it.
    pub layer: LayerId,
    /// The old buffer.
    pub buffer: BufferData,
}

/// Side effects of applying a batch of transactions.
#[derive(Clone, Debug, Default)]
pub struct ApplyResult {
    /// Buffers to release once the next frame presents.
    pub replaced: Vec<ReplacedBuffer>,
    /// Per-transaction buffer latches.
    pub surfaces: Vec<(TransactionId, SurfaceStats)>,
}

/// Owns the requested state of every live layer.
#[derive(Debug, Default)]
pub struct LayerLifecycleManager {
    layers: BTreeMap<LayerId, RequestedLayerState>,
    destroyed: Vec<RequestedLayerState>,
    global_changes: Changes,
}

impl LayerLifecycleManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates layers.
    ///
    /// References to unknown parents or mirror sources are dropped with a
    /// warning; the layer is created without them.
    ///
    /// # Panics
    ///
    /// Panics if an id is already in use.
    pub fn add_layers(&mut self, layers: impl IntoIterator<Item = LayerCreationArgs>) {
        for args in layers {
            let mut layer = RequestedLayerState::new(&args);
            assert!(
                !self.layers.contains_key(&layer.id),
                "duplicate layer id {:?}",
                layer.id
            );
            if layer.parent_id.is_assigned() && !self.layers.contains_key(&layer.parent_id) {
                warn!(layer = ?layer.id, parent = ?layer.parent_id, "parent not found");
                layer.parent_id = LayerId::UNASSIGNED;
            }
            if layer.layer_id_to_mirror.is_assigned() {
                if self.layers.contains_key(&layer.layer_id_to_mirror) {
                    layer.mirror_ids.push(layer.layer_id_to_mirror);
                } else {
                    warn!(layer = ?layer.id, source = ?layer.layer_id_to_mirror, "mirror source not found");
                }
            }
            debug!(layer = ?layer.id, name = %layer.name, "layer created");
            self.global_changes |= Changes::CREATED | Changes::HIERARCHY;
            self.layers.insert(layer.id, layer);
        }
    }

    /// Marks handles as released and destroys layers that can go.
    ///
    /// Unknown ids are ignored.
    pub fn on_handles_destroyed(&mut self, handles: impl IntoIterator<Item = LayerId>) {
        let mut to_destroy = Vec::new();
        for id in handles {
            let Some(layer) = self.layers.get_mut(&id) else {
                debug!(layer = ?id, "handle destroyed for unknown layer");
                continue;
            };
            layer.handle_alive = false;
            if layer.can_be_destroyed() {
                to_destroy.push(id);
            }
        }
        self.destroy_cascade(to_destroy);
    }

    fn destroy_cascade(&mut self, mut to_destroy: Vec<LayerId>) {
        let mut i = 0;
        while i < to_destroy.len() {
            let id = to_destroy[i];
            i += 1;
            let Some(mut layer) = self.layers.remove(&id) else {
                continue;
            };
            for other in self.layers.values_mut() {
                if other.parent_id == id {
                    other.parent_id = LayerId::UNASSIGNED;
                    other.changes |= Changes::PARENT;
                    if other.can_be_destroyed() && !to_destroy.contains(&other.id) {
                        to_destroy.push(other.id);
                    }
                }
                if other.relative_parent_id == id {
                    other.relative_parent_id = LayerId::UNASSIGNED;
                    other.changes |= Changes::RELATIVE_PARENT;
                }
                if other.mirror_ids.contains(&id) {
                    other.mirror_ids.retain(|m| *m != id);
                    other.changes |= Changes::MIRROR;
                }
            }
            debug!(layer = ?id, "layer destroyed");
            layer.changes |= Changes::DESTROYED;
            self.global_changes |= Changes::DESTROYED | Changes::HIERARCHY;
            self.destroyed.push(layer);
        }
    }

    /// Applies transactions in order.
    ///
    /// Deltas for unknown layers are skipped with a warning; the rest of the
    /// transaction still applies.
    pub fn apply_transactions(&mut self, transactions: &[TransactionState]) -> ApplyResult {
        let mut result = ApplyResult::default();
        for transaction in transactions {
            for composer in &transaction.states {
                let state = &composer.state;
                let parent_id = self.resolve(state.what.contains(What::REPARENT), state.parent);
                let relative_id = self.resolve(
                    state.what.contains(What::RELATIVE_LAYER),
                    state.relative_parent,
                );
                let Some(layer) = self.layers.get_mut(&composer.layer_id) else {
                    warn!(
                        layer = ?composer.layer_id,
                        transaction = ?transaction.id,
                        "transaction references unknown layer"
                    );
                    continue;
                };
                if let Some(buffer) = layer.merge(state, parent_id, relative_id) {
                    result.replaced.push(ReplacedBuffer {
                        layer: layer.id,
                        buffer,
                    });
                }
                if state.has_buffer() {
                    if let Some(buffer) = &layer.buffer {
                        result.surfaces.push((
                            transaction.id,
                            SurfaceStats {
                                layer: layer.id,
                                frame_number: buffer.frame_number.unwrap_or(0),
                                acquire_time: buffer
                                    .acquire_fence
                                    .as_ref()
                                    .and_then(|f| f.signal_time()),
                            },
                        ));
                    }
                }
                if transaction.flags.contains(TransactionFlags::ANIMATION) {
                    layer.changes |= Changes::ANIMATION;
                }
                self.global_changes |= layer.changes;
                if layer.changes.intersects(Changes::HIERARCHY_TRIGGERS) {
                    self.global_changes |= Changes::HIERARCHY;
                }
                if state.what.contains(What::REPARENT) && layer.can_be_destroyed() {
                    let id = layer.id;
                    self.destroy_cascade(vec![id]);
                }
            }
        }
        result
    }

    fn resolve(&self, set: bool, id: LayerId) -> LayerId {
        if !set || !id.is_assigned() {
            return LayerId::UNASSIGNED;
        }
        if self.layers.contains_key(&id) {
            id
        } else {
            warn!(layer = ?id, "reference to unknown layer");
            LayerId::UNASSIGNED
        }
    }

    /// Breaks a relative-z cycle by clearing `id`'s relative parent.
    ///
    /// The layer stays relative, so it becomes unreachable until the client
    /// fixes its z order.
    pub fn fix_relative_z_loop(&mut self, id: LayerId) {
        if let Some(layer) = self.layers.get_mut(&id) {
            layer.relative_parent_id = LayerId::UNASSIGNED;
            layer.changes |= Changes::RELATIVE_PARENT;
            self.global_changes |= Changes::RELATIVE_PARENT | Changes::HIERARCHY;
        }
    }

    /// Clears all per-layer and global changes and drops destroyed layers,
    /// releasing any buffers they still held.
    pub fn commit_changes(&mut self) {
        for layer in self.layers.values_mut() {
            layer.clear_changes();
        }
        for layer in self.destroyed.drain(..) {
            if let Some(buffer) = &layer.buffer {
                buffer.release(layer.id, ReleaseReason::LayerDestroyed, None);
            }
        }
        self.global_changes = Changes::empty();
    }

    /// Live layers in id order.
    pub fn layers(&self) -> impl Iterator<Item = &RequestedLayerState> {
        self.layers.values()
    }

    /// Looks up a live layer.
    #[must_use]
    pub fn get(&self, id: LayerId) -> Option<&RequestedLayerState> {
        self.layers.get(&id)
    }

    /// Whether `id` names a live layer.
    #[must_use]
    pub fn contains(&self, id: LayerId) -> bool {
        self.layers.contains_key(&id)
    }

    /// Number of live layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether no layers are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layers destroyed since the last commit.
    #[must_use]
    pub fn destroyed(&self) -> &[RequestedLayerState] {
        &self.destroyed
    }

    /// Changes accumulated since the last commit.
    #[must_use]
    pub fn global_changes(&self) -> Changes {
        self.global_changes
    }
}
