// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A small layer scene for unit tests.

use std::sync::Arc;

use lamina_core::id::{ApplyToken, LayerId, TransactionId};
use lamina_core::layer::{
    BuildArgs, LayerCreationArgs, LayerHierarchy, LayerLifecycleManager, LayerSnapshotBuilder,
    LayerState, SnapshotSet,
};
use lamina_core::transaction::TransactionState;

pub(crate) struct Scene {
    lifecycle: LayerLifecycleManager,
    hierarchy: LayerHierarchy,
    builder: LayerSnapshotBuilder,
}

impl Scene {
    /// Root-level white color layers.
    pub(crate) fn new(ids: &[u32]) -> Self {
        let mut lifecycle = LayerLifecycleManager::new();
        lifecycle.add_layers(
            ids.iter()
                .map(|&id| LayerCreationArgs::new(LayerId(id), "layer").with_color([1.0, 1.0, 1.0])),
        );
        Self {
            lifecycle,
            hierarchy: LayerHierarchy::new(),
            builder: LayerSnapshotBuilder::new(),
        }
    }

    pub(crate) fn apply(&mut self, id: u32, state: LayerState) {
        self.lifecycle.apply_transactions(&[
            TransactionState::new(TransactionId(1), ApplyToken(0)).layer(LayerId(id), state)
        ]);
    }

    pub(crate) fn frame(&mut self) -> Arc<SnapshotSet> {
        self.hierarchy.update(&mut self.lifecycle);
        let set = self.builder.update(BuildArgs {
            lifecycle: &self.lifecycle,
            hierarchy: &self.hierarchy,
            force_update: false,
        });
        self.lifecycle.commit_changes();
        set
    }
}
