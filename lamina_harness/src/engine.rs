// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::VecDeque;
use std::sync::Arc;

use lamina_core::fence::Fence;
use lamina_core::id::{DisplayId, LayerId};
use lamina_core::time::HostTime;
use lamina_render::{ClientCompositionRequest, CompositionEngine, DamageRegion, RenderError};
use parking_lot::Mutex;

/// What one `compose` call was asked to draw.
#[derive(Clone, Debug, PartialEq)]
pub struct ComposeRecord {
    /// Display.
    pub display: DisplayId,
    /// Layers drawn, back to front.
    pub layers: Vec<LayerId>,
    /// Damage handed over.
    pub damage: DamageRegion,
    /// A color transform was set.
    pub color_transform: bool,
}

#[derive(Debug, Default)]
struct State {
    records: Vec<ComposeRecord>,
    failures: VecDeque<RenderError>,
}

/// A [`CompositionEngine`] that draws nothing and returns signaled fences.
#[derive(Clone, Debug, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<State>>,
}

impl FakeEngine {
    /// A fake that succeeds until told otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next compose fail.
    pub fn fail_next(&self, error: RenderError) {
        self.state.lock().failures.push_back(error);
    }

    /// Every compose call so far, failed ones included.
    #[must_use]
    pub fn records(&self) -> Vec<ComposeRecord> {
        self.state.lock().records.clone()
    }

    /// Compose calls for `display`.
    #[must_use]
    pub fn records_for(&self, display: DisplayId) -> Vec<ComposeRecord> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|r| r.display == display)
            .cloned()
            .collect()
    }
}

impl CompositionEngine for FakeEngine {
    fn compose(&mut self, request: &ClientCompositionRequest<'_>) -> Result<Fence, RenderError> {
        let mut state = self.state.lock();
        state.records.push(ComposeRecord {
            display: request.display,
            layers: request.items.iter().map(|i| i.layer_id()).collect(),
            damage: request.damage.clone(),
            color_transform: request.color_transform.is_some(),
        });
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(Fence::signaled(HostTime::default())),
        }
    }
}
