// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-frame input to composition.

use std::collections::HashSet;
use std::sync::Arc;

use lamina_core::id::DisplayId;
use lamina_core::layer::SnapshotSet;
use lamina_core::time::HostTime;
use tracing::debug;

use crate::damage::{DamageRegion, OutputDamage};
use crate::engine::ClientCompositionRequest;
use crate::plan::{OutputConfig, RenderPlan};

/// A 4x4 row-major color matrix applied to composed output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorMatrix(pub [f32; 16]);

impl ColorMatrix {
    /// The identity matrix.
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Whether this is the identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for ColorMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One output's share of a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputRefresh {
    /// What the output shows.
    pub output: OutputConfig,
    /// Draw items.
    pub plan: RenderPlan,
    /// Area to repaint.
    pub damage: DamageRegion,
}

impl OutputRefresh {
    /// The composition engine's share of this output.
    #[must_use]
    pub fn client_request(&self, color_transform: Option<ColorMatrix>) -> ClientCompositionRequest<'_> {
        let damage = if self.plan.force_full_damage {
            DamageRegion::Full
        } else {
            self.damage.clone()
        };
        ClientCompositionRequest {
            display: self.output.display,
            bounds: self.output.bounds,
            items: self.plan.client_items().collect(),
            damage,
            color_transform,
        }
    }
}

/// Inputs to [`RefreshArgs::build`].
#[derive(Clone, Copy, Debug)]
pub struct RefreshRequest<'a> {
    /// Frame counter.
    pub frame_index: u64,
    /// When the frame should reach the screen.
    pub expected_present: HostTime,
    /// Snapshots of this frame.
    pub snapshots: &'a Arc<SnapshotSet>,
    /// Candidate outputs, in priority order.
    pub outputs: &'a [OutputConfig],
    /// Repaint every output completely.
    pub force_full_damage: bool,
    /// Color transform, if any.
    pub color_transform: Option<ColorMatrix>,
}

/// Everything the composite phase needs for one frame.
#[derive(Clone, Debug)]
pub struct RefreshArgs {
    /// Frame counter.
    pub frame_index: u64,
    /// When the frame should reach the screen.
    pub expected_present: HostTime,
    /// Snapshots the plans were built from.
    pub snapshots: Arc<SnapshotSet>,
    /// Outputs that composite this frame.
    pub outputs: Vec<OutputRefresh>,
    /// Every output was repainted completely.
    pub force_full_damage: bool,
    /// Color transform, if any.
    pub color_transform: Option<ColorMatrix>,
}

impl RefreshArgs {
    /// Builds plans and damage for every enabled output.
    ///
    /// Disabled outputs are left out entirely. When two outputs show the
    /// same layer stack, only the first composites.
    pub fn build(request: RefreshRequest<'_>, damage_state: &mut OutputDamage) -> Self {
        let snapshots = request.snapshots;
        let updated = damage_state.updated_paths(snapshots);

        let mut stacks = HashSet::new();
        let mut outputs = Vec::new();
        for output in request.outputs {
            if !output.enabled {
                debug!(display = ?output.display, "output skipped this frame");
                continue;
            }
            if !stacks.insert(output.layer_stack) {
                debug!(
                    display = ?output.display,
                    layer_stack = ?output.layer_stack,
                    "duplicate layer stack skipped"
                );
                continue;
            }
            let plan = RenderPlan::build(output, snapshots);
            let mut damage = damage_state.tracker(output.display).compute(&plan, &updated);
            if request.force_full_damage {
                damage = DamageRegion::Full;
            }
            outputs.push(OutputRefresh {
                output: *output,
                plan,
                damage,
            });
        }
        damage_state.retain(|display| request.outputs.iter().any(|o| o.display == display));

        Self {
            frame_index: request.frame_index,
            expected_present: request.expected_present,
            snapshots: Arc::clone(snapshots),
            outputs,
            force_full_damage: request.force_full_damage,
            color_transform: request.color_transform.filter(|m| !m.is_identity()),
        }
    }

    /// The refresh of one display, if it composites this frame.
    #[must_use]
    pub fn output(&self, display: DisplayId) -> Option<&OutputRefresh> {
        self.outputs.iter().find(|o| o.output.display == display)
    }

    /// Mutable access to one display's refresh.
    pub fn output_mut(&mut self, display: DisplayId) -> Option<&mut OutputRefresh> {
        self.outputs.iter_mut().find(|o| o.output.display == display)
    }
}

#[cfg(test)]
mod tests {
    use kurbo::Rect;
    use lamina_core::id::LayerStack;
    use lamina_core::layer::LayerState;

    use super::*;
    use crate::testing::Scene;

    fn output(display: u64, stack: u32) -> OutputConfig {
        OutputConfig {
            display: DisplayId::Physical(display),
            layer_stack: LayerStack(stack),
            bounds: Rect::new(0.0, 0.0, 100.0, 100.0),
            internal: true,
            enabled: true,
        }
    }

    fn build(
        snapshots: &Arc<SnapshotSet>,
        outputs: &[OutputConfig],
        damage: &mut OutputDamage,
    ) -> RefreshArgs {
        RefreshArgs::build(
            RefreshRequest {
                frame_index: 1,
                expected_present: HostTime(0),
                snapshots,
                outputs,
                force_full_damage: false,
                color_transform: Some(ColorMatrix::IDENTITY),
            },
            damage,
        )
    }

    #[test]
    fn disabled_and_duplicate_outputs_are_left_out() {
        let mut scene = Scene::new(&[1]);
        let snapshots = scene.frame();
        let mut virtual_off = output(3, 1);
        virtual_off.display = DisplayId::Virtual(3);
        virtual_off.enabled = false;
        let outputs = [output(0, 0), output(1, 0), output(2, 1), virtual_off];

        let args = build(&snapshots, &outputs, &mut OutputDamage::new());
        let displays: Vec<_> = args.outputs.iter().map(|o| o.output.display).collect();
        assert_eq!(displays, vec![DisplayId::Physical(0), DisplayId::Physical(2)]);
        assert!(args.output(DisplayId::Virtual(3)).is_none());
        assert_eq!(args.color_transform, None, "identity is dropped");
    }

    #[test]
    fn damage_follows_moved_layers() {
        let mut scene = Scene::new(&[1, 2]);
        scene.apply(1, LayerState::new().crop(Some(Rect::new(0.0, 0.0, 10.0, 10.0))));
        scene.apply(2, LayerState::new().crop(Some(Rect::new(0.0, 0.0, 10.0, 10.0))));
        let outputs = [output(0, 0)];
        let mut damage = OutputDamage::new();

        let first = build(&scene.frame(), &outputs, &mut damage);
        assert_eq!(first.outputs[0].damage, DamageRegion::Full);

        scene.apply(2, LayerState::new().position(50.0, 50.0));
        let second = build(&scene.frame(), &outputs, &mut damage);
        let bounds = second.outputs[0]
            .damage
            .bounds(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(bounds, Some(Rect::new(0.0, 0.0, 60.0, 60.0)));

        let third = build(&scene.frame(), &outputs, &mut damage);
        assert!(third.outputs[0].damage.is_empty());
        assert_eq!(third.outputs[0].plan.items.len(), 2);
    }
}
