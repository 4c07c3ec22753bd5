// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Render plan: the ordered draw items of one output for one frame.

use kurbo::{Affine, Rect};
use lamina_core::hal::{CompositionType, DeviceCompositionChanges, LayerComposition};
use lamina_core::id::{DisplayId, LayerId, LayerStack};
use lamina_core::layer::{
    BlendMode, Dataspace, LayerSnapshot, Rgb, SnapshotBuffer, SnapshotSet, TraversalPath,
};
use tracing::{debug, warn};

/// What one output shows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputConfig {
    /// Display.
    pub display: DisplayId,
    /// Layer stack shown.
    pub layer_stack: LayerStack,
    /// Output area in screen space.
    pub bounds: Rect,
    /// Built-in display; may show secure layers.
    pub internal: bool,
    /// Takes part in this frame's composite.
    pub enabled: bool,
}

/// A single draw command in the render plan.
///
/// Items are produced in back-to-front order, matching the snapshot set's
/// draw order.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderItem {
    /// Snapshot this item originates from.
    pub path: TraversalPath,
    /// Layer-to-screen transform.
    pub transform: Affine,
    /// Screen-space bounds, clipped to the output.
    pub bounds: Rect,
    /// Effective alpha.
    pub alpha: f32,
    /// Buffer to sample, if any.
    pub buffer: Option<SnapshotBuffer>,
    /// Frame number of the buffer, or 0.
    pub frame_number: u64,
    /// Solid fill, if any.
    pub color: Option<Rgb>,
    /// Buffer dataspace.
    pub dataspace: Dataspace,
    /// Blending.
    pub blend_mode: BlendMode,
    /// Background blur radius.
    pub background_blur_radius: u32,
    /// Who composes the item.
    pub composition: CompositionType,
}

impl RenderItem {
    fn from_snapshot(snapshot: &LayerSnapshot, bounds: Rect) -> Self {
        let composition = if snapshot.background_blur_radius > 0 {
            CompositionType::Client
        } else if snapshot.buffer.is_none() {
            CompositionType::SolidColor
        } else {
            CompositionType::Device
        };
        Self {
            path: snapshot.path.clone(),
            transform: snapshot.transform,
            bounds,
            alpha: snapshot.alpha,
            buffer: snapshot.buffer.clone(),
            frame_number: snapshot.frame_number,
            color: snapshot.color,
            dataspace: snapshot.dataspace,
            blend_mode: snapshot.blend_mode,
            background_blur_radius: snapshot.background_blur_radius,
            composition,
        }
    }

    /// Layer id.
    #[must_use]
    pub fn layer_id(&self) -> LayerId {
        self.path.id
    }
}

/// An ordered list of draw commands for a single frame on a single output.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderPlan {
    /// Target display.
    pub display: DisplayId,
    /// Output area in screen space.
    pub bounds: Rect,
    /// Draw items in back-to-front order.
    pub items: Vec<RenderItem>,
    /// Some item needs the composition engine.
    pub client_composition: bool,
    /// The HAL answer did not match the plan; repaint everything.
    pub force_full_damage: bool,
}

impl RenderPlan {
    /// Creates an empty render plan for `output`.
    #[must_use]
    pub fn new(output: &OutputConfig) -> Self {
        Self {
            display: output.display,
            bounds: output.bounds,
            items: Vec::new(),
            client_composition: false,
            force_full_damage: false,
        }
    }

    /// Collects the visible snapshots `output` may show.
    #[must_use]
    pub fn build(output: &OutputConfig, snapshots: &SnapshotSet) -> Self {
        let mut plan = Self::new(output);
        for snapshot in snapshots.visible() {
            if !snapshot
                .output_filter
                .accepts(output.layer_stack, output.internal)
            {
                continue;
            }
            let bounds = snapshot.transformed_bounds.intersect(output.bounds);
            if bounds.is_zero_area() {
                continue;
            }
            plan.items.push(RenderItem::from_snapshot(snapshot, bounds));
        }
        plan.client_composition = plan
            .items
            .iter()
            .any(|i| i.composition == CompositionType::Client);
        plan
    }

    /// Composition types to ask the HAL about.
    #[must_use]
    pub fn layer_compositions(&self) -> Vec<LayerComposition> {
        self.items
            .iter()
            .map(|i| LayerComposition {
                layer: i.layer_id(),
                composition: i.composition,
            })
            .collect()
    }

    /// Applies the HAL's composition changes.
    ///
    /// A change naming a layer that is not in the plan means the HAL and the
    /// plan disagree; the output is then fully repainted.
    pub fn apply_device_changes(&mut self, changes: &DeviceCompositionChanges) {
        for change in &changes.changed_types {
            let mut found = false;
            for item in self.items.iter_mut().filter(|i| i.layer_id() == change.layer) {
                item.composition = change.composition;
                found = true;
            }
            if !found {
                warn!(
                    display = ?self.display,
                    layer = ?change.layer,
                    "composition change for layer not in plan"
                );
                self.force_full_damage = true;
            }
        }
        self.client_composition = self
            .items
            .iter()
            .any(|i| i.composition == CompositionType::Client);
        debug!(
            display = ?self.display,
            client = self.client_composition,
            changed = changes.changed_types.len(),
            "device composition changes applied"
        );
    }

    /// Items the composition engine draws.
    pub fn client_items(&self) -> impl Iterator<Item = &RenderItem> {
        self.items
            .iter()
            .filter(|i| i.composition == CompositionType::Client)
    }

    /// Whether the plan draws nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use lamina_core::layer::{LayerFlags, LayerState};

    use super::*;
    use crate::testing::Scene;

    fn output(internal: bool) -> OutputConfig {
        OutputConfig {
            display: DisplayId::Physical(0),
            layer_stack: LayerStack(0),
            bounds: Rect::new(0.0, 0.0, 100.0, 100.0),
            internal,
            enabled: true,
        }
    }

    fn ids(plan: &RenderPlan) -> Vec<u32> {
        plan.items.iter().map(|i| i.layer_id().0).collect()
    }

    #[test]
    fn plan_filters_by_output() {
        let mut scene = Scene::new(&[1, 2, 3, 4]);
        scene.apply(2, LayerState::new().layer_stack(LayerStack(5)));
        scene.apply(3, LayerState::new().flags(LayerFlags::SECURE, LayerFlags::SECURE));
        scene.apply(
            4,
            LayerState::new().crop(Some(Rect::new(200.0, 200.0, 300.0, 300.0))),
        );
        let set = scene.frame();

        assert_eq!(ids(&RenderPlan::build(&output(true), &set)), vec![1, 3]);
        assert_eq!(ids(&RenderPlan::build(&output(false), &set)), vec![1]);
    }

    #[test]
    fn blur_needs_client_composition() {
        let mut scene = Scene::new(&[1, 2]);
        scene.apply(2, LayerState::new().background_blur(8));
        let plan = RenderPlan::build(&output(true), &scene.frame());
        assert!(plan.client_composition);
        assert_eq!(plan.client_items().count(), 1);
        assert_eq!(plan.items[0].composition, CompositionType::SolidColor);
    }

    #[test]
    fn device_changes_update_items() {
        let mut scene = Scene::new(&[1, 2]);
        let mut plan = RenderPlan::build(&output(true), &scene.frame());
        assert!(!plan.client_composition);

        plan.apply_device_changes(&DeviceCompositionChanges {
            changed_types: vec![LayerComposition {
                layer: LayerId(2),
                composition: CompositionType::Client,
            }],
        });
        assert!(plan.client_composition);
        assert!(!plan.force_full_damage);

        plan.apply_device_changes(&DeviceCompositionChanges {
            changed_types: vec![LayerComposition {
                layer: LayerId(77),
                composition: CompositionType::Device,
            }],
        });
        assert!(plan.force_full_damage, "unknown layer forces a full repaint");
    }
}
