// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Spatial damage tracking for partial re-rendering.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use kurbo::Rect;
use lamina_core::id::DisplayId;
use lamina_core::layer::{SnapshotSet, TraversalPath};

use crate::plan::RenderPlan;

/// A region of an output that needs re-rendering.
///
/// The composition engine can use this to redraw only areas that changed
/// since the output's previous frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum DamageRegion {
    /// The entire output needs redrawing.
    #[default]
    Full,
    /// Screen-space rectangles that need redrawing.
    Rects(Vec<Rect>),
    /// Nothing changed; the previous frame can be reused.
    None,
}

impl DamageRegion {
    /// Returns `true` if no region needs redrawing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Adds one rectangle. Empty rectangles are ignored.
    pub fn add(&mut self, rect: Rect) {
        if rect.is_zero_area() {
            return;
        }
        match self {
            Self::Full => {}
            Self::Rects(rects) => rects.push(rect),
            Self::None => *self = Self::Rects(vec![rect]),
        }
    }

    /// Merges another damage region into this one.
    pub fn merge(&mut self, other: &Self) {
        match (&*self, other) {
            (Self::Full, _) | (_, Self::Full) => *self = Self::Full,
            (Self::None, _) => *self = other.clone(),
            (_, Self::None) => {}
            (Self::Rects(a), Self::Rects(b)) => {
                let mut merged = a.clone();
                merged.extend_from_slice(b);
                *self = Self::Rects(merged);
            }
        }
    }

    /// Clips every rectangle to `bounds`; `Full` stays `Full`.
    pub fn clip_to(&mut self, bounds: Rect) {
        if let Self::Rects(rects) = self {
            rects.retain_mut(|r| {
                *r = r.intersect(bounds);
                !r.is_zero_area()
            });
            if rects.is_empty() {
                *self = Self::None;
            }
        }
    }

    /// Union of the damaged area, or `full` for [`Full`](Self::Full).
    #[must_use]
    pub fn bounds(&self, full: Rect) -> Option<Rect> {
        match self {
            Self::Full => Some(full),
            Self::Rects(rects) => rects.iter().copied().reduce(|a, b| a.union(b)),
            Self::None => None,
        }
    }
}

/// Remembers what one output showed last frame and diffs the next plan
/// against it.
#[derive(Clone, Debug, Default)]
pub struct DamageTracker {
    shown: HashMap<TraversalPath, Shown>,
    initialized: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Shown {
    bounds: Rect,
    frame_number: u64,
    alpha: f32,
}

impl DamageTracker {
    /// Creates a tracker whose first frame is fully damaged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the previous frame so the next one is fully damaged.
    pub fn invalidate(&mut self) {
        self.shown.clear();
        self.initialized = false;
    }

    /// Damage between the previous frame and `plan`, clipped to the plan's
    /// output bounds. `updated` lists paths whose snapshot changed in ways
    /// the tracker cannot see (content, color, blending).
    pub fn compute<'a>(
        &mut self,
        plan: &RenderPlan,
        updated: impl IntoIterator<Item = &'a TraversalPath>,
    ) -> DamageRegion {
        let mut next = HashMap::with_capacity(plan.items.len());
        for item in &plan.items {
            next.insert(
                item.path.clone(),
                Shown {
                    bounds: item.bounds,
                    frame_number: item.frame_number,
                    alpha: item.alpha,
                },
            );
        }
        if !self.initialized {
            self.shown = next;
            self.initialized = true;
            return DamageRegion::Full;
        }

        let mut damage = DamageRegion::None;
        for (path, now) in &next {
            match self.shown.get(path) {
                Some(before) if before == now => {}
                Some(before) => {
                    damage.add(before.bounds);
                    damage.add(now.bounds);
                }
                None => damage.add(now.bounds),
            }
        }
        for (path, before) in &self.shown {
            if !next.contains_key(path) {
                damage.add(before.bounds);
            }
        }
        for path in updated {
            if let Some(now) = next.get(path) {
                damage.add(now.bounds);
            }
        }
        damage.clip_to(plan.bounds);
        self.shown = next;
        damage
    }
}

/// Damage trackers of every output, plus the snapshot set they last saw.
#[derive(Debug, Default)]
pub struct OutputDamage {
    trackers: HashMap<DisplayId, DamageTracker>,
    last_set: Weak<SnapshotSet>,
}

impl OutputDamage {
    /// Creates empty state; every output's first frame is fully damaged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths whose snapshot changed since the set seen last time. A set that
    /// was already seen contributes nothing.
    pub(crate) fn updated_paths(&mut self, snapshots: &Arc<SnapshotSet>) -> Vec<TraversalPath> {
        let seen = self
            .last_set
            .upgrade()
            .is_some_and(|last| Arc::ptr_eq(&last, snapshots));
        self.last_set = Arc::downgrade(snapshots);
        if seen {
            return Vec::new();
        }
        snapshots
            .updated
            .iter()
            .map(|&i| snapshots.shared(i).path.clone())
            .collect()
    }

    pub(crate) fn tracker(&mut self, display: DisplayId) -> &mut DamageTracker {
        self.trackers.entry(display).or_default()
    }

    /// Drops trackers of displays `keep` rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(DisplayId) -> bool) {
        self.trackers.retain(|display, _| keep(*display));
    }

    /// Makes the next frame of `display` fully damaged.
    pub fn invalidate(&mut self, display: DisplayId) {
        if let Some(tracker) = self.trackers.get_mut(&display) {
            tracker.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_full() {
        let mut a = DamageRegion::None;
        a.merge(&DamageRegion::Rects(vec![Rect::new(0.0, 0.0, 1.0, 1.0)]));
        assert_eq!(a, DamageRegion::Rects(vec![Rect::new(0.0, 0.0, 1.0, 1.0)]));
        a.merge(&DamageRegion::Full);
        assert_eq!(a, DamageRegion::Full);
        a.add(Rect::new(0.0, 0.0, 5.0, 5.0));
        assert_eq!(a, DamageRegion::Full);
    }

    #[test]
    fn clip_drops_outside_rects() {
        let mut d = DamageRegion::None;
        d.add(Rect::new(-10.0, -10.0, 5.0, 5.0));
        d.add(Rect::new(200.0, 200.0, 300.0, 300.0));
        d.clip_to(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(d, DamageRegion::Rects(vec![Rect::new(0.0, 0.0, 5.0, 5.0)]));
        d.clip_to(Rect::new(50.0, 50.0, 60.0, 60.0));
        assert!(d.is_empty());
    }

    #[test]
    fn bounds_unions_rects() {
        let full = Rect::new(0.0, 0.0, 100.0, 100.0);
        let mut d = DamageRegion::None;
        assert_eq!(d.bounds(full), None);
        d.add(Rect::new(0.0, 0.0, 10.0, 10.0));
        d.add(Rect::new(20.0, 20.0, 30.0, 30.0));
        assert_eq!(d.bounds(full), Some(Rect::new(0.0, 0.0, 30.0, 30.0)));
        assert_eq!(DamageRegion::Full.bounds(full), Some(full));
    }
}
