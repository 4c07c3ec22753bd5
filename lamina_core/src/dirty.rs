// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dirty-tracking channel constants for snapshot reuse.
//!
//! The snapshot builder keeps a [`DirtyTracker`](understory_dirty::DirtyTracker)
//! keyed by raw layer id. Each commit marks the layers whose requested state
//! changed on the channels below, then drains them while rebuilding.
//!
//! # Propagation semantics
//!
//! - **Propagating**: [`GEOMETRY`] and [`VISIBILITY`] are marked with
//!   [`EagerPolicy`](understory_dirty::EagerPolicy) and have child-to-parent
//!   dependency edges, since resolved transforms, alpha and hidden-by-policy
//!   are inherited.
//! - **Local-only**: [`CONTENT`] and [`METADATA`] only mark the layer that
//!   changed.
//!
//! A layer that appears in any drained channel gets a freshly computed
//! snapshot; every other snapshot is carried over from the previous set.

use understory_dirty::Channel;

/// Transform, crop, position or buffer size changed.
pub const GEOMETRY: Channel = Channel::new(0);

/// Flags, alpha or drawable content presence changed.
pub const VISIBILITY: Channel = Channel::new(1);

/// Buffer, color or dataspace changed.
pub const CONTENT: Channel = Channel::new(2);

/// Metadata or frame-rate vote changed.
pub const METADATA: Channel = Channel::new(3);
