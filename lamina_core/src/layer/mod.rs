// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layer front end.
//!
//! Three stages turn client deltas into the immutable scene composition
//! reads:
//!
//! - [`LayerLifecycleManager`] owns every [`RequestedLayerState`], applies
//!   transactions to it and accumulates change masks.
//! - [`LayerHierarchy`] derives the parent/child tree, with relative-z and
//!   mirror edges, in an arena addressed by integer indices. It is rebuilt
//!   only when a hierarchy change is flagged.
//! - [`LayerSnapshotBuilder`] flattens the tree into a [`SnapshotSet`] in
//!   draw order, reusing unchanged snapshots from the previous frame.
//!
//! The main thread owns all three; nothing here is shared across threads
//! except the finished [`SnapshotSet`], which is immutable.
//!
//! # Change channels
//!
//! Per-layer [`Changes`] bits drive the snapshot builder's dirty channels
//! (see [`dirty`](crate::dirty)):
//!
//! - **GEOMETRY** / **VISIBILITY**: propagate to children, relative
//!   children and mirrors.
//! - **CONTENT** / **METADATA**: local to the layer.

mod buffer;
mod builder;
mod hierarchy;
mod lifecycle;
mod snapshot;
mod state;

pub use buffer::BufferData;
pub use builder::{BuildArgs, LayerSnapshotBuilder, SnapshotScope};
pub use hierarchy::{LayerHierarchy, OFFSCREEN_ROOT, ROOT, TraversalPath, Variant};
pub use lifecycle::{ApplyResult, LayerLifecycleManager, ReplacedBuffer};
pub use snapshot::{
    BlendMode, LayerSnapshot, OutputFilter, Reachability, SnapshotBuffer, SnapshotSet,
};
pub use state::{
    Changes, Dataspace, FrameRateCompatibility, FrameRateVote, LayerCreationArgs, LayerFlags,
    LayerState, RequestedLayerState, Rgb, What, is_transform_valid,
};
