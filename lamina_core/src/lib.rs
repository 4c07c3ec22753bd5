// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Data model and single-threaded algorithms of a vsync-driven display
//! compositor.
//!
//! `lamina_core` turns client transactions into an immutable, ordered set of
//! layer snapshots once per frame, and decides when frames happen. It does
//! no rendering; `lamina_render` and `lamina_compositor` build on it.
//!
//! # Architecture
//!
//! ```text
//!   clients ──► TransactionSender ──► TransactionQueue
//!                                          │ flush (readiness filters)
//!                                          ▼
//!   HAL vsync ──► FrameScheduler ──► FrameTarget ──► commit
//!                                          │
//!             ┌────────────────────────────┘
//!             ▼
//!   LayerLifecycleManager ──► LayerHierarchy ──► LayerSnapshotBuilder
//!             │                                        │
//!             ▼                                        ▼
//!   TransactionCallbackInvoker                   SnapshotSet ──► composite
//! ```
//!
//! **[`transaction`]**: per-apply-token FIFO queue fed from any thread,
//! readiness filters run on the main thread, and the callback invoker that
//! answers every listener exactly once.
//!
//! **[`layer`]**: requested layer state, lifecycle, the arena-backed
//! hierarchy with relative-z and mirror edges, and the snapshot builder.
//!
//! **[`dirty`]**: multi-channel dirty tracking via `understory_dirty`.
//!
//! **[`scheduler`]**: vsync model and tokens, the frame scheduler state
//! machine and frame statistics.
//!
//! **[`timing`]**: per-frame timing records and present-fence history.
//!
//! **[`display`]**: display state generations and the mode switch
//! controller.
//!
//! **[`hal`]**: the hardware composer trait and its event channel.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! frame instrumentation, with the zero-overhead [`Tracer`](trace::Tracer)
//! wrapper.
//!
//! # Threading
//!
//! Everything here is owned by one main thread, except the ingress types
//! ([`TransactionSender`](transaction::TransactionSender),
//! [`HalEventSender`](hal::HalEventSender),
//! [`LayerIdAllocator`](id::LayerIdAllocator)) which any thread may use.
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one
//!   branch per call site).

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod config;
pub mod dirty;
pub mod display;
pub mod error;
pub mod fence;
pub mod hal;
pub mod id;
pub mod layer;
pub mod listener;
pub mod scheduler;
pub mod time;
pub mod timing;
pub mod trace;
pub mod transaction;
