// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client-facing completion contract.
//!
//! Clients learn the fate of a transaction only through a
//! [`TransactionListener`]: every listener registration on a transaction is
//! answered exactly once, whether the transaction was applied or dropped.
//! Listeners are called on the main thread and must not block.

use std::sync::Arc;

use core::fmt;

use crate::fence::Fence;
use crate::id::{BufferId, CallbackId, LayerId, ListenerId, TransactionId};
use crate::time::HostTime;

/// Which phase a listener registration waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Fires once the transaction's effects are committed to the scene.
    OnCommit,
    /// Fires once the frame containing the transaction has been presented.
    OnComplete,
}

/// Why a transaction was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Every layer the transaction touched is gone.
    LayerDestroyed,
    /// Every buffer the transaction carried was older than its layer's
    /// barrier.
    StaleBuffers,
    /// The compositor shut down with the transaction still queued.
    Shutdown,
}

/// Outcome reported to a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackStatus {
    /// The transaction was applied.
    Applied,
    /// The transaction was dropped.
    Dropped(DropReason),
}

/// Per-layer details of an applied transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceStats {
    /// Layer that latched a buffer.
    pub layer: LayerId,
    /// Frame number of the latched buffer.
    pub frame_number: u64,
    /// When the buffer's acquire fence signaled, if known at latch time.
    pub acquire_time: Option<HostTime>,
}

/// What a listener receives.
#[derive(Clone, Debug)]
pub struct TransactionStats {
    /// The transaction this reports on.
    pub transaction_id: TransactionId,
    /// Transactions the client merged into this one.
    pub merged_ids: Vec<TransactionId>,
    /// Callback ids the client registered with this listener.
    pub callback_ids: Vec<CallbackId>,
    /// Applied or dropped.
    pub status: CallbackStatus,
    /// When the transaction was latched, if it was.
    pub latch_time: Option<HostTime>,
    /// Present fence of the frame that showed the transaction (on-complete
    /// only).
    pub present_fence: Option<Fence>,
    /// Per-layer buffer details.
    pub surfaces: Vec<SurfaceStats>,
}

/// Why a buffer was handed back to its producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReleaseReason {
    /// A newer buffer replaced it and that frame has been presented.
    Replaced,
    /// It was older than the layer's barrier and never latched.
    Stale,
    /// Its layer was destroyed.
    LayerDestroyed,
    /// The transaction carrying it was dropped.
    Dropped,
}

/// A buffer returned to its producer.
#[derive(Clone, Debug)]
pub struct BufferRelease {
    /// Layer the buffer was sent to.
    pub layer: LayerId,
    /// The buffer.
    pub buffer: BufferId,
    /// Its frame number.
    pub frame_number: u64,
    /// Signals when the compositor stopped reading the buffer.
    pub release_fence: Option<Fence>,
    /// Why it was released.
    pub reason: ReleaseReason,
}

/// Receives transaction outcomes and buffer releases.
pub trait TransactionListener: Send + Sync {
    /// Identity used to batch callbacks for one listener.
    fn id(&self) -> ListenerId;

    /// The transaction was committed (or dropped).
    fn on_commit(&self, stats: &TransactionStats) {
        _ = stats;
    }

    /// The transaction was presented (or dropped).
    fn on_complete(&self, stats: &TransactionStats) {
        _ = stats;
    }

    /// A buffer is no longer used by the compositor.
    fn on_buffer_released(&self, release: &BufferRelease) {
        _ = release;
    }

    /// A buffer's acquire fence has been pending for longer than the stall
    /// window. Reported once per transaction.
    fn on_buffer_stall(&self, transaction: TransactionId, layer: LayerId) {
        _ = (transaction, layer);
    }
}

/// Shared listener handle.
pub type ListenerHandle = Arc<dyn TransactionListener>;

/// One listener registration carried by a transaction.
#[derive(Clone)]
pub struct ListenerCallbacks {
    /// Who to notify.
    pub listener: ListenerHandle,
    /// Client callback ids to echo back.
    pub callback_ids: Vec<CallbackId>,
    /// Which phase to notify on.
    pub kind: CallbackKind,
}

impl fmt::Debug for ListenerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerCallbacks")
            .field("listener", &self.listener.id())
            .field("callback_ids", &self.callback_ids)
            .field("kind", &self.kind)
            .finish()
    }
}
