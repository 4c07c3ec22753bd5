// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred listener notifications.
//!
//! [`TransactionCallbackInvoker`] collects the answers owed to listeners
//! while a frame is committed and sends them at two points:
//!
//! 1. [`send_commit_callbacks`](TransactionCallbackInvoker::send_commit_callbacks)
//!    at the end of commit: every on-commit registration.
//! 2. [`send_complete_callbacks`](TransactionCallbackInvoker::send_complete_callbacks)
//!    after composition: every on-complete registration, with the frame's
//!    present fence, followed by the buffers that frame replaced.
//!
//! On-commit always precedes on-complete for the same transaction.

use tracing::trace;

use crate::fence::Fence;
use crate::id::TransactionId;
use crate::layer::ReplacedBuffer;
use crate::listener::{
    CallbackKind, CallbackStatus, DropReason, ListenerHandle, ReleaseReason, SurfaceStats,
    TransactionStats,
};
use crate::time::HostTime;

use super::state::TransactionState;

struct Pending {
    listener: ListenerHandle,
    stats: TransactionStats,
}

/// Collects and sends transaction callbacks and buffer releases.
#[derive(Default)]
pub struct TransactionCallbackInvoker {
    on_commit: Vec<Pending>,
    on_complete: Vec<Pending>,
    replaced: Vec<ReplacedBuffer>,
}

impl core::fmt::Debug for TransactionCallbackInvoker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionCallbackInvoker")
            .field("on_commit", &self.on_commit.len())
            .field("on_complete", &self.on_complete.len())
            .field("replaced", &self.replaced.len())
            .finish()
    }
}

impl TransactionCallbackInvoker {
    /// Creates an empty invoker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the answers owed for an applied transaction.
    ///
    /// `surfaces` holds the buffer latches of this commit; entries for other
    /// transactions are ignored.
    pub fn add_applied(
        &mut self,
        transaction: &TransactionState,
        latch_time: HostTime,
        surfaces: &[(TransactionId, SurfaceStats)],
    ) {
        let surfaces: Vec<_> = surfaces
            .iter()
            .filter(|(id, _)| *id == transaction.id)
            .map(|(_, s)| s.clone())
            .collect();
        self.add(
            transaction,
            CallbackStatus::Applied,
            Some(latch_time),
            &surfaces,
        );
    }

    /// Records the answers owed for a dropped transaction.
    ///
    /// Buffers the transaction carried are released immediately.
    pub fn add_dropped(&mut self, transaction: &TransactionState, reason: DropReason) {
        for composer in &transaction.states {
            if let Some(buffer) = &composer.state.buffer {
                buffer.release(composer.layer_id, ReleaseReason::Dropped, None);
            }
        }
        self.add(transaction, CallbackStatus::Dropped(reason), None, &[]);
    }

    fn add(
        &mut self,
        transaction: &TransactionState,
        status: CallbackStatus,
        latch_time: Option<HostTime>,
        surfaces: &[SurfaceStats],
    ) {
        for registration in &transaction.listener_callbacks {
            let pending = Pending {
                listener: registration.listener.clone(),
                stats: TransactionStats {
                    transaction_id: transaction.id,
                    merged_ids: transaction.merged_ids.clone(),
                    callback_ids: registration.callback_ids.clone(),
                    status,
                    latch_time,
                    present_fence: None,
                    surfaces: surfaces.to_vec(),
                },
            };
            match registration.kind {
                CallbackKind::OnCommit => self.on_commit.push(pending),
                CallbackKind::OnComplete => self.on_complete.push(pending),
            }
        }
    }

    /// Holds replaced buffers until the frame that replaced them presents.
    pub fn add_replaced(&mut self, replaced: impl IntoIterator<Item = ReplacedBuffer>) {
        self.replaced.extend(replaced);
    }

    /// Sends every queued on-commit callback.
    pub fn send_commit_callbacks(&mut self) {
        for pending in self.on_commit.drain(..) {
            trace!(transaction = ?pending.stats.transaction_id, "on commit");
            pending.listener.on_commit(&pending.stats);
        }
    }

    /// Sends every queued on-complete callback with `present_fence`, then
    /// releases replaced buffers behind the same fence.
    ///
    /// Any on-commit callbacks still queued are sent first.
    pub fn send_complete_callbacks(&mut self, present_fence: Option<&Fence>) {
        self.send_commit_callbacks();
        for mut pending in self.on_complete.drain(..) {
            if pending.stats.status == CallbackStatus::Applied {
                pending.stats.present_fence = present_fence.cloned();
            }
            trace!(transaction = ?pending.stats.transaction_id, "on complete");
            pending.listener.on_complete(&pending.stats);
        }
        for replaced in self.replaced.drain(..) {
            replaced
                .buffer
                .release(replaced.layer, ReleaseReason::Replaced, present_fence.cloned());
        }
    }

    /// Whether nothing is owed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.on_commit.is_empty() && self.on_complete.is_empty() && self.replaced.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::id::{ApplyToken, BufferId, CallbackId, LayerId, ListenerId};
    use crate::layer::{BufferData, LayerState};
    use crate::listener::{BufferRelease, TransactionListener};

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl TransactionListener for Log {
        fn id(&self) -> ListenerId {
            ListenerId(3)
        }

        fn on_commit(&self, stats: &TransactionStats) {
            self.0
                .lock()
                .push(format!("commit {} {:?}", stats.transaction_id.0, stats.status));
        }

        fn on_complete(&self, stats: &TransactionStats) {
            self.0.lock().push(format!(
                "complete {} fence={}",
                stats.transaction_id.0,
                stats.present_fence.is_some()
            ));
        }

        fn on_buffer_released(&self, release: &BufferRelease) {
            self.0.lock().push(format!(
                "release {} {:?} fence={}",
                release.buffer.0,
                release.reason,
                release.release_fence.is_some()
            ));
        }
    }

    fn registered(id: u64, log: &Arc<Log>) -> TransactionState {
        TransactionState::new(TransactionId(id), ApplyToken(0))
            .listener(log.clone(), CallbackKind::OnComplete, vec![CallbackId(1)])
            .listener(log.clone(), CallbackKind::OnCommit, vec![CallbackId(2)])
    }

    #[test]
    fn commit_precedes_complete_and_release() {
        let log = Arc::new(Log::default());
        let mut invoker = TransactionCallbackInvoker::new();
        let txn = registered(1, &log);
        invoker.add_applied(&txn, HostTime(5), &[]);
        invoker.add_replaced([ReplacedBuffer {
            layer: LayerId(1),
            buffer: BufferData::new(BufferId(9), 1, 1).with_release_listener(log.clone()),
        }]);
        invoker.send_commit_callbacks();
        assert_eq!(*log.0.lock(), vec!["commit 1 Applied"]);

        let fence = Fence::signaled(HostTime(10));
        invoker.send_complete_callbacks(Some(&fence));
        assert_eq!(
            *log.0.lock(),
            vec![
                "commit 1 Applied",
                "complete 1 fence=true",
                "release 9 Replaced fence=true",
            ]
        );
        assert!(invoker.is_empty());
    }

    #[test]
    fn dropped_transaction_answers_every_registration() {
        let log = Arc::new(Log::default());
        let mut invoker = TransactionCallbackInvoker::new();
        let txn = registered(4, &log).layer(
            LayerId(1),
            LayerState::new()
                .buffer(Some(BufferData::new(BufferId(7), 1, 1).with_release_listener(log.clone()))),
        );
        invoker.add_dropped(&txn, DropReason::LayerDestroyed);
        invoker.send_complete_callbacks(None);
        assert_eq!(
            *log.0.lock(),
            vec![
                "release 7 Dropped fence=false",
                "commit 4 Dropped(LayerDestroyed)",
                "complete 4 fence=false",
            ]
        );
    }

    #[test]
    fn surfaces_are_filtered_per_transaction() {
        #[derive(Default)]
        struct Surfaces(Mutex<Vec<usize>>);
        impl TransactionListener for Surfaces {
            fn id(&self) -> ListenerId {
                ListenerId(5)
            }
            fn on_commit(&self, stats: &TransactionStats) {
                self.0.lock().push(stats.surfaces.len());
            }
        }

        let listener = Arc::new(Surfaces::default());
        let mut invoker = TransactionCallbackInvoker::new();
        let txn = TransactionState::new(TransactionId(2), ApplyToken(0)).listener(
            listener.clone(),
            CallbackKind::OnCommit,
            Vec::new(),
        );
        let stats = |layer| SurfaceStats {
            layer: LayerId(layer),
            frame_number: 1,
            acquire_time: None,
        };
        invoker.add_applied(
            &txn,
            HostTime(0),
            &[
                (TransactionId(1), stats(1)),
                (TransactionId(2), stats(2)),
                (TransactionId(2), stats(3)),
            ],
        );
        invoker.send_commit_callbacks();
        assert_eq!(*listener.0.lock(), vec![2]);
    }
}
