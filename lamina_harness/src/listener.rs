// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;

use lamina_core::id::{LayerId, ListenerId, TransactionId};
use lamina_core::listener::{BufferRelease, CallbackStatus, TransactionListener, TransactionStats};
use parking_lot::Mutex;

/// A callback received by a [`RecordingListener`].
#[derive(Clone, Debug)]
pub enum ListenerEvent {
    /// `on_commit`.
    Commit(TransactionStats),
    /// `on_complete`.
    Complete(TransactionStats),
    /// `on_buffer_released`.
    Released(BufferRelease),
    /// `on_buffer_stall`.
    Stall {
        /// Transaction holding the buffer.
        transaction: TransactionId,
        /// Layer the buffer was for.
        layer: LayerId,
    },
}

/// Keeps every callback it receives, in order.
#[derive(Debug)]
pub struct RecordingListener {
    id: ListenerId,
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    /// A shared listener with identity `id`.
    #[must_use]
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: ListenerId(id),
            events: Mutex::new(Vec::new()),
        })
    }

    /// Every event so far.
    #[must_use]
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }

    /// Transactions reported committed, in callback order.
    #[must_use]
    pub fn committed(&self) -> Vec<TransactionId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ListenerEvent::Commit(s) => Some(s.transaction_id),
                _ => None,
            })
            .collect()
    }

    /// On-complete stats, in callback order.
    #[must_use]
    pub fn completed(&self) -> Vec<TransactionStats> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ListenerEvent::Complete(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// Buffer releases, in callback order.
    #[must_use]
    pub fn releases(&self) -> Vec<BufferRelease> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ListenerEvent::Released(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// Status each transaction was last reported with.
    #[must_use]
    pub fn status_of(&self, transaction: TransactionId) -> Option<CallbackStatus> {
        self.events.lock().iter().rev().find_map(|e| match e {
            ListenerEvent::Commit(s) | ListenerEvent::Complete(s)
                if s.transaction_id == transaction =>
            {
                Some(s.status)
            }
            _ => None,
        })
    }

    /// Forgets everything received so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TransactionListener for RecordingListener {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn on_commit(&self, stats: &TransactionStats) {
        self.events.lock().push(ListenerEvent::Commit(stats.clone()));
    }

    fn on_complete(&self, stats: &TransactionStats) {
        self.events.lock().push(ListenerEvent::Complete(stats.clone()));
    }

    fn on_buffer_released(&self, release: &BufferRelease) {
        self.events.lock().push(ListenerEvent::Released(release.clone()));
    }

    fn on_buffer_stall(&self, transaction: TransactionId, layer: LayerId) {
        self.events
            .lock()
            .push(ListenerEvent::Stall { transaction, layer });
    }
}
