// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client transactions.

use bitflags::bitflags;

use crate::display::DisplayState;
use crate::id::{ApplyToken, CallbackId, LayerId, TransactionId, VsyncId};
use crate::layer::LayerState;
use crate::listener::{CallbackKind, ListenerCallbacks, ListenerHandle};
use crate::time::HostTime;

bitflags! {
    /// Transaction-wide flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TransactionFlags: u32 {
        /// Part of an animation; touched layers are marked as animating.
        const ANIMATION = 1 << 0;
        /// Ask the scheduler to wake early for the coming frames.
        const EARLY_WAKEUP_START = 1 << 1;
        /// End an early-wakeup period.
        const EARLY_WAKEUP_END = 1 << 2;
    }
}

/// One layer delta inside a transaction.
#[derive(Clone, Debug)]
pub struct ComposerState {
    /// Target layer.
    pub layer_id: LayerId,
    /// The delta.
    pub state: LayerState,
}

/// An atomic batch of layer and display deltas.
///
/// A transaction is applied at most once. Whether it is applied or dropped,
/// every listener registration it carries is answered exactly once.
#[derive(Clone, Debug)]
pub struct TransactionState {
    /// Unique id, increasing in submission order.
    pub id: TransactionId,
    /// Ordering domain: transactions sharing a token apply in order.
    pub apply_token: ApplyToken,
    /// Layer deltas, applied in order.
    pub states: Vec<ComposerState>,
    /// Display deltas.
    pub display_states: Vec<DisplayState>,
    /// Transaction-wide flags.
    pub flags: TransactionFlags,
    /// Earliest present time; `None` applies at the next frame.
    pub desired_present_time: Option<HostTime>,
    /// Frame timeline the client targeted, if any.
    pub vsync_id: VsyncId,
    /// When the client submitted the transaction.
    pub post_time: HostTime,
    /// Submitting process.
    pub origin_pid: u32,
    /// Submitting user.
    pub origin_uid: u32,
    /// Listener registrations.
    pub listener_callbacks: Vec<ListenerCallbacks>,
    /// Transactions merged into this one on the client.
    pub merged_ids: Vec<TransactionId>,
    /// A buffer-stall report was already sent for this transaction.
    pub sent_fence_timeout_warning: bool,
}

impl TransactionState {
    /// An empty transaction.
    #[must_use]
    pub fn new(id: TransactionId, apply_token: ApplyToken) -> Self {
        Self {
            id,
            apply_token,
            states: Vec::new(),
            display_states: Vec::new(),
            flags: TransactionFlags::empty(),
            desired_present_time: None,
            vsync_id: VsyncId::INVALID,
            post_time: HostTime(0),
            origin_pid: 0,
            origin_uid: 0,
            listener_callbacks: Vec::new(),
            merged_ids: Vec::new(),
            sent_fence_timeout_warning: false,
        }
    }

    /// Adds a layer delta.
    #[must_use]
    pub fn layer(mut self, layer_id: LayerId, state: LayerState) -> Self {
        self.states.push(ComposerState { layer_id, state });
        self
    }

    /// Adds a display delta.
    #[must_use]
    pub fn display(mut self, state: DisplayState) -> Self {
        self.display_states.push(state);
        self
    }

    /// Sets an explicit desired present time.
    #[must_use]
    pub fn desired_present(mut self, time: HostTime) -> Self {
        self.desired_present_time = Some(time);
        self
    }

    /// Targets a frame timeline.
    #[must_use]
    pub fn vsync(mut self, vsync_id: VsyncId) -> Self {
        self.vsync_id = vsync_id;
        self
    }

    /// Sets transaction-wide flags.
    #[must_use]
    pub fn flags(mut self, flags: TransactionFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Records the submitting process.
    #[must_use]
    pub fn origin(mut self, pid: u32, uid: u32) -> Self {
        self.origin_pid = pid;
        self.origin_uid = uid;
        self
    }

    /// Registers a listener for `kind`.
    #[must_use]
    pub fn listener(
        mut self,
        listener: ListenerHandle,
        kind: CallbackKind,
        callback_ids: Vec<CallbackId>,
    ) -> Self {
        self.listener_callbacks.push(ListenerCallbacks {
            listener,
            callback_ids,
            kind,
        });
        self
    }

    /// Folds `other` into this transaction, as a client merge does.
    ///
    /// `other`'s deltas apply after this transaction's and its id is recorded
    /// in [`merged_ids`](Self::merged_ids).
    pub fn merge(&mut self, other: Self) {
        self.states.extend(other.states);
        self.display_states.extend(other.display_states);
        self.listener_callbacks.extend(other.listener_callbacks);
        self.flags |= other.flags;
        self.merged_ids.push(other.id);
        self.merged_ids.extend(other.merged_ids);
        if other.desired_present_time > self.desired_present_time {
            self.desired_present_time = other.desired_present_time;
        }
        if other.vsync_id.is_valid() {
            self.vsync_id = other.vsync_id;
        }
    }

    /// The transaction has no explicit desired present time.
    #[must_use]
    pub fn is_auto_timestamp(&self) -> bool {
        self.desired_present_time.is_none()
    }

    /// Number of buffers the transaction carries.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.states.iter().filter(|s| s.state.has_buffer()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_appends_and_records_ids() {
        let mut a = TransactionState::new(TransactionId(1), ApplyToken(1))
            .layer(LayerId(0), LayerState::new().z(1));
        let b = TransactionState::new(TransactionId(2), ApplyToken(1))
            .layer(LayerId(0), LayerState::new().z(2))
            .desired_present(HostTime(500))
            .flags(TransactionFlags::ANIMATION);
        a.merge(b);
        assert_eq!(a.states.len(), 2);
        assert_eq!(a.states[1].state.z, 2);
        assert_eq!(a.merged_ids, vec![TransactionId(2)]);
        assert_eq!(a.desired_present_time, Some(HostTime(500)));
        assert!(a.flags.contains(TransactionFlags::ANIMATION));
        assert!(!a.is_auto_timestamp());
    }
}
