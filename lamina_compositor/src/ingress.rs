// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client-facing handles.
//!
//! A [`ClientHandle`] is what the IPC layer holds per client. Every call
//! returns immediately: layer ids and transaction ids are allocated on the
//! calling thread, and the work itself is handed to the main thread, which
//! picks it up at the next commit.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc;

use lamina_core::error::IngressError;
use lamina_core::id::{ApplyToken, LayerId, LayerIdAllocator, TransactionIdAllocator};
use lamina_core::layer::LayerCreationArgs;
use lamina_core::transaction::{TransactionSender, TransactionState, WakeHook};
use parking_lot::Mutex;
use tracing::trace;

/// A layer lifecycle request from a client thread.
#[derive(Clone, Debug)]
pub enum LayerRequest {
    /// Create a layer.
    Create(LayerCreationArgs),
    /// The client released its handle to a layer.
    DestroyHandle(LayerId),
}

/// Main-thread end of the layer request channel.
pub(crate) struct LayerRequestQueue {
    tx: mpsc::Sender<LayerRequest>,
    rx: mpsc::Receiver<LayerRequest>,
    wake: Arc<Mutex<Option<WakeHook>>>,
}

impl fmt::Debug for LayerRequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerRequestQueue").finish_non_exhaustive()
    }
}

impl LayerRequestQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            wake: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn set_wake_hook(&self, hook: WakeHook) {
        *self.wake.lock() = Some(hook);
    }

    /// Requests in arrival order.
    pub(crate) fn drain(&self) -> Vec<LayerRequest> {
        self.rx.try_iter().collect()
    }
}

/// Per-client ingress: layer creation and destruction, transactions.
///
/// Cloning is cheap; clones share allocators and channels.
#[derive(Clone)]
pub struct ClientHandle {
    layer_ids: Arc<LayerIdAllocator>,
    transaction_ids: Arc<TransactionIdAllocator>,
    transactions: TransactionSender,
    layers: mpsc::Sender<LayerRequest>,
    wake: Arc<Mutex<Option<WakeHook>>>,
    pid: u32,
    uid: u32,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("pid", &self.pid)
            .field("uid", &self.uid)
            .finish_non_exhaustive()
    }
}

impl ClientHandle {
    pub(crate) fn new(
        layer_ids: Arc<LayerIdAllocator>,
        transaction_ids: Arc<TransactionIdAllocator>,
        transactions: TransactionSender,
        layers: &LayerRequestQueue,
    ) -> Self {
        Self {
            layer_ids,
            transaction_ids,
            transactions,
            layers: layers.tx.clone(),
            wake: Arc::clone(&layers.wake),
            pid: 0,
            uid: 0,
        }
    }

    /// The same handle, stamping transactions with a client identity.
    #[must_use]
    pub fn with_origin(mut self, pid: u32, uid: u32) -> Self {
        self.pid = pid;
        self.uid = uid;
        self
    }

    /// Creates a layer named `name`, optionally under `parent`.
    ///
    /// # Errors
    ///
    /// Fails once the compositor has shut down.
    pub fn create_layer(&self, name: &str, parent: Option<LayerId>) -> Result<LayerId, IngressError> {
        self.create_layer_with(|id| {
            let args = LayerCreationArgs::new(id, name);
            match parent {
                Some(parent) => args.with_parent(parent),
                None => args,
            }
        })
    }

    /// Creates a layer from arguments built around a fresh id.
    ///
    /// # Errors
    ///
    /// Fails once the compositor has shut down.
    pub fn create_layer_with(
        &self,
        build: impl FnOnce(LayerId) -> LayerCreationArgs,
    ) -> Result<LayerId, IngressError> {
        let id = self.layer_ids.allocate();
        let mut args = build(id);
        args.id = id;
        args.owner_uid = self.uid;
        self.send(LayerRequest::Create(args))?;
        trace!(layer = ?id, "layer creation queued");
        Ok(id)
    }

    /// Releases the client's handle to `layer`. The layer is destroyed at
    /// the next commit unless it still has a parent.
    ///
    /// # Errors
    ///
    /// Fails once the compositor has shut down.
    pub fn destroy_handle(&self, layer: LayerId) -> Result<(), IngressError> {
        self.send(LayerRequest::DestroyHandle(layer))
    }

    /// An empty transaction with a fresh id and this client's origin.
    #[must_use]
    pub fn transaction(&self, token: ApplyToken) -> TransactionState {
        TransactionState::new(self.transaction_ids.allocate(), token).origin(self.pid, self.uid)
    }

    /// Submits a transaction.
    ///
    /// Outcomes are reported through the transaction's listeners, never
    /// here.
    ///
    /// # Errors
    ///
    /// Fails once the compositor has shut down.
    pub fn apply(&self, transaction: TransactionState) -> Result<(), IngressError> {
        self.transactions.queue(transaction)
    }

    fn send(&self, request: LayerRequest) -> Result<(), IngressError> {
        self.layers
            .send(request)
            .map_err(|_| IngressError("layer requests"))?;
        let wake = self.wake.lock().clone();
        if let Some(wake) = wake {
            wake();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lamina_core::transaction::TransactionQueue;

    use super::*;

    fn handle(queue: &TransactionQueue, layers: &LayerRequestQueue) -> ClientHandle {
        ClientHandle::new(
            Arc::new(LayerIdAllocator::new()),
            Arc::new(TransactionIdAllocator::new()),
            queue.sender(),
            layers,
        )
    }

    #[test]
    fn layer_requests_keep_order_across_threads() {
        let queue = TransactionQueue::new();
        let layers = LayerRequestQueue::new();
        let client = handle(&queue, &layers).with_origin(10, 20);

        let parent = client.create_layer("parent", None);
        let other = client.clone();
        let child = std::thread::spawn(move || other.create_layer("child", parent.ok()))
            .join()
            .ok();
        let Some(Ok(child)) = child else {
            panic!("queue is alive");
        };
        assert!(client.destroy_handle(child).is_ok());

        let drained = layers.drain();
        assert_eq!(drained.len(), 3);
        let LayerRequest::Create(args) = &drained[1] else {
            panic!("expected a creation");
        };
        assert_eq!(args.id, child);
        assert_eq!(parent.ok(), Some(args.parent_id));
        assert_eq!(args.owner_uid, 20);
        assert!(matches!(drained[2], LayerRequest::DestroyHandle(id) if id == child));
    }

    #[test]
    fn transactions_get_fresh_ids_and_origin() {
        let queue = TransactionQueue::new();
        let layers = LayerRequestQueue::new();
        let client = handle(&queue, &layers).with_origin(7, 8);
        let a = client.transaction(ApplyToken(1));
        let b = client.transaction(ApplyToken(1));
        assert_ne!(a.id, b.id);
        assert_eq!((a.origin_pid, a.origin_uid), (7, 8));
        assert!(client.apply(a).is_ok());
        assert!(queue.has_pending());
    }
}
