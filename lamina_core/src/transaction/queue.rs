// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pending transaction queues.
//!
//! Clients submit through a [`TransactionSender`] from any thread. The main
//! thread moves submissions into per-apply-token FIFOs with
//! [`TransactionQueue::collect`] and selects what to apply with
//! [`TransactionQueue::flush`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::IngressError;
use crate::id::ApplyToken;
use crate::listener::DropReason;

use super::filter::{FlushContext, TransactionFilter, TransactionReadiness, check_all, default_filters};
use super::state::TransactionState;

/// Called after every submission, typically to schedule a commit.
pub type WakeHook = Arc<dyn Fn() + Send + Sync>;

struct Ingress {
    incoming: Mutex<VecDeque<TransactionState>>,
    wake: Mutex<Option<WakeHook>>,
    closed: AtomicBool,
}

/// Cloneable submission handle.
#[derive(Clone)]
pub struct TransactionSender {
    ingress: Arc<Ingress>,
}

impl fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSender")
            .field("closed", &self.ingress.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl TransactionSender {
    /// Submits a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`IngressError`] once the queue has been closed.
    pub fn queue(&self, transaction: TransactionState) -> Result<(), IngressError> {
        if self.ingress.closed.load(Ordering::Acquire) {
            return Err(IngressError("transaction queue is closed"));
        }
        trace!(transaction = ?transaction.id, token = ?transaction.apply_token, "queued");
        self.ingress.incoming.lock().push_back(transaction);
        let wake = self.ingress.wake.lock().clone();
        if let Some(wake) = wake {
            wake();
        }
        Ok(())
    }
}

#[derive(Debug)]
struct PendingQueue {
    token: ApplyToken,
    items: VecDeque<TransactionState>,
}

/// What one flush selected.
#[derive(Debug, Default)]
pub struct FlushOutcome {
    /// Transactions to apply, in order.
    pub ready: Vec<TransactionState>,
    /// Transactions removed without being applied.
    pub dropped: Vec<(TransactionState, DropReason)>,
    /// At least one ready transaction latches an unsignaled buffer.
    pub latched_unsignaled: bool,
}

/// Main-thread side of the transaction queue.
pub struct TransactionQueue {
    ingress: Arc<Ingress>,
    // -- Per-token FIFOs, in order of each token's first arrival --
    pending: Vec<PendingQueue>,
    filters: Vec<Box<dyn TransactionFilter>>,
}

impl fmt::Debug for TransactionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionQueue")
            .field("pending", &self.pending_len())
            .field(
                "filters",
                &self.filters.iter().map(|f| f.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl TransactionQueue {
    /// A queue with the default filter chain.
    #[must_use]
    pub fn new() -> Self {
        Self::with_filters(default_filters())
    }

    /// A queue with a custom filter chain.
    #[must_use]
    pub fn with_filters(filters: Vec<Box<dyn TransactionFilter>>) -> Self {
        Self {
            ingress: Arc::new(Ingress {
                incoming: Mutex::new(VecDeque::new()),
                wake: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
            pending: Vec::new(),
            filters,
        }
    }

    /// Appends a filter to the chain.
    pub fn add_filter(&mut self, filter: Box<dyn TransactionFilter>) {
        self.filters.push(filter);
    }

    /// A new submission handle.
    #[must_use]
    pub fn sender(&self) -> TransactionSender {
        TransactionSender {
            ingress: Arc::clone(&self.ingress),
        }
    }

    /// Installs the hook run after every submission.
    pub fn set_wake_hook(&self, hook: WakeHook) {
        *self.ingress.wake.lock() = Some(hook);
    }

    /// Moves submissions into their per-token FIFOs. Returns how many moved.
    pub fn collect(&mut self) -> usize {
        let incoming = std::mem::take(&mut *self.ingress.incoming.lock());
        let count = incoming.len();
        for transaction in incoming {
            let token = transaction.apply_token;
            match self.pending.iter_mut().find(|q| q.token == token) {
                Some(queue) => queue.items.push_back(transaction),
                None => self.pending.push(PendingQueue {
                    token,
                    items: VecDeque::from([transaction]),
                }),
            }
        }
        count
    }

    /// Selects the transactions to apply this frame.
    ///
    /// Each token's FIFO is consumed from the front until a transaction is
    /// not ready; later transactions with that token wait behind it. Tokens
    /// are revisited until a pass makes no progress, so a barrier satisfied
    /// by another token's buffer unblocks within the same flush.
    pub fn flush(&mut self, ctx: &mut FlushContext<'_>) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        loop {
            let mut progressed = false;
            for queue in &mut self.pending {
                while let Some(front) = queue.items.front_mut() {
                    let readiness = check_all(&self.filters, ctx, front);
                    match readiness {
                        TransactionReadiness::Ready | TransactionReadiness::ReadyUnsignaled => {
                            let Some(transaction) = queue.items.pop_front() else {
                                break;
                            };
                            ctx.mark_ready(&transaction);
                            outcome.latched_unsignaled |=
                                readiness == TransactionReadiness::ReadyUnsignaled;
                            outcome.ready.push(transaction);
                        }
                        TransactionReadiness::Drop(reason) => {
                            let Some(transaction) = queue.items.pop_front() else {
                                break;
                            };
                            debug!(transaction = ?transaction.id, ?reason, "dropping transaction");
                            outcome.dropped.push((transaction, reason));
                        }
                        TransactionReadiness::NotReady
                        | TransactionReadiness::NotReadyBarrier
                        | TransactionReadiness::NotReadyUnsignaled => break,
                    }
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        self.pending.retain(|q| !q.items.is_empty());
        outcome
    }

    /// Number of collected transactions waiting for a flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.iter().map(|q| q.items.len()).sum()
    }

    /// Whether anything is waiting, collected or not.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || !self.ingress.incoming.lock().is_empty()
    }

    /// Refuses further submissions and returns everything still queued, in
    /// submission order per token.
    pub fn close(&mut self) -> Vec<TransactionState> {
        self.ingress.closed.store(true, Ordering::Release);
        self.collect();
        self.pending
            .drain(..)
            .flat_map(|q| q.items)
            .collect()
    }
}

impl Default for TransactionQueue {
    fn default() -> Self {
        Self::new()
    }
}
