// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transaction ingress, readiness and completion.
//!
//! A [`TransactionState`] travels through three stages:
//!
//! - **Queue**: submitted through a [`TransactionSender`] and held in a
//!   per-apply-token FIFO by the [`TransactionQueue`].
//! - **Flush**: once per commit the queue runs every head-of-line
//!   transaction through the [`TransactionFilter`] chain and hands back the
//!   ready ones in apply order.
//! - **Completion**: the [`TransactionCallbackInvoker`] answers each
//!   listener registration exactly once, applied or dropped.

mod callback;
mod filter;
mod queue;
mod state;

pub use callback::TransactionCallbackInvoker;
pub use filter::{
    BufferFilter, FlushContext, LayerPresenceFilter, TimelineFilter, TransactionFilter,
    TransactionReadiness, Traverse, check_all, default_filters,
};
pub use queue::{FlushOutcome, TransactionQueue, TransactionSender, WakeHook};
pub use state::{ComposerState, TransactionFlags, TransactionState};
