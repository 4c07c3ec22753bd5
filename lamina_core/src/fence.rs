// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cross-thread completion fences.
//!
//! A [`Fence`] is a shared handle to a one-shot signal carrying the time at
//! which some GPU or display work completed. Clones observe the same signal.
//! Signaling is a single atomic store, so the HAL thread, the render thread
//! and clients may signal or poll without locks.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::time::HostTime;

const PENDING: u64 = u64::MAX;

/// A shareable one-shot completion signal.
#[derive(Clone)]
pub struct Fence {
    signal_time: Arc<AtomicU64>,
}

impl Fence {
    /// Creates an unsignaled fence.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            signal_time: Arc::new(AtomicU64::new(PENDING)),
        }
    }

    /// Creates a fence that already signaled at `time`.
    #[must_use]
    pub fn signaled(time: HostTime) -> Self {
        let fence = Self::pending();
        fence.signal(time);
        fence
    }

    /// Signals the fence. Later signals are ignored.
    pub fn signal(&self, time: HostTime) {
        // `u64::MAX` is reserved for the pending state.
        let time = time.nanos().min(PENDING - 1);
        let _ = self.signal_time.compare_exchange(
            PENDING,
            time,
            Ordering::Release,
            Ordering::Relaxed,
        );
    }

    /// Returns the signal time, or `None` while pending.
    #[must_use]
    pub fn signal_time(&self) -> Option<HostTime> {
        match self.signal_time.load(Ordering::Acquire) {
            PENDING => None,
            t => Some(HostTime(t)),
        }
    }

    /// Whether the fence has signaled.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.signal_time().is_some()
    }

    /// Whether two handles refer to the same signal.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.signal_time, &other.signal_time)
    }
}

impl PartialEq for Fence {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Fence {}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal_time() {
            Some(t) => write!(f, "Fence(signaled at {})", t.nanos()),
            None => f.write_str("Fence(pending)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_signal() {
        let fence = Fence::pending();
        let observer = fence.clone();
        assert!(!observer.is_signaled());
        fence.signal(HostTime(42));
        assert_eq!(observer.signal_time(), Some(HostTime(42)));
        assert!(observer.same_as(&fence));
    }

    #[test]
    fn first_signal_wins() {
        let fence = Fence::signaled(HostTime(10));
        fence.signal(HostTime(20));
        assert_eq!(fence.signal_time(), Some(HostTime(10)));
    }

    #[test]
    fn signal_from_other_thread() {
        let fence = Fence::pending();
        let remote = fence.clone();
        std::thread::spawn(move || remote.signal(HostTime(7)))
            .join()
            .unwrap();
        assert_eq!(fence.signal_time(), Some(HostTime(7)));
    }
}
