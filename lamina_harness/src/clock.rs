// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lamina_core::time::{Clock, Duration, HostTime};

/// A clock that only moves when told to.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// A clock reading `start`.
    #[must_use]
    pub fn new(start: HostTime) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(start.nanos())),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.nanos(), Ordering::AcqRel);
    }

    /// Jumps to `time`. Going backwards is allowed; the pipeline must cope.
    pub fn set(&self, time: HostTime) {
        self.nanos.store(time.nanos(), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> HostTime {
        HostTime(self.nanos.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_time() {
        let clock = ManualClock::new(HostTime(10));
        let other = clock.clone();
        clock.advance(Duration(5));
        assert_eq!(other.now(), HostTime(15));
        other.set(HostTime(3));
        assert_eq!(clock.now(), HostTime(3));
    }
}
