// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client buffers attached to layers.

use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kurbo::Size;

use crate::fence::Fence;
use crate::id::{BufferId, LayerId, ProducerId};
use crate::listener::{BufferRelease, ListenerHandle, ReleaseReason};

/// A client buffer submitted with a layer-state delta.
///
/// The pixel payload itself lives with the composition engine; the pipeline
/// only tracks identity, size, ordering and fences.
///
/// Clones share one release flag: whichever clone is released first returns
/// the buffer, later releases are ignored.
#[derive(Clone)]
pub struct BufferData {
    /// Buffer identity.
    pub id: BufferId,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Producer that queued the buffer. A newer producer id makes older
    /// producers' buffers stale.
    pub producer_id: ProducerId,
    /// Explicit frame number. `None` means the layer's previous frame + 1.
    pub frame_number: Option<u64>,
    /// Frame that must be latched on the layer before this buffer may be.
    pub barrier_frame_number: Option<u64>,
    /// Signals when the producer finished writing.
    pub acquire_fence: Option<Fence>,
    /// The pixel format has no alpha channel.
    pub opaque_format: bool,
    /// Content is protected and must not reach screenshots.
    pub protected: bool,
    /// Receives the buffer back once the compositor is done with it.
    pub release_listener: Option<ListenerHandle>,
    released: Arc<AtomicBool>,
}

impl BufferData {
    /// Creates buffer data with no fences, barrier or listener.
    #[must_use]
    pub fn new(id: BufferId, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            producer_id: ProducerId(0),
            frame_number: None,
            barrier_frame_number: None,
            acquire_fence: None,
            opaque_format: false,
            protected: false,
            release_listener: None,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the producer id.
    #[must_use]
    pub fn with_producer(mut self, producer: ProducerId) -> Self {
        self.producer_id = producer;
        self
    }

    /// Sets an explicit frame number.
    #[must_use]
    pub fn with_frame_number(mut self, frame_number: u64) -> Self {
        self.frame_number = Some(frame_number);
        self
    }

    /// Makes the buffer wait for `frame_number` to be latched first.
    #[must_use]
    pub fn with_barrier(mut self, frame_number: u64) -> Self {
        self.barrier_frame_number = Some(frame_number);
        self
    }

    /// Attaches an acquire fence.
    #[must_use]
    pub fn with_acquire_fence(mut self, fence: Fence) -> Self {
        self.acquire_fence = Some(fence);
        self
    }

    /// Marks the format as opaque.
    #[must_use]
    pub fn with_opaque_format(mut self) -> Self {
        self.opaque_format = true;
        self
    }

    /// Routes releases of this buffer to `listener`.
    #[must_use]
    pub fn with_release_listener(mut self, listener: ListenerHandle) -> Self {
        self.release_listener = Some(listener);
        self
    }

    /// Buffer dimensions.
    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(f64::from(self.width), f64::from(self.height))
    }

    /// Whether the acquire fence (if any) has signaled.
    #[must_use]
    pub fn is_acquire_signaled(&self) -> bool {
        self.acquire_fence.as_ref().is_none_or(Fence::is_signaled)
    }

    /// Whether the buffer was already returned to its producer.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns the buffer to its producer. Only the first call notifies the
    /// release listener.
    pub fn release(&self, layer: LayerId, reason: ReleaseReason, release_fence: Option<Fence>) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(listener) = &self.release_listener {
            listener.on_buffer_released(&BufferRelease {
                layer,
                buffer: self.id,
                frame_number: self.frame_number.unwrap_or(0),
                release_fence,
                reason,
            });
        }
    }
}

impl fmt::Debug for BufferData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferData")
            .field("id", &self.id)
            .field("size", &(self.width, self.height))
            .field("producer_id", &self.producer_id)
            .field("frame_number", &self.frame_number)
            .field("barrier_frame_number", &self.barrier_frame_number)
            .field("acquire_fence", &self.acquire_fence)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::id::ListenerId;
    use crate::listener::TransactionListener;

    #[derive(Default)]
    struct Count(AtomicUsize);

    impl TransactionListener for Count {
        fn id(&self) -> ListenerId {
            ListenerId(1)
        }

        fn on_buffer_released(&self, _release: &BufferRelease) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn clones_release_once() {
        let count = Arc::new(Count::default());
        let buffer = BufferData::new(BufferId(1), 2, 2).with_release_listener(count.clone());
        let latched = buffer.clone();
        assert!(!latched.is_released());
        buffer.release(LayerId(1), ReleaseReason::Dropped, None);
        latched.release(LayerId(1), ReleaseReason::Replaced, None);
        buffer.release(LayerId(1), ReleaseReason::Dropped, None);
        assert_eq!(count.0.load(Ordering::Relaxed), 1);
        assert!(latched.is_released(), "clones share the release flag");
    }

    #[test]
    fn separate_buffers_release_independently() {
        let count = Arc::new(Count::default());
        let a = BufferData::new(BufferId(1), 2, 2).with_release_listener(count.clone());
        let b = BufferData::new(BufferId(1), 2, 2).with_release_listener(count.clone());
        a.release(LayerId(1), ReleaseReason::Stale, None);
        b.release(LayerId(1), ReleaseReason::Stale, None);
        assert_eq!(count.0.load(Ordering::Relaxed), 2);
    }
}
