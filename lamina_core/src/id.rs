// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Identifiers shared across the pipeline.
//!
//! All identifiers are small `Copy` newtypes. [`LayerId`] is a stable arena
//! key: it is never reused for the lifetime of a compositor, so a stale id
//! simply fails to resolve instead of aliasing a newer layer.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub $inner);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

/// Identifies a layer for its whole lifetime.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub u32);

impl LayerId {
    /// Sentinel for "no layer" (no parent, no relative parent, no mirror).
    pub const UNASSIGNED: Self = Self(u32::MAX);

    /// Whether this id refers to a layer.
    #[inline]
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != u32::MAX
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl fmt::Debug for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_assigned() {
            write!(f, "LayerId({})", self.0)
        } else {
            f.write_str("LayerId(unassigned)")
        }
    }
}

/// Hands out [`LayerId`]s from any thread.
///
/// Layer handles are created on client threads before the main thread ever
/// sees the layer, so allocation is a single atomic increment.
#[derive(Debug, Default)]
pub struct LayerIdAllocator {
    next: AtomicU32,
}

impl LayerIdAllocator {
    /// Creates an allocator starting at id 0.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
        }
    }

    /// Returns a fresh id.
    pub fn allocate(&self) -> LayerId {
        LayerId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies a display.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DisplayId {
    /// A display backed by hardware, keyed by the HAL's port-derived id.
    Physical(u64),
    /// A display rendered to a client-provided surface.
    Virtual(u64),
}

impl DisplayId {
    /// Whether this is a virtual display.
    #[inline]
    #[must_use]
    pub const fn is_virtual(self) -> bool {
        matches!(self, Self::Virtual(_))
    }

    /// Returns the raw value without the kind.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        match self {
            Self::Physical(v) | Self::Virtual(v) => v,
        }
    }
}

impl fmt::Debug for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Physical(v) => write!(f, "Physical({v})"),
            Self::Virtual(v) => write!(f, "Virtual({v})"),
        }
    }
}

/// Groups layers onto displays: a display shows the layers whose stack
/// matches its own.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LayerStack(pub u32);

impl LayerStack {
    /// A stack that no display shows.
    pub const INVALID: Self = Self(u32::MAX);
}

impl fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            f.write_str("LayerStack(invalid)")
        } else {
            write!(f, "LayerStack({})", self.0)
        }
    }
}

numeric_id!(
    /// Monotonically increasing transaction identifier.
    TransactionId(u64)
);

numeric_id!(
    /// Identifies the origin of a transaction stream. Transactions sharing a
    /// token are applied in submission order.
    ApplyToken(u64)
);

numeric_id!(
    /// A hardware display configuration.
    ModeId(u32)
);

numeric_id!(
    /// A client buffer.
    BufferId(u64)
);

numeric_id!(
    /// A buffer producer. Together with a frame number it orders buffers on
    /// one layer.
    ProducerId(u32)
);

numeric_id!(
    /// A client callback registered on a transaction listener.
    CallbackId(u64)
);

numeric_id!(
    /// Identifies a transaction listener.
    ListenerId(u64)
);

/// A token naming one predicted vsync (deadline and present time).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VsyncId(pub i64);

impl VsyncId {
    /// No frame timeline was requested.
    pub const INVALID: Self = Self(-1);

    /// Whether this id names a prediction.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for VsyncId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for VsyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VsyncId({})", self.0)
    }
}

/// Hands out [`TransactionId`]s from any thread.
#[derive(Debug, Default)]
pub struct TransactionIdAllocator {
    next: AtomicU64,
}

impl TransactionIdAllocator {
    /// Creates an allocator starting at id 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns a fresh id.
    pub fn allocate(&self) -> TransactionId {
        TransactionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_ids_are_unique_and_never_unassigned() {
        let alloc = LayerIdAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert_ne!(a, b);
        assert!(a.is_assigned());
        assert!(!LayerId::UNASSIGNED.is_assigned());
        assert_eq!(LayerId::default(), LayerId::UNASSIGNED);
    }

    #[test]
    fn display_kind() {
        assert!(DisplayId::Virtual(3).is_virtual());
        assert!(!DisplayId::Physical(3).is_virtual());
        assert_eq!(DisplayId::Physical(7).value(), 7);
        assert!(DisplayId::Physical(9) < DisplayId::Virtual(0));
    }

    #[test]
    fn transaction_ids_increase() {
        let alloc = TransactionIdAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(b > a);
        assert!(!VsyncId::default().is_valid());
    }
}
