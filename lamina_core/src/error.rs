// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recoverable error types.
//!
//! Only failures that the pipeline survives are modeled here. Broken
//! invariants (a snapshot that cannot be found, a hierarchy cycle) panic.

use thiserror::Error;

use crate::id::{DisplayId, ModeId};

/// An error code returned across the hardware composer boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum HalError {
    /// The display is not known to the HAL.
    #[error("bad display {0:?}")]
    BadDisplay(DisplayId),
    /// The requested configuration does not exist.
    #[error("bad config {0}")]
    BadConfig(u32),
    /// The HAL does not implement the call.
    #[error("unsupported operation")]
    Unsupported,
    /// A seamless switch was requested but is not allowed.
    #[error("seamless mode switch not allowed")]
    SeamlessNotAllowed,
    /// A seamless switch is allowed but not possible right now.
    #[error("seamless mode switch not possible")]
    SeamlessNotPossible,
    /// The HAL ran out of resources.
    #[error("no resources")]
    NoResources,
    /// Any other vendor error code.
    #[error("hal error code {0}")]
    Other(i32),
}

/// A display mode request could not be honored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum ModeError {
    /// The display is not registered with the mode controller.
    #[error("unknown display {0:?}")]
    UnknownDisplay(DisplayId),
    /// The display does not support the mode.
    #[error("display {display:?} has no mode {mode:?}")]
    UnknownMode {
        /// Display the request targeted.
        display: DisplayId,
        /// Mode that was requested.
        mode: ModeId,
    },
    /// The hardware rejected the switch.
    #[error("hardware rejected mode {mode:?}: {source}")]
    Rejected {
        /// Mode that was requested.
        mode: ModeId,
        /// The HAL's error.
        #[source]
        source: HalError,
    },
}

/// The main thread is gone; a client call could not be delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[error("compositor is no longer accepting {0}")]
pub struct IngressError(pub &'static str);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_keeps_source() {
        let err = ModeError::Rejected {
            mode: ModeId(2),
            source: HalError::SeamlessNotPossible,
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("seamless mode switch not possible"));
        assert_eq!(
            IngressError("transactions").to_string(),
            "compositor is no longer accepting transactions"
        );
    }
}
