// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The composition engine boundary.

use kurbo::Rect;
use lamina_core::fence::Fence;
use lamina_core::id::DisplayId;
use thiserror::Error;

use crate::damage::DamageRegion;
use crate::plan::RenderItem;
use crate::refresh::ColorMatrix;

/// The composition engine could not produce a client target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum RenderError {
    /// No memory for the target or intermediate buffers.
    #[error("composition engine out of memory")]
    OutOfMemory,
    /// The display has no client target.
    #[error("no client target for {0:?}")]
    NoClientTarget(DisplayId),
    /// Any other engine failure.
    #[error("composition engine failed: {0}")]
    Failed(&'static str),
}

/// Items the engine draws into one display's client target.
#[derive(Clone, Debug)]
pub struct ClientCompositionRequest<'a> {
    /// Display.
    pub display: DisplayId,
    /// Target area in screen space.
    pub bounds: Rect,
    /// Items in back-to-front order.
    pub items: Vec<&'a RenderItem>,
    /// Area to repaint.
    pub damage: DamageRegion,
    /// Color transform, if any.
    pub color_transform: Option<ColorMatrix>,
}

/// Renders client-composed layers, typically on the GPU.
///
/// Implementations may render asynchronously; the returned fence signals
/// when the client target is ready for scan-out. The frame driver never
/// waits on it.
pub trait CompositionEngine {
    /// Composes `request` into the display's client target.
    fn compose(&mut self, request: &ClientCompositionRequest<'_>) -> Result<Fence, RenderError>;
}
