// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Render plans, damage tracking and the composition engine boundary for
//! lamina.
//!
//! This crate sits between [`lamina_core`]'s snapshot set and the hardware
//! and GPU back ends. It defines:
//!
//! - [`RenderPlan`]: the draw items one output shows in one frame
//! - [`DamageRegion`] and [`DamageTracker`]: what changed since the output's
//!   previous frame
//! - [`RefreshArgs`]: the whole input of one composite
//! - [`CompositionEngine`]: the trait GPU composition implements

#![cfg_attr(docsrs, feature(doc_cfg))]

mod damage;
mod engine;
mod plan;
mod refresh;
#[cfg(test)]
mod testing;

pub use damage::{DamageRegion, DamageTracker, OutputDamage};
pub use engine::{ClientCompositionRequest, CompositionEngine, RenderError};
pub use plan::{OutputConfig, RenderItem, RenderPlan};
pub use refresh::{ColorMatrix, OutputRefresh, RefreshArgs, RefreshRequest};
