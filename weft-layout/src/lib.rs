//! Shadow layout for weft
//!
//! The client owns the real layout engine. This crate recomputes, from the
//! same component tree and viewport, what each component's geometry should
//! be, so the two can be compared and divergences reported.
//!
//! ```text
//! Tree + Viewport → ShadowLayout::compute → LayoutMap ─┐
//!                          client getComponentLayouts ─┴→ compare → LayoutReport
//! ```

pub mod compare;
pub mod engine;

pub use compare::{compare, Divergence, LayoutReport, DEFAULT_EPSILON};
pub use engine::{LayoutMetrics, ShadowLayout};
