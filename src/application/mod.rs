//! Application layer with per-slot orchestration.

/// Slot state machine and visibility handling.
pub mod services;

pub use services::{ImageSlot, VisibilityReclaimer};
