//! Travelog images - remote image loading for the travel log app.
//!
//! This crate fetches remote photos, downsamples them to the size they are
//! shown at, and keeps them in a cost-bounded memory tier backed by a
//! byte-budgeted disk tier. Slots publish their load state, hidden screens
//! release their bitmaps, and a prefetcher warms the caches ahead of display.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing slot orchestration services.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing cache tiers, HTTP and configuration.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "travelog-images";
