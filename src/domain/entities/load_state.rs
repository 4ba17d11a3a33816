//! Per-slot load state machine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonically increasing identifier of one load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocates the next identifier. Never repeats within a process.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a logical slot currently shows.
///
/// `Idle` and `Loading` render a placeholder, `Loaded` renders the bitmap and
/// `Failed` renders a static placeholder. `Failed` is terminal until a new
/// request or an explicit retry.
#[derive(Clone, Default)]
pub enum LoadState {
    /// Nothing requested, or the bitmap was released while hidden.
    #[default]
    Idle,
    /// A fetch and decode is in flight for the given request.
    Loading(RequestId),
    /// The decoded bitmap is available.
    Loaded(Arc<DynamicImage>),
    /// The last request failed.
    Failed,
}

impl LoadState {
    /// Returns true if nothing is displayed or pending.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true while a request is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading(_))
    }

    /// Returns true if a bitmap is ready.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// Returns true if the last request failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Returns the in-flight request, if any.
    #[must_use]
    pub const fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Loading(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the displayed bitmap, if any.
    #[must_use]
    pub const fn image(&self) -> Option<&Arc<DynamicImage>> {
        match self {
            Self::Loaded(image) => Some(image),
            _ => None,
        }
    }
}

impl std::fmt::Debug for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading(id) => write!(f, "Loading({id})"),
            Self::Loaded(image) => write!(f, "Loaded({}x{})", image.width(), image.height()),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
