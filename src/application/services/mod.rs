pub mod image_slot;
pub mod visibility_reclaimer;

pub use image_slot::ImageSlot;
pub use visibility_reclaimer::{DEFAULT_GRACE_DELAY, VisibilityReclaimer};
