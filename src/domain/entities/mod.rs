//! Domain entity definitions.

mod image;
mod load_state;

pub use self::image::{
    CacheKey, CacheMode, ImageSource, LoadedImage, LogicalSize, PixelSize, decoded_cost,
};
pub use load_state::{LoadState, RequestId};
