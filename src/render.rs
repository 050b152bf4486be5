//! Turning class masks into images: palette lookup, nearest-neighbour
//! upscaling and alpha blending onto the source picture.

mod mask;
mod overlay;
mod palette;

pub use mask::{colorize, resize_nearest};
pub use overlay::{blend, OVERLAY_ALPHA};
pub use palette::{Palette, PALETTE_SEED};
