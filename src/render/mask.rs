use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::ArrayView2;

use super::Palette;

/// Renders a `(height, width)` class mask as an RGB image.
pub fn colorize(mask: ArrayView2<u8>, palette: &Palette) -> RgbImage {
    let (height, width) = mask.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        palette.color(mask[[y as usize, x as usize]])
    })
}

/// Nearest-neighbour resize keeps class boundaries hard; no blended colors
/// appear that belong to no class.
pub fn resize_nearest(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Nearest)
}
