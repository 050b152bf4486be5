use image::{Rgb, RgbImage};

use crate::errors::{Result, SegError};

/// Weight of the original image in the overlay.
pub const OVERLAY_ALPHA: f32 = 0.5;

/// `alpha * original + (1 - alpha) * mask`, per channel.
pub fn blend(original: &RgbImage, mask: &RgbImage, alpha: f32) -> Result<RgbImage> {
    if original.dimensions() != mask.dimensions() {
        let (w, h) = original.dimensions();
        let (mw, mh) = mask.dimensions();
        return Err(SegError::ImageProcessing {
            path: "unknown".to_string(),
            operation: "overlay blending".to_string(),
            source: format!("image is {w}x{h} but mask is {mw}x{mh}").into(),
        });
    }

    let alpha = alpha.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| {
        (alpha * f32::from(a) + (1.0 - alpha) * f32::from(b))
            .round()
            .clamp(0.0, 255.0) as u8
    };

    Ok(RgbImage::from_fn(original.width(), original.height(), |x, y| {
        let Rgb([r, g, b]) = *original.get_pixel(x, y);
        let Rgb([mr, mg, mb]) = *mask.get_pixel(x, y);
        Rgb([mix(r, mr), mix(g, mg), mix(b, mb)])
    }))
}
