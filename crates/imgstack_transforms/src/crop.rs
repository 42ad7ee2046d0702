//! Real-transform cropping and random flips.
//!
//! The crop path trims a random band from one side of each axis of the
//! decoded image before it is resized, so no pixel is ever invented by
//! interpolation or fill.

use image::{imageops, RgbImage};
use rand::Rng;

/// Draw a signed crop offset for an axis of `extent` pixels.
///
/// The range is quantized to whole percent: with `ws = floor(range * 100)`, an
/// integer `r` is drawn from `[-ws, ws)` and the offset is `r / 100 * extent`
/// truncated toward zero. A range below 1% always yields 0.
pub fn crop_offset<R: Rng + ?Sized>(range: f32, extent: u32, rng: &mut R) -> i64 {
    let ws = (f64::from(range) * 100.0) as i64;
    if ws <= 0 {
        return 0;
    }
    let r = rng.gen_range(-ws..ws);
    (r as f64 / 100.0 * f64::from(extent)) as i64
}

/// Turn a signed offset into `(start, length)` along an axis.
///
/// A negative offset trims from the end, a positive one from the start. At
/// least one pixel is kept.
#[must_use]
pub fn crop_span(offset: i64, extent: u32) -> (u32, u32) {
    let trim = offset.unsigned_abs().min(u64::from(extent.saturating_sub(1))) as u32;
    if offset < 0 {
        (0, extent - trim)
    } else {
        (trim, extent - trim)
    }
}

/// Crop a random band from the image using the configured shift ranges.
///
/// The width offset is drawn before the height offset.
pub fn real_crop<R: Rng + ?Sized>(
    image: &RgbImage,
    width_shift_range: f32,
    height_shift_range: f32,
    rng: &mut R,
) -> RgbImage {
    let (w, h) = image.dimensions();
    let dx = crop_offset(width_shift_range, w, rng);
    let dy = crop_offset(height_shift_range, h, rng);
    let (x, cw) = crop_span(dx, w);
    let (y, ch) = crop_span(dy, h);

    if (x, y, cw, ch) == (0, 0, w, h) {
        return image.clone();
    }
    imageops::crop_imm(image, x, y, cw, ch).to_image()
}

/// Flip left-right and/or top-bottom, each with probability 0.5 when enabled.
pub fn random_flips<R: Rng + ?Sized>(
    image: RgbImage,
    horizontal: bool,
    vertical: bool,
    rng: &mut R,
) -> RgbImage {
    let mut image = image;
    if horizontal && rng.gen::<f64>() < 0.5 {
        imageops::flip_horizontal_in_place(&mut image);
    }
    if vertical && rng.gen::<f64>() < 0.5 {
        imageops::flip_vertical_in_place(&mut image);
    }
    image
}
