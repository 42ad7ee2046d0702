//! The per-image augmentation seam.

use image::RgbImage;
use ndarray::Array3;
use rand_chacha::ChaCha8Rng;

use crate::error::Result;
use crate::size::TargetSize;

/// Turns one decoded image into a model-ready `(H, W, 3)` tensor.
///
/// Batch iterators own only cursor bookkeeping and hand every decoded image
/// to an `Augmenter`. Implementations must resize to [`Augmenter::target_size`]
/// so that all tensors of a batch share one shape, and must draw all randomness
/// from the supplied generator.
///
/// # Example
///
/// ```rust
/// use imgstack_core::{Augmenter, Passthrough, Seed, TargetSize};
/// use image::RgbImage;
///
/// let aug = Passthrough::new(TargetSize::square(8));
/// let img = RgbImage::new(16, 16);
/// let x = aug.augment(img, &mut Seed::new(0).to_rng()).unwrap();
/// assert_eq!(x.dim(), (8, 8, 3));
/// ```
pub trait Augmenter: Send + Sync {
    /// Transform a decoded image.
    fn augment(&self, image: RgbImage, rng: &mut ChaCha8Rng) -> Result<Array3<f32>>;

    /// Spatial size of every tensor this augmenter produces.
    fn target_size(&self) -> TargetSize;

    /// Name used in log lines.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Resize only, no augmentation or normalization.
#[derive(Debug, Clone, Copy)]
pub struct Passthrough {
    size: TargetSize,
}

impl Passthrough {
    /// Create a passthrough augmenter for the given size.
    #[must_use]
    pub const fn new(size: TargetSize) -> Self {
        Self { size }
    }
}

impl Augmenter for Passthrough {
    fn augment(&self, image: RgbImage, _rng: &mut ChaCha8Rng) -> Result<Array3<f32>> {
        Ok(rgb_to_array(&resize_exact(&image, self.size)))
    }

    fn target_size(&self) -> TargetSize {
        self.size
    }

    fn name(&self) -> &str {
        "Passthrough"
    }
}

/// Resize to exactly `size`, skipping the work when already there.
#[must_use]
pub fn resize_exact(image: &RgbImage, size: TargetSize) -> RgbImage {
    if image.height() == size.height() && image.width() == size.width() {
        return image.clone();
    }
    image::imageops::resize(
        image,
        size.width(),
        size.height(),
        image::imageops::FilterType::Triangle,
    )
}

/// Copy an 8-bit RGB image into a float `(H, W, 3)` array.
#[must_use]
pub fn rgb_to_array(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
        f32::from(image.get_pixel(x as u32, y as u32)[c])
    })
}
