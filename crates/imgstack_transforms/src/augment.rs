//! The configurable image augmenter.

use image::RgbImage;
use ndarray::Array3;
use rand_chacha::ChaCha8Rng;

use crate::config::AugmentConfig;
use crate::{crop, geometric, pca, standardize};
use imgstack_core::{resize_exact, rgb_to_array, Augmenter, ChannelStats, CoreError, Result, TargetSize};

/// Chains cropping or affine augmentation, standardization and PCA jitter.
///
/// With `real_transform` the decoded image is cropped, flipped and then
/// resized. Otherwise it is resized first and put through a random affine
/// transform and flips. Both paths then standardize and optionally jitter.
///
/// # Example
///
/// ```rust
/// use imgstack_core::TargetSize;
/// use imgstack_transforms::{AugmentConfig, ImageAugmenter};
///
/// let config = AugmentConfig::default()
///     .with_real_transform(true)
///     .with_shift_range(0.1, 0.1)
///     .with_target_size(TargetSize::square(64));
/// let augmenter = ImageAugmenter::new(config, None).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ImageAugmenter {
    config: AugmentConfig,
    stats: Option<ChannelStats>,
}

impl ImageAugmenter {
    /// Create an augmenter.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Prereq`] if a featurewise option is enabled
    /// without statistics, and [`CoreError::Value`] for invalid ranges.
    pub fn new(config: AugmentConfig, stats: Option<ChannelStats>) -> Result<Self> {
        config.validate()?;
        if config.needs_stats() && stats.is_none() {
            return Err(CoreError::Prereq(
                "featurewise normalization enabled but no corpus statistics were given".to_string(),
            ));
        }
        tracing::debug!(
            real_transform = config.real_transform,
            pca_jitter = config.pca_jitter,
            featurewise = config.needs_stats(),
            size = %config.target_size,
            "created image augmenter"
        );
        Ok(Self { config, stats })
    }

    /// Options in use.
    #[must_use]
    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Corpus statistics, if any.
    #[must_use]
    pub fn stats(&self) -> Option<&ChannelStats> {
        self.stats.as_ref()
    }
}

impl Augmenter for ImageAugmenter {
    fn augment(&self, image: RgbImage, rng: &mut ChaCha8Rng) -> Result<Array3<f32>> {
        let cfg = &self.config;
        let size = cfg.target_size;

        let mut x = if cfg.real_transform {
            let cropped = crop::real_crop(&image, cfg.width_shift_range, cfg.height_shift_range, rng);
            let flipped = crop::random_flips(cropped, cfg.horizontal_flip, cfg.vertical_flip, rng);
            rgb_to_array(&resize_exact(&flipped, size))
        } else {
            let x = rgb_to_array(&resize_exact(&image, size));
            geometric::random_transform(x, cfg, rng)
        };

        standardize::standardize(&mut x, cfg, self.stats.as_ref())?;
        if cfg.pca_jitter {
            pca::pca_jitter(&mut x, rng)?;
        }
        Ok(x)
    }

    fn target_size(&self) -> TargetSize {
        self.config.target_size
    }

    fn name(&self) -> &str {
        if self.config.real_transform {
            "ImageAugmenter(real)"
        } else {
            "ImageAugmenter(affine)"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use imgstack_core::Seed;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 128]))
    }

    #[test]
    fn test_featurewise_requires_stats() {
        let config = AugmentConfig::default().with_featurewise(true);
        let err = ImageAugmenter::new(config, None).unwrap_err();
        assert!(matches!(err, CoreError::Prereq(_)));
    }

    #[test]
    fn test_output_shape_both_paths() {
        for real in [false, true] {
            let config = AugmentConfig::default()
                .with_real_transform(real)
                .with_shift_range(0.2, 0.2)
                .with_rotation_range(if real { 0.0 } else { 15.0 })
                .with_horizontal_flip(true)
                .with_target_size(TargetSize::new(12, 10).unwrap());
            let aug = ImageAugmenter::new(config, None).unwrap();
            let x = aug.augment(gradient(30, 20), &mut Seed::new(1).to_rng()).unwrap();
            assert_eq!(x.dim(), (12, 10, 3));
        }
    }

    #[test]
    fn test_same_rng_same_output() {
        let config = AugmentConfig::default()
            .with_rotation_range(20.0)
            .with_zoom_range(0.8, 1.2)
            .with_pca_jitter(true)
            .with_target_size(TargetSize::square(16));
        let aug = ImageAugmenter::new(config, None).unwrap();
        let a = aug.augment(gradient(16, 16), &mut Seed::new(5).stream_rng(3)).unwrap();
        let b = aug.augment(gradient(16, 16), &mut Seed::new(5).stream_rng(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_featurewise_centering() {
        let stats = ChannelStats::new([100.0, 100.0, 100.0], [1.0, 1.0, 1.0]);
        let mut config = AugmentConfig::default().with_target_size(TargetSize::square(4));
        config.featurewise_center = true;
        let aug = ImageAugmenter::new(config, Some(stats)).unwrap();
        let img = RgbImage::from_pixel(4, 4, image::Rgb([100, 150, 50]));
        let x = aug.augment(img, &mut Seed::new(0).to_rng()).unwrap();
        assert_relative_eq!(x[[0, 0, 0]], 0.0);
        assert_relative_eq!(x[[3, 3, 1]], 50.0);
        assert_relative_eq!(x[[2, 1, 2]], -50.0);
    }
}
