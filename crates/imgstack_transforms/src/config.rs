//! Augmentation options.

use serde::{Deserialize, Serialize};

use imgstack_core::{CoreError, Result, TargetSize};

/// Options controlling how [`crate::ImageAugmenter`] transforms each image.
///
/// Shift ranges are fractions of the image size, angles are in degrees.
/// `zoom_range` holds the `[low, high]` bounds of a uniform zoom factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Maximum rotation in degrees.
    pub rotation_range: f32,
    /// Maximum horizontal shift as a fraction of the width.
    pub width_shift_range: f32,
    /// Maximum vertical shift as a fraction of the height.
    pub height_shift_range: f32,
    /// Maximum shear angle in degrees.
    pub shear_range: f32,
    /// Bounds of the zoom factor.
    pub zoom_range: [f32; 2],
    /// Flip left-right with probability 0.5.
    pub horizontal_flip: bool,
    /// Flip top-bottom with probability 0.5.
    pub vertical_flip: bool,
    /// Factor every pixel is multiplied by before standardization.
    pub rescale: f32,
    /// Subtract the corpus mean per channel.
    pub featurewise_center: bool,
    /// Divide by the corpus variance proxy per channel.
    pub featurewise_std_normalization: bool,
    /// Subtract each image's own mean.
    pub samplewise_center: bool,
    /// Divide by each image's own standard deviation.
    pub samplewise_std_normalization: bool,
    /// Crop from the original image and resize, instead of the affine path.
    pub real_transform: bool,
    /// Add PCA color jitter after standardization.
    pub pca_jitter: bool,
    /// Output size.
    pub target_size: TargetSize,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: [1.0, 1.0],
            horizontal_flip: false,
            vertical_flip: false,
            rescale: 1.0,
            featurewise_center: false,
            featurewise_std_normalization: false,
            samplewise_center: false,
            samplewise_std_normalization: false,
            real_transform: false,
            pca_jitter: false,
            target_size: TargetSize::default(),
        }
    }
}

impl AugmentConfig {
    /// Set the rotation range in degrees.
    #[must_use]
    pub fn with_rotation_range(mut self, degrees: f32) -> Self {
        self.rotation_range = degrees;
        self
    }

    /// Set both shift ranges.
    #[must_use]
    pub fn with_shift_range(mut self, width: f32, height: f32) -> Self {
        self.width_shift_range = width;
        self.height_shift_range = height;
        self
    }

    /// Set the shear range in degrees.
    #[must_use]
    pub fn with_shear_range(mut self, degrees: f32) -> Self {
        self.shear_range = degrees;
        self
    }

    /// Set the zoom bounds.
    #[must_use]
    pub fn with_zoom_range(mut self, low: f32, high: f32) -> Self {
        self.zoom_range = [low, high];
        self
    }

    /// Enable or disable random horizontal flips.
    #[must_use]
    pub fn with_horizontal_flip(mut self, enabled: bool) -> Self {
        self.horizontal_flip = enabled;
        self
    }

    /// Enable or disable random vertical flips.
    #[must_use]
    pub fn with_vertical_flip(mut self, enabled: bool) -> Self {
        self.vertical_flip = enabled;
        self
    }

    /// Set the rescale factor.
    #[must_use]
    pub fn with_rescale(mut self, rescale: f32) -> Self {
        self.rescale = rescale;
        self
    }

    /// Enable or disable both featurewise options.
    #[must_use]
    pub fn with_featurewise(mut self, enabled: bool) -> Self {
        self.featurewise_center = enabled;
        self.featurewise_std_normalization = enabled;
        self
    }

    /// Enable or disable both samplewise options.
    #[must_use]
    pub fn with_samplewise(mut self, enabled: bool) -> Self {
        self.samplewise_center = enabled;
        self.samplewise_std_normalization = enabled;
        self
    }

    /// Switch between the crop path and the affine path.
    #[must_use]
    pub fn with_real_transform(mut self, enabled: bool) -> Self {
        self.real_transform = enabled;
        self
    }

    /// Enable or disable PCA color jitter.
    #[must_use]
    pub fn with_pca_jitter(mut self, enabled: bool) -> Self {
        self.pca_jitter = enabled;
        self
    }

    /// Set the output size.
    #[must_use]
    pub fn with_target_size(mut self, size: TargetSize) -> Self {
        self.target_size = size;
        self
    }

    /// The same resizing and normalization with every random step disabled,
    /// for validation and test iterators.
    #[must_use]
    pub fn for_evaluation(&self) -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: [1.0, 1.0],
            horizontal_flip: false,
            vertical_flip: false,
            real_transform: false,
            pca_jitter: false,
            ..self.clone()
        }
    }

    /// Whether corpus statistics are needed.
    #[must_use]
    pub fn needs_stats(&self) -> bool {
        self.featurewise_center || self.featurewise_std_normalization
    }

    /// Check ranges for values the transforms cannot use.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Value`] for negative or non-finite ranges, a
    /// non-positive zoom bound, or a zoom range whose low bound exceeds the
    /// high one.
    pub fn validate(&self) -> Result<()> {
        let ranges = [
            ("rotation_range", self.rotation_range),
            ("width_shift_range", self.width_shift_range),
            ("height_shift_range", self.height_shift_range),
            ("shear_range", self.shear_range),
        ];
        for (name, value) in ranges {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::Value(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.real_transform && (self.width_shift_range >= 1.0 || self.height_shift_range >= 1.0) {
            return Err(CoreError::Value(
                "real_transform crops need shift ranges below 1.0".to_string(),
            ));
        }

        let [low, high] = self.zoom_range;
        if !(low > 0.0 && low <= high && high.is_finite()) {
            return Err(CoreError::Value(format!(
                "zoom_range must satisfy 0 < low <= high, got [{low}, {high}]"
            )));
        }
        if !self.rescale.is_finite() {
            return Err(CoreError::Value(format!(
                "rescale must be finite, got {}",
                self.rescale
            )));
        }
        Ok(())
    }
}
