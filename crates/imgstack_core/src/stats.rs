//! Global per-channel normalization statistics.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::CHANNELS;

/// Per-channel mean and variance proxy of a whole image corpus.
///
/// `std` is the Welford second moment divided by `N - 1` where each sample is
/// one image's spatial mean. It is not a per-pixel variance and is consumed as
/// a divisor exactly as stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Mean of each channel.
    pub mean: [f32; CHANNELS],
    /// Variance proxy of each channel.
    pub std: [f32; CHANNELS],
}

impl ChannelStats {
    /// Create statistics from raw channel values.
    #[must_use]
    pub const fn new(mean: [f32; CHANNELS], std: [f32; CHANNELS]) -> Self {
        Self { mean, std }
    }

    /// Mean as a `(1, 3)` array, the on-disk layout.
    #[must_use]
    pub fn mean_array(&self) -> Array2<f32> {
        row(&self.mean)
    }

    /// Variance proxy as a `(1, 3)` array, the on-disk layout.
    #[must_use]
    pub fn std_array(&self) -> Array2<f32> {
        row(&self.std)
    }

    /// Rebuild statistics from two `(1, 3)` arrays.
    ///
    /// # Errors
    ///
    /// Returns an error if either array does not hold exactly three values.
    pub fn from_arrays(mean: ArrayView2<'_, f32>, std: ArrayView2<'_, f32>) -> Result<Self> {
        Ok(Self {
            mean: channels(mean)?,
            std: channels(std)?,
        })
    }
}

fn row(values: &[f32; CHANNELS]) -> Array2<f32> {
    Array2::from_shape_fn((1, CHANNELS), |(_, c)| values[c])
}

fn channels(arr: ArrayView2<'_, f32>) -> Result<[f32; CHANNELS]> {
    if arr.len() != CHANNELS {
        return Err(CoreError::Shape {
            expected: format!("(1, {CHANNELS})"),
            got: format!("{:?}", arr.shape()),
        });
    }
    let mut out = [0.0; CHANNELS];
    for (dst, src) in out.iter_mut().zip(arr.iter()) {
        *dst = *src;
    }
    Ok(out)
}

impl std::fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mean={:?} std={:?}", self.mean, self.std)
    }
}
