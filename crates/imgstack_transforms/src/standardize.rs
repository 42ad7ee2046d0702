//! Rescaling and normalization of `(H, W, 3)` tensors.

use ndarray::{Array3, Axis};

use crate::config::AugmentConfig;
use imgstack_core::{ChannelStats, CoreError, Result};

/// Added to every divisor.
pub const EPSILON: f32 = 1e-7;

/// Normalize `x` in place.
///
/// Steps run in this order, each only when enabled: multiply by `rescale`,
/// subtract the sample mean, divide by the sample standard deviation, subtract
/// the corpus mean per channel, divide by the corpus variance proxy per
/// channel.
///
/// # Errors
///
/// Returns [`CoreError::Prereq`] when a featurewise option is enabled and no
/// statistics are given.
pub fn standardize(x: &mut Array3<f32>, config: &AugmentConfig, stats: Option<&ChannelStats>) -> Result<()> {
    if config.rescale != 1.0 {
        x.mapv_inplace(|v| v * config.rescale);
    }

    if config.samplewise_center {
        if let Some(mean) = x.mean() {
            x.mapv_inplace(|v| v - mean);
        }
    }
    if config.samplewise_std_normalization {
        let std = x.std(0.0);
        x.mapv_inplace(|v| v / (std + EPSILON));
    }

    if !config.needs_stats() {
        return Ok(());
    }
    let stats = stats.ok_or_else(|| {
        CoreError::Prereq(
            "featurewise normalization needs corpus mean/std; compute the stats cache first".to_string(),
        )
    })?;

    for (c, mut channel) in x.axis_iter_mut(Axis(2)).enumerate() {
        if config.featurewise_center {
            let mean = stats.mean[c];
            channel.mapv_inplace(|v| v - mean);
        }
        if config.featurewise_std_normalization {
            let std = stats.std[c];
            channel.mapv_inplace(|v| v / (std + EPSILON));
        }
    }
    Ok(())
}
