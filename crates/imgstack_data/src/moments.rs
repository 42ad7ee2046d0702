//! Streaming per-channel statistics over an image corpus.
//!
//! Each image contributes one sample per channel: its spatial mean after
//! rescaling. Samples are folded into a [`Welford`] accumulator one image at a
//! time, so memory stays bounded by a single decoded image no matter how large
//! the corpus is.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use rayon::prelude::*;

use crate::error::{DataError, Result};
use imgstack_core::{ChannelStats, CHANNELS};

/// Images between two progress log lines.
const LOG_EVERY: usize = 256;

/// Welford's single-pass mean and sum of squared deviations, per channel.
///
/// ```rust
/// use imgstack_data::Welford;
///
/// let mut acc = Welford::new();
/// for x in [[1.0, 2.0, 3.0], [3.0, 4.0, 5.0]] {
///     acc.push(x);
/// }
/// assert_eq!(acc.mean(), [2.0, 3.0, 4.0]);
/// assert_eq!(acc.m2(), [2.0, 2.0, 2.0]);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Welford {
    count: u64,
    mean: [f64; CHANNELS],
    m2: [f64; CHANNELS],
}

impl Welford {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sample.
    pub fn push(&mut self, x: [f64; CHANNELS]) {
        self.count += 1;
        let n = self.count as f64;
        for c in 0..CHANNELS {
            let delta = x[c] - self.mean[c];
            self.mean[c] += delta / n;
            let delta2 = x[c] - self.mean[c];
            self.m2[c] += delta * delta2;
        }
    }

    /// Combine two accumulators as if all samples had been pushed into one.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let na = self.count as f64;
        let nb = other.count as f64;
        let n = na + nb;
        let mut out = Self {
            count: self.count + other.count,
            ..Self::default()
        };
        for c in 0..CHANNELS {
            let delta = other.mean[c] - self.mean[c];
            out.mean[c] = self.mean[c] + delta * nb / n;
            out.m2[c] = self.m2[c] + other.m2[c] + delta * delta * na * nb / n;
        }
        out
    }

    /// Number of samples seen.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Running mean.
    #[must_use]
    pub fn mean(&self) -> [f64; CHANNELS] {
        self.mean
    }

    /// Running sum of squared deviations.
    #[must_use]
    pub fn m2(&self) -> [f64; CHANNELS] {
        self.m2
    }

    /// Final statistics with `std = M2 / (N - 1)`.
    ///
    /// The second moment is not divided any further: the result is the
    /// variance of per-image means, which downstream standardization uses as
    /// its divisor unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Value`] with fewer than two samples.
    pub fn finish(&self) -> Result<ChannelStats> {
        if self.count < 2 {
            return Err(DataError::Value(format!(
                "need at least 2 images for channel statistics, got {}",
                self.count
            )));
        }
        let denom = (self.count - 1) as f64;
        Ok(ChannelStats::new(
            self.mean.map(|m| m as f32),
            self.m2.map(|m| (m / denom) as f32),
        ))
    }
}

/// Spatial mean of each channel of one image, after multiplying by `rescale`.
pub fn image_channel_mean(path: impl AsRef<Path>, rescale: f64) -> Result<[f64; CHANNELS]> {
    let path = path.as_ref();
    let img = image::open(path)
        .map_err(|e| DataError::image(path, e))?
        .to_rgb8();

    let mut sums = [0.0f64; CHANNELS];
    for pixel in img.pixels() {
        for (sum, v) in sums.iter_mut().zip(pixel.0) {
            *sum += f64::from(v) * rescale;
        }
    }
    let count = f64::from(img.width()) * f64::from(img.height());
    if count == 0.0 {
        return Err(DataError::Shape(format!("{} has no pixels", path.display())));
    }
    Ok(sums.map(|s| s / count))
}

/// Fold a lazy sequence of per-image channel means into statistics.
pub fn fold_means<I>(means: I) -> Result<ChannelStats>
where
    I: IntoIterator<Item = Result<[f64; CHANNELS]>>,
{
    let mut acc = Welford::new();
    for (i, x) in means.into_iter().enumerate() {
        acc.push(x?);
        if (i + 1) % LOG_EVERY == 0 {
            tracing::info!(images = i + 1, "accumulating channel statistics");
        }
    }
    acc.finish()
}

/// Compute channel statistics over `paths`, one image at a time.
pub fn accumulate<P: AsRef<Path>>(paths: &[P], rescale: f64) -> Result<ChannelStats> {
    tracing::info!(images = paths.len(), "computing mean and std on the dataset");
    let stats = fold_means(paths.iter().map(|p| image_channel_mean(p, rescale)))?;
    tracing::info!(%stats, "computed channel statistics");
    Ok(stats)
}

/// Compute channel statistics in parallel by merging per-chunk accumulators.
///
/// Equal to [`accumulate`] up to floating-point rounding.
pub fn accumulate_par<P: AsRef<Path> + Sync>(paths: &[P], rescale: f64) -> Result<ChannelStats> {
    tracing::info!(images = paths.len(), "computing mean and std on the dataset in parallel");
    let acc = paths
        .par_chunks(LOG_EVERY)
        .map(|chunk| {
            let mut acc = Welford::new();
            for p in chunk {
                acc.push(image_channel_mean(p, rescale)?);
            }
            Ok::<Welford, DataError>(acc)
        })
        .try_reduce(Welford::new, |a, b| Ok(a.merge(b)))?;
    acc.finish()
}

/// On-disk cache of [`ChannelStats`] as two `(1, 3)` `.npy` arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsCache {
    mean_path: PathBuf,
    std_path: PathBuf,
}

impl StatsCache {
    /// Create a cache over two file paths.
    #[must_use]
    pub fn new(mean_path: impl Into<PathBuf>, std_path: impl Into<PathBuf>) -> Self {
        Self {
            mean_path: mean_path.into(),
            std_path: std_path.into(),
        }
    }

    /// Whether both files exist.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.mean_path.exists() && self.std_path.exists()
    }

    /// Write statistics to both files.
    pub fn save(&self, stats: &ChannelStats) -> Result<()> {
        ndarray_npy::write_npy(&self.mean_path, &stats.mean_array())?;
        ndarray_npy::write_npy(&self.std_path, &stats.std_array())?;
        tracing::debug!(mean = %self.mean_path.display(), std = %self.std_path.display(), "saved channel statistics");
        Ok(())
    }

    /// Read statistics from both files.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Prereq`] if either file is missing.
    pub fn load(&self) -> Result<ChannelStats> {
        if !self.exists() {
            return Err(DataError::Prereq(format!(
                "channel statistics not computed: {} / {}",
                self.mean_path.display(),
                self.std_path.display()
            )));
        }
        let mean: Array2<f32> = ndarray_npy::read_npy(&self.mean_path)?;
        let std: Array2<f32> = ndarray_npy::read_npy(&self.std_path)?;
        let stats = ChannelStats::from_arrays(mean.view(), std.view())?;
        tracing::info!(%stats, "loaded channel statistics");
        Ok(stats)
    }

    /// Load the cached statistics, computing and saving them first if either
    /// file is absent.
    pub fn check_or_compute<P: AsRef<Path>>(&self, paths: &[P], rescale: f64) -> Result<ChannelStats> {
        if self.exists() {
            return self.load();
        }
        let stats = accumulate(paths, rescale)?;
        self.save(&stats)?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solid(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(6, 4, image::Rgb(rgb)).save(&path).unwrap();
        path
    }

    fn corpus(dir: &Path) -> Vec<PathBuf> {
        vec![
            solid(dir, "a_1.png", [10, 20, 30]),
            solid(dir, "b_0.png", [20, 30, 40]),
            solid(dir, "c_1.png", [30, 40, 50]),
            solid(dir, "d_0.png", [40, 50, 60]),
        ]
    }

    #[test]
    fn test_welford_matches_closed_form() {
        let dir = tempfile::tempdir().unwrap();
        let stats = accumulate(&corpus(dir.path()), 1.0).unwrap();

        assert_eq!(stats.mean, [25.0, 35.0, 45.0]);
        // squared deviations 225 + 25 + 25 + 225 over N - 1 = 3
        for c in 0..3 {
            assert_relative_eq!(stats.std[c], 500.0 / 3.0, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_rescale_applies_before_accumulating() {
        let dir = tempfile::tempdir().unwrap();
        let stats = accumulate(&corpus(dir.path()), 0.1).unwrap();
        assert_relative_eq!(stats.mean[0], 2.5, max_relative = 1e-6);
        assert_relative_eq!(stats.std[0], 5.0 / 3.0, max_relative = 1e-5);
    }

    #[test]
    fn test_order_independence() {
        let dir = tempfile::tempdir().unwrap();
        let files = corpus(dir.path());
        let forward = accumulate(&files, 1.0).unwrap();
        let mut reversed = files.clone();
        reversed.reverse();
        let backward = accumulate(&reversed, 1.0).unwrap();
        let parallel = accumulate_par(&files, 1.0).unwrap();

        assert_eq!(forward, accumulate(&files, 1.0).unwrap());
        for c in 0..3 {
            assert_relative_eq!(forward.mean[c], backward.mean[c], max_relative = 1e-6);
            assert_relative_eq!(forward.std[c], backward.std[c], max_relative = 1e-6);
            assert_relative_eq!(forward.mean[c], parallel.mean[c], max_relative = 1e-6);
            assert_relative_eq!(forward.std[c], parallel.std[c], max_relative = 1e-6);
        }
    }

    #[test]
    fn test_merge_equals_sequential() {
        let samples = [[1.0, 5.0, 2.0], [4.0, 1.0, 8.0], [2.5, 3.0, 3.0], [7.0, 0.5, 1.0], [3.0, 3.0, 3.0]];
        let mut all = Welford::new();
        samples.iter().for_each(|s| all.push(*s));

        let mut left = Welford::new();
        let mut right = Welford::new();
        samples[..2].iter().for_each(|s| left.push(*s));
        samples[2..].iter().for_each(|s| right.push(*s));
        let merged = left.merge(right);

        assert_eq!(merged.count(), all.count());
        for c in 0..3 {
            assert_relative_eq!(merged.mean()[c], all.mean()[c], max_relative = 1e-12);
            assert_relative_eq!(merged.m2()[c], all.m2()[c], max_relative = 1e-12);
        }
    }

    #[test]
    fn test_single_image_is_error() {
        let mut acc = Welford::new();
        acc.push([1.0, 1.0, 1.0]);
        assert!(matches!(acc.finish().unwrap_err(), DataError::Value(_)));
    }

    #[test]
    fn test_missing_image_is_error() {
        let err = accumulate(&["does/not/exist_1.png"], 1.0).unwrap_err();
        assert!(matches!(err, DataError::Image { .. }));
    }

    #[test]
    fn test_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StatsCache::new(dir.path().join("mean.npy"), dir.path().join("std.npy"));
        let stats = ChannelStats::new([0.123_456_78, 1.5, -2.25], [3.0e-4, 17.0, 1234.567]);

        assert!(!cache.exists());
        cache.save(&stats).unwrap();
        assert!(cache.exists());
        assert_eq!(cache.load().unwrap(), stats);
    }

    #[test]
    fn test_load_without_cache_is_prereq_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StatsCache::new(dir.path().join("mean.npy"), dir.path().join("std.npy"));
        assert!(matches!(cache.load().unwrap_err(), DataError::Prereq(_)));
    }

    #[test]
    fn test_check_or_compute_skips_when_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StatsCache::new(dir.path().join("mean.npy"), dir.path().join("std.npy"));
        let cached = ChannelStats::new([1.0, 2.0, 3.0], [4.0, 5.0, 6.0]);
        cache.save(&cached).unwrap();

        // the corpus would give different numbers; the cache must win
        let files = corpus(dir.path());
        assert_eq!(cache.check_or_compute(&files, 1.0).unwrap(), cached);

        std::fs::remove_file(dir.path().join("std.npy")).unwrap();
        let fresh = cache.check_or_compute(&files, 1.0).unwrap();
        assert_eq!(fresh.mean, [25.0, 35.0, 45.0]);
        assert!(cache.exists());
    }
}
