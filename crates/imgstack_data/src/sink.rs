//! Preview images of augmented samples for visual inspection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::RgbImage;
use ndarray::ArrayView3;
use rand::Rng;

use crate::error::{DataError, Result};

/// Default number of previews written per iterator.
pub const DEFAULT_PREVIEW_LIMIT: usize = 100;

/// Writes the first `limit` augmented samples of an iterator to a directory.
///
/// The limit counts individual samples, not batches: with the default of
/// [`DEFAULT_PREVIEW_LIMIT`] a flow of batch size 32 stops previewing part way
/// through its fourth batch. Previews are named
/// `<original-file-name>_<random>.<format>`. Writing has no effect on the
/// batches returned to the caller; a failed write disables the sink.
#[derive(Debug)]
pub struct DebugSink {
    dir: PathBuf,
    format: String,
    limit: usize,
    written: AtomicUsize,
}

impl DebugSink {
    /// Create a sink writing up to [`DEFAULT_PREVIEW_LIMIT`] PNG previews.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            format: "png".to_string(),
            limit: DEFAULT_PREVIEW_LIMIT,
            written: AtomicUsize::new(0),
        }
    }

    /// Set the file extension (and therefore the encoder).
    #[must_use]
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Set the maximum number of previewed samples.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Previews written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed).min(self.limit)
    }

    /// Stop writing previews.
    pub fn close(&self) {
        self.written.store(self.limit, Ordering::Relaxed);
    }

    /// Write one preview if the limit has not been reached.
    ///
    /// Returns the path written, or `None` once the sink is full.
    pub fn write<R: Rng + ?Sized>(
        &self,
        source: &Path,
        tensor: ArrayView3<'_, f32>,
        rng: &mut R,
    ) -> Result<Option<PathBuf>> {
        if self.written.fetch_add(1, Ordering::Relaxed) >= self.limit {
            return Ok(None);
        }

        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sample");
        let hash: u32 = rng.gen_range(0..10_000_000);
        let path = self.dir.join(format!("{name}_{hash}.{}", self.format));

        to_preview(tensor)
            .save(&path)
            .map_err(|e| DataError::image(&path, e))?;
        Ok(Some(path))
    }
}

/// Map a standardized tensor back into a displayable 8-bit image.
///
/// Values are shifted up by `max(-min, 0)` and, if the maximum is non-zero,
/// scaled so the maximum becomes 255.
#[must_use]
pub fn to_preview(tensor: ArrayView3<'_, f32>) -> RgbImage {
    let (h, w, _) = tensor.dim();
    let min = tensor.iter().copied().fold(f32::INFINITY, f32::min);
    let shift = (-min).max(0.0);
    let max = tensor.iter().map(|v| v + shift).fold(0.0f32, f32::max);
    let scale = if max != 0.0 { 255.0 / max } else { 1.0 };

    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let px = |c: usize| ((tensor[[y as usize, x as usize, c]] + shift) * scale).clamp(0.0, 255.0) as u8;
        image::Rgb([px(0), px(1), px(2)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgstack_core::Seed;
    use ndarray::Array3;

    #[test]
    fn test_preview_rescales_to_full_range() {
        let mut t = Array3::<f32>::zeros((2, 2, 3));
        t[[0, 0, 0]] = -1.0;
        t[[1, 1, 2]] = 1.0;
        let img = to_preview(t.view());
        assert_eq!(img.get_pixel(0, 0)[0], 0);
        assert_eq!(img.get_pixel(1, 1)[2], 255);
        assert_eq!(img.get_pixel(1, 0)[1], 127);
    }

    #[test]
    fn test_sink_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DebugSink::new(dir.path()).limit(2);
        let t = Array3::<f32>::ones((3, 3, 3));
        let mut rng = Seed::new(0).to_rng();

        for _ in 0..5 {
            sink.write(Path::new("data/x_1_0.jpg"), t.view(), &mut rng).unwrap();
        }
        assert_eq!(sink.written(), 2);
        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_closed_sink_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DebugSink::new(dir.path()).limit(3);
        sink.close();
        let t = Array3::<f32>::ones((2, 2, 3));
        let written = sink
            .write(Path::new("x_1.png"), t.view(), &mut Seed::new(0).to_rng())
            .unwrap();
        assert!(written.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sink_names_after_source() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DebugSink::new(dir.path());
        let t = Array3::<f32>::zeros((2, 2, 3));
        let path = sink
            .write(Path::new("x_1_0.jpg"), t.view(), &mut Seed::new(1).to_rng())
            .unwrap()
            .unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("x_1_0.jpg_"));
        assert!(name.ends_with(".png"));
    }
}
