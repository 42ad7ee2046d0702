//! Infinite, thread-safe batch iteration over image files.
//!
//! Iteration is split into two parts:
//! - [`BatchSource`] owns the permutation of corpus indices and the cursor.
//!   Only this bookkeeping happens under a lock.
//! - [`ImageFlow`] decodes and augments the selected files outside the lock,
//!   in parallel across images, and assembles the batch.
//!
//! A flow never ends: after the last batch of an epoch the permutation is
//! reshuffled (or reset) and iteration starts over.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::prelude::*;
use ndarray::{Array2, Array3, Array4, Axis};
use parking_lot::Mutex;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::error::{DataError, Result};
use crate::labels::label_matrix;
use crate::sink::DebugSink;
use imgstack_core::{Augmenter, Mode, RunContext, Seed};

/// Indices selected for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBatch {
    /// Corpus indices, never empty.
    pub indices: Vec<usize>,
    /// Epoch the batch belongs to, starting at 0.
    pub epoch: usize,
    /// Number of indices issued before this batch. Used to derive per-image
    /// random streams.
    pub first_draw: u64,
}

#[derive(Debug)]
struct Cursor {
    permutation: Vec<usize>,
    position: usize,
    epoch: usize,
    issued: u64,
    rng: ChaCha8Rng,
}

/// Permutation and cursor state shared by all consumers of one flow.
///
/// # Example
///
/// ```rust
/// use imgstack_data::BatchSource;
///
/// let source = BatchSource::new(5, 2, false, None).unwrap();
/// assert_eq!(source.next_indices().indices, vec![0, 1]);
/// assert_eq!(source.next_indices().indices, vec![2, 3]);
/// assert_eq!(source.next_indices().indices, vec![4]);
/// assert_eq!(source.next_indices().indices, vec![0, 1]);
/// ```
#[derive(Debug)]
pub struct BatchSource {
    n: usize,
    batch_size: usize,
    shuffle: bool,
    cursor: Mutex<Cursor>,
}

impl BatchSource {
    /// Create a source over `n` items.
    ///
    /// # Errors
    ///
    /// Returns an error if `n` or `batch_size` is zero.
    pub fn new(n: usize, batch_size: usize, shuffle: bool, seed: Option<Seed>) -> Result<Self> {
        if batch_size == 0 {
            return Err(DataError::InvalidBatchSize(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        if n == 0 {
            return Err(DataError::EmptyDataset);
        }

        let mut rng = seed.unwrap_or_else(Seed::from_entropy).to_rng();
        let mut permutation: Vec<usize> = (0..n).collect();
        if shuffle {
            permutation.shuffle(&mut rng);
        }

        Ok(Self {
            n,
            batch_size,
            shuffle,
            cursor: Mutex::new(Cursor {
                permutation,
                position: 0,
                epoch: 0,
                issued: 0,
                rng,
            }),
        })
    }

    /// Select the indices of the next batch.
    ///
    /// The last batch of an epoch holds whatever is left of the permutation
    /// and may be smaller than the batch size. After it, the permutation is
    /// reshuffled in shuffle mode and the cursor wraps to the start.
    pub fn next_indices(&self) -> IndexBatch {
        let mut cur = self.cursor.lock();

        let start = cur.position;
        let end = (start + self.batch_size).min(self.n);
        let batch = IndexBatch {
            indices: cur.permutation[start..end].to_vec(),
            epoch: cur.epoch,
            first_draw: cur.issued,
        };
        cur.issued += batch.indices.len() as u64;

        if end >= self.n {
            let cur = &mut *cur;
            if self.shuffle {
                cur.permutation.shuffle(&mut cur.rng);
            }
            cur.position = 0;
            cur.epoch += 1;
        } else {
            cur.position = end;
        }
        batch
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.n
    }

    /// Always false; a source is never built over zero items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches per epoch, counting the final partial batch.
    #[must_use]
    pub fn steps_per_epoch(&self) -> usize {
        self.n.div_ceil(self.batch_size)
    }

    /// Current epoch.
    #[must_use]
    pub fn epoch(&self) -> usize {
        self.cursor.lock().epoch
    }
}

/// One batch of images, with labels in fit mode.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Images of shape `(B, H, W, 3)`.
    pub images: Array4<f32>,
    /// Labels of shape `(B, L)`, present in [`Mode::Fit`].
    pub labels: Option<Array2<i32>>,
    /// Corpus indices of the batch rows.
    pub indices: Vec<usize>,
    /// Epoch the batch belongs to.
    pub epoch: usize,
}

impl Batch {
    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the batch has no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Convert to Burn tensors: images `(B, H, W, 3)` and float labels `(B, L)`.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 4>, Option<Tensor<B, 2>>) {
        let (b, h, w, c) = self.images.dim();
        let x_flat: Vec<f32> = self.images.iter().copied().collect();
        let x = Tensor::<B, 1>::from_floats(x_flat.as_slice(), device).reshape([b, h, w, c]);

        let y = self.labels.as_ref().map(|y| {
            let y_flat: Vec<f32> = y.iter().map(|&v| v as f32).collect();
            let cols = y.ncols();
            Tensor::<B, 1>::from_floats(y_flat.as_slice(), device).reshape([b, cols])
        });
        (x, y)
    }
}

/// Options of an [`ImageFlow`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Samples per batch.
    pub batch_size: usize,
    /// Reshuffle the permutation every epoch.
    pub shuffle: bool,
    /// Whether batches carry labels.
    pub mode: Mode,
    /// Label columns to keep; all columns if `None`.
    pub label_positions: Option<Vec<usize>>,
    /// Seed for shuffling and augmentation.
    pub seed: Option<Seed>,
    /// Directory receiving previews of augmented samples.
    pub save_to_dir: Option<PathBuf>,
    /// Preview file extension.
    pub save_format: String,
    /// Maximum number of previews.
    pub save_limit: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: false,
            mode: Mode::Fit,
            label_positions: None,
            seed: None,
            save_to_dir: None,
            save_format: "png".to_string(),
            save_limit: crate::sink::DEFAULT_PREVIEW_LIMIT,
        }
    }
}

/// An infinite stream of augmented batches over a list of image files.
///
/// `next_batch` takes `&self`, so one flow wrapped in an [`Arc`] can feed
/// several worker threads. Consumers never receive the same index twice
/// within an epoch.
///
/// # Example
///
/// ```rust,ignore
/// use imgstack_data::ImageFlow;
/// use imgstack_core::{Mode, Seed};
///
/// let flow = ImageFlow::builder(files, augmenter)
///     .batch_size(32)
///     .shuffle(true)
///     .mode(Mode::Fit)
///     .seed(Seed::new(42))
///     .build()?;
///
/// for batch in flow.iter().take(flow.steps_per_epoch()) {
///     let batch = batch?;
///     // train on batch.images / batch.labels
/// }
/// ```
pub struct ImageFlow {
    files: Vec<PathBuf>,
    labels: Option<Array2<i32>>,
    augmenter: Arc<dyn Augmenter>,
    source: BatchSource,
    mode: Mode,
    seed: Seed,
    sink: Option<DebugSink>,
}

impl std::fmt::Debug for ImageFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFlow")
            .field("files", &self.files.len())
            .field("augmenter", &self.augmenter.name())
            .field("source", &self.source)
            .field("mode", &self.mode)
            .finish()
    }
}

impl ImageFlow {
    /// Create a flow builder.
    #[must_use]
    pub fn builder(files: Vec<PathBuf>, augmenter: Arc<dyn Augmenter>) -> ImageFlowBuilder {
        ImageFlowBuilder::new(files, augmenter)
    }

    /// Builder for a training flow: shuffled, seeded from the run context.
    pub fn for_training(
        ctx: &mut RunContext,
        files: Vec<PathBuf>,
        augmenter: Arc<dyn Augmenter>,
    ) -> ImageFlowBuilder {
        ImageFlowBuilder::new(files, augmenter)
            .shuffle(true)
            .seed(ctx.next_training())
    }

    /// Builder for a validation flow: sequential, seeded from the run context.
    pub fn for_validation(
        ctx: &mut RunContext,
        files: Vec<PathBuf>,
        augmenter: Arc<dyn Augmenter>,
    ) -> ImageFlowBuilder {
        ImageFlowBuilder::new(files, augmenter)
            .shuffle(false)
            .seed(ctx.next_validation())
    }

    /// Produce the next batch.
    ///
    /// # Errors
    ///
    /// Any decode or augmentation failure aborts the whole batch. The cursor
    /// has already advanced past it.
    pub fn next_batch(&self) -> Result<Batch> {
        let IndexBatch {
            indices,
            epoch,
            first_draw,
        } = self.source.next_indices();

        let tensors: Vec<Array3<f32>> = indices
            .par_iter()
            .enumerate()
            .map(|(i, &idx)| self.load_one(idx, first_draw + i as u64))
            .collect::<Result<_>>()?;

        let (h, w, c) = self.augmenter.target_size().shape();
        let mut images = Array4::<f32>::zeros((indices.len(), h, w, c));
        for (i, x) in tensors.iter().enumerate() {
            if x.dim() != (h, w, c) {
                return Err(DataError::Shape(format!(
                    "{} produced {:?}, expected {:?}",
                    self.augmenter.name(),
                    x.dim(),
                    (h, w, c)
                )));
            }
            images.index_axis_mut(Axis(0), i).assign(x);
        }

        if let Some(sink) = &self.sink {
            let mut rng = self.seed.derive("preview").stream_rng(first_draw);
            for (i, &idx) in indices.iter().enumerate() {
                match sink.write(&self.files[idx], images.index_axis(Axis(0), i), &mut rng) {
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(dir = %sink.dir().display(), error = %e, "preview failed, disabling sink");
                        sink.close();
                        break;
                    }
                }
            }
        }

        let labels = match self.mode {
            Mode::Fit => self
                .labels
                .as_ref()
                .map(|y| y.select(Axis(0), &indices)),
            Mode::Predict => None,
        };

        tracing::trace!(epoch, size = indices.len(), "issued batch");
        Ok(Batch {
            images,
            labels,
            indices,
            epoch,
        })
    }

    fn load_one(&self, idx: usize, draw: u64) -> Result<Array3<f32>> {
        let path = &self.files[idx];
        let img = image::open(path)
            .map_err(|e| DataError::image(path, e))?
            .to_rgb8();
        let mut rng = self.seed.stream_rng(draw);
        Ok(self.augmenter.augment(img, &mut rng)?)
    }

    /// Iterate over batches by shared reference. The iterator never ends.
    #[must_use]
    pub fn iter(&self) -> FlowIter<'_> {
        FlowIter { flow: self }
    }

    /// Files of the flow in corpus order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Path of corpus index `idx`.
    #[must_use]
    pub fn file(&self, idx: usize) -> Option<&Path> {
        self.files.get(idx).map(PathBuf::as_path)
    }

    /// Full label array in corpus order, present in fit mode.
    #[must_use]
    pub fn labels(&self) -> Option<&Array2<i32>> {
        self.labels.as_ref()
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the flow has no files; never true for a built flow.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Batches per epoch.
    #[must_use]
    pub fn steps_per_epoch(&self) -> usize {
        self.source.steps_per_epoch()
    }

    /// Current epoch.
    #[must_use]
    pub fn epoch(&self) -> usize {
        self.source.epoch()
    }

    /// Output mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Preview sink, if configured.
    #[must_use]
    pub fn sink(&self) -> Option<&DebugSink> {
        self.sink.as_ref()
    }
}

impl Iterator for ImageFlow {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

/// Borrowing iterator over an [`ImageFlow`].
#[derive(Debug)]
pub struct FlowIter<'a> {
    flow: &'a ImageFlow,
}

impl Iterator for FlowIter<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.flow.next_batch())
    }
}

/// Builder for [`ImageFlow`].
pub struct ImageFlowBuilder {
    files: Vec<PathBuf>,
    augmenter: Arc<dyn Augmenter>,
    config: FlowConfig,
}

impl ImageFlowBuilder {
    /// Create a builder with default options.
    #[must_use]
    pub fn new(files: Vec<PathBuf>, augmenter: Arc<dyn Augmenter>) -> Self {
        Self {
            files,
            augmenter,
            config: FlowConfig::default(),
        }
    }

    /// Replace all options at once.
    #[must_use]
    pub fn config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the batch size.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Enable or disable per-epoch reshuffling.
    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    /// Set the output mode.
    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Keep only these label columns.
    #[must_use]
    pub fn label_positions(mut self, positions: Vec<usize>) -> Self {
        self.config.label_positions = Some(positions);
        self
    }

    /// Set the random seed.
    #[must_use]
    pub fn seed(mut self, seed: Seed) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Write previews of the first augmented samples to `dir`.
    #[must_use]
    pub fn save_to_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.save_to_dir = Some(dir.into());
        self
    }

    /// Cap the number of previews written.
    #[must_use]
    pub fn save_limit(mut self, limit: usize) -> Self {
        self.config.save_limit = limit;
        self
    }

    /// Build the flow.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero batch size, an empty file list, or (in fit
    /// mode) unparsable or ragged file-name labels.
    pub fn build(self) -> Result<ImageFlow> {
        let FlowConfig {
            batch_size,
            shuffle,
            mode,
            label_positions,
            seed,
            save_to_dir,
            save_format,
            save_limit,
        } = self.config;
        let seed = seed.unwrap_or_else(Seed::from_entropy);

        let source = BatchSource::new(
            self.files.len(),
            batch_size,
            shuffle,
            Some(seed.derive("permutation")),
        )?;

        let labels = match mode {
            Mode::Fit => Some(label_matrix(&self.files, label_positions.as_deref())?),
            Mode::Predict => None,
        };

        let sink = match save_to_dir {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                Some(DebugSink::new(dir).format(save_format).limit(save_limit))
            }
            None => None,
        };

        tracing::info!(
            files = self.files.len(),
            batch_size,
            shuffle,
            %mode,
            augmenter = self.augmenter.name(),
            "built image flow"
        );

        Ok(ImageFlow {
            files: self.files,
            labels,
            augmenter: self.augmenter,
            source,
            mode,
            seed,
            sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgstack_core::{Passthrough, TargetSize};
    use std::collections::HashSet;

    fn write_corpus(dir: &Path, n: usize) -> Vec<PathBuf> {
        (0..n)
            .map(|i| {
                let path = dir.join(format!("img{i}_{}_{}.png", i % 2, (i + 1) % 2));
                image::RgbImage::from_pixel(8, 6, image::Rgb([i as u8 * 10, 0, 255]))
                    .save(&path)
                    .unwrap();
                path
            })
            .collect()
    }

    fn passthrough() -> Arc<dyn Augmenter> {
        Arc::new(Passthrough::new(TargetSize::new(4, 4).unwrap()))
    }

    #[test]
    fn test_source_sequential_wraps() {
        let source = BatchSource::new(5, 2, false, None).unwrap();
        let seen: Vec<Vec<usize>> = (0..4).map(|_| source.next_indices().indices).collect();
        assert_eq!(seen, vec![vec![0, 1], vec![2, 3], vec![4], vec![0, 1]]);
        assert_eq!(source.epoch(), 1);
        assert_eq!(source.steps_per_epoch(), 3);
    }

    #[test]
    fn test_source_small_corpus_never_empty() {
        let source = BatchSource::new(3, 8, true, Some(Seed::new(1))).unwrap();
        for _ in 0..4 {
            let batch = source.next_indices();
            assert_eq!(batch.indices.len(), 3);
        }
        assert_eq!(source.epoch(), 4);
    }

    #[test]
    fn test_source_shuffled_epoch_is_permutation() {
        let source = BatchSource::new(10, 3, true, Some(Seed::new(4))).unwrap();
        for _ in 0..3 {
            let mut epoch: Vec<usize> = (0..source.steps_per_epoch())
                .flat_map(|_| source.next_indices().indices)
                .collect();
            epoch.sort_unstable();
            assert_eq!(epoch, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_source_rejects_bad_config() {
        assert!(matches!(
            BatchSource::new(4, 0, false, None).unwrap_err(),
            DataError::InvalidBatchSize(_)
        ));
        assert!(matches!(
            BatchSource::new(0, 4, false, None).unwrap_err(),
            DataError::EmptyDataset
        ));
    }

    #[test]
    fn test_concurrent_consumers_get_disjoint_indices() {
        let source = Arc::new(BatchSource::new(400, 4, true, Some(Seed::new(9))).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    (0..25).flat_map(|_| source.next_indices().indices).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for idx in h.join().unwrap() {
                assert!(seen.insert(idx), "index {idx} issued twice");
            }
        }
        assert_eq!(seen.len(), 400);
    }

    #[test]
    fn test_flow_fit_batches() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_corpus(dir.path(), 5);
        let flow = ImageFlow::builder(files, passthrough())
            .batch_size(2)
            .label_positions(vec![1])
            .build()
            .unwrap();

        let batch = flow.next_batch().unwrap();
        assert_eq!(batch.images.dim(), (2, 4, 4, 3));
        let labels = batch.labels.unwrap();
        assert_eq!(labels.shape(), &[2, 1]);
        assert_eq!(labels[[0, 0]], 1);
        assert_eq!(labels[[1, 0]], 0);
        assert_eq!(batch.indices, vec![0, 1]);
    }

    #[test]
    fn test_flow_predict_has_no_labels() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_corpus(dir.path(), 3);
        let flow = ImageFlow::builder(files, passthrough())
            .batch_size(2)
            .mode(Mode::Predict)
            .build()
            .unwrap();
        let batches: Vec<Batch> = flow.iter().take(3).map(|b| b.unwrap()).collect();
        assert!(batches.iter().all(|b| b.labels.is_none()));
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[2].epoch, 1);
    }

    #[test]
    fn test_flow_missing_file_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = write_corpus(dir.path(), 2);
        files.push(dir.path().join("gone_1_0.png"));
        let flow = ImageFlow::builder(files, passthrough())
            .batch_size(3)
            .build()
            .unwrap();
        assert!(matches!(flow.next_batch().unwrap_err(), DataError::Image { .. }));
    }

    #[test]
    fn test_flow_rejects_ragged_labels() {
        let files = vec![PathBuf::from("a_1_0.png"), PathBuf::from("b_1.png")];
        let err = ImageFlow::builder(files, passthrough()).build().unwrap_err();
        assert!(matches!(err, DataError::Shape(_)));
    }

    #[test]
    fn test_flow_writes_previews() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("previews");
        let files = write_corpus(dir.path(), 4);
        let flow = ImageFlow::builder(files, passthrough())
            .batch_size(4)
            .save_to_dir(&out)
            .build()
            .unwrap();
        flow.next_batch().unwrap();
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 4);
        assert_eq!(flow.sink().unwrap().written(), 4);
    }

    #[test]
    fn test_flow_survives_failing_previews() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("previews");
        let files = write_corpus(dir.path(), 4);
        let config = FlowConfig {
            batch_size: 2,
            save_to_dir: Some(out.clone()),
            save_format: "bogus".to_string(),
            ..Default::default()
        };
        let flow = ImageFlow::builder(files, passthrough()).config(config).build().unwrap();

        let batch = flow.next_batch().unwrap();
        assert_eq!(batch.images.dim(), (2, 4, 4, 3));
        assert!(flow.next_batch().is_ok());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn test_run_context_flows() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_corpus(dir.path(), 4);
        let mut ctx = RunContext::with_seed(Seed::new(1));

        let train = ImageFlow::for_training(&mut ctx, files.clone(), passthrough())
            .batch_size(2)
            .build()
            .unwrap();
        let valid = ImageFlow::for_validation(&mut ctx, files, passthrough())
            .batch_size(2)
            .build()
            .unwrap();

        assert_eq!(ctx.training_times(), 1);
        assert_eq!(ctx.validation_times(), 1);
        assert_eq!(valid.next_batch().unwrap().indices, vec![0, 1]);
        assert_eq!(train.steps_per_epoch(), 2);
    }

    #[test]
    fn test_batch_to_tensors() {
        use burn_ndarray::NdArray;

        let dir = tempfile::tempdir().unwrap();
        let files = write_corpus(dir.path(), 2);
        let flow = ImageFlow::builder(files, passthrough())
            .batch_size(2)
            .build()
            .unwrap();
        let batch = flow.next_batch().unwrap();
        let (x, y) = batch.to_tensors::<NdArray>(&Default::default());
        assert_eq!(x.dims(), [2, 4, 4, 3]);
        assert_eq!(y.unwrap().dims(), [2, 2]);
    }
}
