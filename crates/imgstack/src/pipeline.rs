//! One k-fold training run assembled from a single configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use imgstack_core::{ChannelStats, RunContext, Seed};
use imgstack_data::{ClassBalancer, FoldTable, ImageFlow, KFoldFiles, KFoldResolver, StatsCache, DEFAULT_PREVIEW_LIMIT};
use imgstack_ensemble::{StackingConfig, StackingEnsemble};
use imgstack_transforms::{AugmentConfig, ImageAugmenter};

/// Everything needed to feed one held-out fold to a trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// `fold_id,filename` table.
    pub fold_table: PathBuf,
    /// Directories holding the images named in the table.
    pub data_dirs: Vec<PathBuf>,
    /// Fold used for validation.
    pub held_out: usize,
    /// Shuffle the resolved training list.
    pub shuffle_train: bool,
    /// Up-sample the minority class of this label before training.
    pub upsample_position: Option<usize>,
    /// Label columns the flows emit; all of them if `None`.
    pub label_positions: Option<Vec<usize>>,
    /// Samples per batch.
    pub batch_size: usize,
    /// Cached per-channel mean.
    pub mean_path: PathBuf,
    /// Cached per-channel variance proxy.
    pub std_path: PathBuf,
    /// Training augmentation; validation uses its deterministic counterpart.
    pub augment: AugmentConfig,
    /// Directory receiving previews of augmented training samples.
    pub preview_dir: Option<PathBuf>,
    /// Maximum number of previews.
    pub preview_limit: usize,
    /// Root seed of the run.
    pub seed: Seed,
    /// Stacking options.
    pub stacking: StackingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fold_table: PathBuf::from("folds.txt"),
            data_dirs: Vec::new(),
            held_out: 0,
            shuffle_train: true,
            upsample_position: None,
            label_positions: None,
            batch_size: 32,
            mean_path: PathBuf::from("mean.npy"),
            std_path: PathBuf::from("std.npy"),
            augment: AugmentConfig::default(),
            preview_dir: None,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            seed: Seed::new(42),
            stacking: StackingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Check the options that do not need the file system.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] without data directories or with a
    /// zero batch size, and the augmenter's error for invalid ranges.
    pub fn validate(&self) -> Result<()> {
        if self.data_dirs.is_empty() {
            return Err(PipelineError::Config("data_dirs is empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be positive".to_string()));
        }
        self.augment.validate()?;
        Ok(())
    }
}

/// Resolved file lists of one fold plus the flows built on them.
///
/// # Example
///
/// ```rust,ignore
/// use imgstack::{Pipeline, PipelineConfig};
/// use imgstack::core::RunContext;
///
/// let mut pipeline = Pipeline::new(PipelineConfig::from_json_file("run.json")?)?;
/// let mut ctx = RunContext::with_seed(pipeline.config().seed);
/// let train = pipeline.training_flow(&mut ctx)?;
/// let valid = pipeline.validation_flow(&mut ctx)?;
/// ```
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    files: KFoldFiles,
    stats: Option<ChannelStats>,
}

impl Pipeline {
    /// Validate `config` and resolve the train/validation files of its held-out
    /// fold.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let table = FoldTable::read(&config.fold_table)?;
        if config.held_out >= table.n_folds() {
            return Err(PipelineError::Config(format!(
                "held_out fold {} but the table has {} folds",
                config.held_out,
                table.n_folds()
            )));
        }

        let resolver = config
            .data_dirs
            .iter()
            .fold(KFoldResolver::new(table), |r, dir| r.data_dir(dir))
            .shuffle_train(config.shuffle_train)
            .seed(config.seed.derive("kfold"));
        let files = resolver.resolve(config.held_out)?;

        Ok(Self {
            config,
            files,
            stats: None,
        })
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolved file lists.
    #[must_use]
    pub fn files(&self) -> &KFoldFiles {
        &self.files
    }

    /// Corpus statistics of the training files, read from the cache or
    /// computed and saved on first use.
    pub fn channel_stats(&mut self) -> Result<ChannelStats> {
        if let Some(stats) = self.stats {
            return Ok(stats);
        }
        let cache = StatsCache::new(&self.config.mean_path, &self.config.std_path);
        let stats = cache.check_or_compute(&self.files.train, f64::from(self.config.augment.rescale))?;
        self.stats = Some(stats);
        Ok(stats)
    }

    /// Training files, up-sampled when an up-sampling label is configured.
    pub fn training_files(&self) -> Result<Vec<PathBuf>> {
        match self.config.upsample_position {
            Some(position) => {
                let balanced = ClassBalancer::new(self.config.seed.derive("balance"))
                    .balance(&self.files.train, &[position])?;
                tracing::info!(
                    position,
                    before = self.files.train.len(),
                    after = balanced.len(),
                    "up-sampled training files"
                );
                Ok(balanced)
            }
            None => Ok(self.files.train.clone()),
        }
    }

    fn augmenter(&mut self, config: AugmentConfig) -> Result<Arc<ImageAugmenter>> {
        let stats = if config.needs_stats() {
            Some(self.channel_stats()?)
        } else {
            None
        };
        Ok(Arc::new(ImageAugmenter::new(config, stats)?))
    }

    /// Shuffled, augmenting flow over the training files.
    pub fn training_flow(&mut self, ctx: &mut RunContext) -> Result<ImageFlow> {
        let files = self.training_files()?;
        let augmenter = self.augmenter(self.config.augment.clone())?;

        let mut builder = ImageFlow::for_training(ctx, files, augmenter).batch_size(self.config.batch_size);
        if let Some(positions) = &self.config.label_positions {
            builder = builder.label_positions(positions.clone());
        }
        if let Some(dir) = &self.config.preview_dir {
            builder = builder.save_to_dir(dir).save_limit(self.config.preview_limit);
        }
        Ok(builder.build()?)
    }

    /// Sequential flow over the validation files with random augmentation
    /// turned off.
    pub fn validation_flow(&mut self, ctx: &mut RunContext) -> Result<ImageFlow> {
        let augmenter = self.augmenter(self.config.augment.for_evaluation())?;

        let mut builder =
            ImageFlow::for_validation(ctx, self.files.valid.clone(), augmenter).batch_size(self.config.batch_size);
        if let Some(positions) = &self.config.label_positions {
            builder = builder.label_positions(positions.clone());
        }
        Ok(builder.build()?)
    }

    /// Stacker over the configured prediction directories.
    #[must_use]
    pub fn ensemble(&self) -> StackingEnsemble {
        StackingEnsemble::new(self.config.stacking.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "data_dirs": ["data/train"],
            "held_out": 2,
            "augment": {"horizontal_flip": true},
            "stacking": {"top_n": 3}
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.held_out, 2);
        assert!(config.augment.horizontal_flip);
        assert_eq!(config.stacking.top_n, 3);
        assert_eq!(config.batch_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            PipelineConfig::default().validate(),
            Err(PipelineError::Config(_))
        ));
        let config = PipelineConfig {
            data_dirs: vec![PathBuf::from("x")],
            augment: AugmentConfig::default().with_rotation_range(-5.0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Core(_))));
    }
}
