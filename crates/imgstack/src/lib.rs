//! # imgstack
//!
//! Image-classification data pipeline and stacking ensemble.
//!
//! imgstack streams a labelled image corpus into augmented batches and
//! combines the predictions of several trained classifiers:
//!
//! - **Data**: file-name labels, k-fold resolution, class up-sampling,
//!   streaming channel statistics and a thread-safe batch iterator
//! - **Transforms**: crop, flip, random affine, standardization and PCA color
//!   jitter
//! - **Ensemble**: correlation pruning, greedy model selection and boosted-tree
//!   meta-models per label
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use imgstack::prelude::*;
//!
//! let config = PipelineConfig::from_json_file("run.json")?;
//! let mut pipeline = Pipeline::new(config)?;
//! let mut ctx = RunContext::with_seed(Seed::new(42));
//!
//! let train = pipeline.training_flow(&mut ctx)?;
//! for batch in train.iter().take(train.steps_per_epoch()) {
//!     let batch = batch?;
//!     // batch.images: (B, H, W, 3), batch.labels: (B, L)
//! }
//!
//! pipeline.ensemble().train_all_label()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod pipeline;

pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineConfig};

// Re-export all crates
pub use imgstack_core as core;
pub use imgstack_data as data;
pub use imgstack_ensemble as ensemble;
pub use imgstack_transforms as transforms;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use imgstack::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{Pipeline, PipelineConfig, PipelineError};

    // Core types
    pub use imgstack_core::{Augmenter, ChannelStats, Mode, RunContext, Seed, TargetSize};

    // Data
    pub use imgstack_data::{
        label_matrix, labels_for, Batch, ClassBalancer, FoldTable, ImageFlow, KFoldFiles,
        KFoldResolver, StatsCache, Welford,
    };

    // Transforms
    pub use imgstack_transforms::{AugmentConfig, ImageAugmenter};

    // Ensemble
    pub use imgstack_ensemble::{
        Booster, BoosterParams, MetricKind, StackingConfig, StackingEnsemble, StackingInputs,
    };
}
