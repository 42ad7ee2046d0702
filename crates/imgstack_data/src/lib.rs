//! # imgstack_data
//!
//! Data handling for the imgstack image pipeline.
//!
//! This crate provides:
//! - File-name label parsing ([`labels_for`], [`label_matrix`])
//! - K-fold file resolution from a fold table ([`FoldTable`], [`KFoldResolver`])
//! - Minority-class up-sampling for one label ([`ClassBalancer`])
//! - Streaming per-channel mean/std over a corpus ([`Welford`], [`StatsCache`])
//! - An infinite, thread-safe augmenting batch iterator ([`ImageFlow`])
//! - Preview writing of augmented samples ([`DebugSink`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use imgstack_data::{FoldTable, ImageFlow, KFoldResolver, StatsCache};
//! use imgstack_core::{Passthrough, Seed, TargetSize};
//!
//! let table = FoldTable::read("folds.txt")?;
//! let split = KFoldResolver::new(table)
//!     .data_dir("data/train")
//!     .seed(Seed::new(42))
//!     .resolve(0)?;
//!
//! let stats = StatsCache::new("mean.npy", "std.npy").check_or_compute(&split.train, 1.0)?;
//!
//! let flow = ImageFlow::builder(split.train, Arc::new(Passthrough::new(TargetSize::square(256))))
//!     .batch_size(32)
//!     .shuffle(true)
//!     .build()?;
//! let batch = flow.next_batch()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod balance;
mod error;
mod files;
mod kfold;
mod labels;
mod loader;
mod moments;
mod sink;

pub use balance::{balance, class_counts, ClassBalancer};
pub use error::{DataError, Result};
pub use files::{divide_ranges, is_image_name, list_image_names, list_image_paths, load_labels, IMAGE_EXTENSIONS};
pub use kfold::{resolve, FoldTable, KFoldFiles, KFoldResolver};
pub use labels::{label_matrix, labels_for, labels_for_all, rename_strip_kind_prefix, strip_kind_prefix};
pub use loader::{Batch, BatchSource, FlowConfig, FlowIter, ImageFlow, ImageFlowBuilder, IndexBatch};
pub use moments::{accumulate, accumulate_par, fold_means, image_channel_mean, StatsCache, Welford};
pub use sink::{to_preview, DebugSink, DEFAULT_PREVIEW_LIMIT};
