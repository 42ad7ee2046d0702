//! # imgstack_ensemble
//!
//! Stacking ensemble over the predictions of several base image classifiers.
//!
//! This crate provides:
//! - [`Booster`], a logistic gradient-boosted tree model used as meta-model
//! - [`ParamSearch`] for grid or random search of booster parameters
//! - [`correlation_prune`] to drop redundant base models
//! - [`sparse_greedy_f2`] and other [`EvalMetric`]s
//! - [`StackingEnsemble`], per-label greedy model selection, training,
//!   test prediction and meta-level out-of-fold prediction
//!
//! ## Example
//!
//! ```rust,ignore
//! use imgstack_ensemble::{StackingConfig, StackingEnsemble};
//!
//! let config = StackingConfig::new("oof", "test", "models");
//! let ensemble = StackingEnsemble::new(config);
//! ensemble.train_all_label()?;
//! let predictions = ensemble.build_and_predict_test()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod correlation;
mod error;
mod gbdt;
pub mod metrics;
pub mod search;
mod stacker;

pub use correlation::{correlation_prune, pearson};
pub use error::{EnsembleError, Result};
pub use gbdt::{Booster, BoosterParams, Tree};
pub use metrics::{f_beta, log_loss, roc_auc, sparse_greedy_f2, EvalMetric, MetricKind};
pub use search::{ParamSearch, ParamSpace, SearchResult, SearchStrategy, Trial};
pub use stacker::{
    cross_validate, CvOutcome, LabelSelection, SelectionStep, StackingConfig, StackingEnsemble, StackingInputs,
    FOLDS_FILE, LABELS_FILE, TEST_PREDICTIONS_FILE,
};
