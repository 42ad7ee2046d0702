//! Error type of the assembled pipeline.

use thiserror::Error;

/// Result type alias using [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised while assembling or running a [`crate::Pipeline`].
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Core error.
    #[error(transparent)]
    Core(#[from] imgstack_core::CoreError),

    /// Data error.
    #[error(transparent)]
    Data(#[from] imgstack_data::DataError),

    /// Ensemble error.
    #[error(transparent)]
    Ensemble(#[from] imgstack_ensemble::EnsembleError),

    /// Configuration file could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
