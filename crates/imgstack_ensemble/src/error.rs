//! Error types for the ensemble stacker.

use thiserror::Error;

/// Result type alias for ensemble operations.
pub type Result<T> = std::result::Result<T, EnsembleError>;

/// Errors that can occur while training or applying the stacker.
#[derive(Error, Debug)]
pub enum EnsembleError {
    /// Input files are missing or inconsistent with each other.
    #[error("Data error: {0}")]
    Data(String),

    /// An array does not have the expected shape.
    #[error("Shape error: expected {expected}, got {got}")]
    Shape {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },

    /// The hyperparameter search could not run.
    #[error("Search error: {0}")]
    Search(String),

    /// Model artifacts could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Prediction was requested for a label with no trained model.
    #[error("No trained model for label {0}; run train first")]
    NotTrained(usize),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] imgstack_core::CoreError),

    /// Reading an `.npy` file failed.
    #[error("npy read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    /// Writing an `.npy` file failed.
    #[error("npy write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnsembleError {
    pub(crate) fn shape(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::Shape {
            expected: expected.into(),
            got: got.into(),
        }
    }
}
