//! Error types for imgstack_data.

use thiserror::Error;

/// Result type alias using [`DataError`].
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur in data operations.
///
/// None of these are retried: the pipeline assumes a clean corpus and treats
/// every violation as a hard stop for the operation that hit it.
#[derive(Error, Debug)]
pub enum DataError {
    /// A file name or table line does not follow the expected format.
    #[error("Format error: {0}")]
    Format(String),

    /// Label rows or arrays have inconsistent widths.
    #[error("Shape error: {0}")]
    Shape(String),

    /// A class has no members where both are required.
    #[error("Imbalance error: {0}")]
    Imbalance(String),

    /// A step ran before the data it depends on was prepared.
    #[error("Missing prerequisite: {0}")]
    Prereq(String),

    /// An argument had an unrecognized or out-of-range value.
    #[error("Invalid value: {0}")]
    Value(String),

    /// Empty dataset.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Batch size error.
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(String),

    /// An image could not be decoded or encoded.
    #[error("Image error for {path}: {source}")]
    Image {
        /// File that failed.
        path: String,
        /// Decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Reading an `.npy` file failed.
    #[error("npy read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    /// Writing an `.npy` file failed.
    #[error("npy write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] imgstack_core::CoreError),
}

impl DataError {
    pub(crate) fn image(path: &std::path::Path, source: image::ImageError) -> Self {
        DataError::Image {
            path: path.display().to_string(),
            source,
        }
    }
}
