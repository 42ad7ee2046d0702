//! Error types for imgstack_core.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur in imgstack_core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// An argument had an unrecognized or out-of-range value.
    #[error("Invalid value: {0}")]
    Value(String),

    /// A step ran before the data it depends on was prepared.
    #[error("Missing prerequisite: {0}")]
    Prereq(String),

    /// Array shape did not match what the operation expects.
    #[error("Invalid shape: expected {expected}, got {got}")]
    Shape {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
