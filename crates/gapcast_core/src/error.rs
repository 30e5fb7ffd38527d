//! Error types for gapcast_core.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur in gapcast_core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid tensor shape provided.
    #[error("Invalid shape: expected {expected}, got {got}")]
    InvalidShape {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },

    /// Shape mismatch between tensors.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The model does not declare the requested capability.
    #[error("Unsupported capability: {0}")]
    Unsupported(String),

    /// Tensor data could not be read back into host memory.
    #[error("Tensor data error: {0}")]
    TensorData(String),
}
