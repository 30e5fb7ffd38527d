//! Error types for training.

use thiserror::Error;

/// Result type alias for training operations.
pub type Result<T> = std::result::Result<T, TrainError>;

/// Errors that can occur while training, evaluating or predicting.
#[derive(Error, Debug)]
pub enum TrainError {
    /// A context window could not be repaired.
    #[error("Interpolation failed: {0}")]
    Interpolation(#[from] gapcast_transforms::InterpolationError),

    /// Gradients were found on parameters outside the trainable set.
    #[error("Gradient reached {count} frozen parameter(s)")]
    FrozenParameterViolation {
        /// Number of offending parameters.
        count: usize,
    },

    /// An evaluation phase was run on a gradient-tracking backend.
    #[error("Phase '{0}' must not track gradients; pass model.valid() and batch.inner()")]
    GradientTracking(String),

    /// Prediction and reference shapes disagree.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Checkpoint error.
    #[error(transparent)]
    Checkpoint(#[from] gapcast_models::CheckpointError),

    /// Model construction or configuration error.
    #[error("Model error: {0}")]
    Model(#[from] gapcast_models::ModelError),

    /// Data error.
    #[error("Data error: {0}")]
    Data(#[from] gapcast_data::DataError),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] gapcast_core::CoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Visualization sink failed.
    #[error("Visualization failed: {0}")]
    Visualization(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}
