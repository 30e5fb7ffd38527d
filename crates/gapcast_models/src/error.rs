//! Error types for gapcast_models.

use thiserror::Error;

use crate::checkpoint::CheckpointError;

/// Result type alias using [`ModelError`].
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while building a model.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Invalid model configuration.
    #[error("Invalid model config: {0}")]
    Config(String),

    /// Pretrained submodule could not be loaded.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] gapcast_core::CoreError),
}
