//! Error types for gapcast_transforms.

use thiserror::Error;

/// Result type alias using [`InterpolationError`].
pub type Result<T> = std::result::Result<T, InterpolationError>;

/// Errors raised while repairing missing frames.
#[derive(Error, Debug)]
pub enum InterpolationError {
    /// Every context frame of a sample is unobserved; there is nothing to
    /// interpolate from. This is a data-quality fault in the source.
    #[error("sample {sample} has no observed context frames")]
    NoObservedFrames {
        /// Index of the offending sample within its batch.
        sample: usize,
    },

    /// The mask does not cover the sequence's time axis.
    #[error("mask has {mask} steps but sequence has {steps}")]
    MaskLength {
        /// Mask length.
        mask: usize,
        /// Sequence length.
        steps: usize,
    },

    /// The mask and the context disagree on the batch size.
    #[error("mask covers {mask} samples but context has {context}")]
    BatchSize {
        /// Mask rows.
        mask: usize,
        /// Context samples.
        context: usize,
    },

    /// Core error (mask readback).
    #[error("Core error: {0}")]
    Core(#[from] gapcast_core::CoreError),
}

impl InterpolationError {
    /// Attribute a per-sequence error to a sample within a batch.
    #[must_use]
    pub fn at_sample(self, index: usize) -> Self {
        match self {
            InterpolationError::NoObservedFrames { .. } => {
                InterpolationError::NoObservedFrames { sample: index }
            }
            other => other,
        }
    }
}
