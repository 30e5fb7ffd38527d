//! Protocol phases.

use serde::{Deserialize, Serialize};

/// One of the four mutually exclusive phases of the training protocol.
///
/// ```rust
/// use gapcast_core::Phase;
///
/// assert!(Phase::Train.tracks_gradients());
/// assert_eq!(Phase::Validate.log_prefix(), "val");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Phase {
    /// Optimization step: loss with gradients.
    #[default]
    Train,
    /// Loss without gradients.
    Validate,
    /// Loss without gradients plus image-quality metrics.
    Test,
    /// Forecast only, paired with an error map for inspection.
    Predict,
}

impl Phase {
    /// Prefix used for scalar names logged in this phase.
    #[must_use]
    pub const fn log_prefix(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Validate => "val",
            Phase::Test => "test",
            Phase::Predict => "predict",
        }
    }

    /// Whether this phase runs on the autodiff backend.
    #[must_use]
    pub const fn tracks_gradients(&self) -> bool {
        matches!(self, Phase::Train)
    }

    /// Whether the model is asked for its horizon-aware `predict` when available.
    #[must_use]
    pub const fn prefers_horizon_predict(&self) -> bool {
        !matches!(self, Phase::Train)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.log_prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_flags() {
        assert!(Phase::Train.tracks_gradients());
        assert!(!Phase::Validate.tracks_gradients());
        assert!(!Phase::Test.tracks_gradients());
        assert!(!Phase::Predict.tracks_gradients());
    }

    #[test]
    fn test_horizon_preference() {
        assert!(!Phase::Train.prefers_horizon_predict());
        assert!(Phase::Validate.prefers_horizon_predict());
        assert!(Phase::Predict.prefers_horizon_predict());
    }

    #[test]
    fn test_display() {
        assert_eq!(Phase::Test.to_string(), "test");
    }
}
