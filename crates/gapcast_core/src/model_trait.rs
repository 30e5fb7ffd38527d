//! The forecasting model interface shared by every architecture.
//!
//! Models differ in what they can do: some separate context reconstruction from
//! extrapolation, some produce a latent code, some consume the ground-truth
//! forecast window for teacher forcing. Each model declares this once through
//! [`Capabilities`] and the training protocol dispatches on those flags.

use burn::module::{Module, ModuleVisitor};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Capability flags declared by a model at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// `forward` returns a latent code and `encode` produces latent targets.
    pub latent: bool,
    /// `predict` separates context reconstruction from a forecast of arbitrary horizon.
    pub horizon_predict: bool,
    /// `forward` accepts the true forecast window during training.
    pub teacher_forcing: bool,
}

/// Architecture family, used to select loss normalization and optimizer presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Recurrent cell unrolled over context then forecast steps.
    #[serde(alias = "convlstm")]
    Recurrent,
    /// Learned latent dynamics anchored on a frozen autoencoder.
    #[serde(alias = "tikan")]
    LatentDynamics,
    /// Masked transformer reusing a frozen autoencoder's decoder.
    #[serde(alias = "timae")]
    MaskedSequence,
}

impl ModelFamily {
    /// Short architecture name, as used on the command line and in checkpoint metadata.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ModelFamily::Recurrent => "convlstm",
            ModelFamily::LatentDynamics => "tikan",
            ModelFamily::MaskedSequence => "timae",
        }
    }

    /// Parse a family from its short name or a common alias.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "convlstm" | "recurrent" | "lstm" => Some(ModelFamily::Recurrent),
            "tikan" | "kan" | "latent_dynamics" => Some(ModelFamily::LatentDynamics),
            "timae" | "mae" | "masked_sequence" => Some(ModelFamily::MaskedSequence),
            _ => None,
        }
    }
}

/// Input to a forecasting call.
#[derive(Debug, Clone)]
pub struct ForecastInput<B: Backend> {
    /// Interpolated context window `(B, T_in, C, H, W)`.
    pub context: Tensor<B, 5>,
    /// Observation mask `(B, T_in)`; read-only.
    pub mask: Tensor<B, 2, Bool>,
    /// True forecast window, only set for teacher-forced training.
    pub teacher: Option<Tensor<B, 5>>,
}

impl<B: Backend> ForecastInput<B> {
    /// Input without teacher forcing.
    pub fn new(context: Tensor<B, 5>, mask: Tensor<B, 2, Bool>) -> Self {
        Self {
            context,
            mask,
            teacher: None,
        }
    }

    /// Attach the true forecast window for teacher forcing.
    #[must_use]
    pub fn with_teacher(mut self, target: Tensor<B, 5>) -> Self {
        self.teacher = Some(target);
        self
    }
}

/// Output of [`ForecastingModel::forward`].
#[derive(Debug, Clone)]
pub struct Forecast<B: Backend> {
    /// Reconstructed context followed by forecast, `(B, T_in + T_out, C, H, W)`.
    pub sequence: Tensor<B, 5>,
    /// Per-frame latent code produced while forecasting, `(B, T_in + T_out, D)`.
    pub latent: Option<Tensor<B, 3>>,
}

/// Output of [`ForecastingModel::predict`].
#[derive(Debug, Clone)]
pub struct Prediction<B: Backend> {
    /// Reconstruction of the context window.
    pub reconstruction: Tensor<B, 5>,
    /// Extrapolation over the requested horizon.
    pub forecast: Tensor<B, 5>,
}

impl<B: Backend> Prediction<B> {
    /// Reconstruction and forecast joined along time.
    #[must_use]
    pub fn into_sequence(self) -> Tensor<B, 5> {
        Tensor::cat(vec![self.reconstruction, self.forecast], 1)
    }
}

/// Trait for spatiotemporal forecasting models driven by the training protocol.
pub trait ForecastingModel<B: Backend>: Module<B> {
    /// Capabilities declared at construction.
    fn capabilities(&self) -> Capabilities;

    /// Architecture family.
    fn family(&self) -> ModelFamily;

    /// Number of forecast steps produced by `forward`.
    fn forecast_steps(&self) -> usize;

    /// Context length the model was sized for, or `None` if any length works.
    fn context_steps(&self) -> Option<usize> {
        None
    }

    /// Forecast from an interpolated context.
    fn forward(&self, input: ForecastInput<B>) -> Forecast<B>;

    /// Reconstruct the context and extrapolate `horizon` steps.
    ///
    /// # Errors
    ///
    /// Models without [`Capabilities::horizon_predict`] return [`CoreError::Unsupported`].
    fn predict(&self, _input: ForecastInput<B>, _horizon: usize) -> Result<Prediction<B>> {
        Err(CoreError::Unsupported("predict".to_string()))
    }

    /// Encode a full ground-truth sequence into the latent target.
    ///
    /// Returns `None` for models without a latent space.
    fn encode(&self, _full: Tensor<B, 5>) -> Option<Tensor<B, 3>> {
        None
    }

    /// Re-assert inference mode on every frozen submodule.
    fn pin_frozen(&mut self) {}

    /// Visit the parameters of every frozen submodule.
    fn visit_frozen<V: ModuleVisitor<B>>(&self, _visitor: &mut V) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_names_round_trip() {
        for family in [
            ModelFamily::Recurrent,
            ModelFamily::LatentDynamics,
            ModelFamily::MaskedSequence,
        ] {
            assert_eq!(ModelFamily::from_name(family.name()), Some(family));
        }
        assert_eq!(ModelFamily::from_name("MAE"), Some(ModelFamily::MaskedSequence));
        assert_eq!(ModelFamily::from_name("resnet"), None);
    }

    #[test]
    fn test_family_serde_accepts_short_names() {
        let family: ModelFamily = serde_json::from_str("\"timae\"").unwrap();
        assert_eq!(family, ModelFamily::MaskedSequence);
        assert_eq!(serde_json::to_string(&ModelFamily::Recurrent).unwrap(), "\"recurrent\"");
    }

    #[test]
    fn test_default_capabilities() {
        let caps = Capabilities::default();
        assert!(!caps.latent && !caps.horizon_predict && !caps.teacher_forcing);
    }
}
