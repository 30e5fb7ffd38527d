//! Loss composition.
//!
//! A forecast is scored on two terms: the error in observable space over the full
//! (context + forecast) sequence, and, for models with a latent space, the error
//! between the latent code produced while forecasting and the frozen encoder's
//! code for the ground truth.

use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::*;
use burn::tensor::ElementConversion;
use gapcast_core::ModelFamily;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};

/// Statistic used to normalize each sub-loss under [`LossPolicy::ScaleNormalized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleStatistic {
    /// `||t||_2 / numel(t)`.
    #[default]
    NormPerElement,
    /// `mean(t^2)`; makes the loss invariant to uniform rescaling.
    MeanSquare,
}

impl ScaleStatistic {
    /// Compute the statistic of a reference tensor as a one-element tensor.
    pub fn scale<B: Backend, const D: usize>(&self, reference: Tensor<B, D>) -> Tensor<B, 1> {
        let numel = reference.shape().num_elements() as f64;
        let squared = reference.clone() * reference;
        match self {
            ScaleStatistic::NormPerElement => squared.sum().sqrt().div_scalar(numel),
            ScaleStatistic::MeanSquare => squared.mean(),
        }
    }
}

/// How the two sub-losses are combined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LossPolicy {
    /// `mse(pred, target) + latent_weight * mse(z_pred, z_target)`.
    Unnormalized {
        /// Weight of the latent term.
        latent_weight: f64,
    },
    /// Each term divided by the scale of its reference plus `eps`.
    ScaleNormalized {
        /// Floor added to every scale.
        eps: f64,
        /// Scale statistic.
        #[serde(default)]
        statistic: ScaleStatistic,
    },
}

impl Default for LossPolicy {
    fn default() -> Self {
        Self::Unnormalized { latent_weight: 0.5 }
    }
}

impl LossPolicy {
    /// Default floor for [`LossPolicy::ScaleNormalized`].
    pub const DEFAULT_EPS: f64 = 1e-8;

    /// Scale-normalized policy with the default floor.
    #[must_use]
    pub const fn scale_normalized(statistic: ScaleStatistic) -> Self {
        Self::ScaleNormalized {
            eps: Self::DEFAULT_EPS,
            statistic,
        }
    }

    /// Policy used by each architecture family.
    #[must_use]
    pub const fn for_family(family: ModelFamily) -> Self {
        match family {
            ModelFamily::Recurrent => Self::Unnormalized { latent_weight: 0.0 },
            ModelFamily::LatentDynamics => Self::Unnormalized { latent_weight: 0.5 },
            ModelFamily::MaskedSequence => Self::scale_normalized(ScaleStatistic::NormPerElement),
        }
    }
}

/// Composed loss plus its sub-losses, all as one-element tensors.
#[derive(Debug, Clone)]
pub struct ComposedLoss<B: Backend> {
    /// Value to optimize.
    pub loss: Tensor<B, 1>,
    /// Unweighted MSE over the full sequence.
    pub full_state: Tensor<B, 1>,
    /// Unweighted MSE between latents, when the model has a latent space.
    pub latent: Option<Tensor<B, 1>>,
}

impl<B: Backend> ComposedLoss<B> {
    /// Read the three values back to the host.
    pub fn values(&self) -> LossValues {
        LossValues {
            loss: self.loss.clone().into_scalar().elem::<f32>(),
            full_state: self.full_state.clone().into_scalar().elem::<f32>(),
            latent: self
                .latent
                .as_ref()
                .map(|latent| latent.clone().into_scalar().elem::<f32>()),
        }
    }
}

/// Host copy of a [`ComposedLoss`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LossValues {
    /// Composed loss.
    pub loss: f32,
    /// Full-state MSE.
    pub full_state: f32,
    /// Latent MSE, if any.
    pub latent: Option<f32>,
}

/// Combines reconstruction and latent consistency under a [`LossPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LossComposer {
    policy: LossPolicy,
}

impl LossComposer {
    /// Create a composer for a policy.
    pub fn new(policy: LossPolicy) -> Self {
        Self { policy }
    }

    /// Composer with the family's policy.
    pub fn for_family(family: ModelFamily) -> Self {
        Self::new(LossPolicy::for_family(family))
    }

    /// The active policy.
    pub fn policy(&self) -> LossPolicy {
        self.policy
    }

    /// Compose the loss.
    ///
    /// `latents` is `(z_pred, z_target)`. Without latents the result is the plain
    /// full-state MSE under every policy.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ShapeMismatch`] if prediction and target, or the two
    /// latents, differ in shape.
    pub fn compose<B: Backend>(
        &self,
        pred: Tensor<B, 5>,
        target: Tensor<B, 5>,
        latents: Option<(Tensor<B, 3>, Tensor<B, 3>)>,
    ) -> Result<ComposedLoss<B>> {
        if pred.dims() != target.dims() {
            return Err(TrainError::ShapeMismatch(format!(
                "prediction {:?} vs target {:?}",
                pred.dims(),
                target.dims()
            )));
        }
        let mse = MseLoss::new();
        let full_state = mse.forward(pred, target.clone(), Reduction::Mean);

        let Some((z_pred, z_target)) = latents else {
            return Ok(ComposedLoss {
                loss: full_state.clone(),
                full_state,
                latent: None,
            });
        };
        if z_pred.dims() != z_target.dims() {
            return Err(TrainError::ShapeMismatch(format!(
                "latent {:?} vs latent target {:?}",
                z_pred.dims(),
                z_target.dims()
            )));
        }
        let latent = mse.forward(z_pred, z_target.clone(), Reduction::Mean);

        let loss = match self.policy {
            LossPolicy::Unnormalized { latent_weight } => {
                full_state.clone() + latent.clone().mul_scalar(latent_weight)
            }
            LossPolicy::ScaleNormalized { eps, statistic } => {
                let full_scale = statistic.scale(target).add_scalar(eps);
                let latent_scale = statistic.scale(z_target).add_scalar(eps);
                full_state.clone().div(full_scale) + latent.clone().div(latent_scale)
            }
        };

        Ok(ComposedLoss {
            loss,
            full_state,
            latent: Some(latent),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn ramp(dims: [usize; 5], offset: f32) -> Tensor<TestBackend, 5> {
        let n: usize = dims.iter().product();
        let values: Vec<f32> = (0..n).map(|i| (i as f32 * 0.37).sin() + offset).collect();
        Tensor::from_data(TensorData::new(values, dims), &Default::default())
    }

    fn latent(dims: [usize; 3], offset: f32) -> Tensor<TestBackend, 3> {
        let n: usize = dims.iter().product();
        let values: Vec<f32> = (0..n).map(|i| (i as f32 * 0.11).cos() + offset).collect();
        Tensor::from_data(TensorData::new(values, dims), &Default::default())
    }

    #[test]
    fn test_no_latents_is_plain_mse() {
        let pred = ramp([2, 3, 1, 4, 4], 0.0);
        let target = ramp([2, 3, 1, 4, 4], 0.5);
        for policy in [
            LossPolicy::Unnormalized { latent_weight: 0.5 },
            LossPolicy::scale_normalized(ScaleStatistic::NormPerElement),
        ] {
            let values = LossComposer::new(policy)
                .compose(pred.clone(), target.clone(), None)
                .unwrap()
                .values();
            assert!((values.loss - 0.25).abs() < 1e-5);
            assert!((values.full_state - 0.25).abs() < 1e-5);
            assert!(values.latent.is_none());
        }
    }

    #[test]
    fn test_zero_latent_weight_reduces_to_mse() {
        let composer = LossComposer::new(LossPolicy::Unnormalized { latent_weight: 0.0 });
        let values = composer
            .compose(
                ramp([2, 3, 1, 4, 4], 0.0),
                ramp([2, 3, 1, 4, 4], 1.0),
                Some((latent([2, 3, 8], 0.0), latent([2, 3, 8], 3.0))),
            )
            .unwrap()
            .values();
        assert!((values.loss - values.full_state).abs() < 1e-6);
        assert!((values.latent.unwrap() - 9.0).abs() < 1e-4);
    }

    #[test]
    fn test_unnormalized_weights_latent_term() {
        let composer = LossComposer::new(LossPolicy::Unnormalized { latent_weight: 0.5 });
        let values = composer
            .compose(
                ramp([1, 2, 1, 2, 2], 0.0),
                ramp([1, 2, 1, 2, 2], 1.0),
                Some((latent([1, 2, 4], 0.0), latent([1, 2, 4], 2.0))),
            )
            .unwrap()
            .values();
        assert!((values.loss - (1.0 + 0.5 * 4.0)).abs() < 1e-4);
    }

    #[test]
    fn test_mean_square_is_scale_invariant() {
        let composer = LossComposer::new(LossPolicy::scale_normalized(ScaleStatistic::MeanSquare));
        let compose = |factor: f32| {
            composer
                .compose(
                    ramp([2, 3, 1, 4, 4], 0.2).mul_scalar(factor),
                    ramp([2, 3, 1, 4, 4], 0.7).mul_scalar(factor),
                    Some((
                        latent([2, 3, 8], 0.1).mul_scalar(factor),
                        latent([2, 3, 8], 0.4).mul_scalar(factor),
                    )),
                )
                .unwrap()
                .values()
                .loss
        };
        let base = compose(1.0);
        let scaled = compose(10.0);
        assert!((base - scaled).abs() / base < 1e-3, "{base} vs {scaled}");
    }

    #[test]
    fn test_norm_per_element_scales_linearly() {
        let composer =
            LossComposer::new(LossPolicy::scale_normalized(ScaleStatistic::NormPerElement));
        let compose = |factor: f32| {
            composer
                .compose(
                    ramp([2, 3, 1, 4, 4], 0.2).mul_scalar(factor),
                    ramp([2, 3, 1, 4, 4], 0.7).mul_scalar(factor),
                    Some((
                        latent([2, 3, 8], 0.1).mul_scalar(factor),
                        latent([2, 3, 8], 0.4).mul_scalar(factor),
                    )),
                )
                .unwrap()
                .values()
                .loss
        };
        let base = compose(1.0);
        let scaled = compose(4.0);
        assert!((scaled / base - 4.0).abs() < 1e-2, "{base} vs {scaled}");
    }

    #[test]
    fn test_zero_target_is_finite() {
        let composer =
            LossComposer::new(LossPolicy::scale_normalized(ScaleStatistic::NormPerElement));
        let values = composer
            .compose(
                ramp([1, 2, 1, 3, 3], 0.0),
                Tensor::zeros([1, 2, 1, 3, 3], &Default::default()),
                Some((latent([1, 2, 4], 0.0), Tensor::zeros([1, 2, 4], &Default::default()))),
            )
            .unwrap()
            .values();
        assert!(values.loss.is_finite());
    }

    #[test]
    fn test_shape_mismatch() {
        let result = LossComposer::default().compose(
            ramp([1, 2, 1, 3, 3], 0.0),
            ramp([1, 3, 1, 3, 3], 0.0),
            None,
        );
        assert!(matches!(result, Err(TrainError::ShapeMismatch(_))));
    }

    #[test]
    fn test_family_policies() {
        assert_eq!(
            LossPolicy::for_family(ModelFamily::LatentDynamics),
            LossPolicy::Unnormalized { latent_weight: 0.5 }
        );
        assert!(matches!(
            LossPolicy::for_family(ModelFamily::MaskedSequence),
            LossPolicy::ScaleNormalized {
                statistic: ScaleStatistic::NormPerElement,
                ..
            }
        ));
    }
}
