//! Gradient extraction restricted to the trainable parameter set.

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use gapcast_models::ParameterSet;

use crate::error::{Result, TrainError};

struct Extractor<'a, B: AutodiffBackend> {
    grads: &'a mut B::Gradients,
    params: &'a ParameterSet,
    kept: GradientsParams,
    violations: usize,
    frozen_hits: usize,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Extractor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        let Some(grad) = tensor.grad_remove(self.grads) else {
            return;
        };
        if self.params.contains(&id) {
            self.kept.register::<B::InnerBackend, D>(id, grad);
        } else {
            self.violations += 1;
            if self.params.is_frozen(&id) {
                self.frozen_hits += 1;
            }
        }
    }
}

/// Gradients for the optimizer, limited to a [`ParameterSet`].
pub struct TrainableGradients;

impl TrainableGradients {
    /// Pull the gradients of every trainable parameter of `module` out of `grads`.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::FrozenParameterViolation`] if any parameter outside
    /// the set received a gradient.
    pub fn extract<B: AutodiffBackend, M: AutodiffModule<B>>(
        mut grads: B::Gradients,
        module: &M,
        params: &ParameterSet,
    ) -> Result<GradientsParams> {
        let mut extractor = Extractor::<B> {
            grads: &mut grads,
            params,
            kept: GradientsParams::new(),
            violations: 0,
            frozen_hits: 0,
        };
        module.visit(&mut extractor);

        if extractor.violations > 0 {
            tracing::error!(
                count = extractor.violations,
                frozen = extractor.frozen_hits,
                "gradient reached parameters outside the trainable set"
            );
            return Err(TrainError::FrozenParameterViolation {
                count: extractor.violations,
            });
        }
        Ok(extractor.kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use gapcast_core::FrameShape;
    use gapcast_models::AutoEncoderConfig;

    type TestBackend = Autodiff<NdArray>;

    fn backward() -> (gapcast_models::AutoEncoder<TestBackend>, <TestBackend as AutodiffBackend>::Gradients) {
        let device = Default::default();
        let model = AutoEncoderConfig::new(FrameShape::new(1, 3, 3), 4)
            .with_hidden_dim(8)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 5>::ones([2, 2, 1, 3, 3], &device);
        let grads = model.forward(x).sum().backward();
        (model, grads)
    }

    #[test]
    fn test_extracts_every_trainable_gradient() {
        let (model, grads) = backward();
        let params = ParameterSet::of_module(&model);
        let extracted = TrainableGradients::extract(grads, &model, &params).unwrap();
        assert_eq!(extracted.len(), params.len());
    }

    #[test]
    fn test_gradient_outside_set_is_fatal() {
        let (model, grads) = backward();
        let err = TrainableGradients::extract(grads, &model, &ParameterSet::default()).unwrap_err();
        assert!(matches!(err, TrainError::FrozenParameterViolation { count } if count > 0));
    }
}
