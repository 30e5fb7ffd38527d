//! The frozen pretrained autoencoder.
//!
//! A [`FrozenAutoEncoder`] is what an [`AutoEncoder`] becomes once it is owned
//! by a downstream forecaster. Freezing consumes the trainable module: every
//! parameter stops requiring gradients and the numerical mode is pinned to
//! inference. There is no conversion back.

use burn::prelude::*;

use crate::autoencoder::{AutoEncoder, AutoEncoderConfig, NumericalMode};
use crate::checkpoint::{load_validated, CheckpointRef, CheckpointStore, Result};
use gapcast_core::FrameShape;

/// Pretrained autoencoder held in inference mode with gradients disabled.
#[derive(Module, Debug)]
pub struct FrozenAutoEncoder<B: Backend> {
    inner: AutoEncoder<B>,
}

impl<B: Backend> FrozenAutoEncoder<B> {
    /// Load a pretrained autoencoder and freeze it.
    ///
    /// The checkpoint is read once through `store`, its parameter shapes are
    /// checked against `config`, and only then is the module frozen.
    ///
    /// # Errors
    ///
    /// Any load, selector or shape error from the store is fatal.
    pub fn load<S: CheckpointStore<B>>(
        config: &AutoEncoderConfig,
        store: &S,
        reference: &CheckpointRef,
        device: &B::Device,
    ) -> Result<Self> {
        let record = store.load(reference, device)?;
        let module = load_validated(config.init::<B>(device), record)?;

        tracing::info!(
            path = %reference.path.display(),
            selector = %reference.selector,
            params = module.num_params(),
            "Loaded pretrained autoencoder"
        );
        Ok(Self::freeze(module))
    }

    /// Freeze a trained autoencoder.
    pub fn freeze(module: AutoEncoder<B>) -> Self {
        let inner = module.no_grad().with_mode(NumericalMode::Inference);
        tracing::info!(params = inner.num_params(), "Froze autoencoder");
        Self { inner }
    }

    /// Re-assert inference mode.
    pub fn pin(&mut self) {
        if self.inner.mode() != NumericalMode::Inference {
            let inner = self.inner.clone().with_mode(NumericalMode::Inference);
            self.inner = inner;
        }
    }

    /// Force the inner module's numerical mode, bypassing the pin.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn force_mode(&mut self, mode: NumericalMode) {
        self.inner = self.inner.clone().with_mode(mode);
    }

    /// Current numerical mode. Always [`NumericalMode::Inference`] after [`pin`](Self::pin).
    pub fn mode(&self) -> NumericalMode {
        self.inner.mode()
    }

    /// Latent dimension per frame.
    pub fn latent_dim(&self) -> usize {
        self.inner.latent_dim()
    }

    /// Frame shape.
    pub fn frame_shape(&self) -> FrameShape {
        self.inner.frame_shape()
    }

    /// Encode frames to latents. The result never carries gradient history.
    pub fn encode(&self, x: Tensor<B, 5>) -> Tensor<B, 3> {
        self.inner.encode(x).detach()
    }

    /// Decode latents to frames.
    ///
    /// Gradients flow back through the decoder's activations into `z`; the
    /// decoder's own parameters never require gradients.
    pub fn decode(&self, z: Tensor<B, 3>) -> Tensor<B, 5> {
        self.inner.decode(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointError, MemoryCheckpointStore};
    use burn_autodiff::Autodiff;
    use burn::module::{ModuleVisitor, ParamId};
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    struct RequireGrad(Vec<bool>);

    impl<B: Backend> ModuleVisitor<B> for RequireGrad {
        fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
            self.0.push(tensor.is_require_grad());
        }
    }

    fn config() -> AutoEncoderConfig {
        AutoEncoderConfig::new(FrameShape::new(1, 3, 3), 4).with_hidden_dim(8)
    }

    #[test]
    fn test_freeze_disables_gradients() {
        let device = Default::default();
        let frozen = FrozenAutoEncoder::freeze(config().init::<TestBackend>(&device));

        let mut visitor = RequireGrad(Vec::new());
        frozen.visit(&mut visitor);
        assert!(!visitor.0.is_empty());
        assert!(visitor.0.iter().all(|&r| !r));
        assert_eq!(frozen.mode(), NumericalMode::Inference);
    }

    #[test]
    fn test_pin_restores_inference_after_drift() {
        let device = Default::default();
        let mut frozen = FrozenAutoEncoder::freeze(config().init::<TestBackend>(&device));
        frozen.force_mode(NumericalMode::Train);
        assert_eq!(frozen.mode(), NumericalMode::Train);

        frozen.pin();
        assert_eq!(frozen.mode(), NumericalMode::Inference);
    }

    #[test]
    fn test_encode_is_detached_decode_is_not() {
        let device = Default::default();
        let frozen = FrozenAutoEncoder::freeze(config().init::<TestBackend>(&device));

        let x = Tensor::<TestBackend, 5>::ones([1, 2, 1, 3, 3], &device).require_grad();
        assert!(!frozen.encode(x).is_require_grad());

        let z = Tensor::<TestBackend, 3>::ones([1, 2, 4], &device).require_grad();
        let out = frozen.decode(z.clone());
        let grads = out.sum().backward();
        assert!(z.grad(&grads).is_some());
    }

    #[test]
    fn test_encode_is_deterministic() {
        let device = Default::default();
        let frozen = FrozenAutoEncoder::freeze(config().with_dropout(0.9).init::<TestBackend>(&device));
        let x = Tensor::<TestBackend, 5>::ones([2, 3, 1, 3, 3], &device);
        let a = frozen.encode(x.clone()).into_data().to_vec::<f32>().unwrap();
        let b = frozen.encode(x).into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_from_store() {
        let device = Default::default();
        let mut store = MemoryCheckpointStore::<TestBackend>::new();
        let reference = CheckpointRef::autoencoder("pretrained");
        store.insert(&reference, config().init(&device));

        let frozen = FrozenAutoEncoder::load(&config(), &store, &reference, &device).unwrap();
        assert_eq!(frozen.latent_dim(), 4);

        let err = FrozenAutoEncoder::load(&config().with_hidden_dim(5), &store, &reference, &device).unwrap_err();
        assert!(matches!(err, CheckpointError::ShapeMismatch { .. }));
    }
}
