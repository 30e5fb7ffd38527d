//! Latent-dynamics forecaster.
//!
//! Context frames are embedded by a trainable frame encoder, the whole window
//! of latents is pushed through a stack of [`KanLayer`]s that emits a latent for
//! every context and forecast step, and a trainable frame decoder maps them
//! back to frames. The pretrained autoencoder only supplies latent targets.

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::gelu;
use serde::{Deserialize, Serialize};

use crate::autoencoder::AutoEncoderConfig;
use crate::checkpoint::{CheckpointRef, CheckpointStore};
use crate::error::{ModelError, Result};
use crate::frozen::FrozenAutoEncoder;
use crate::kan::KanLayer;
use gapcast_core::{Capabilities, Forecast, ForecastInput, ForecastingModel, ModelFamily};

/// Configuration for [`LatentDynamicsForecaster`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatentDynamicsConfig {
    /// The pretrained autoencoder this model is anchored on.
    pub autoencoder: AutoEncoderConfig,
    /// Widths of the hidden basis-expansion layers.
    pub hidden_dims: Vec<usize>,
    /// Basis functions per feature.
    pub grid_size: usize,
    /// Hidden width of the frame decoder.
    pub decoder_hidden: usize,
    /// Context steps.
    pub context_steps: usize,
    /// Forecast steps.
    pub forecast_steps: usize,
}

impl Default for LatentDynamicsConfig {
    fn default() -> Self {
        Self {
            autoencoder: AutoEncoderConfig::default(),
            hidden_dims: vec![128, 128],
            grid_size: 5,
            decoder_hidden: 128,
            context_steps: 10,
            forecast_steps: 5,
        }
    }
}

impl LatentDynamicsConfig {
    /// Create a new config.
    pub fn new(autoencoder: AutoEncoderConfig, context_steps: usize, forecast_steps: usize) -> Self {
        Self {
            autoencoder,
            context_steps,
            forecast_steps,
            ..Default::default()
        }
    }

    /// Set the hidden layer widths.
    #[must_use]
    pub fn with_hidden_dims(mut self, hidden_dims: Vec<usize>) -> Self {
        self.hidden_dims = hidden_dims;
        self
    }

    /// Set the frame decoder width.
    #[must_use]
    pub fn with_decoder_hidden(mut self, decoder_hidden: usize) -> Self {
        self.decoder_hidden = decoder_hidden;
        self
    }

    /// Load the pretrained autoencoder through `store` and build the model.
    pub fn init<B: Backend, S: CheckpointStore<B>>(
        &self,
        store: &S,
        reference: &CheckpointRef,
        device: &B::Device,
    ) -> Result<LatentDynamicsForecaster<B>> {
        let autoencoder = FrozenAutoEncoder::load(&self.autoencoder, store, reference, device)?;
        self.init_with(autoencoder, device)
    }

    /// Build the model around an already frozen autoencoder.
    pub fn init_with<B: Backend>(
        &self,
        autoencoder: FrozenAutoEncoder<B>,
        device: &B::Device,
    ) -> Result<LatentDynamicsForecaster<B>> {
        if autoencoder.frame_shape() != self.autoencoder.frame {
            return Err(ModelError::Config(format!(
                "autoencoder frames are {:?}, model expects {:?}",
                autoencoder.frame_shape(),
                self.autoencoder.frame
            )));
        }
        if autoencoder.latent_dim() != self.autoencoder.latent_dim {
            return Err(ModelError::Config(format!(
                "autoencoder latent_dim is {}, model expects {}",
                autoencoder.latent_dim(),
                self.autoencoder.latent_dim
            )));
        }
        if self.context_steps == 0 || self.forecast_steps == 0 {
            return Err(ModelError::Config(
                "context_steps and forecast_steps must be > 0".to_string(),
            ));
        }
        Ok(LatentDynamicsForecaster::new(self, autoencoder, device))
    }
}

/// Forecaster learning latent dynamics with basis-expansion layers.
#[derive(Module, Debug)]
pub struct LatentDynamicsForecaster<B: Backend> {
    autoencoder: FrozenAutoEncoder<B>,
    frame_encoder: Linear<B>,
    dynamics: Vec<KanLayer<B>>,
    decoder_in: Linear<B>,
    decoder_out: Linear<B>,
    context_steps: usize,
    forecast_steps: usize,
    latent_dim: usize,
}

impl<B: Backend> LatentDynamicsForecaster<B> {
    fn new(config: &LatentDynamicsConfig, autoencoder: FrozenAutoEncoder<B>, device: &B::Device) -> Self {
        let frame_dim = config.autoencoder.frame.numel();
        let latent = config.autoencoder.latent_dim;
        let total = config.context_steps + config.forecast_steps;

        let mut widths = vec![config.context_steps * latent];
        widths.extend(config.hidden_dims.iter().copied());
        widths.push(total * latent);
        let dynamics = widths
            .windows(2)
            .map(|w| KanLayer::new(w[0], w[1], config.grid_size, device))
            .collect();

        Self {
            autoencoder,
            frame_encoder: LinearConfig::new(frame_dim, latent).init(device),
            dynamics,
            decoder_in: LinearConfig::new(latent, config.decoder_hidden).init(device),
            decoder_out: LinearConfig::new(config.decoder_hidden, frame_dim).init(device),
            context_steps: config.context_steps,
            forecast_steps: config.forecast_steps,
            latent_dim: latent,
        }
    }

    /// The frozen autoencoder.
    pub fn autoencoder(&self) -> &FrozenAutoEncoder<B> {
        &self.autoencoder
    }

    /// Mutable access to the frozen autoencoder.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn autoencoder_mut(&mut self) -> &mut FrozenAutoEncoder<B> {
        &mut self.autoencoder
    }
}

impl<B: Backend> ForecastingModel<B> for LatentDynamicsForecaster<B> {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            latent: true,
            horizon_predict: false,
            teacher_forcing: false,
        }
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::LatentDynamics
    }

    fn forecast_steps(&self) -> usize {
        self.forecast_steps
    }

    fn context_steps(&self) -> Option<usize> {
        Some(self.context_steps)
    }

    /// The context must have exactly `context_steps` frames.
    fn forward(&self, input: ForecastInput<B>) -> Forecast<B> {
        let [batch, steps, c, h, w] = input.context.dims();
        let total = self.context_steps + self.forecast_steps;

        let z = self
            .frame_encoder
            .forward(input.context.reshape([batch, steps, c * h * w]))
            .reshape([batch, steps * self.latent_dim]);
        let z = self
            .dynamics
            .iter()
            .fold(z, |z, layer| layer.forward(z))
            .reshape([batch, total, self.latent_dim]);

        let frames = gelu(self.decoder_in.forward(z.clone()));
        let sequence = self
            .decoder_out
            .forward(frames)
            .reshape([batch, total, c, h, w]);

        Forecast {
            sequence,
            latent: Some(z),
        }
    }

    fn encode(&self, full: Tensor<B, 5>) -> Option<Tensor<B, 3>> {
        Some(self.autoencoder.encode(full))
    }

    fn pin_frozen(&mut self) {
        self.autoencoder.pin();
    }

    fn visit_frozen<V: burn::module::ModuleVisitor<B>>(&self, visitor: &mut V) {
        self.autoencoder.visit(visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoencoder::NumericalMode;
    use crate::params::ParameterSet;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use gapcast_core::FrameShape;

    type TestBackend = Autodiff<NdArray>;

    fn config() -> LatentDynamicsConfig {
        let ae = AutoEncoderConfig::new(FrameShape::new(1, 4, 4), 3).with_hidden_dim(8);
        LatentDynamicsConfig::new(ae, 4, 2)
            .with_hidden_dims(vec![10])
            .with_decoder_hidden(8)
    }

    fn model(device: &<TestBackend as Backend>::Device) -> LatentDynamicsForecaster<TestBackend> {
        let cfg = config();
        let frozen = FrozenAutoEncoder::freeze(cfg.autoencoder.init(device));
        cfg.init_with(frozen, device).unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = model(&device);
        let context = Tensor::<TestBackend, 5>::ones([2, 4, 1, 4, 4], &device);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(vec![true; 8], [2, 4]), &device);

        let out = model.forward(ForecastInput::new(context, mask));
        assert_eq!(out.sequence.dims(), [2, 6, 1, 4, 4]);
        assert_eq!(out.latent.unwrap().dims(), [2, 6, 3]);

        let target = model.encode(Tensor::ones([2, 6, 1, 4, 4], &device)).unwrap();
        assert_eq!(target.dims(), [2, 6, 3]);
        assert!(!target.is_require_grad());
    }

    #[test]
    fn test_frozen_params_excluded() {
        let device = Default::default();
        let model = model(&device);
        let params = ParameterSet::trainable(&model);

        assert_eq!(params.frozen_len(), 12);
        assert!(params.frozen_ids().all(|id| !params.contains(id) && params.is_frozen(id)));
        assert!(params.ids().all(|id| !params.is_frozen(id)));
        assert!(!params.is_empty());
    }

    #[test]
    fn test_pin_frozen_restores_inference() {
        let device = Default::default();
        let mut model = model(&device);
        model.autoencoder.force_mode(NumericalMode::Train);
        assert_eq!(model.autoencoder().mode(), NumericalMode::Train);

        model.pin_frozen();
        assert_eq!(model.autoencoder().mode(), NumericalMode::Inference);
    }

    #[test]
    fn test_rejects_latent_mismatch() {
        let device = Default::default();
        let frozen = FrozenAutoEncoder::freeze(
            AutoEncoderConfig::new(FrameShape::new(1, 4, 4), 5).init::<TestBackend>(&device),
        );
        assert!(matches!(config().init_with(frozen, &device), Err(ModelError::Config(_))));
    }
}
