//! Masked-sequence forecaster.
//!
//! Context frames are embedded by the frozen encoder. An encoder stack attends
//! over the observed context tokens only; the decoder stack then sees the full
//! timeline with unobserved context slots and every forecast slot replaced by
//! a learned mask token. Per-frame latents are decoded by the frozen decoder.

use burn::module::Param;
use burn::nn::{
    attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
    Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig, Relu,
};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::autoencoder::AutoEncoderConfig;
use crate::checkpoint::{CheckpointRef, CheckpointStore};
use crate::error::{ModelError, Result};
use crate::frozen::FrozenAutoEncoder;
use gapcast_core::{Capabilities, Forecast, ForecastInput, ForecastingModel, ModelFamily};

/// Configuration for [`MaskedSequenceForecaster`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskedSequenceConfig {
    /// The pretrained autoencoder this model is anchored on.
    pub autoencoder: AutoEncoderConfig,
    /// Model dimension.
    pub d_model: usize,
    /// Feedforward dimension.
    pub d_ff: usize,
    /// Attention heads in the encoder stack.
    pub encoder_heads: usize,
    /// Encoder layers.
    pub encoder_depth: usize,
    /// Attention heads in the decoder stack.
    pub decoder_heads: usize,
    /// Decoder layers.
    pub decoder_depth: usize,
    /// Dropout rate.
    pub dropout: f64,
    /// Context steps.
    pub context_steps: usize,
    /// Forecast steps.
    pub forecast_steps: usize,
}

impl Default for MaskedSequenceConfig {
    fn default() -> Self {
        Self {
            autoencoder: AutoEncoderConfig::default(),
            d_model: 64,
            d_ff: 128,
            encoder_heads: 2,
            encoder_depth: 4,
            decoder_heads: 2,
            decoder_depth: 2,
            dropout: 0.1,
            context_steps: 10,
            forecast_steps: 5,
        }
    }
}

impl MaskedSequenceConfig {
    /// Create a new config.
    pub fn new(autoencoder: AutoEncoderConfig, context_steps: usize, forecast_steps: usize) -> Self {
        Self {
            autoencoder,
            context_steps,
            forecast_steps,
            ..Default::default()
        }
    }

    /// Set the model and feedforward dimensions.
    #[must_use]
    pub fn with_dims(mut self, d_model: usize, d_ff: usize) -> Self {
        self.d_model = d_model;
        self.d_ff = d_ff;
        self
    }

    /// Set the encoder and decoder depths.
    #[must_use]
    pub fn with_depths(mut self, encoder_depth: usize, decoder_depth: usize) -> Self {
        self.encoder_depth = encoder_depth;
        self.decoder_depth = decoder_depth;
        self
    }

    /// Set the dropout rate.
    #[must_use]
    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    /// Load the pretrained autoencoder through `store` and build the model.
    pub fn init<B: Backend, S: CheckpointStore<B>>(
        &self,
        store: &S,
        reference: &CheckpointRef,
        device: &B::Device,
    ) -> Result<MaskedSequenceForecaster<B>> {
        let autoencoder = FrozenAutoEncoder::load(&self.autoencoder, store, reference, device)?;
        self.init_with(autoencoder, device)
    }

    /// Build the model around an already frozen autoencoder.
    pub fn init_with<B: Backend>(
        &self,
        autoencoder: FrozenAutoEncoder<B>,
        device: &B::Device,
    ) -> Result<MaskedSequenceForecaster<B>> {
        if autoencoder.latent_dim() != self.autoencoder.latent_dim
            || autoencoder.frame_shape() != self.autoencoder.frame
        {
            return Err(ModelError::Config(format!(
                "autoencoder is {:?} -> {}, model expects {:?} -> {}",
                autoencoder.frame_shape(),
                autoencoder.latent_dim(),
                self.autoencoder.frame,
                self.autoencoder.latent_dim
            )));
        }
        for heads in [self.encoder_heads, self.decoder_heads] {
            if heads == 0 || self.d_model % heads != 0 {
                return Err(ModelError::Config(format!(
                    "d_model {} is not divisible by {} heads",
                    self.d_model, heads
                )));
            }
        }
        if self.context_steps == 0 || self.forecast_steps == 0 {
            return Err(ModelError::Config(
                "context_steps and forecast_steps must be > 0".to_string(),
            ));
        }
        Ok(MaskedSequenceForecaster::new(self, autoencoder, device))
    }
}

/// Transformer encoder layer.
#[derive(Module, Debug)]
struct TransformerEncoderLayer<B: Backend> {
    attention: MultiHeadAttention<B>,
    norm1: LayerNorm<B>,
    ff_linear1: Linear<B>,
    ff_linear2: Linear<B>,
    norm2: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> TransformerEncoderLayer<B> {
    fn new(d_model: usize, n_heads: usize, d_ff: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            attention: MultiHeadAttentionConfig::new(d_model, n_heads)
                .with_dropout(dropout)
                .init(device),
            norm1: LayerNormConfig::new(d_model).init(device),
            ff_linear1: LinearConfig::new(d_model, d_ff).init(device),
            ff_linear2: LinearConfig::new(d_ff, d_model).init(device),
            norm2: LayerNormConfig::new(d_model).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    /// `padding` marks key positions to ignore, `(B, T)`.
    fn forward(&self, x: Tensor<B, 3>, padding: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 3> {
        let input = MhaInput::self_attn(x.clone());
        let input = match padding {
            Some(mask) => input.mask_pad(mask),
            None => input,
        };
        let attn_out = self.attention.forward(input).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_out));

        let ff_out = Relu::new().forward(self.ff_linear1.forward(x.clone()));
        let ff_out = self.ff_linear2.forward(self.dropout.forward(ff_out));

        self.norm2.forward(x + self.dropout.forward(ff_out))
    }
}

/// Masked transformer forecaster over frozen-autoencoder latents.
#[derive(Module, Debug)]
pub struct MaskedSequenceForecaster<B: Backend> {
    autoencoder: FrozenAutoEncoder<B>,
    embed: Linear<B>,
    mask_token: Param<Tensor<B, 1>>,
    pos_embedding: Param<Tensor<B, 3>>,
    encoder: Vec<TransformerEncoderLayer<B>>,
    decoder: Vec<TransformerEncoderLayer<B>>,
    to_latent: Linear<B>,
    context_steps: usize,
    forecast_steps: usize,
    d_model: usize,
}

impl<B: Backend> MaskedSequenceForecaster<B> {
    fn new(config: &MaskedSequenceConfig, autoencoder: FrozenAutoEncoder<B>, device: &B::Device) -> Self {
        let latent = config.autoencoder.latent_dim;
        let total = config.context_steps + config.forecast_steps;
        let layers = |depth: usize, heads: usize| -> Vec<TransformerEncoderLayer<B>> {
            (0..depth)
                .map(|_| TransformerEncoderLayer::new(config.d_model, heads, config.d_ff, config.dropout, device))
                .collect()
        };

        Self {
            autoencoder,
            embed: LinearConfig::new(latent, config.d_model).init(device),
            mask_token: Param::from_tensor(Tensor::zeros([config.d_model], device)),
            pos_embedding: Param::from_tensor(Tensor::random(
                [1, total, config.d_model],
                burn::tensor::Distribution::Normal(0.0, 0.02),
                device,
            )),
            encoder: layers(config.encoder_depth, config.encoder_heads),
            decoder: layers(config.decoder_depth, config.decoder_heads),
            to_latent: LinearConfig::new(config.d_model, latent).init(device),
            context_steps: config.context_steps,
            forecast_steps: config.forecast_steps,
            d_model: config.d_model,
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

    fn mask_tokens(&self, batch: usize, steps: usize) -> Tensor<B, 3> {
        self.mask_token
            .val()
            .reshape([1, 1, self.d_model])
            .expand([batch, steps, self.d_model])
    }
}

impl<B: Backend> ForecastingModel<B> for MaskedSequenceForecaster<B> {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            latent: true,
            horizon_predict: false,
            teacher_forcing: false,
        }
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::MaskedSequence
    }

    fn forecast_steps(&self) -> usize {
        self.forecast_steps
    }

    fn context_steps(&self) -> Option<usize> {
        Some(self.context_steps)
    }

    fn forward(&self, input: ForecastInput<B>) -> Forecast<B> {
        let [batch, steps, _, _, _] = input.context.dims();
        let pos = self.pos_embedding.val();
        let pos_context = pos.clone().narrow(1, 0, steps).expand([batch, steps, self.d_model]);
        let pos_forecast = pos
            .narrow(1, self.context_steps, self.forecast_steps)
            .expand([batch, self.forecast_steps, self.d_model]);

        let tokens = self.embed.forward(self.autoencoder.encode(input.context)) + pos_context.clone();
        let padding = input.mask.clone().bool_not();
        let encoded = self
            .encoder
            .iter()
            .fold(tokens, |x, layer| layer.forward(x, Some(padding.clone())));

        let observed = input
            .mask
            .float()
            .reshape([batch, steps, 1])
            .expand([batch, steps, self.d_model]);
        let hidden = self.mask_tokens(batch, steps) + pos_context;
        let context = encoded * observed.clone() + hidden * observed.neg().add_scalar(1.0);
        let forecast = self.mask_tokens(batch, self.forecast_steps) + pos_forecast;

        let x = Tensor::cat(vec![context, forecast], 1);
        let x = self.decoder.iter().fold(x, |x, layer| layer.forward(x, None));

        let latent = self.to_latent.forward(x);
        Forecast {
            sequence: self.autoencoder.decode(latent.clone()),
            latent: Some(latent),
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
