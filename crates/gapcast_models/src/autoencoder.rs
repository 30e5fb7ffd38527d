//! Per-frame autoencoder shared by the latent forecasters.
//!
//! Every frame `(C, H, W)` is flattened and mapped to a `latent_dim` vector;
//! the decoder maps latents back to frames. Time steps are independent.

use burn::module::Ignored;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::gelu;
use serde::{Deserialize, Serialize};

use gapcast_core::FrameShape;

/// Numerical mode of a module whose layers behave differently in training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NumericalMode {
    /// Stochastic layers are active.
    #[default]
    Train,
    /// Deterministic evaluation.
    Inference,
}

/// Configuration for [`AutoEncoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoEncoderConfig {
    /// Frame shape.
    pub frame: FrameShape,
    /// Hidden width of encoder and decoder.
    pub hidden_dim: usize,
    /// Latent dimension per frame.
    pub latent_dim: usize,
    /// Dropout rate applied in training mode.
    pub dropout: f64,
}

impl Default for AutoEncoderConfig {
    fn default() -> Self {
        Self {
            frame: FrameShape::new(1, 16, 16),
            hidden_dim: 128,
            latent_dim: 32,
            dropout: 0.1,
        }
    }
}

impl AutoEncoderConfig {
    /// Create a new config.
    pub fn new(frame: FrameShape, latent_dim: usize) -> Self {
        Self {
            frame,
            latent_dim,
            ..Default::default()
        }
    }

    /// Set the hidden width.
    #[must_use]
    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    /// Set the dropout rate.
    #[must_use]
    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> AutoEncoder<B> {
        AutoEncoder::new(self.clone(), device)
    }
}

/// Frame autoencoder.
#[derive(Module, Debug)]
pub struct AutoEncoder<B: Backend> {
    enc_in: Linear<B>,
    enc_norm: LayerNorm<B>,
    enc_out: Linear<B>,
    dec_in: Linear<B>,
    dec_norm: LayerNorm<B>,
    dec_out: Linear<B>,
    dropout: Dropout,
    channels: usize,
    height: usize,
    width: usize,
    latent_dim: usize,
    mode: Ignored<NumericalMode>,
}

impl<B: Backend> AutoEncoder<B> {
    /// Create a new autoencoder in training mode.
    pub fn new(config: AutoEncoderConfig, device: &B::Device) -> Self {
        let frame_dim = config.frame.numel();

        Self {
            enc_in: LinearConfig::new(frame_dim, config.hidden_dim).init(device),
            enc_norm: LayerNormConfig::new(config.hidden_dim).init(device),
            enc_out: LinearConfig::new(config.hidden_dim, config.latent_dim).init(device),
            dec_in: LinearConfig::new(config.latent_dim, config.hidden_dim).init(device),
            dec_norm: LayerNormConfig::new(config.hidden_dim).init(device),
            dec_out: LinearConfig::new(config.hidden_dim, frame_dim).init(device),
            dropout: DropoutConfig::new(config.dropout).init(),
            channels: config.frame.channels,
            height: config.frame.height,
            width: config.frame.width,
            latent_dim: config.latent_dim,
            mode: Ignored(NumericalMode::Train),
        }
    }

    /// Frame shape this autoencoder was built for.
    pub fn frame_shape(&self) -> FrameShape {
        FrameShape::new(self.channels, self.height, self.width)
    }

    /// Latent dimension per frame.
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Current numerical mode.
    pub fn mode(&self) -> NumericalMode {
        self.mode.0
    }

    /// Switch numerical mode.
    #[must_use]
    pub fn with_mode(mut self, mode: NumericalMode) -> Self {
        self.mode = Ignored(mode);
        self
    }

    fn regularize<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self.mode.0 {
            NumericalMode::Train => self.dropout.forward(x),
            NumericalMode::Inference => x,
        }
    }

    /// Encode `(B, T, C, H, W)` frames to `(B, T, latent_dim)`.
    pub fn encode(&self, x: Tensor<B, 5>) -> Tensor<B, 3> {
        let [batch, steps, c, h, w] = x.dims();
        let x = x.reshape([batch, steps, c * h * w]);

        let x = self.enc_norm.forward(self.enc_in.forward(x));
        let x = self.regularize(gelu(x));
        self.enc_out.forward(x)
    }

    /// Decode `(B, T, latent_dim)` latents to `(B, T, C, H, W)` frames.
    pub fn decode(&self, z: Tensor<B, 3>) -> Tensor<B, 5> {
        let [batch, steps, _] = z.dims();

        let x = self.dec_norm.forward(self.dec_in.forward(z));
        let x = self.regularize(gelu(x));
        self.dec_out
            .forward(x)
            .reshape([batch, steps, self.channels, self.height, self.width])
    }

    /// Reconstruct a sequence.
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.decode(self.encode(x))
    }
}
