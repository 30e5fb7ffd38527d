//! Convolutional LSTM forecaster.
//!
//! The cell runs one step per frame. At every step it consumes the previous
//! frame and emits the current one, so the same cell reconstructs the context
//! window and then rolls forward over the forecast horizon.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use serde::{Deserialize, Serialize};

use gapcast_core::{
    Capabilities, CoreError, Forecast, ForecastInput, ForecastingModel, FrameShape, ModelFamily,
    Prediction, Result,
};

/// Configuration for [`ConvLstmForecaster`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvLstmConfig {
    /// Frame shape.
    pub frame: FrameShape,
    /// Hidden channels per layer.
    pub hidden_dim: usize,
    /// Convolution kernel size (odd).
    pub kernel_size: usize,
    /// Number of stacked cells.
    pub num_layers: usize,
    /// Forecast steps produced by `forward` without teacher forcing.
    pub forecast_steps: usize,
}

impl Default for ConvLstmConfig {
    fn default() -> Self {
        Self {
            frame: FrameShape::new(1, 16, 16),
            hidden_dim: 8,
            kernel_size: 3,
            num_layers: 1,
            forecast_steps: 5,
        }
    }
}

impl ConvLstmConfig {
    /// Create a new config.
    pub fn new(frame: FrameShape, forecast_steps: usize) -> Self {
        Self {
            frame,
            forecast_steps,
            ..Default::default()
        }
    }

    /// Set the hidden channels.
    #[must_use]
    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    /// Set the number of stacked cells.
    #[must_use]
    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvLstmForecaster<B> {
        ConvLstmForecaster::new(self.clone(), device)
    }
}

/// A single ConvLSTM cell.
#[derive(Module, Debug)]
pub struct ConvLstmCell<B: Backend> {
    gates: Conv2d<B>,
    hidden_dim: usize,
}

impl<B: Backend> ConvLstmCell<B> {
    fn new(input_dim: usize, hidden_dim: usize, kernel_size: usize, device: &B::Device) -> Self {
        let gates = Conv2dConfig::new([input_dim + hidden_dim, 4 * hidden_dim], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        Self { gates, hidden_dim }
    }

    /// One step: `x` is `(B, C_in, H, W)`, state is `(h, c)` with `hidden_dim` channels.
    pub fn forward(&self, x: Tensor<B, 4>, state: (Tensor<B, 4>, Tensor<B, 4>)) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let (h, c) = state;
        let gates = self.gates.forward(Tensor::cat(vec![x, h], 1));
        let gate = |k: usize| gates.clone().narrow(1, k * self.hidden_dim, self.hidden_dim);

        let i = sigmoid(gate(0));
        let f = sigmoid(gate(1));
        let o = sigmoid(gate(2));
        let g = gate(3).tanh();

        let c = f * c + i * g;
        let h = o * c.clone().tanh();
        (h, c)
    }

    fn zero_state(&self, batch: usize, height: usize, width: usize, device: &B::Device) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let zeros = Tensor::zeros([batch, self.hidden_dim, height, width], device);
        (zeros.clone(), zeros)
    }
}

/// Recurrent forecaster with teacher forcing and arbitrary-horizon prediction.
#[derive(Module, Debug)]
pub struct ConvLstmForecaster<B: Backend> {
    cells: Vec<ConvLstmCell<B>>,
    head: Conv2d<B>,
    forecast_steps: usize,
}

type State<B> = Vec<(Tensor<B, 4>, Tensor<B, 4>)>;

impl<B: Backend> ConvLstmForecaster<B> {
    /// Create a new model.
    pub fn new(config: ConvLstmConfig, device: &B::Device) -> Self {
        let channels = config.frame.channels;
        let layers = config.num_layers.max(1);
        let cells = (0..layers)
            .map(|layer| {
                let input_dim = if layer == 0 { channels } else { config.hidden_dim };
                ConvLstmCell::new(input_dim, config.hidden_dim, config.kernel_size, device)
            })
            .collect();
        let head = Conv2dConfig::new([config.hidden_dim, channels], [1, 1]).init(device);

        Self {
            cells,
            head,
            forecast_steps: config.forecast_steps,
        }
    }

    fn step(&self, frame: Tensor<B, 4>, state: &mut State<B>) -> Tensor<B, 4> {
        let mut x = frame;
        for (cell, slot) in self.cells.iter().zip(state.iter_mut()) {
            let (h, c) = cell.forward(x, slot.clone());
            x = h.clone();
            *slot = (h, c);
        }
        self.head.forward(x)
    }

    /// Reconstruct the context and roll forward `horizon` steps.
    ///
    /// With `teacher`, forecast step `k > 0` consumes the true frame `k - 1`
    /// instead of the model's own output.
    fn unroll(&self, context: Tensor<B, 5>, teacher: Option<Tensor<B, 5>>, horizon: usize) -> (Tensor<B, 5>, Tensor<B, 5>) {
        let [batch, steps, channels, height, width] = context.dims();
        let device = context.device();
        let frame = |seq: &Tensor<B, 5>, t: usize| -> Tensor<B, 4> { seq.clone().narrow(1, t, 1).squeeze(1) };

        let mut state: State<B> = self
            .cells
            .iter()
            .map(|cell| cell.zero_state(batch, height, width, &device))
            .collect();

        let mut previous = Tensor::<B, 4>::zeros([batch, channels, height, width], &device);
        let mut reconstruction = Vec::with_capacity(steps);
        for t in 0..steps {
            reconstruction.push(self.step(previous, &mut state));
            previous = frame(&context, t);
        }

        let mut forecast: Vec<Tensor<B, 4>> = Vec::with_capacity(horizon);
        for k in 0..horizon {
            let out = self.step(previous, &mut state);
            previous = match &teacher {
                Some(target) if k < target.dims()[1] => frame(target, k),
                _ => out.clone(),
            };
            forecast.push(out);
        }

        (Tensor::stack(reconstruction, 1), Tensor::stack(forecast, 1))
    }
}

impl<B: Backend> ForecastingModel<B> for ConvLstmForecaster<B> {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            latent: false,
            horizon_predict: true,
            teacher_forcing: true,
        }
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Recurrent
    }

    fn forecast_steps(&self) -> usize {
        self.forecast_steps
    }

    fn forward(&self, input: ForecastInput<B>) -> Forecast<B> {
        let horizon = input
            .teacher
            .as_ref()
            .map_or(self.forecast_steps, |t| t.dims()[1]);
        let (reconstruction, forecast) = self.unroll(input.context, input.teacher, horizon);

        Forecast {
            sequence: Tensor::cat(vec![reconstruction, forecast], 1),
            latent: None,
        }
    }

    fn predict(&self, input: ForecastInput<B>, horizon: usize) -> Result<Prediction<B>> {
        if horizon == 0 {
            return Err(CoreError::Unsupported("predict with zero horizon".to_string()));
        }
        let (reconstruction, forecast) = self.unroll(input.context, None, horizon);
        Ok(Prediction {
            reconstruction,
            forecast,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn input(batch: usize, steps: usize) -> ForecastInput<TestBackend> {
        let device = Default::default();
        let context = Tensor::random([batch, steps, 1, 6, 6], burn::tensor::Distribution::Default, &device);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(
            TensorData::new(vec![true; batch * steps], [batch, steps]),
            &device,
        );
        ForecastInput::new(context, mask)
    }

    #[test]
    fn test_convlstm_forward_shape() {
        let device = Default::default();
        let model = ConvLstmConfig::new(FrameShape::new(1, 6, 6), 3)
            .with_num_layers(2)
            .init::<TestBackend>(&device);

        let forecast = model.forward(input(2, 4));
        assert_eq!(forecast.sequence.dims(), [2, 7, 1, 6, 6]);
        assert!(forecast.latent.is_none());
    }

    #[test]
    fn test_convlstm_predict_arbitrary_horizon() {
        let device = Default::default();
        let model = ConvLstmConfig::new(FrameShape::new(1, 6, 6), 3).init::<TestBackend>(&device);

        let prediction = model.predict(input(1, 4), 7).unwrap();
        assert_eq!(prediction.reconstruction.dims(), [1, 4, 1, 6, 6]);
        assert_eq!(prediction.forecast.dims(), [1, 7, 1, 6, 6]);
        assert!(model.predict(input(1, 4), 0).is_err());
    }

    #[test]
    fn test_convlstm_teacher_forcing_changes_later_steps() {
        let device = Default::default();
        let model = ConvLstmConfig::new(FrameShape::new(1, 6, 6), 2).init::<TestBackend>(&device);
        let base = input(1, 3);
        let teacher = Tensor::<TestBackend, 5>::ones([1, 2, 1, 6, 6], &device).mul_scalar(5.0);

        let free = model.forward(base.clone()).sequence;
        let forced = model.forward(base.with_teacher(teacher)).sequence;

        let first = |s: &Tensor<TestBackend, 5>| s.clone().narrow(1, 3, 1).into_data().to_vec::<f32>().unwrap();
        let second = |s: &Tensor<TestBackend, 5>| s.clone().narrow(1, 4, 1).into_data().to_vec::<f32>().unwrap();
        // The first forecast step only sees the context.
        assert_eq!(first(&free), first(&forced));
        assert_ne!(second(&free), second(&forced));
    }

    #[test]
    fn test_convlstm_capabilities() {
        let device = Default::default();
        let model = ConvLstmConfig::default().init::<TestBackend>(&device);
        let caps = model.capabilities();
        assert!(caps.horizon_predict && caps.teacher_forcing && !caps.latent);
        assert_eq!(model.family(), ModelFamily::Recurrent);
        assert!(model.encode(Tensor::zeros([1, 2, 1, 16, 16], &device)).is_none());
    }
}
