//! Kolmogorov-Arnold style layer with a Gaussian radial basis.
//!
//! Each input feature is expanded over a fixed grid of Gaussian bumps and the
//! expansion is mixed by a linear map. A SiLU-activated linear residual path
//! runs alongside. Inputs are layer-normalized first so they land on the grid.

use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::silu;

const GRID_MIN: f32 = -2.0;
const GRID_MAX: f32 = 2.0;

/// One basis-expansion layer.
#[derive(Module, Debug)]
pub struct KanLayer<B: Backend> {
    norm: LayerNorm<B>,
    base: Linear<B>,
    spline: Linear<B>,
    grid_size: usize,
}

impl<B: Backend> KanLayer<B> {
    /// Create a layer mapping `d_in` features to `d_out`, with `grid_size` basis functions per feature.
    pub fn new(d_in: usize, d_out: usize, grid_size: usize, device: &B::Device) -> Self {
        let grid_size = grid_size.max(2);
        Self {
            norm: LayerNormConfig::new(d_in).init(device),
            base: LinearConfig::new(d_in, d_out).init(device),
            spline: LinearConfig::new(d_in * grid_size, d_out).with_bias(false).init(device),
            grid_size,
        }
    }

    fn basis(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, features] = x.dims();
        let spacing = (GRID_MAX - GRID_MIN) / (self.grid_size - 1) as f32;
        let centers: Vec<f32> = (0..self.grid_size)
            .map(|k| GRID_MIN + k as f32 * spacing)
            .collect();
        let shape = [batch, features, self.grid_size];
        let centers = Tensor::<B, 1>::from_floats(centers.as_slice(), &x.device())
            .reshape([1, 1, self.grid_size])
            .expand(shape);

        let d = (x.unsqueeze_dim::<3>(2).expand(shape) - centers).div_scalar(spacing);
        d.powf_scalar(2.0)
            .neg()
            .exp()
            .reshape([batch, features * self.grid_size])
    }

    /// Forward pass on `(B, d_in)`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.norm.forward(x);
        self.base.forward(silu(x.clone())) + self.spline.forward(self.basis(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_kan_layer_shape() {
        let device = Default::default();
        let layer = KanLayer::<TestBackend>::new(6, 4, 5, &device);
        let x = Tensor::random([3, 6], burn::tensor::Distribution::Default, &device);
        assert_eq!(layer.forward(x).dims(), [3, 4]);
    }

    #[test]
    fn test_basis_peaks_on_centers() {
        let device = Default::default();
        let layer = KanLayer::<TestBackend>::new(1, 1, 5, &device);
        // Centers are -2, -1, 0, 1, 2.
        let x = Tensor::<TestBackend, 2>::from_floats([[1.0]], &device);
        let phi = layer.basis(x).into_data().to_vec::<f32>().unwrap();
        assert!((phi[3] - 1.0).abs() < 1e-6);
        assert!((phi[2] - (-1.0f32).exp()).abs() < 1e-6);
        assert!(phi[0] < 1e-6);
    }
}
