//! Image-quality metrics for forecast sequences.
//!
//! SSIM and PSNR are computed on the host, per sample over the full sequence, and
//! then averaged over the batch. They are reported in the test phase only.

use burn::prelude::*;
use gapcast_core::host_values;
use ndarray::{Array5, ArrayView2, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};

/// Image-quality scores for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequenceMetrics {
    /// Mean structural similarity, 1.0 for identical sequences.
    pub ssim: f64,
    /// Mean peak signal-to-noise ratio in dB, `+inf` for identical sequences.
    pub psnr: f64,
}

/// Windowed SSIM and PSNR.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricEvaluator {
    /// Side of the uniform SSIM window before clipping to the grid.
    pub window: usize,
    /// Luminance stabilizer.
    pub k1: f64,
    /// Contrast stabilizer.
    pub k2: f64,
}

impl Default for MetricEvaluator {
    fn default() -> Self {
        Self {
            window: 7,
            k1: 0.01,
            k2: 0.03,
        }
    }
}

impl MetricEvaluator {
    /// Create an evaluator with the default window and constants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Score `prediction` against `reference`, both `(B, T, C, H, W)`.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ShapeMismatch`] if the shapes differ, or a core error
    /// if the tensors cannot be read back.
    pub fn evaluate<B: Backend>(
        &self,
        reference: Tensor<B, 5>,
        prediction: Tensor<B, 5>,
    ) -> Result<SequenceMetrics> {
        let dims = reference.dims();
        if dims != prediction.dims() {
            return Err(TrainError::ShapeMismatch(format!(
                "reference {:?} vs prediction {:?}",
                dims,
                prediction.dims()
            )));
        }
        let reference = host_array(reference)?;
        let prediction = host_array(prediction)?;
        self.evaluate_host(reference.view(), prediction.view())
    }

    /// Score host arrays shaped `(B, T, C, H, W)`.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ShapeMismatch`] if the shapes differ.
    pub fn evaluate_host(
        &self,
        reference: ndarray::ArrayView5<'_, f32>,
        prediction: ndarray::ArrayView5<'_, f32>,
    ) -> Result<SequenceMetrics> {
        if reference.shape() != prediction.shape() {
            return Err(TrainError::ShapeMismatch(format!(
                "reference {:?} vs prediction {:?}",
                reference.shape(),
                prediction.shape()
            )));
        }
        let batch = reference.len_of(Axis(0));
        if batch == 0 {
            return Err(TrainError::ShapeMismatch("empty batch".to_string()));
        }

        let (mut ssim, mut psnr) = (0.0, 0.0);
        for (r, p) in reference.outer_iter().zip(prediction.outer_iter()) {
            let range = data_range(&r);
            ssim += self.sample_ssim(&r, &p, range);
            psnr += sample_psnr(&r, &p, range);
        }
        Ok(SequenceMetrics {
            ssim: ssim / batch as f64,
            psnr: psnr / batch as f64,
        })
    }

    fn sample_ssim(&self, reference: &ArrayView4<'_, f32>, prediction: &ArrayView4<'_, f32>, range: f64) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for (r_frame, p_frame) in reference.outer_iter().zip(prediction.outer_iter()) {
            for (r, p) in r_frame.outer_iter().zip(p_frame.outer_iter()) {
                total += self.ssim_2d(r, p, range);
                count += 1;
            }
        }
        if count == 0 {
            1.0
        } else {
            total / count as f64
        }
    }

    /// Mean SSIM of one grid over every valid window position.
    pub fn ssim_2d(&self, reference: ArrayView2<'_, f32>, prediction: ArrayView2<'_, f32>, range: f64) -> f64 {
        let (height, width) = reference.dim();
        let mut side = self.window.min(height).min(width).max(1);
        if side % 2 == 0 {
            side -= 1;
        }
        let n = (side * side) as f64;
        let correction = if side * side > 1 { n / (n - 1.0) } else { 1.0 };
        let c1 = (self.k1 * range).powi(2);
        let c2 = (self.k2 * range).powi(2);

        let mut total = 0.0;
        let mut positions = 0usize;
        for top in 0..=height - side {
            for left in 0..=width - side {
                let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
                for i in top..top + side {
                    for j in left..left + side {
                        let x = f64::from(reference[[i, j]]);
                        let y = f64::from(prediction[[i, j]]);
                        sx += x;
                        sy += y;
                        sxx += x * x;
                        syy += y * y;
                        sxy += x * y;
                    }
                }
                let (mx, my) = (sx / n, sy / n);
                let var_x = (sxx / n - mx * mx) * correction;
                let var_y = (syy / n - my * my) * correction;
                let cov = (sxy / n - mx * my) * correction;

                let numerator = (2.0 * mx * my + c1) * (2.0 * cov + c2);
                let denominator = (mx * mx + my * my + c1) * (var_x + var_y + c2);
                total += numerator / denominator;
                positions += 1;
            }
        }
        total / positions as f64
    }
}

pub(crate) fn host_array<B: Backend>(tensor: Tensor<B, 5>) -> Result<Array5<f32>> {
    let dims = tensor.dims();
    let values = host_values(tensor)?;
    Array5::from_shape_vec(dims, values).map_err(|e| TrainError::ShapeMismatch(e.to_string()))
}

fn data_range(reference: &ArrayView4<'_, f32>) -> f64 {
    let (min, max) = reference
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = f64::from(max - min);
    if range > 0.0 && range.is_finite() {
        range
    } else {
        1.0
    }
}

fn sample_psnr(reference: &ArrayView4<'_, f32>, prediction: &ArrayView4<'_, f32>, range: f64) -> f64 {
    let n = reference.len() as f64;
    let mse = reference
        .iter()
        .zip(prediction.iter())
        .map(|(&r, &p)| f64::from(r - p).powi(2))
        .sum::<f64>()
        / n;
    if mse == 0.0 {
        f64::INFINITY
    } else {
        10.0 * (range * range / mse).log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use ndarray::Array2;

    type TestBackend = NdArray;

    fn sequence(dims: [usize; 5], phase: f32) -> Tensor<TestBackend, 5> {
        let n: usize = dims.iter().product();
        let values: Vec<f32> = (0..n).map(|i| (i as f32 * 0.21 + phase).sin()).collect();
        Tensor::from_data(TensorData::new(values, dims), &Default::default())
    }

    #[test]
    fn test_identical_sequences() {
        let x = sequence([2, 4, 1, 8, 8], 0.0);
        let metrics = MetricEvaluator::new().evaluate(x.clone(), x).unwrap();
        assert!((metrics.ssim - 1.0).abs() < 1e-9);
        assert!(metrics.psnr.is_infinite() && metrics.psnr > 0.0);
    }

    #[test]
    fn test_noisy_prediction_scores_lower() {
        let x = sequence([1, 3, 2, 8, 8], 0.0);
        let y = x.clone() + sequence([1, 3, 2, 8, 8], 1.3).mul_scalar(0.2);
        let metrics = MetricEvaluator::new().evaluate(x, y).unwrap();
        assert!(metrics.ssim < 1.0 && metrics.ssim > -1.0);
        assert!(metrics.psnr.is_finite() && metrics.psnr > 0.0);
    }

    #[test]
    fn test_psnr_known_value() {
        let x = Tensor::<TestBackend, 5>::zeros([1, 1, 1, 2, 2], &Default::default());
        let y = Tensor::<TestBackend, 5>::ones([1, 1, 1, 2, 2], &Default::default()).mul_scalar(0.1);
        // Constant reference: range falls back to 1, mse = 0.01.
        let metrics = MetricEvaluator::new().evaluate(x, y).unwrap();
        assert!((metrics.psnr - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_window_clipped_to_small_grid() {
        let evaluator = MetricEvaluator::new();
        let a = Array2::from_shape_fn((4, 6), |(i, j)| (i * 6 + j) as f32);
        let score = evaluator.ssim_2d(a.view(), a.view(), 23.0);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shape_mismatch() {
        let result = MetricEvaluator::new().evaluate(
            sequence([1, 3, 1, 4, 4], 0.0),
            sequence([1, 2, 1, 4, 4], 0.0),
        );
        assert!(matches!(result, Err(TrainError::ShapeMismatch(_))));
    }
}
