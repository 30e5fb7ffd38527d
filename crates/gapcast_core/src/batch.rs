//! Batched sequence tensors.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::error::{CoreError, Result};
use crate::shape::SequenceShape;

/// Copy a float tensor into host memory as `f32` values in row-major order.
///
/// # Errors
///
/// Returns an error if the backend data cannot be read as `f32`.
pub fn host_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CoreError::TensorData(format!("{e:?}")))
}

/// Copy a boolean mask into host memory, one `Vec<bool>` per sample.
///
/// # Errors
///
/// Returns an error if the backend data cannot be read as `bool`.
pub fn mask_rows<B: Backend>(mask: Tensor<B, 2, Bool>) -> Result<Vec<Vec<bool>>> {
    let [batch, steps] = mask.dims();
    let flat = mask
        .into_data()
        .to_vec::<bool>()
        .map_err(|e| CoreError::TensorData(format!("{e:?}")))?;
    Ok((0..batch)
        .map(|i| flat[i * steps..(i + 1) * steps].to_vec())
        .collect())
}

/// One step's worth of data: the observed context window, the forecast window it
/// must predict, and which context frames were actually observed.
///
/// - `context`: `(B, T_in, C, H, W)`
/// - `target`: `(B, T_out, C, H, W)`
/// - `mask`: `(B, T_in)`, `true` where the context frame was observed
#[derive(Debug, Clone)]
pub struct SequenceBatch<B: Backend> {
    /// Context window (model input, may contain missing frames).
    pub context: Tensor<B, 5>,
    /// Forecast window (supervision only).
    pub target: Tensor<B, 5>,
    /// Observation mask over the context window.
    pub mask: Tensor<B, 2, Bool>,
}

impl<B: Backend> SequenceBatch<B> {
    /// Create a batch, validating that the three tensors line up.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ShapeMismatch`] if batch sizes, frame shapes or the
    /// mask length disagree.
    pub fn new(context: Tensor<B, 5>, target: Tensor<B, 5>, mask: Tensor<B, 2, Bool>) -> Result<Self> {
        let ctx = SequenceShape::from_dims(context.dims());
        let tgt = SequenceShape::from_dims(target.dims());
        let [mask_batch, mask_steps] = mask.dims();

        if ctx.batch != tgt.batch || ctx.batch != mask_batch {
            return Err(CoreError::ShapeMismatch(format!(
                "batch sizes differ: context {}, target {}, mask {}",
                ctx.batch, tgt.batch, mask_batch
            )));
        }
        if ctx.frame != tgt.frame {
            return Err(CoreError::ShapeMismatch(format!(
                "frame shapes differ: context {:?}, target {:?}",
                ctx.frame, tgt.frame
            )));
        }
        if ctx.steps != mask_steps {
            return Err(CoreError::ShapeMismatch(format!(
                "mask covers {} steps but context has {}",
                mask_steps, ctx.steps
            )));
        }

        Ok(Self {
            context,
            target,
            mask,
        })
    }

    /// Number of samples in the batch.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.context.dims()[0]
    }

    /// Context window shape.
    #[must_use]
    pub fn context_shape(&self) -> SequenceShape {
        SequenceShape::from_dims(self.context.dims())
    }

    /// Number of forecast steps.
    #[must_use]
    pub fn forecast_steps(&self) -> usize {
        self.target.dims()[1]
    }

    /// Ground truth over context and forecast windows, concatenated along time.
    #[must_use]
    pub fn full_sequence(&self) -> Tensor<B, 5> {
        Tensor::cat(vec![self.context.clone(), self.target.clone()], 1)
    }

    /// The device the batch lives on.
    pub fn device(&self) -> B::Device {
        self.context.device()
    }

    /// Move the batch to a device.
    #[must_use]
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            context: self.context.to_device(device),
            target: self.target.to_device(device),
            mask: self.mask.to_device(device),
        }
    }
}

impl<B: AutodiffBackend> SequenceBatch<B> {
    /// Drop gradient tracking, for the evaluation phases.
    #[must_use]
    pub fn inner(self) -> SequenceBatch<B::InnerBackend> {
        SequenceBatch {
            context: self.context.inner(),
            target: self.target.inner(),
            mask: self.mask.inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn mask(batch: usize, steps: usize) -> Tensor<TestBackend, 2, Bool> {
        let device = Default::default();
        let data = TensorData::new(vec![true; batch * steps], [batch, steps]);
        Tensor::<TestBackend, 2, Bool>::from_data(data, &device)
    }

    #[test]
    fn test_batch_full_sequence() {
        let device = Default::default();
        let context = Tensor::<TestBackend, 5>::zeros([2, 4, 1, 3, 3], &device);
        let target = Tensor::<TestBackend, 5>::ones([2, 2, 1, 3, 3], &device);
        let batch = SequenceBatch::new(context, target, mask(2, 4)).unwrap();

        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.forecast_steps(), 2);
        assert_eq!(batch.full_sequence().dims(), [2, 6, 1, 3, 3]);
    }

    #[test]
    fn test_batch_rejects_mask_length() {
        let device = Default::default();
        let context = Tensor::<TestBackend, 5>::zeros([2, 4, 1, 3, 3], &device);
        let target = Tensor::<TestBackend, 5>::zeros([2, 2, 1, 3, 3], &device);
        let err = SequenceBatch::new(context, target, mask(2, 3)).unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch(_)));
    }

    #[test]
    fn test_batch_rejects_frame_mismatch() {
        let device = Default::default();
        let context = Tensor::<TestBackend, 5>::zeros([2, 4, 1, 3, 3], &device);
        let target = Tensor::<TestBackend, 5>::zeros([2, 2, 2, 3, 3], &device);
        assert!(SequenceBatch::new(context, target, mask(2, 4)).is_err());
    }

    #[test]
    fn test_mask_rows() {
        let device = Default::default();
        let data = TensorData::new(vec![true, false, true, false, false, true], [2, 3]);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(data, &device);
        let rows = mask_rows(mask).unwrap();
        assert_eq!(rows, vec![vec![true, false, true], vec![false, false, true]]);
    }
}
