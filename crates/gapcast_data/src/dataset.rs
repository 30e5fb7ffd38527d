//! In-memory dataset of partially observed sequences.

use ndarray::{Array2, Array5, ArrayView1, ArrayView4, Axis};

use crate::error::{DataError, Result};
use gapcast_core::FrameShape;

/// A dataset of `(context, target, mask)` samples.
///
/// - `context`: `(N, T_in, C, H, W)`
/// - `target`: `(N, T_out, C, H, W)`
/// - `mask`: `(N, T_in)`, `true` where the context frame was observed
///
/// # Example
///
/// ```rust,ignore
/// use gapcast_data::SequenceDataset;
/// use ndarray::{Array2, Array5};
///
/// let context = Array5::<f32>::zeros((8, 10, 1, 16, 16));
/// let target = Array5::<f32>::zeros((8, 5, 1, 16, 16));
/// let mask = Array2::from_elem((8, 10), true);
/// let dataset = SequenceDataset::from_arrays(context, target, mask)?;
/// ```
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    context: Array5<f32>,
    target: Array5<f32>,
    mask: Array2<bool>,
}

impl SequenceDataset {
    /// Create a dataset from arrays.
    ///
    /// # Errors
    ///
    /// Returns an error if sample counts, frame shapes or the mask length disagree.
    pub fn from_arrays(context: Array5<f32>, target: Array5<f32>, mask: Array2<bool>) -> Result<Self> {
        let c = context.shape();
        let t = target.shape();
        let m = mask.shape();

        if c[0] != t[0] || c[0] != m[0] {
            return Err(DataError::InvalidShape(format!(
                "context has {} samples, target {}, mask {}",
                c[0], t[0], m[0]
            )));
        }
        if c[2..] != t[2..] {
            return Err(DataError::InvalidShape(format!(
                "context frames are {:?} but target frames are {:?}",
                &c[2..],
                &t[2..]
            )));
        }
        if c[1] != m[1] {
            return Err(DataError::InvalidShape(format!(
                "mask covers {} steps but context has {}",
                m[1], c[1]
            )));
        }

        Ok(Self {
            context,
            target,
            mask,
        })
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.context.shape()[0]
    }

    /// Check if the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of context steps per sample.
    #[must_use]
    pub fn context_steps(&self) -> usize {
        self.context.shape()[1]
    }

    /// Number of forecast steps per sample.
    #[must_use]
    pub fn forecast_steps(&self) -> usize {
        self.target.shape()[1]
    }

    /// Shape of a single frame.
    #[must_use]
    pub fn frame_shape(&self) -> FrameShape {
        let s = self.context.shape();
        FrameShape::new(s[2], s[3], s[4])
    }

    /// Context array.
    #[must_use]
    pub fn context(&self) -> &Array5<f32> {
        &self.context
    }

    /// Target array.
    #[must_use]
    pub fn target(&self) -> &Array5<f32> {
        &self.target
    }

    /// Observation mask.
    #[must_use]
    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    /// Fraction of context frames that were observed.
    #[must_use]
    pub fn observed_fraction(&self) -> f32 {
        if self.mask.is_empty() {
            return 0.0;
        }
        self.mask.iter().filter(|&&m| m).count() as f32 / self.mask.len() as f32
    }

    /// Get a sample by index.
    pub fn get(&self, index: usize) -> Result<(ArrayView4<'_, f32>, ArrayView4<'_, f32>, ArrayView1<'_, bool>)> {
        if index >= self.len() {
            return Err(DataError::IndexOutOfBounds {
                index,
                length: self.len(),
            });
        }

        Ok((
            self.context.index_axis(Axis(0), index),
            self.target.index_axis(Axis(0), index),
            self.mask.index_axis(Axis(0), index),
        ))
    }

    /// Get a subset of samples by indices.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(DataError::IndexOutOfBounds {
                index,
                length: self.len(),
            });
        }

        Ok(Self {
            context: self.context.select(Axis(0), indices),
            target: self.target.select(Axis(0), indices),
            mask: self.mask.select(Axis(0), indices),
        })
    }
}
