//! Linear gap filling along the time axis.
//!
//! Unobserved frames are rebuilt from the nearest observed frames on either
//! side, independently for every channel and grid cell. Gaps at the start or
//! end of the window hold the nearest observed frame; nothing is extrapolated.

use burn::prelude::*;

use crate::error::{InterpolationError, Result};
use gapcast_core::mask_rows;

/// How a single time step is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    /// The frame was observed and passes through unchanged.
    Observed,
    /// Copy of an observed frame (leading or trailing gap).
    Hold(usize),
    /// `(1 - weight) * frame[prev] + weight * frame[next]`.
    Blend {
        /// Nearest earlier observed step.
        prev: usize,
        /// Nearest later observed step.
        next: usize,
        /// Position of the gap between the two anchors, in `(0, 1)`.
        weight: f32,
    },
}

/// Resolve the interpolation anchor for every step of a mask.
///
/// # Errors
///
/// Returns [`InterpolationError::NoObservedFrames`] if the mask has no `true` entry.
pub fn anchors(mask: &[bool]) -> Result<Vec<Anchor>> {
    let observed: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter_map(|(t, &seen)| seen.then_some(t))
        .collect();

    let (Some(&first), Some(&last)) = (observed.first(), observed.last()) else {
        return Err(InterpolationError::NoObservedFrames { sample: 0 });
    };

    let mut cursor = 0;
    Ok((0..mask.len())
        .map(|t| {
            if mask[t] {
                cursor += 1;
                Anchor::Observed
            } else if t < first {
                Anchor::Hold(first)
            } else if t > last {
                Anchor::Hold(last)
            } else {
                // observed[cursor - 1] < t < observed[cursor]
                let prev = observed[cursor - 1];
                let next = observed[cursor];
                let weight = (t - prev) as f32 / (next - prev) as f32;
                Anchor::Blend { prev, next, weight }
            }
        })
        .collect())
}

/// Fill the unobserved frames of one sample.
///
/// `sequence` is `(T, C, H, W)` and `mask` has one entry per time step.
/// Observed frames are returned bit-identical.
///
/// # Errors
///
/// - [`InterpolationError::MaskLength`] if `mask.len() != T`
/// - [`InterpolationError::NoObservedFrames`] if no frame is observed
pub fn interpolate_sequence<B: Backend>(sequence: Tensor<B, 4>, mask: &[bool]) -> Result<Tensor<B, 4>> {
    let steps = sequence.dims()[0];
    if mask.len() != steps {
        return Err(InterpolationError::MaskLength {
            mask: mask.len(),
            steps,
        });
    }

    let anchors = anchors(mask)?;
    if anchors.iter().all(|a| matches!(a, Anchor::Observed)) {
        return Ok(sequence);
    }

    let frame = |t: usize| sequence.clone().narrow(0, t, 1);
    let frames: Vec<Tensor<B, 4>> = anchors
        .iter()
        .enumerate()
        .map(|(t, anchor)| match *anchor {
            Anchor::Observed => frame(t),
            Anchor::Hold(source) => frame(source),
            Anchor::Blend { prev, next, weight } => {
                frame(prev).mul_scalar(1.0 - weight) + frame(next).mul_scalar(weight)
            }
        })
        .collect();

    Ok(Tensor::cat(frames, 0))
}

/// Fill unobserved frames for every sample of a batched context window.
///
/// `context` is `(B, T, C, H, W)` and `mask` is `(B, T)`. Samples are repaired
/// independently; the input tensors are not modified.
///
/// # Errors
///
/// Returns [`InterpolationError::BatchSize`] if the mask has a different
/// number of rows than `context` has samples; otherwise propagates
/// [`interpolate_sequence`] errors, tagged with the sample index.
pub fn interpolate_batch<B: Backend>(
    context: Tensor<B, 5>,
    mask: Tensor<B, 2, Bool>,
) -> Result<Tensor<B, 5>> {
    let rows = mask_rows(mask)?;
    if rows.len() != context.dims()[0] {
        return Err(InterpolationError::BatchSize {
            mask: rows.len(),
            context: context.dims()[0],
        });
    }

    let samples = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let sample: Tensor<B, 4> = context.clone().narrow(0, i, 1).squeeze(0);
            interpolate_sequence(sample, row)
                .map(|filled| filled.unsqueeze_dim::<5>(0))
                .map_err(|e| e.at_sample(i))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Tensor::cat(samples, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    /// `(T, 1, 2, 2)` sequence whose frame `t` is filled with `values[t]`,
    /// plus a per-cell offset so cells are distinguishable.
    fn ramp(values: &[f32]) -> Tensor<TestBackend, 4> {
        let device = Default::default();
        let data: Vec<f32> = values
            .iter()
            .flat_map(|&v| (0..4).map(move |cell| v + cell as f32 * 0.25))
            .collect();
        Tensor::from_data(TensorData::new(data, [values.len(), 1, 2, 2]), &device)
    }

    fn to_vec(t: Tensor<TestBackend, 4>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_anchors_interior_and_edges() {
        let mask = [false, true, false, false, true, false];
        let anchors = anchors(&mask).unwrap();
        assert_eq!(anchors[0], Anchor::Hold(1));
        assert_eq!(anchors[1], Anchor::Observed);
        assert_eq!(
            anchors[2],
            Anchor::Blend {
                prev: 1,
                next: 4,
                weight: 1.0 / 3.0
            }
        );
        assert_eq!(
            anchors[3],
            Anchor::Blend {
                prev: 1,
                next: 4,
                weight: 2.0 / 3.0
            }
        );
        assert_eq!(anchors[5], Anchor::Hold(4));
    }

    #[test]
    fn test_anchors_all_missing() {
        let err = anchors(&[false, false, false]).unwrap_err();
        assert!(matches!(err, InterpolationError::NoObservedFrames { .. }));
    }

    #[test]
    fn test_fully_observed_is_identity() {
        let x = ramp(&[1.0, 2.0, 7.0, -3.0]);
        let out = interpolate_sequence(x.clone(), &[true; 4]).unwrap();
        assert_eq!(to_vec(out), to_vec(x));
    }

    #[test]
    fn test_single_interior_gap_is_midpoint() {
        let x = ramp(&[0.0, 2.0, 100.0, 6.0, 8.0]);
        let out = to_vec(interpolate_sequence(x, &[true, true, false, true, true]).unwrap());
        for cell in 0..4 {
            let expected = 4.0 + cell as f32 * 0.25;
            assert!((out[2 * 4 + cell] - expected).abs() < 1e-6);
        }
        // Observed frames are untouched.
        assert_eq!(out[4], 2.0);
        assert_eq!(out[12], 6.0);
    }

    #[test]
    fn test_leading_and_trailing_gaps_hold() {
        let x = ramp(&[9.0, 9.0, 3.0, 5.0, 9.0]);
        let out = to_vec(interpolate_sequence(x, &[false, false, true, true, false]).unwrap());
        for cell in 0..4 {
            let offset = cell as f32 * 0.25;
            assert_eq!(out[cell], 3.0 + offset);
            assert_eq!(out[4 + cell], 3.0 + offset);
            assert_eq!(out[16 + cell], 5.0 + offset);
        }
    }

    #[test]
    fn test_mask_length_mismatch() {
        let x = ramp(&[1.0, 2.0, 3.0]);
        let err = interpolate_sequence(x, &[true, true]).unwrap_err();
        assert!(matches!(
            err,
            InterpolationError::MaskLength { mask: 2, steps: 3 }
        ));
    }

    #[test]
    fn test_batch_size_mismatch() {
        let device = Default::default();
        let context = Tensor::<TestBackend, 5>::ones([3, 2, 1, 2, 2], &device);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(vec![true; 4], [2, 2]), &device);
        let err = interpolate_batch(context, mask).unwrap_err();
        assert!(matches!(
            err,
            InterpolationError::BatchSize { mask: 2, context: 3 }
        ));
    }

    #[test]
    fn test_batch_reports_sample_index() {
        let device = Default::default();
        let context = Tensor::<TestBackend, 5>::ones([3, 4, 1, 2, 2], &device);
        let mut flags = vec![true; 12];
        for flag in &mut flags[8..12] {
            *flag = false;
        }
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(flags, [3, 4]), &device);

        let err = interpolate_batch(context, mask).unwrap_err();
        assert!(matches!(err, InterpolationError::NoObservedFrames { sample: 2 }));
    }

    #[test]
    fn test_batch_samples_are_independent() {
        let device = Default::default();
        let a = ramp(&[0.0, 10.0, 4.0]).unsqueeze_dim::<5>(0);
        let b = ramp(&[1.0, 1.0, 1.0]).unsqueeze_dim::<5>(0);
        let context = Tensor::cat(vec![a, b], 0);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(
            TensorData::new(vec![true, false, true, true, true, true], [2, 3]),
            &device,
        );

        let out = interpolate_batch(context, mask)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!((out[4] - 2.0).abs() < 1e-6);
        // Second sample fully observed, passes through.
        assert_eq!(out[12 + 4], 1.0);
    }
}
