//! Dataset splitting utilities.

use rand::seq::SliceRandom;

use crate::dataset::SequenceDataset;
use crate::error::{DataError, Result};
use gapcast_core::Seed;

/// Split sizes for `n` samples and the given fractions.
///
/// Each split gets `floor(n * fraction)` samples; the remainder is handed out
/// one at a time starting from the first split.
fn split_lengths(n: usize, fractions: &[f64]) -> Vec<usize> {
    let mut lengths: Vec<usize> = fractions
        .iter()
        .map(|f| (n as f64 * f).floor() as usize)
        .collect();
    let remainder = n - lengths.iter().sum::<usize>();
    let k = lengths.len();
    for i in 0..remainder {
        lengths[i % k] += 1;
    }
    lengths
}

/// Randomly split a dataset into train, validation and test sets.
///
/// The train fraction is `1 - valid_ratio - test_ratio`.
///
/// # Arguments
///
/// * `dataset` - The dataset to split
/// * `valid_ratio` - Fraction for the validation set (e.g. 0.05)
/// * `test_ratio` - Fraction for the test set (e.g. 0.05)
/// * `seed` - Random seed for reproducibility
///
/// # Returns
///
/// A tuple of (train, valid, test) datasets.
pub fn random_split(
    dataset: &SequenceDataset,
    valid_ratio: f64,
    test_ratio: f64,
    seed: Seed,
) -> Result<(SequenceDataset, SequenceDataset, SequenceDataset)> {
    if valid_ratio < 0.0 || test_ratio < 0.0 || valid_ratio + test_ratio >= 1.0 {
        return Err(DataError::SplitError(format!(
            "valid_ratio + test_ratio must be in [0, 1), got {} + {}",
            valid_ratio, test_ratio
        )));
    }

    let n = dataset.len();
    let lengths = split_lengths(n, &[1.0 - valid_ratio - test_ratio, valid_ratio, test_ratio]);

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut seed.to_rng());

    let (train_idx, rest) = indices.split_at(lengths[0]);
    let (valid_idx, test_idx) = rest.split_at(lengths[1]);

    Ok((
        dataset.subset(train_idx)?,
        dataset.subset(valid_idx)?,
        dataset.subset(test_idx)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array5};

    fn dataset(n: usize) -> SequenceDataset {
        let context = Array5::from_shape_fn((n, 2, 1, 1, 1), |(i, _, _, _, _)| i as f32);
        let target = Array5::zeros((n, 1, 1, 1, 1));
        SequenceDataset::from_arrays(context, target, Array2::from_elem((n, 2), true)).unwrap()
    }

    #[test]
    fn test_split_lengths_distribute_remainder() {
        assert_eq!(split_lengths(64, &[0.9, 0.05, 0.05]), vec![58, 3, 3]);
        assert_eq!(split_lengths(100, &[0.9, 0.05, 0.05]), vec![90, 5, 5]);
        assert_eq!(split_lengths(3, &[0.9, 0.05, 0.05]), vec![3, 0, 0]);
    }

    #[test]
    fn test_random_split_partitions() {
        let ds = dataset(40);
        let (train, valid, test) = random_split(&ds, 0.1, 0.2, Seed::new(1)).unwrap();
        assert_eq!((train.len(), valid.len(), test.len()), (28, 4, 8));

        let mut seen: Vec<usize> = [&train, &valid, &test]
            .iter()
            .flat_map(|d| d.context().iter().step_by(2).map(|&v| v as usize).collect::<Vec<_>>())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_random_split_is_seeded() {
        let ds = dataset(20);
        let (a, _, _) = random_split(&ds, 0.25, 0.25, Seed::new(9)).unwrap();
        let (b, _, _) = random_split(&ds, 0.25, 0.25, Seed::new(9)).unwrap();
        assert_eq!(a.context(), b.context());
    }

    #[test]
    fn test_random_split_rejects_ratios() {
        let ds = dataset(10);
        assert!(random_split(&ds, 0.6, 0.4, Seed::new(0)).is_err());
        assert!(random_split(&ds, -0.1, 0.1, Seed::new(0)).is_err());
    }
}
