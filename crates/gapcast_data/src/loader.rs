//! Dataloader producing batched burn tensors.

use burn::prelude::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::dataset::SequenceDataset;
use crate::error::{DataError, Result};
use gapcast_core::{Seed, SequenceBatch};

/// A dataloader that produces [`SequenceBatch`]es from a dataset.
///
/// # Example
///
/// ```rust,ignore
/// use gapcast_data::{SequenceDataLoader, SequenceDataset};
/// use gapcast_core::Seed;
///
/// let loader = SequenceDataLoader::builder(dataset)
///     .batch_size(32)
///     .shuffle(true)
///     .seed(Seed::new(42))
///     .build()?;
///
/// for batch in loader.iter::<MyBackend>(&device) {
///     let batch = batch?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SequenceDataLoader {
    dataset: SequenceDataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<Seed>,
}

impl SequenceDataLoader {
    /// Create a new dataloader builder.
    #[must_use]
    pub fn builder(dataset: SequenceDataset) -> SequenceDataLoaderBuilder {
        SequenceDataLoaderBuilder::new(dataset)
    }

    /// Get the dataset.
    #[must_use]
    pub fn dataset(&self) -> &SequenceDataset {
        &self.dataset
    }

    /// Get the batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get the number of batches.
    #[must_use]
    pub fn n_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Get the total number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Check if the loader is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Create an iterator over batches on `device`.
    #[must_use]
    pub fn iter<B: Backend>(&self, device: &B::Device) -> SequenceDataLoaderIter<'_, B> {
        SequenceDataLoaderIter::new(self, device.clone())
    }
}

/// Builder for [`SequenceDataLoader`].
pub struct SequenceDataLoaderBuilder {
    dataset: SequenceDataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<Seed>,
}

impl SequenceDataLoaderBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(dataset: SequenceDataset) -> Self {
        Self {
            dataset,
            batch_size: 32,
            shuffle: false,
            drop_last: false,
            seed: None,
        }
    }

    /// Set the batch size.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable or disable shuffling.
    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Enable or disable dropping the last incomplete batch.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Set the random seed for shuffling.
    #[must_use]
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the dataloader.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero batch size or an empty dataset.
    pub fn build(self) -> Result<SequenceDataLoader> {
        if self.batch_size == 0 {
            return Err(DataError::InvalidBatchSize(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        if self.dataset.is_empty() {
            return Err(DataError::EmptyDataset);
        }

        Ok(SequenceDataLoader {
            dataset: self.dataset,
            batch_size: self.batch_size,
            shuffle: self.shuffle,
            drop_last: self.drop_last,
            seed: self.seed,
        })
    }
}

/// Iterator over batches from a [`SequenceDataLoader`].
pub struct SequenceDataLoaderIter<'a, B: Backend> {
    loader: &'a SequenceDataLoader,
    device: B::Device,
    indices: Vec<usize>,
    current_batch: usize,
    n_batches: usize,
}

impl<'a, B: Backend> SequenceDataLoaderIter<'a, B> {
    fn new(loader: &'a SequenceDataLoader, device: B::Device) -> Self {
        let mut indices: Vec<usize> = (0..loader.dataset.len()).collect();

        if loader.shuffle {
            let mut rng = match loader.seed {
                Some(seed) => seed.to_rng(),
                None => ChaCha8Rng::from_entropy(),
            };
            indices.shuffle(&mut rng);
        }

        Self {
            loader,
            device,
            indices,
            current_batch: 0,
            n_batches: loader.n_batches(),
        }
    }

    fn create_batch(&self, indices: &[usize]) -> Result<SequenceBatch<B>> {
        let dataset = &self.loader.dataset;
        let n = indices.len();
        let frame = dataset.frame_shape();
        let (t_in, t_out) = (dataset.context_steps(), dataset.forecast_steps());

        let mut context = Vec::with_capacity(n * t_in * frame.numel());
        let mut target = Vec::with_capacity(n * t_out * frame.numel());
        let mut mask = Vec::with_capacity(n * t_in);

        for &idx in indices {
            let (c, t, m) = dataset.get(idx)?;
            context.extend(c.iter().copied());
            target.extend(t.iter().copied());
            mask.extend(m.iter().copied());
        }

        let dims = |steps| [n, steps, frame.channels, frame.height, frame.width];
        let context = Tensor::<B, 5>::from_data(TensorData::new(context, dims(t_in)), &self.device);
        let target = Tensor::<B, 5>::from_data(TensorData::new(target, dims(t_out)), &self.device);
        let mask = Tensor::<B, 2, Bool>::from_data(TensorData::new(mask, [n, t_in]), &self.device);

        Ok(SequenceBatch::new(context, target, mask)?)
    }
}

impl<B: Backend> Iterator for SequenceDataLoaderIter<'_, B> {
    type Item = Result<SequenceBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_batch >= self.n_batches {
            return None;
        }

        let start = self.current_batch * self.loader.batch_size;
        let end = (start + self.loader.batch_size).min(self.indices.len());
        self.current_batch += 1;

        Some(self.create_batch(&self.indices[start..end]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.n_batches - self.current_batch;
        (remaining, Some(remaining))
    }
}

impl<B: Backend> ExactSizeIterator for SequenceDataLoaderIter<'_, B> {}

/// Train, validation and test dataloaders for one experiment.
///
/// ```rust,ignore
/// let dls = SequenceDataLoaders::builder(train, valid, test)
///     .batch_size(32)
///     .seed(Seed::new(42))
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct SequenceDataLoaders {
    train: SequenceDataLoader,
    valid: SequenceDataLoader,
    test: SequenceDataLoader,
}

impl SequenceDataLoaders {
    /// Create a new builder.
    #[must_use]
    pub fn builder(
        train: SequenceDataset,
        valid: SequenceDataset,
        test: SequenceDataset,
    ) -> SequenceDataLoadersBuilder {
        SequenceDataLoadersBuilder::new(train, valid, test)
    }

    /// Get the training dataloader.
    #[must_use]
    pub fn train(&self) -> &SequenceDataLoader {
        &self.train
    }

    /// Get the validation dataloader.
    #[must_use]
    pub fn valid(&self) -> &SequenceDataLoader {
        &self.valid
    }

    /// Get the test dataloader.
    #[must_use]
    pub fn test(&self) -> &SequenceDataLoader {
        &self.test
    }

    /// Get the batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.train.batch_size()
    }
}

/// Builder for [`SequenceDataLoaders`].
pub struct SequenceDataLoadersBuilder {
    train: SequenceDataset,
    valid: SequenceDataset,
    test: SequenceDataset,
    batch_size: usize,
    shuffle_train: bool,
    seed: Option<Seed>,
}

impl SequenceDataLoadersBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(train: SequenceDataset, valid: SequenceDataset, test: SequenceDataset) -> Self {
        Self {
            train,
            valid,
            test,
            batch_size: 32,
            shuffle_train: true,
            seed: None,
        }
    }

    /// Set the batch size for every loader.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable or disable shuffling for the training loader.
    #[must_use]
    pub fn shuffle_train(mut self, shuffle: bool) -> Self {
        self.shuffle_train = shuffle;
        self
    }

    /// Set the random seed.
    #[must_use]
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the dataloaders.
    ///
    /// # Errors
    ///
    /// Returns an error if any split is empty or the batch size is zero.
    pub fn build(self) -> Result<SequenceDataLoaders> {
        let mut train = SequenceDataLoader::builder(self.train)
            .batch_size(self.batch_size)
            .shuffle(self.shuffle_train);
        if let Some(seed) = self.seed {
            train = train.seed(seed.derive("train"));
        }

        let eval = |dataset| {
            SequenceDataLoader::builder(dataset)
                .batch_size(self.batch_size)
                .shuffle(false)
                .build()
        };

        Ok(SequenceDataLoaders {
            train: train.build()?,
            valid: eval(self.valid)?,
            test: eval(self.test)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use ndarray::{Array2, Array5};

    type TestBackend = NdArray;

    fn dataset(n: usize) -> SequenceDataset {
        let context = Array5::from_shape_fn((n, 3, 1, 2, 2), |(i, _, _, _, _)| i as f32);
        let target = Array5::from_shape_fn((n, 2, 1, 2, 2), |(i, _, _, _, _)| -(i as f32));
        let mask = Array2::from_shape_fn((n, 3), |(i, t)| (i + t) % 2 == 0);
        SequenceDataset::from_arrays(context, target, mask).unwrap()
    }

    #[test]
    fn test_loader_n_batches() {
        let loader = SequenceDataLoader::builder(dataset(10))
            .batch_size(4)
            .build()
            .unwrap();
        assert_eq!(loader.n_batches(), 3);

        let loader = SequenceDataLoader::builder(dataset(10))
            .batch_size(4)
            .drop_last(true)
            .build()
            .unwrap();
        assert_eq!(loader.n_batches(), 2);
    }

    #[test]
    fn test_loader_rejects_zero_batch() {
        assert!(matches!(
            SequenceDataLoader::builder(dataset(3)).batch_size(0).build(),
            Err(DataError::InvalidBatchSize(_))
        ));
    }

    #[test]
    fn test_loader_yields_aligned_batches() {
        let device = Default::default();
        let loader = SequenceDataLoader::builder(dataset(5))
            .batch_size(2)
            .build()
            .unwrap();

        let batches: Vec<SequenceBatch<TestBackend>> = loader
            .iter::<TestBackend>(&device)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].context.dims(), [2, 3, 1, 2, 2]);
        assert_eq!(batches[0].target.dims(), [2, 2, 1, 2, 2]);
        assert_eq!(batches[2].batch_size(), 1);

        let rows = gapcast_core::mask_rows(batches[1].mask.clone()).unwrap();
        assert_eq!(rows, vec![vec![true, false, true], vec![false, true, false]]);

        let target = batches[2].target.clone().into_data().to_vec::<f32>().unwrap();
        assert!(target.iter().all(|&v| v == -4.0));
    }

    #[test]
    fn test_loader_shuffle_is_seeded() {
        let device = Default::default();
        let first = |seed| {
            let loader = SequenceDataLoader::builder(dataset(16))
                .batch_size(16)
                .shuffle(true)
                .seed(Seed::new(seed))
                .build()
                .unwrap();
            let batch = loader.iter::<TestBackend>(&device).next().unwrap().unwrap();
            batch.context.into_data().to_vec::<f32>().unwrap()
        };
        assert_eq!(first(5), first(5));
    }

    #[test]
    fn test_loaders_builder() {
        let dls = SequenceDataLoaders::builder(dataset(20), dataset(4), dataset(3))
            .batch_size(8)
            .seed(Seed::new(42))
            .build()
            .unwrap();
        assert_eq!(dls.batch_size(), 8);
        assert_eq!(dls.train().n_batches(), 3);
        assert_eq!(dls.valid().len(), 4);
        assert_eq!(dls.test().n_batches(), 1);
    }
}
