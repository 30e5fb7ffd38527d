//! # gapcast
//!
//! Forecasting partially observed spatiotemporal sequences with burn.
//!
//! gapcast trains and evaluates forecasters over gridded sequences with missing
//! frames, behind one uniform protocol:
//!
//! - **Data**: datasets of `(context, target, mask)`, synthetic generation, `.npz` I/O
//! - **Transforms**: interpolation of unobserved context frames
//! - **Models**: recurrent, latent-dynamics and masked-transformer forecasters, and
//!   the pretrained autoencoder the latter two keep frozen
//! - **Training**: loss composition, SSIM/PSNR, the train/validate/test/predict
//!   orchestrator, and epoch loops
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gapcast::prelude::*;
//!
//! let dataset = SyntheticDataset::new(SyntheticConfig::default()).generate()?;
//! let (train, valid, test) = random_split(&dataset, 0.05, 0.05, Seed::new(42))?;
//! let loaders = SequenceDataLoaders::builder(train, valid, test).batch_size(32).build()?;
//!
//! let model = ConvLstmConfig::new(dataset.frame_shape(), 5).init(&device);
//! let trainer = Trainer::<Autodiff<NdArray>>::new(TrainerConfig::default(), device);
//! let output = trainer.fit(model, &loaders, &mut MetricHistory::new())?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub use gapcast_core as core;
pub use gapcast_data as data;
pub use gapcast_models as models;
pub use gapcast_train as train;
pub use gapcast_transforms as transforms;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use gapcast::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use gapcast_core::{
        Capabilities, Forecast, ForecastInput, ForecastingModel, FrameShape, ModelFamily, Phase,
        Seed, SequenceBatch, SequenceShape,
    };

    // Data
    pub use gapcast_data::{
        random_split, read_npz, write_npz, SequenceDataLoader, SequenceDataLoaders,
        SequenceDataset, SyntheticConfig, SyntheticDataset,
    };

    // Transforms
    pub use gapcast_transforms::{interpolate_batch, interpolate_sequence};

    // Models
    pub use gapcast_models::{
        AutoEncoder, AutoEncoderConfig, CheckpointRef, CheckpointStore, ConvLstmConfig,
        ConvLstmForecaster, FileCheckpointStore, FrozenAutoEncoder, LatentDynamicsConfig,
        LatentDynamicsForecaster, MaskedSequenceConfig, MaskedSequenceForecaster,
        MemoryCheckpointStore, ParameterSet,
    };

    // Training
    pub use gapcast_train::{
        ExperimentConfig, LossComposer, LossPolicy, MetricEvaluator, MetricHistory, MetricSink,
        NpyVisualizer, ScaleStatistic, SequenceVisualizer, TracingSink, Trainer, TrainerConfig,
        TrainingOrchestrator, TrainingPreset,
    };
}
