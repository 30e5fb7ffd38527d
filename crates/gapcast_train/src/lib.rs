//! # gapcast_train
//!
//! The shared training protocol for gapcast forecasters.
//!
//! This crate provides:
//! - [`TrainingOrchestrator`] running train/validate/test/predict per batch
//! - [`LossComposer`] with unnormalized and scale-normalized policies
//! - [`MetricEvaluator`] for SSIM and PSNR
//! - [`TrainableGradients`] keeping frozen parameters out of every update
//! - [`Trainer`] epoch loops, including autoencoder pretraining
//! - [`RAdam`] and per-architecture [`TrainingPreset`]s
//! - [`MetricSink`] and [`SequenceVisualizer`] outputs
//! - [`ExperimentConfig`] loaded from JSON
//!
//! ## Example
//!
//! ```rust,ignore
//! use gapcast_train::{Trainer, TrainerConfig, MetricHistory};
//!
//! let trainer = Trainer::<Autodiff<NdArray>>::new(TrainerConfig::default(), device);
//! let mut history = MetricHistory::new();
//! let output = trainer.fit(model, &loaders, &mut history)?;
//! let report = trainer.test(&output.model, loaders.test(), &mut history)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod gradients;
mod json;
pub mod losses;
pub mod metrics;
pub mod optimizer;
pub mod orchestrator;
pub mod preset;
pub mod scheduler;
pub mod sink;
pub mod training;
pub mod visual;

pub use config::ExperimentConfig;
pub use error::{Result, TrainError};
pub use gradients::TrainableGradients;
pub use losses::{ComposedLoss, LossComposer, LossPolicy, LossValues, ScaleStatistic};
pub use metrics::{MetricEvaluator, SequenceMetrics};
pub use optimizer::{RAdam, RAdamConfig, RAdamState};
pub use orchestrator::{
    PredictOutput, StepCounters, TestOutput, TrainingOrchestrator, DEFAULT_VISUALISE_LIMIT,
};
pub use preset::{OptimizerKind, ScheduleKind, TrainingPreset};
pub use scheduler::{ConstantLR, CosineAnnealingLR, Scheduler};
pub use sink::{MetricHistory, MetricSink, TracingSink};
pub use training::{save_pretrained, EpochSummary, FitOutput, TestReport, Trainer, TrainerConfig};
pub use visual::{MemoryVisualizer, NpyVisualizer, SequenceVisualizer};
