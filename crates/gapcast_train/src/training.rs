//! Epoch loops driving the orchestrator.
//!
//! The trainer owns the optimizer for the duration of a fit. Gradients are
//! filtered through [`TrainableGradients`] before every optimizer step, so frozen
//! submodules stay bit-identical across training.

use std::path::Path;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::{AdamWConfig, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use gapcast_core::{ForecastingModel, Phase};
use gapcast_data::{SequenceDataLoader, SequenceDataLoaders};
use gapcast_models::{
    save_model, AutoEncoder, AutoEncoderConfig, CheckpointMetadata, NumericalMode, ParameterSet,
    AUTOENCODER_ARCH,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gradients::TrainableGradients;
use crate::losses::LossPolicy;
use crate::optimizer::RAdamConfig;
use crate::orchestrator::{TrainingOrchestrator, DEFAULT_VISUALISE_LIMIT};
use crate::preset::{OptimizerKind, TrainingPreset};
use crate::scheduler::Scheduler;
use crate::sink::MetricSink;
use crate::visual::SequenceVisualizer;

/// Summary of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// Epoch index.
    pub epoch: usize,
    /// Learning rate used.
    pub lr: f64,
    /// Mean training loss.
    pub train_loss: f32,
    /// Mean validation loss, if the validation loader has batches.
    pub valid_loss: Option<f32>,
}

/// Training output with the final model.
#[derive(Debug)]
pub struct FitOutput<M> {
    /// Trained model.
    pub model: M,
    /// One summary per epoch.
    pub epochs: Vec<EpochSummary>,
    /// Total training time in seconds.
    pub training_time_secs: f64,
}

impl<M> FitOutput<M> {
    /// Validation loss of the last epoch.
    pub fn final_valid_loss(&self) -> Option<f32> {
        self.epochs.last().and_then(|e| e.valid_loss)
    }
}

/// Batch means over a test run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TestReport {
    /// Batches evaluated.
    pub batches: usize,
    /// Mean composed loss.
    #[serde(with = "crate::json::scalar")]
    pub loss: f64,
    /// Mean full-state MSE.
    #[serde(with = "crate::json::scalar")]
    pub mse: f64,
    /// Mean latent MSE, for models with a latent space.
    #[serde(with = "crate::json::optional")]
    pub latent_mse: Option<f64>,
    /// Mean SSIM.
    #[serde(with = "crate::json::scalar")]
    pub ssim: f64,
    /// Mean PSNR in dB; `+inf` when every batch was predicted exactly.
    #[serde(with = "crate::json::scalar")]
    pub psnr: f64,
}

/// Configuration for the trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Number of epochs.
    pub epochs: usize,
    /// Run-wide visualisation cap for predict.
    pub visualise_limit: usize,
    /// Loss policy override; the family's policy when unset.
    pub loss: Option<LossPolicy>,
    /// Optimizer preset override; the family's preset when unset.
    pub preset: Option<TrainingPreset>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            visualise_limit: DEFAULT_VISUALISE_LIMIT,
            loss: None,
            preset: None,
        }
    }
}

/// Runs fit, test and predict over data loaders.
pub struct Trainer<B: AutodiffBackend> {
    config: TrainerConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create a new trainer.
    pub fn new(config: TrainerConfig, device: B::Device) -> Self {
        Self { config, device }
    }

    /// Trainer configuration.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    fn orchestrator(&self, family: gapcast_core::ModelFamily) -> TrainingOrchestrator {
        let policy = self
            .config
            .loss
            .unwrap_or_else(|| LossPolicy::for_family(family));
        TrainingOrchestrator::new(policy).with_visualise_limit(self.config.visualise_limit)
    }

    /// Train `model` on the train loader, validating after every epoch.
    ///
    /// # Errors
    ///
    /// Fails on the first data-quality fault, shape mismatch, or gradient found
    /// on a frozen parameter.
    pub fn fit<M, S>(&self, model: M, loaders: &SequenceDataLoaders, sink: &mut S) -> Result<FitOutput<M>>
    where
        M: ForecastingModel<B> + AutodiffModule<B>,
        M::InnerModule: ForecastingModel<B::InnerBackend>,
        S: MetricSink,
    {
        let family = model.family();
        let preset = self
            .config
            .preset
            .unwrap_or_else(|| TrainingPreset::for_family(family));
        let params = ParameterSet::trainable(&model);
        tracing::info!(
            arch = family.name(),
            optimizer = ?preset.optimizer,
            trainable = params.len(),
            frozen = params.frozen_len(),
            elements = params.trainable_elements(),
            "starting fit"
        );

        let orchestrator = self.orchestrator(family);
        let scheduler = preset.scheduler();
        match preset.optimizer {
            OptimizerKind::AdamW => {
                let optim = AdamWConfig::new()
                    .with_weight_decay(preset.weight_decay as f32)
                    .init::<B, M>();
                self.run(model, optim, &params, scheduler.as_ref(), orchestrator, loaders, sink)
            }
            OptimizerKind::RAdam => {
                let optim = RAdamConfig::new()
                    .with_weight_decay(preset.weight_decay)
                    .init::<B, M>();
                self.run(model, optim, &params, scheduler.as_ref(), orchestrator, loaders, sink)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run<M, O, S>(
        &self,
        mut model: M,
        mut optim: O,
        params: &ParameterSet,
        scheduler: &dyn Scheduler,
        mut orchestrator: TrainingOrchestrator,
        loaders: &SequenceDataLoaders,
        sink: &mut S,
    ) -> Result<FitOutput<M>>
    where
        M: ForecastingModel<B> + AutodiffModule<B>,
        M::InnerModule: ForecastingModel<B::InnerBackend>,
        O: Optimizer<M, B>,
        S: MetricSink,
    {
        let start_time = Instant::now();
        let mut epochs = Vec::with_capacity(self.config.epochs);

        for epoch in 0..self.config.epochs {
            let lr = scheduler.get_lr(epoch);
            sink.log_scalar("train/lr", lr, orchestrator.steps().train);

            let mut train_total = 0.0f32;
            let mut train_batches = 0usize;
            for batch in loaders.train().iter::<B>(&self.device) {
                let batch = batch?;
                let loss = orchestrator.training_step(&mut model, &batch, sink)?;
                train_total += loss.loss.clone().into_scalar().elem::<f32>();
                train_batches += 1;

                let grads = TrainableGradients::extract(loss.loss.backward(), &model, params)?;
                model = optim.step(lr, model, grads);
            }

            let valid_model = model.valid();
            let mut valid_total = 0.0f32;
            let mut valid_batches = 0usize;
            for batch in loaders.valid().iter::<B>(&self.device) {
                let batch = batch?.inner();
                let values = orchestrator.validation_step(&valid_model, &batch, sink)?;
                valid_total += values.loss;
                valid_batches += 1;
            }

            let summary = EpochSummary {
                epoch,
                lr,
                train_loss: mean(train_total, train_batches),
                valid_loss: (valid_batches > 0).then(|| mean(valid_total, valid_batches)),
            };
            tracing::info!(
                epoch = epoch + 1,
                epochs = self.config.epochs,
                lr,
                train_loss = summary.train_loss,
                valid_loss = ?summary.valid_loss,
                "epoch complete"
            );
            epochs.push(summary);
        }

        Ok(FitOutput {
            model,
            epochs,
            training_time_secs: start_time.elapsed().as_secs_f64(),
        })
    }

    /// Evaluate losses and image-quality metrics over a loader.
    ///
    /// # Errors
    ///
    /// Fails on the first data-quality fault or shape mismatch.
    pub fn test<M, S>(&self, model: &M, loader: &SequenceDataLoader, sink: &mut S) -> Result<TestReport>
    where
        M: AutodiffModule<B>,
        M::InnerModule: ForecastingModel<B::InnerBackend>,
        S: MetricSink,
    {
        let model = model.valid();
        let mut orchestrator = self.orchestrator(model.family());
        tracing::info!(phase = %Phase::Test, batches = loader.n_batches(), "running");

        let mut report = TestReport::default();
        let mut latent_total = 0.0;
        let mut latent_batches = 0usize;
        for batch in loader.iter::<B>(&self.device) {
            let batch = batch?.inner();
            let output = orchestrator.test_step(&model, &batch, sink)?;
            report.batches += 1;
            report.loss += f64::from(output.losses.loss);
            report.mse += f64::from(output.losses.full_state);
            report.ssim += output.metrics.ssim;
            report.psnr += output.metrics.psnr;
            if let Some(latent) = output.losses.latent {
                latent_total += f64::from(latent);
                latent_batches += 1;
            }
        }

        if report.batches > 0 {
            let n = report.batches as f64;
            report.loss /= n;
            report.mse /= n;
            report.ssim /= n;
            report.psnr /= n;
        }
        report.latent_mse = (latent_batches > 0).then(|| latent_total / latent_batches as f64);
        tracing::info!(
            loss = report.loss,
            mse = report.mse,
            ssim = report.ssim,
            psnr = report.psnr,
            "test complete"
        );
        Ok(report)
    }

    /// Forecast every batch of a loader, visualising samples up to the cap.
    ///
    /// # Errors
    ///
    /// Fails on the first data-quality fault or visualizer error.
    pub fn predict<M, V>(
        &self,
        model: &M,
        loader: &SequenceDataLoader,
        visualizer: &mut V,
    ) -> Result<Vec<Tensor<B::InnerBackend, 5>>>
    where
        M: AutodiffModule<B>,
        M::InnerModule: ForecastingModel<B::InnerBackend>,
        V: SequenceVisualizer,
    {
        let model = model.valid();
        let mut orchestrator = self.orchestrator(model.family());
        let mut predictions = Vec::with_capacity(loader.n_batches());
        for batch in loader.iter::<B>(&self.device) {
            let batch = batch?.inner();
            let output = orchestrator.predict_step(&model, &batch, visualizer)?;
            predictions.push(output.prediction);
        }
        tracing::info!(
            batches = predictions.len(),
            visualised = orchestrator.visualised(),
            "predict complete"
        );
        Ok(predictions)
    }

    /// Fit an autoencoder on full-sequence reconstruction.
    ///
    /// This is the first stage of the staged pipeline: the result is saved with
    /// [`save_pretrained`] and later loaded frozen by the downstream forecasters.
    ///
    /// # Errors
    ///
    /// Fails on data errors.
    pub fn pretrain_autoencoder<S: MetricSink>(
        &self,
        config: &AutoEncoderConfig,
        loaders: &SequenceDataLoaders,
        sink: &mut S,
    ) -> Result<FitOutput<AutoEncoder<B>>> {
        let start_time = Instant::now();
        let preset = TrainingPreset::autoencoder();
        let mut model = config.init::<B>(&self.device);
        let params = ParameterSet::of_module(&model);
        let mut optim = AdamWConfig::new()
            .with_weight_decay(preset.weight_decay as f32)
            .init::<B, AutoEncoder<B>>();
        let mse = MseLoss::new();
        tracing::info!(
            latent_dim = config.latent_dim,
            trainable = params.len(),
            "pretraining autoencoder"
        );

        let mut epochs = Vec::with_capacity(self.config.epochs);
        let mut step = 0usize;
        for epoch in 0..self.config.epochs {
            let mut train_total = 0.0f32;
            let mut train_batches = 0usize;
            for batch in loaders.train().iter::<B>(&self.device) {
                let full = batch?.full_sequence();
                let loss = mse.forward(model.forward(full.clone()), full, Reduction::Mean);
                let value = loss.clone().into_scalar().elem::<f32>();
                sink.log_scalar("autoencoder/train_loss", f64::from(value), step);
                train_total += value;
                train_batches += 1;
                step += 1;

                let grads = TrainableGradients::extract(loss.backward(), &model, &params)?;
                model = optim.step(preset.lr, model, grads);
            }

            let valid_model = model.valid().with_mode(NumericalMode::Inference);
            let mut valid_total = 0.0f32;
            let mut valid_batches = 0usize;
            for batch in loaders.valid().iter::<B>(&self.device) {
                let full = batch?.inner().full_sequence();
                let loss = mse.forward(valid_model.forward(full.clone()), full, Reduction::Mean);
                valid_total += loss.into_scalar().elem::<f32>();
                valid_batches += 1;
            }

            let summary = EpochSummary {
                epoch,
                lr: preset.lr,
                train_loss: mean(train_total, train_batches),
                valid_loss: (valid_batches > 0).then(|| mean(valid_total, valid_batches)),
            };
            if let Some(valid_loss) = summary.valid_loss {
                sink.log_scalar("autoencoder/val_loss", f64::from(valid_loss), epoch);
            }
            tracing::info!(
                epoch = epoch + 1,
                train_loss = summary.train_loss,
                valid_loss = ?summary.valid_loss,
                "autoencoder epoch complete"
            );
            epochs.push(summary);
        }

        Ok(FitOutput {
            model,
            epochs,
            training_time_secs: start_time.elapsed().as_secs_f64(),
        })
    }
}

/// Save a pretrained autoencoder and its metadata sidecar.
///
/// The weights go to `<path>.mpk` and the sidecar to `<path>.json`, which is
/// what [`gapcast_models::FileCheckpointStore`] expects.
///
/// # Errors
///
/// Returns a checkpoint error if either file cannot be written.
pub fn save_pretrained<B: Backend>(
    model: &AutoEncoder<B>,
    config: &AutoEncoderConfig,
    path: impl AsRef<Path>,
    val_loss: Option<f32>,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    save_model::<B, _>(model, path)?;
    let mut metadata = CheckpointMetadata::new(AUTOENCODER_ARCH).with_config(config);
    if let Some(loss) = val_loss {
        metadata = metadata.with_val_loss(loss);
    }
    metadata.save_beside(path)?;
    tracing::info!(path = %path.display(), "saved pretrained autoencoder");
    Ok(())
}

fn mean(total: f32, count: usize) -> f32 {
    if count == 0 {
        0.0
    } else {
        total / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MetricHistory;
    use crate::visual::MemoryVisualizer;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use gapcast_core::{FrameShape, Seed};
    use gapcast_data::{random_split, SyntheticConfig, SyntheticDataset};
    use gapcast_models::{CheckpointRef, ConvLstmConfig, FileCheckpointStore, FrozenAutoEncoder};

    type TestBackend = Autodiff<NdArray>;

    fn loaders(n_samples: usize) -> SequenceDataLoaders {
        let config = SyntheticConfig {
            n_samples,
            ..SyntheticConfig::default()
        }
        .with_steps(4, 2)
        .with_frame(FrameShape::new(1, 6, 6));
        let dataset = SyntheticDataset::new(config).generate().unwrap();
        let (train, valid, test) = random_split(&dataset, 0.2, 0.2, Seed::new(1)).unwrap();
        SequenceDataLoaders::builder(train, valid, test)
            .batch_size(4)
            .seed(Seed::new(2))
            .build()
            .unwrap()
    }

    fn trainer(epochs: usize) -> Trainer<TestBackend> {
        let config = TrainerConfig {
            epochs,
            ..TrainerConfig::default()
        };
        Trainer::new(config, Default::default())
    }

    #[test]
    fn test_fit_convlstm_logs_every_phase() {
        let loaders = loaders(20);
        let model = ConvLstmConfig::new(FrameShape::new(1, 6, 6), 2)
            .with_hidden_dim(4)
            .init::<TestBackend>(&Default::default());
        let trainer = trainer(2);
        let mut history = MetricHistory::new();

        let output = trainer.fit(model, &loaders, &mut history).unwrap();
        assert_eq!(output.epochs.len(), 2);
        assert!(output.epochs.iter().all(|e| e.train_loss.is_finite()));
        assert!(output.final_valid_loss().is_some());
        assert_eq!(history.values("train/lr"), vec![1e-3, 1e-3]);
        assert!(!history.values("train/mse").is_empty());
        assert!(!history.values("val/loss").is_empty());

        let report = trainer.test(&output.model, loaders.test(), &mut history).unwrap();
        assert!(report.batches > 0);
        assert!(report.ssim <= 1.0);
        assert!(report.latent_mse.is_none());

        let mut visualizer = MemoryVisualizer::new();
        let predictions = trainer.predict(&output.model, loaders.test(), &mut visualizer).unwrap();
        assert_eq!(predictions[0].dims()[1], 6);
    }

    #[test]
    fn test_report_json_keeps_infinite_psnr() {
        let report = TestReport {
            batches: 2,
            ssim: 1.0,
            psnr: f64::INFINITY,
            ..TestReport::default()
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""psnr":"inf""#));

        let back: TestReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_pretrain_save_and_reload_frozen() {
        let loaders = loaders(12);
        let config = AutoEncoderConfig::new(FrameShape::new(1, 6, 6), 4).with_hidden_dim(8);
        let trainer = trainer(1);
        let mut history = MetricHistory::new();

        let output = trainer
            .pretrain_autoencoder(&config, &loaders, &mut history)
            .unwrap();
        assert_eq!(output.epochs.len(), 1);
        assert!(!history.values("autoencoder/train_loss").is_empty());

        let dir = std::env::temp_dir().join(format!("gapcast_pretrain_{}", std::process::id()));
        let path = dir.join("autoencoder");
        save_pretrained(&output.model, &config, &path, output.final_valid_loss()).unwrap();

        let reference = CheckpointRef::autoencoder(&path);
        let frozen =
            FrozenAutoEncoder::<TestBackend>::load(&config, &FileCheckpointStore, &reference, &Default::default())
                .unwrap();
        assert_eq!(frozen.latent_dim(), 4);

        let wrong = CheckpointRef::new(&path, "timae");
        assert!(
            FrozenAutoEncoder::<TestBackend>::load(&config, &FileCheckpointStore, &wrong, &Default::default())
                .is_err()
        );
        std::fs::remove_dir_all(dir).ok();
    }
}
