//! gapcast CLI: generate data, pretrain the autoencoder, train and evaluate forecasters.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use gapcast_core::{ForecastingModel, ModelFamily, Seed};
use gapcast_data::{random_split, read_npz, write_npz, SequenceDataLoaders, SequenceDataset, SyntheticDataset};
use gapcast_models::{
    load_record, load_validated, save_model, CheckpointMetadata, FileCheckpointStore,
};
use gapcast_train::{
    save_pretrained, ExperimentConfig, MetricHistory, NpyVisualizer, TracingSink, Trainer,
};

/// Backend type for training.
type TrainBackend = Autodiff<NdArray>;

#[derive(Parser)]
#[command(name = "gapcast")]
#[command(author, version)]
#[command(about = "Forecast partially observed spatiotemporal sequences")]
#[command(long_about = "gapcast: train forecasters on gridded sequences with missing frames.

EXAMPLES:
  # Write a synthetic dataset
  gapcast data --output blobs.npz

  # Pretrain the shared autoencoder (needed by tikan and timae)
  gapcast pretrain --epochs 20

  # Train, test and predict with a forecaster
  gapcast train --arch timae --epochs 20

  # Re-evaluate a trained forecaster
  gapcast test --arch timae

AVAILABLE MODELS:
  convlstm (recurrent)      - ConvLSTM, teacher-forced, arbitrary horizon
  tikan (latent_dynamics)   - basis-expansion dynamics on frozen latents
  timae (masked_sequence)   - masked transformer through the frozen decoder")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic dataset and write it as .npz
    Data {
        #[command(flatten)]
        experiment: ExperimentArgs,

        /// Output file
        #[arg(long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Pretrain and save the autoencoder
    Pretrain {
        #[command(flatten)]
        experiment: ExperimentArgs,
    },
    /// Train a forecaster, then test it and write predictions
    Train {
        #[command(flatten)]
        experiment: ExperimentArgs,
    },
    /// Test a trained forecaster and write predictions
    Test {
        #[command(flatten)]
        experiment: ExperimentArgs,
    },
}

/// Experiment settings; flags override the JSON config.
#[derive(Args, Debug, Clone)]
struct ExperimentArgs {
    /// JSON experiment config
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model architecture: convlstm, tikan, timae
    #[arg(long, value_name = "MODEL")]
    arch: Option<String>,

    /// Dataset (.npz with context, target and mask); synthetic data when unset
    #[arg(long, value_name = "FILE")]
    data: Option<PathBuf>,

    /// Number of training epochs
    #[arg(long, value_name = "N")]
    epochs: Option<usize>,

    /// Batch size
    #[arg(long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Output directory for checkpoints, logs and predictions
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Random seed for reproducibility
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,
}

impl ExperimentArgs {
    fn resolve(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ExperimentConfig::default(),
        };
        if let Some(arch) = &self.arch {
            config.arch = match ModelFamily::from_name(arch) {
                Some(family) => family,
                None => bail!("Unknown architecture '{arch}'. Available: convlstm, tikan, timae"),
            };
        }
        if let Some(path) = &self.data {
            config.data_path = Some(path.clone());
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
            config.autoencoder_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = Seed::new(seed);
            config.data.seed = Seed::new(seed).derive("data");
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Data { experiment, output } => handle_data(&experiment.resolve()?, &output),
        Commands::Pretrain { experiment } => handle_pretrain(&experiment.resolve()?),
        Commands::Train { experiment } => handle_model(&experiment.resolve()?, Stage::Train),
        Commands::Test { experiment } => handle_model(&experiment.resolve()?, Stage::Test),
    }
}

fn handle_data(config: &ExperimentConfig, output: &Path) -> Result<()> {
    let dataset = SyntheticDataset::new(config.data.clone())
        .generate()
        .context("Failed to generate synthetic data")?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_npz(output, &dataset).with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Wrote {} samples ({} observed context frames) to {}",
        dataset.len(),
        format_fraction(dataset.observed_fraction()),
        output.display()
    );
    Ok(())
}

/// Load the dataset and adopt its shape into the config.
fn load_dataset(config: &mut ExperimentConfig) -> Result<SequenceDataset> {
    let dataset = match &config.data_path {
        Some(path) => read_npz(path).with_context(|| format!("Failed to read {}", path.display()))?,
        None => SyntheticDataset::new(config.data.clone())
            .generate()
            .context("Failed to generate synthetic data")?,
    };
    config.data.n_samples = dataset.len();
    config.data.context_steps = dataset.context_steps();
    config.data.forecast_steps = dataset.forecast_steps();
    config.data.frame = dataset.frame_shape();
    Ok(dataset)
}

fn build_loaders(config: &mut ExperimentConfig) -> Result<SequenceDataLoaders> {
    let dataset = load_dataset(config)?;
    let (train, valid, test) = random_split(
        &dataset,
        config.valid_ratio,
        config.test_ratio,
        config.seed.derive("split"),
    )
    .context("Failed to split dataset")?;

    println!("Data:");
    println!("  Samples: {} train / {} valid / {} test", train.len(), valid.len(), test.len());
    println!(
        "  Steps: {} context + {} forecast, frame {:?}",
        config.data.context_steps, config.data.forecast_steps, config.data.frame
    );

    SequenceDataLoaders::builder(train, valid, test)
        .batch_size(config.batch_size)
        .shuffle_train(true)
        .seed(config.seed)
        .build()
        .context("Failed to create dataloaders")
}

fn handle_pretrain(config: &ExperimentConfig) -> Result<()> {
    let mut config = config.clone();
    let loaders = build_loaders(&mut config)?;
    let device = <TrainBackend as Backend>::Device::default();
    let ae_config = config.autoencoder_config();
    let reference = config.autoencoder_checkpoint();

    println!("\nPretraining autoencoder for {} epochs...", config.autoencoder_epochs);
    let trainer = Trainer::<TrainBackend>::new(config.autoencoder_trainer_config(), device);
    let mut history = MetricHistory::new();
    let output = trainer
        .pretrain_autoencoder(&ae_config, &loaders, &mut (&mut history, TracingSink))
        .context("Autoencoder pretraining failed")?;

    save_pretrained(&output.model, &ae_config, &reference.path, output.final_valid_loss())
        .context("Failed to save autoencoder")?;
    let dir = reference.path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
    history.save(dir.join("history.json"))?;

    println!("  Final validation loss: {:?}", output.final_valid_loss());
    println!("  Training time: {:.1}s", output.training_time_secs);
    println!("Saved autoencoder to {}", reference.path.display());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Train,
    Test,
}

fn handle_model(config: &ExperimentConfig, stage: Stage) -> Result<()> {
    let mut config = config.clone();
    let loaders = build_loaders(&mut config)?;
    let device = <TrainBackend as Backend>::Device::default();
    std::fs::create_dir_all(config.run_dir())?;

    println!("\nArchitecture: {}", config.arch.name());
    match config.arch {
        ModelFamily::Recurrent => {
            let model_config = config.convlstm_config();
            let model = model_config.init::<TrainBackend>(&device);
            run_model(&config, stage, model, &model_config, &loaders, &device)
        }
        ModelFamily::LatentDynamics => {
            let model_config = config.tikan_config();
            let reference = config.autoencoder_checkpoint();
            let model = model_config
                .init::<TrainBackend, _>(&FileCheckpointStore, &reference, &device)
                .with_context(|| pretrain_hint(&reference.path))?;
            run_model(&config, stage, model, &model_config, &loaders, &device)
        }
        ModelFamily::MaskedSequence => {
            let model_config = config.timae_config();
            let reference = config.autoencoder_checkpoint();
            let model = model_config
                .init::<TrainBackend, _>(&FileCheckpointStore, &reference, &device)
                .with_context(|| pretrain_hint(&reference.path))?;
            run_model(&config, stage, model, &model_config, &loaders, &device)
        }
    }
}

fn pretrain_hint(path: &Path) -> String {
    format!(
        "Failed to load the pretrained autoencoder from {}; run `gapcast pretrain` first",
        path.display()
    )
}

fn run_model<M, C>(
    config: &ExperimentConfig,
    stage: Stage,
    model: M,
    model_config: &C,
    loaders: &SequenceDataLoaders,
    device: &<TrainBackend as Backend>::Device,
) -> Result<()>
where
    M: ForecastingModel<TrainBackend> + AutodiffModule<TrainBackend>,
    M::InnerModule: ForecastingModel<NdArray>,
    C: Serialize,
{
    let run_dir = config.run_dir();
    let checkpoint = run_dir.join("model");
    let trainer = Trainer::<TrainBackend>::new(config.trainer_config(), device.clone());
    let mut history = MetricHistory::new();

    let model = match stage {
        Stage::Train => {
            println!("Training for {} epochs...", config.epochs);
            let output = trainer
                .fit(model, loaders, &mut (&mut history, TracingSink))
                .context("Training failed")?;
            println!("  Final validation loss: {:?}", output.final_valid_loss());
            println!("  Training time: {:.1}s", output.training_time_secs);

            save_model::<TrainBackend, _>(&output.model, &checkpoint).context("Failed to save model")?;
            let mut metadata = CheckpointMetadata::new(config.arch.name())
                .with_config(model_config)
                .with_epoch(config.epochs);
            if let Some(loss) = output.final_valid_loss() {
                metadata = metadata.with_val_loss(loss);
            }
            metadata.save_beside(&checkpoint)?;
            config.save(run_dir.join("config.json"))?;
            println!("Saved model to {}", checkpoint.display());
            output.model
        }
        Stage::Test => {
            let metadata = CheckpointMetadata::load(checkpoint.with_extension("json"))
                .with_context(|| format!("No trained model at {}", checkpoint.display()))?;
            if metadata.arch != config.arch.name() {
                bail!(
                    "Checkpoint {} holds '{}', not '{}'",
                    checkpoint.display(),
                    metadata.arch,
                    config.arch.name()
                );
            }
            let record = load_record::<TrainBackend, M>(&checkpoint, device)
                .context("Failed to read model checkpoint")?;
            load_validated(model, record).context("Checkpoint does not match the configured model")?
        }
    };

    let report = trainer
        .test(&model, loaders.test(), &mut (&mut history, TracingSink))
        .context("Test failed")?;
    println!("\nTest:");
    println!("  loss: {:.6}", report.loss);
    println!("  mse:  {:.6}", report.mse);
    if let Some(latent) = report.latent_mse {
        println!("  latent_mse: {latent:.6}");
    }
    println!("  ssim: {:.4}", report.ssim);
    println!("  psnr: {:.2} dB", report.psnr);

    let mut visualizer = NpyVisualizer::new(config.visual_dir());
    let predictions = trainer
        .predict(&model, loaders.test(), &mut visualizer)
        .context("Predict failed")?;
    println!(
        "Predicted {} batch(es); visualisations in {}",
        predictions.len(),
        visualizer.dir().display()
    );

    history.save(run_dir.join("history.json"))?;
    std::fs::write(run_dir.join("test.json"), serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

fn format_fraction(value: f32) -> String {
    format!("{:.1}%", value * 100.0)
}
