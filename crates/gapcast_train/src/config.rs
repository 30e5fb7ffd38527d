//! Experiment configuration.
//!
//! One JSON file describes a run: which architecture, which data, and the
//! hyperparameters of every stage. Frame shape and step counts are owned by the
//! data section and pushed into the model configs by the `*_config` accessors,
//! so the two can never disagree.

use std::path::{Path, PathBuf};

use gapcast_core::{ModelFamily, Seed};
use gapcast_data::SyntheticConfig;
use gapcast_models::{
    AutoEncoderConfig, CheckpointRef, ConvLstmConfig, LatentDynamicsConfig, MaskedSequenceConfig,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::losses::LossPolicy;
use crate::orchestrator::DEFAULT_VISUALISE_LIMIT;
use crate::training::TrainerConfig;

/// Full description of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Architecture to train.
    pub arch: ModelFamily,
    /// Synthetic data settings; also fixes frame shape and step counts.
    pub data: SyntheticConfig,
    /// Optional `.npz` dataset used instead of synthetic data.
    pub data_path: Option<PathBuf>,
    /// Fraction of samples held out for validation.
    pub valid_ratio: f64,
    /// Fraction of samples held out for testing.
    pub test_ratio: f64,
    /// Batch size.
    pub batch_size: usize,
    /// Forecaster training epochs.
    pub epochs: usize,
    /// Autoencoder pretraining epochs.
    pub autoencoder_epochs: usize,
    /// Run seed (split and shuffling).
    pub seed: Seed,
    /// Root of every artifact written by the run.
    pub output_dir: PathBuf,
    /// Samples visualised during predict.
    pub visualise_limit: usize,
    /// Loss policy override.
    pub loss: Option<LossPolicy>,
    /// Pretrained autoencoder settings.
    pub autoencoder: AutoEncoderConfig,
    /// Checkpoint of the pretrained autoencoder; under `output_dir` when unset.
    pub autoencoder_checkpoint: Option<CheckpointRef>,
    /// Recurrent forecaster settings.
    pub convlstm: ConvLstmConfig,
    /// Latent-dynamics forecaster settings.
    pub tikan: LatentDynamicsConfig,
    /// Masked-sequence forecaster settings.
    pub timae: MaskedSequenceConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            arch: ModelFamily::Recurrent,
            data: SyntheticConfig::default(),
            data_path: None,
            valid_ratio: 0.05,
            test_ratio: 0.05,
            batch_size: 32,
            epochs: 20,
            autoencoder_epochs: 20,
            seed: Seed::new(42),
            output_dir: PathBuf::from("logs"),
            visualise_limit: DEFAULT_VISUALISE_LIMIT,
            loss: None,
            autoencoder: AutoEncoderConfig::default(),
            autoencoder_checkpoint: None,
            convlstm: ConvLstmConfig::default(),
            tikan: LatentDynamicsConfig::default(),
            timae: MaskedSequenceConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Default experiment for an architecture.
    pub fn new(arch: ModelFamily) -> Self {
        Self {
            arch,
            ..Default::default()
        }
    }

    /// Read a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a serialization error
    /// if it is not a valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&json).map_err(|e| TrainError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TrainError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check values that would otherwise fail deep inside a run.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Config`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TrainError::Config("batch_size must be positive".to_string()));
        }
        if self.data.context_steps == 0 || self.data.forecast_steps == 0 {
            return Err(TrainError::Config(
                "context and forecast steps must be positive".to_string(),
            ));
        }
        if self.valid_ratio < 0.0 || self.test_ratio < 0.0 || self.valid_ratio + self.test_ratio >= 1.0 {
            return Err(TrainError::Config(format!(
                "valid_ratio + test_ratio must be in [0, 1), got {} + {}",
                self.valid_ratio, self.test_ratio
            )));
        }
        Ok(())
    }

    /// Directory for the artifacts of the configured architecture.
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(self.arch.name())
    }

    /// Directory predict writes its visualisations to.
    pub fn visual_dir(&self) -> PathBuf {
        self.run_dir().join("output")
    }

    /// Where the pretrained autoencoder is saved and loaded from.
    pub fn autoencoder_checkpoint(&self) -> CheckpointRef {
        self.autoencoder_checkpoint
            .clone()
            .unwrap_or_else(|| CheckpointRef::autoencoder(self.output_dir.join("autoencoder").join("model")))
    }

    /// Autoencoder config with the data's frame shape.
    pub fn autoencoder_config(&self) -> AutoEncoderConfig {
        AutoEncoderConfig {
            frame: self.data.frame,
            ..self.autoencoder.clone()
        }
    }

    /// Recurrent config with the data's frame shape and horizon.
    pub fn convlstm_config(&self) -> ConvLstmConfig {
        ConvLstmConfig {
            frame: self.data.frame,
            forecast_steps: self.data.forecast_steps,
            ..self.convlstm.clone()
        }
    }

    /// Latent-dynamics config anchored on [`ExperimentConfig::autoencoder_config`].
    pub fn tikan_config(&self) -> LatentDynamicsConfig {
        LatentDynamicsConfig {
            autoencoder: self.autoencoder_config(),
            context_steps: self.data.context_steps,
            forecast_steps: self.data.forecast_steps,
            ..self.tikan.clone()
        }
    }

    /// Masked-sequence config anchored on [`ExperimentConfig::autoencoder_config`].
    pub fn timae_config(&self) -> MaskedSequenceConfig {
        MaskedSequenceConfig {
            autoencoder: self.autoencoder_config(),
            context_steps: self.data.context_steps,
            forecast_steps: self.data.forecast_steps,
            ..self.timae.clone()
        }
    }

    /// Trainer settings for the forecaster stage.
    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            epochs: self.epochs,
            visualise_limit: self.visualise_limit,
            loss: self.loss,
            preset: None,
        }
    }

    /// Trainer settings for autoencoder pretraining.
    pub fn autoencoder_trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            epochs: self.autoencoder_epochs,
            ..self.trainer_config()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapcast_core::FrameShape;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ExperimentConfig =
            serde_json::from_str(r#"{ "arch": "timae", "epochs": 3 }"#).unwrap();
        assert_eq!(config.arch, ModelFamily::MaskedSequence);
        assert_eq!(config.epochs, 3);
        assert_eq!(config.visualise_limit, 5);
        assert_eq!(config.batch_size, 32);
    }

    #[test]
    fn test_model_configs_follow_data() {
        let mut config = ExperimentConfig::new(ModelFamily::LatentDynamics);
        config.data = config.data.with_steps(6, 3).with_frame(FrameShape::new(2, 8, 8));

        let tikan = config.tikan_config();
        assert_eq!(tikan.context_steps, 6);
        assert_eq!(tikan.forecast_steps, 3);
        assert_eq!(tikan.autoencoder.frame, FrameShape::new(2, 8, 8));
        assert_eq!(config.timae_config().autoencoder, tikan.autoencoder);
        assert_eq!(config.convlstm_config().forecast_steps, 3);
    }

    #[test]
    fn test_default_checkpoint_under_output_dir() {
        let config = ExperimentConfig::default();
        let reference = config.autoencoder_checkpoint();
        assert_eq!(reference.path, PathBuf::from("logs/autoencoder/model"));
        assert_eq!(reference.selector, "autoencoder");
        assert_eq!(config.visual_dir(), PathBuf::from("logs/convlstm/output"));
    }

    #[test]
    fn test_validate_rejects_bad_split() {
        let config = ExperimentConfig {
            valid_ratio: 0.5,
            test_ratio: 0.5,
            ..ExperimentConfig::default()
        };
        assert!(matches!(config.validate(), Err(TrainError::Config(_))));
    }

    #[test]
    fn test_save_load() {
        let path = std::env::temp_dir().join(format!("gapcast_config_{}.json", std::process::id()));
        let config = ExperimentConfig::new(ModelFamily::MaskedSequence);
        config.save(&path).unwrap();
        assert_eq!(ExperimentConfig::load(&path).unwrap(), config);
        std::fs::remove_file(path).ok();
    }
}
