//! # gapcast_models
//!
//! Forecasting models for partially observed sequences, and the lifecycle of
//! the pretrained autoencoder they share.
//!
//! ## Models
//! - [`ConvLstmForecaster`] - recurrent, teacher-forced, arbitrary horizon
//! - [`LatentDynamicsForecaster`] - basis-expansion dynamics anchored on frozen latents
//! - [`MaskedSequenceForecaster`] - masked transformer decoding through the frozen decoder
//!
//! ## Pretrained submodules
//! - [`AutoEncoder`] is trained first, then frozen into a [`FrozenAutoEncoder`]
//! - [`CheckpointStore`] resolves a [`CheckpointRef`] to stored weights
//! - [`ParameterSet`] keeps frozen parameters out of the optimizer

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod autoencoder;
pub mod checkpoint;
pub mod convlstm;
mod error;
pub mod frozen;
pub mod kan;
pub mod latent_dynamics;
pub mod masked;
pub mod params;

pub use autoencoder::{AutoEncoder, AutoEncoderConfig, AutoEncoderRecord, NumericalMode};
pub use checkpoint::{
    load_record, load_validated, save_model, CheckpointError, CheckpointMetadata, CheckpointRef,
    CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, AUTOENCODER_ARCH,
};
pub use convlstm::{ConvLstmConfig, ConvLstmForecaster};
pub use error::{ModelError, Result};
pub use frozen::FrozenAutoEncoder;
pub use latent_dynamics::{LatentDynamicsConfig, LatentDynamicsForecaster};
pub use masked::{MaskedSequenceConfig, MaskedSequenceForecaster};
pub use params::ParameterSet;
