//! # gapcast_core
//!
//! Core types and traits for forecasting partially observed spatiotemporal sequences.
//!
//! This crate provides:
//! - [`SequenceBatch`] pairing a context window, its forecast window and an observation mask
//! - [`SequenceShape`] / [`FrameShape`] shape metadata
//! - [`ForecastingModel`] with declared [`Capabilities`]
//! - [`Phase`] for the train/validate/test/predict protocol
//! - [`Seed`] for deterministic random number generation
//!
//! ## Shape Convention
//!
//! Sequences follow the convention `(B, T, C, H, W)`:
//! - `B`: Batch size
//! - `T`: Time steps
//! - `C`: Channels per grid cell
//! - `H`, `W`: Grid height and width
//!
//! Observation masks are `(B, T_in)` booleans over the context window.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod batch;
mod error;
mod model_trait;
mod phase;
mod seed;
mod shape;

pub use batch::{host_values, mask_rows, SequenceBatch};
pub use error::{CoreError, Result};
pub use model_trait::{
    Capabilities, Forecast, ForecastInput, ForecastingModel, ModelFamily, Prediction,
};
pub use phase::Phase;
pub use seed::Seed;
pub use shape::{FrameShape, SequenceShape};
