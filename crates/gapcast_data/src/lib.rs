//! # gapcast_data
//!
//! Datasets and dataloaders for partially observed spatiotemporal sequences.
//!
//! This crate provides:
//! - [`SequenceDataset`] holding context windows, forecast windows and observation masks
//! - [`SyntheticDataset`] generating moving-blob sequences with dropped frames
//! - [`random_split`] for train/valid/test partitioning
//! - [`SequenceDataLoader`] / [`SequenceDataLoaders`] for batched iteration
//! - [`read_npz`] / [`write_npz`] for NumPy archives
//!
//! ## Example
//!
//! ```rust,ignore
//! use gapcast_data::{random_split, SequenceDataLoaders, SyntheticConfig, SyntheticDataset};
//! use gapcast_core::Seed;
//!
//! let dataset = SyntheticDataset::new(SyntheticConfig::default()).generate()?;
//! let (train, valid, test) = random_split(&dataset, 0.05, 0.05, Seed::new(42))?;
//! let dls = SequenceDataLoaders::builder(train, valid, test)
//!     .batch_size(32)
//!     .seed(Seed::new(42))
//!     .build()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod dataset;
mod error;
mod io;
mod loader;
mod splits;
mod synthetic;

pub use dataset::SequenceDataset;
pub use error::{DataError, Result};
pub use io::{read_npz, write_npz};
pub use loader::{
    SequenceDataLoader, SequenceDataLoaderBuilder, SequenceDataLoaderIter, SequenceDataLoaders,
    SequenceDataLoadersBuilder,
};
pub use splits::random_split;
pub use synthetic::{SyntheticConfig, SyntheticDataset};
