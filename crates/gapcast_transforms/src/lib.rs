//! # gapcast_transforms
//!
//! Transforms applied to context windows before they reach a model.
//!
//! - [`interpolate_sequence`] repairs one sample's missing frames
//! - [`interpolate_batch`] repairs every sample of a batch independently
//!
//! ```rust,ignore
//! use gapcast_transforms::interpolate_batch;
//!
//! let filled = interpolate_batch(batch.context.clone(), batch.mask.clone())?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
pub mod interpolate;

pub use error::{InterpolationError, Result};
pub use interpolate::{anchors, interpolate_batch, interpolate_sequence, Anchor};
