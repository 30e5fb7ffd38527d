//! Synthetic moving-blob sequences with randomly dropped frames.
//!
//! Each sample is a handful of Gaussian blobs drifting across the grid at a
//! constant velocity. The context window loses frames at random; dropped
//! frames are zeroed in the context array and flagged `false` in the mask.

use ndarray::{Array2, Array5};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::SequenceDataset;
use crate::error::{DataError, Result};
use gapcast_core::{FrameShape, Seed};

/// Configuration for [`SyntheticDataset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Number of samples.
    pub n_samples: usize,
    /// Context steps per sample.
    pub context_steps: usize,
    /// Forecast steps per sample.
    pub forecast_steps: usize,
    /// Frame shape.
    pub frame: FrameShape,
    /// Blobs per sample.
    pub n_blobs: usize,
    /// Probability of dropping each context frame.
    pub drop_prob: f64,
    /// Generator seed.
    pub seed: Seed,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_samples: 64,
            context_steps: 10,
            forecast_steps: 5,
            frame: FrameShape::new(1, 16, 16),
            n_blobs: 2,
            drop_prob: 0.2,
            seed: Seed::new(42),
        }
    }
}

impl SyntheticConfig {
    /// Create a configuration for `n_samples` samples with default dimensions.
    #[must_use]
    pub fn new(n_samples: usize) -> Self {
        Self {
            n_samples,
            ..Default::default()
        }
    }

    /// Set the context and forecast window lengths.
    #[must_use]
    pub fn with_steps(mut self, context_steps: usize, forecast_steps: usize) -> Self {
        self.context_steps = context_steps;
        self.forecast_steps = forecast_steps;
        self
    }

    /// Set the frame shape.
    #[must_use]
    pub fn with_frame(mut self, frame: FrameShape) -> Self {
        self.frame = frame;
        self
    }

    /// Set the frame drop probability.
    #[must_use]
    pub fn with_drop_prob(mut self, drop_prob: f64) -> Self {
        self.drop_prob = drop_prob;
        self
    }

    /// Set the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_samples == 0 {
            return Err(DataError::InvalidConfig("n_samples must be > 0".to_string()));
        }
        if self.context_steps == 0 || self.forecast_steps == 0 {
            return Err(DataError::InvalidConfig(
                "context_steps and forecast_steps must be > 0".to_string(),
            ));
        }
        if self.frame.numel() == 0 {
            return Err(DataError::InvalidConfig(format!(
                "empty frame shape {:?}",
                self.frame
            )));
        }
        if !(0.0..=1.0).contains(&self.drop_prob) {
            return Err(DataError::InvalidConfig(format!(
                "drop_prob must be in [0, 1], got {}",
                self.drop_prob
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Blob {
    y: f32,
    x: f32,
    vy: f32,
    vx: f32,
    sigma: f32,
    amplitude: f32,
}

impl Blob {
    fn sample<R: Rng>(rng: &mut R, frame: FrameShape) -> Self {
        let (h, w) = (frame.height as f32, frame.width as f32);
        Self {
            y: rng.gen_range(0.0..h),
            x: rng.gen_range(0.0..w),
            vy: rng.gen_range(-1.0..1.0),
            vx: rng.gen_range(-1.0..1.0),
            sigma: rng.gen_range(1.0..(h.min(w) / 4.0).max(1.5)),
            amplitude: rng.gen_range(0.5..1.0),
        }
    }

    fn value(&self, t: f32, y: f32, x: f32) -> f32 {
        let dy = y - (self.y + self.vy * t);
        let dx = x - (self.x + self.vx * t);
        self.amplitude * (-(dy * dy + dx * dx) / (2.0 * self.sigma * self.sigma)).exp()
    }
}

/// Generator for moving-blob datasets.
///
/// ```rust,ignore
/// use gapcast_data::{SyntheticConfig, SyntheticDataset};
///
/// let dataset = SyntheticDataset::new(SyntheticConfig::new(128).with_drop_prob(0.3)).generate()?;
/// ```
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    config: SyntheticConfig,
}

impl SyntheticDataset {
    /// Create a generator.
    #[must_use]
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    /// The generator configuration.
    #[must_use]
    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Generate the dataset.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidConfig`] for empty dimensions or an out-of-range drop probability.
    pub fn generate(&self) -> Result<SequenceDataset> {
        let cfg = &self.config;
        cfg.validate()?;

        let (n, t_in, t_out) = (cfg.n_samples, cfg.context_steps, cfg.forecast_steps);
        let FrameShape {
            channels,
            height,
            width,
        } = cfg.frame;

        let mut blob_rng = cfg.seed.derive("blobs").to_rng();
        let mut mask_rng = cfg.seed.derive("mask").to_rng();

        let mut context = Array5::<f32>::zeros((n, t_in, channels, height, width));
        let mut target = Array5::<f32>::zeros((n, t_out, channels, height, width));
        let mut mask = Array2::from_elem((n, t_in), true);

        for i in 0..n {
            let blobs: Vec<Blob> = (0..cfg.n_blobs)
                .map(|_| Blob::sample(&mut blob_rng, cfg.frame))
                .collect();

            for step in 0..t_in + t_out {
                for c in 0..channels {
                    let gain = 1.0 / (c + 1) as f32;
                    for y in 0..height {
                        for x in 0..width {
                            let v: f32 = blobs
                                .iter()
                                .map(|b| b.value(step as f32, y as f32, x as f32))
                                .sum::<f32>()
                                * gain;
                            if step < t_in {
                                context[[i, step, c, y, x]] = v;
                            } else {
                                target[[i, step - t_in, c, y, x]] = v;
                            }
                        }
                    }
                }
            }

            for step in 0..t_in {
                mask[[i, step]] = !mask_rng.gen_bool(cfg.drop_prob);
            }
            if (0..t_in).all(|step| !mask[[i, step]]) {
                mask[[i, mask_rng.gen_range(0..t_in)]] = true;
            }
            for step in 0..t_in {
                if !mask[[i, step]] {
                    context
                        .slice_mut(ndarray::s![i, step, .., .., ..])
                        .fill(0.0);
                }
            }
        }

        SequenceDataset::from_arrays(context, target, mask)
    }
}
