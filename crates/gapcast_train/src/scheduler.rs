//! Learning rate schedulers, stepped once per epoch.

use serde::{Deserialize, Serialize};

/// Trait for learning rate schedulers.
pub trait Scheduler: Send + Sync {
    /// Learning rate for the given epoch.
    fn get_lr(&self, epoch: usize) -> f64;

    /// Scheduler name.
    fn name(&self) -> &str;
}

/// Constant learning rate (no scheduling).
#[derive(Debug, Clone)]
pub struct ConstantLR {
    lr: f64,
}

impl ConstantLR {
    /// Create a new constant LR scheduler.
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }
}

impl Scheduler for ConstantLR {
    fn get_lr(&self, _epoch: usize) -> f64 {
        self.lr
    }

    fn name(&self) -> &str {
        "ConstantLR"
    }
}

/// Cosine annealing without restarts.
///
/// `lr(e) = eta_min + (base_lr - eta_min) * (1 + cos(pi * e / t_max)) / 2`
///
/// The curve is not clamped at `t_max`: past it the rate climbs back towards
/// `base_lr`, with period `2 * t_max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosineAnnealingLR {
    base_lr: f64,
    eta_min: f64,
    t_max: usize,
}

impl CosineAnnealingLR {
    /// Create a new cosine annealing scheduler.
    pub fn new(base_lr: f64, eta_min: f64, t_max: usize) -> Self {
        Self {
            base_lr,
            eta_min,
            t_max,
        }
    }
}

impl Scheduler for CosineAnnealingLR {
    fn get_lr(&self, epoch: usize) -> f64 {
        if self.t_max == 0 {
            return self.base_lr;
        }
        let progress = epoch as f64 / self.t_max as f64;
        let cosine = (1.0 + (std::f64::consts::PI * progress).cos()) / 2.0;
        self.eta_min + (self.base_lr - self.eta_min) * cosine
    }

    fn name(&self) -> &str {
        "CosineAnnealingLR"
    }
}
