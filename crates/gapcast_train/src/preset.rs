//! Per-architecture optimizer and schedule presets.

use gapcast_core::ModelFamily;
use serde::{Deserialize, Serialize};

use crate::scheduler::{ConstantLR, CosineAnnealingLR, Scheduler};

/// Optimizer family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// burn's AdamW (decoupled weight decay).
    AdamW,
    /// [`crate::RAdam`] with L2 weight decay.
    RAdam,
}

/// Learning rate schedule, stepped per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fixed learning rate.
    Constant,
    /// [`CosineAnnealingLR`] over `t_max` epochs.
    CosineAnnealing {
        /// Half period in epochs.
        t_max: usize,
        /// Lowest learning rate.
        eta_min: f64,
    },
}

/// Optimizer constants for one training stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingPreset {
    /// Optimizer family.
    pub optimizer: OptimizerKind,
    /// Base learning rate.
    pub lr: f64,
    /// Weight decay.
    pub weight_decay: f64,
    /// Schedule.
    pub schedule: ScheduleKind,
}

impl TrainingPreset {
    /// Preset used for each architecture family.
    #[must_use]
    pub const fn for_family(family: ModelFamily) -> Self {
        match family {
            ModelFamily::Recurrent => Self::adamw(1e-3, 1e-2),
            ModelFamily::LatentDynamics => Self::adamw(1e-3, 1e-5),
            ModelFamily::MaskedSequence => Self {
                optimizer: OptimizerKind::RAdam,
                lr: 1e-3,
                weight_decay: 1e-2,
                schedule: ScheduleKind::CosineAnnealing {
                    t_max: 10,
                    eta_min: 1e-4,
                },
            },
        }
    }

    /// Preset for autoencoder pretraining.
    #[must_use]
    pub const fn autoencoder() -> Self {
        Self::adamw(1e-3, 1e-2)
    }

    const fn adamw(lr: f64, weight_decay: f64) -> Self {
        Self {
            optimizer: OptimizerKind::AdamW,
            lr,
            weight_decay,
            schedule: ScheduleKind::Constant,
        }
    }

    /// Override the base learning rate.
    #[must_use]
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    /// Build the schedule.
    pub fn scheduler(&self) -> Box<dyn Scheduler> {
        match self.schedule {
            ScheduleKind::Constant => Box::new(ConstantLR::new(self.lr)),
            ScheduleKind::CosineAnnealing { t_max, eta_min } => {
                Box::new(CosineAnnealingLR::new(self.lr, eta_min, t_max))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_presets() {
        let recurrent = TrainingPreset::for_family(ModelFamily::Recurrent);
        assert_eq!(recurrent.optimizer, OptimizerKind::AdamW);
        assert_eq!(recurrent.weight_decay, 1e-2);

        let latent = TrainingPreset::for_family(ModelFamily::LatentDynamics);
        assert_eq!(latent.weight_decay, 1e-5);
        assert_eq!(latent.scheduler().name(), "ConstantLR");

        let masked = TrainingPreset::for_family(ModelFamily::MaskedSequence);
        assert_eq!(masked.optimizer, OptimizerKind::RAdam);
        let scheduler = masked.scheduler();
        assert_eq!(scheduler.name(), "CosineAnnealingLR");
        assert!((scheduler.get_lr(10) - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_preset_serde() {
        let preset = TrainingPreset::for_family(ModelFamily::MaskedSequence);
        let json = serde_json::to_string(&preset).unwrap();
        let back: TrainingPreset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, preset);
    }
}
