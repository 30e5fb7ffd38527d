//! RAdam as a burn optimizer.
//!
//! Implements [`SimpleOptimizer`] so it plugs into [`OptimizerAdaptor`] like the
//! built-in optimizers. Weight decay is L2: it is added to the gradient before the
//! moment updates.
//!
//! Reference: "On the Variance of the Adaptive Learning Rate and Beyond"
//! by Liu et al. (2019)

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::SimpleOptimizer;
use burn::prelude::*;
use burn::record::Record;
use burn::tensor::backend::AutodiffBackend;
use burn::LearningRate;
use serde::{Deserialize, Serialize};

/// RAdam (Rectified Adam) optimizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RAdamConfig {
    /// First moment decay (beta1).
    pub beta1: f64,
    /// Second moment decay (beta2).
    pub beta2: f64,
    /// Small epsilon for numerical stability.
    pub epsilon: f64,
    /// L2 weight decay coefficient.
    pub weight_decay: f64,
}

impl Default for RAdamConfig {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
        }
    }
}

impl RAdamConfig {
    /// Create a configuration with default moments and no weight decay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set beta1 (first moment decay).
    #[must_use]
    pub fn with_beta1(mut self, beta1: f64) -> Self {
        self.beta1 = beta1;
        self
    }

    /// Set beta2 (second moment decay).
    #[must_use]
    pub fn with_beta2(mut self, beta2: f64) -> Self {
        self.beta2 = beta2;
        self
    }

    /// Set epsilon for numerical stability.
    #[must_use]
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set weight decay.
    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Build the optimizer for a module.
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> OptimizerAdaptor<RAdam, M, B> {
        OptimizerAdaptor::from(RAdam {
            config: self.clone(),
        })
    }
}

/// Per-parameter RAdam state.
#[derive(Record, Clone)]
pub struct RAdamState<B: Backend, const D: usize> {
    /// Number of updates applied.
    pub time: usize,
    /// Biased first moment.
    pub moment_1: Tensor<B, D>,
    /// Biased second moment.
    pub moment_2: Tensor<B, D>,
}

/// RAdam optimizer.
#[derive(Debug, Clone)]
pub struct RAdam {
    config: RAdamConfig,
}

impl RAdam {
    /// Maximum length of the approximated SMA.
    fn rho_inf(&self) -> f64 {
        2.0 / (1.0 - self.config.beta2) - 1.0
    }
}

impl<B: Backend> SimpleOptimizer<B> for RAdam {
    type State<const D: usize> = RAdamState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: LearningRate,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let RAdamConfig {
            beta1,
            beta2,
            epsilon,
            weight_decay,
        } = self.config;

        let grad = if weight_decay == 0.0 {
            grad
        } else {
            grad + tensor.clone().mul_scalar(weight_decay)
        };
        let grad_sq = grad.clone() * grad.clone();

        let (time, moment_1, moment_2) = match state {
            Some(state) => (
                state.time + 1,
                state.moment_1.mul_scalar(beta1) + grad.mul_scalar(1.0 - beta1),
                state.moment_2.mul_scalar(beta2) + grad_sq.mul_scalar(1.0 - beta2),
            ),
            None => (
                1,
                grad.mul_scalar(1.0 - beta1),
                grad_sq.mul_scalar(1.0 - beta2),
            ),
        };

        let t = time as i32;
        let bias_1 = 1.0 - beta1.powi(t);
        let bias_2 = 1.0 - beta2.powi(t);
        let rho_inf = self.rho_inf();
        let rho_t = rho_inf - 2.0 * f64::from(t) * beta2.powi(t) / bias_2;

        let m_hat = moment_1.clone().div_scalar(bias_1);
        let update = if rho_t > 5.0 {
            let rect = ((rho_t - 4.0) * (rho_t - 2.0) * rho_inf
                / ((rho_inf - 4.0) * (rho_inf - 2.0) * rho_t))
                .sqrt();
            let adaptive = moment_2
                .clone()
                .sqrt()
                .add_scalar(epsilon)
                .recip()
                .mul_scalar(bias_2.sqrt());
            m_hat * adaptive.mul_scalar(rect * lr)
        } else {
            m_hat.mul_scalar(lr)
        };

        let state = RAdamState {
            time,
            moment_1,
            moment_2,
        };
        (tensor - update, Some(state))
    }

    fn to_device<const D: usize>(mut state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        state.moment_1 = state.moment_1.to_device(device);
        state.moment_2 = state.moment_2.to_device(device);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn tensor(values: [f32; 2]) -> Tensor<TestBackend, 1> {
        Tensor::from_floats(values, &Default::default())
    }

    fn values(t: Tensor<TestBackend, 1>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_first_step_is_unrectified_momentum() {
        let radam = RAdam {
            config: RAdamConfig::new(),
        };
        let (updated, state) =
            SimpleOptimizer::<TestBackend>::step(&radam, 0.1, tensor([1.0, 2.0]), tensor([0.5, -0.5]), None);
        let updated = values(updated);
        // m_hat equals the gradient after one step.
        assert!((updated[0] - 0.95).abs() < 1e-6);
        assert!((updated[1] - 2.05).abs() < 1e-6);
        assert_eq!(state.unwrap().time, 1);
    }

    #[test]
    fn test_weight_decay_is_added_to_gradient() {
        let radam = RAdam {
            config: RAdamConfig::new().with_weight_decay(0.5),
        };
        let (updated, _) =
            SimpleOptimizer::<TestBackend>::step(&radam, 0.1, tensor([2.0, -2.0]), tensor([0.0, 0.0]), None);
        let updated = values(updated);
        assert!((updated[0] - 1.9).abs() < 1e-6);
        assert!((updated[1] + 1.9).abs() < 1e-6);
    }

    #[test]
    fn test_rectified_steps_descend() {
        let radam = RAdam {
            config: RAdamConfig::new(),
        };
        let mut param = tensor([1.0, -1.0]);
        let mut state = None;
        for _ in 0..10 {
            let grad = param.clone().mul_scalar(2.0);
            let (next, next_state) =
                SimpleOptimizer::<TestBackend>::step(&radam, 0.01, param, grad, state);
            param = next;
            state = next_state;
        }
        let state = state.unwrap();
        assert_eq!(state.time, 10);
        let param = values(param);
        assert!(param[0] < 1.0 && param[0] > 0.0);
        assert!(param[1] > -1.0 && param[1] < 0.0);
    }
}
