//! Partition of a model's parameters into trainable and frozen sets.

use std::collections::HashSet;

use burn::module::{Module, ModuleVisitor, ParamId};
use burn::prelude::*;

use gapcast_core::ForecastingModel;

#[derive(Default)]
struct IdCollector {
    ids: Vec<(ParamId, bool, usize)>,
}

impl<B: Backend> ModuleVisitor<B> for IdCollector {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        self.ids
            .push((id, tensor.is_require_grad(), tensor.shape().num_elements()));
    }
}

/// The parameters an optimizer may update.
///
/// Built once per fit. Frozen submodules are excluded by identity, so a
/// frozen parameter can never enter the set even if its gradient flag is
/// flipped by mistake.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    trainable: HashSet<ParamId>,
    frozen: HashSet<ParamId>,
    trainable_elements: usize,
}

impl ParameterSet {
    /// Trainable parameters of a forecasting model.
    pub fn trainable<B: Backend, M: ForecastingModel<B>>(model: &M) -> Self {
        let mut frozen = IdCollector::default();
        model.visit_frozen(&mut frozen);
        let frozen: HashSet<ParamId> = frozen.ids.into_iter().map(|(id, _, _)| id).collect();
        Self::collect(model, frozen)
    }

    /// Every gradient-requiring parameter of a plain module.
    pub fn of_module<B: Backend, M: Module<B>>(module: &M) -> Self {
        Self::collect(module, HashSet::new())
    }

    fn collect<B: Backend, M: Module<B>>(module: &M, frozen: HashSet<ParamId>) -> Self {
        let mut all = IdCollector::default();
        module.visit(&mut all);

        let mut trainable = HashSet::new();
        let mut trainable_elements = 0;
        for (id, require_grad, numel) in all.ids {
            if require_grad && !frozen.contains(&id) {
                trainable.insert(id);
                trainable_elements += numel;
            }
        }

        Self {
            trainable,
            frozen,
            trainable_elements,
        }
    }

    /// Whether `id` may be updated.
    pub fn contains(&self, id: &ParamId) -> bool {
        self.trainable.contains(id)
    }

    /// Whether `id` belongs to a frozen submodule.
    pub fn is_frozen(&self, id: &ParamId) -> bool {
        self.frozen.contains(id)
    }

    /// Number of trainable parameter tensors.
    pub fn len(&self) -> usize {
        self.trainable.len()
    }

    /// Check if nothing is trainable.
    pub fn is_empty(&self) -> bool {
        self.trainable.is_empty()
    }

    /// Number of frozen parameter tensors.
    pub fn frozen_len(&self) -> usize {
        self.frozen.len()
    }

    /// Total number of trainable scalars.
    pub fn trainable_elements(&self) -> usize {
        self.trainable_elements
    }

    /// Identifiers of the trainable tensors.
    pub fn ids(&self) -> impl Iterator<Item = &ParamId> {
        self.trainable.iter()
    }

    /// Identifiers of the frozen tensors.
    pub fn frozen_ids(&self) -> impl Iterator<Item = &ParamId> {
        self.frozen.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoencoder::AutoEncoderConfig;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use gapcast_core::FrameShape;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_of_module_counts_everything() {
        let device = Default::default();
        let ae = AutoEncoderConfig::new(FrameShape::new(1, 2, 2), 3)
            .with_hidden_dim(5)
            .init::<TestBackend>(&device);

        let params = ParameterSet::of_module(&ae);
        // 4 linears (weight + bias) and 2 layer norms (gamma + beta).
        assert_eq!(params.len(), 12);
        assert_eq!(params.frozen_len(), 0);
        assert_eq!(params.trainable_elements(), ae.num_params());
    }

    #[test]
    fn test_no_grad_module_is_empty() {
        let device = Default::default();
        let ae = AutoEncoderConfig::default().init::<TestBackend>(&device).no_grad();
        assert!(ParameterSet::of_module(&ae).is_empty());
    }
}
