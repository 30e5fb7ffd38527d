//! The per-batch training protocol.
//!
//! Every architecture goes through the same four phases. Per batch the context
//! window is interpolated, the model is called according to its declared
//! [`Capabilities`](gapcast_core::Capabilities), and the output is scored against
//! the raw ground truth (context followed by target).

use burn::prelude::*;
use gapcast_core::{Forecast, ForecastInput, ForecastingModel, ModelFamily, Phase, SequenceBatch};
use gapcast_transforms::interpolate_batch;
use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::losses::{ComposedLoss, LossComposer, LossPolicy, LossValues};
use crate::metrics::{host_array, MetricEvaluator, SequenceMetrics};
use crate::sink::MetricSink;
use crate::visual::SequenceVisualizer;

/// Default number of samples handed to the visualizer per run.
pub const DEFAULT_VISUALISE_LIMIT: usize = 5;

/// Steps taken in each phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounters {
    /// Training steps.
    pub train: usize,
    /// Validation steps.
    pub validate: usize,
    /// Test steps.
    pub test: usize,
    /// Predict steps.
    pub predict: usize,
}

impl StepCounters {
    fn bump(&mut self, phase: Phase) -> usize {
        let counter = match phase {
            Phase::Train => &mut self.train,
            Phase::Validate => &mut self.validate,
            Phase::Test => &mut self.test,
            Phase::Predict => &mut self.predict,
        };
        let step = *counter;
        *counter += 1;
        step
    }
}

/// Losses and image-quality scores of one test batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestOutput {
    /// Composed loss and its parts.
    pub losses: LossValues,
    /// SSIM and PSNR.
    pub metrics: SequenceMetrics,
}

/// Result of one predict batch.
#[derive(Debug, Clone)]
pub struct PredictOutput<B: Backend> {
    /// Reconstructed context followed by forecast, `(B, T_in + T_out, C, H, W)`.
    pub prediction: Tensor<B, 5>,
    /// `|truth - prediction|`, same shape.
    pub diff: Tensor<B, 5>,
    /// Samples of this batch sent to the visualizer.
    pub visualised: usize,
}

/// Runs the train/validate/test/predict protocol one batch at a time.
///
/// Its only state across batches is the step counters and how many samples
/// have been visualised in this run.
#[derive(Debug, Clone)]
pub struct TrainingOrchestrator {
    composer: LossComposer,
    evaluator: MetricEvaluator,
    visualise_limit: usize,
    visualised: usize,
    steps: StepCounters,
}

impl TrainingOrchestrator {
    /// Orchestrator composing losses under `policy`.
    pub fn new(policy: LossPolicy) -> Self {
        Self {
            composer: LossComposer::new(policy),
            evaluator: MetricEvaluator::default(),
            visualise_limit: DEFAULT_VISUALISE_LIMIT,
            visualised: 0,
            steps: StepCounters::default(),
        }
    }

    /// Orchestrator with the family's loss policy.
    pub fn for_family(family: ModelFamily) -> Self {
        Self::new(LossPolicy::for_family(family))
    }

    /// Set the run-wide visualisation cap.
    #[must_use]
    pub fn with_visualise_limit(mut self, limit: usize) -> Self {
        self.visualise_limit = limit;
        self
    }

    /// Loss composer in use.
    pub fn composer(&self) -> &LossComposer {
        &self.composer
    }

    /// Steps taken so far.
    pub fn steps(&self) -> StepCounters {
        self.steps
    }

    /// Samples visualised so far in this run.
    pub fn visualised(&self) -> usize {
        self.visualised
    }

    /// One optimization step's forward pass.
    ///
    /// Pins the model's frozen submodules, then returns the composed loss for the
    /// caller to backpropagate.
    ///
    /// # Errors
    ///
    /// Fails if a context window has no observed frame or if shapes disagree.
    pub fn training_step<B: Backend, M: ForecastingModel<B>, S: MetricSink>(
        &mut self,
        model: &mut M,
        batch: &SequenceBatch<B>,
        sink: &mut S,
    ) -> Result<ComposedLoss<B>> {
        model.pin_frozen();
        let loss = self.score(&*model, batch, Phase::Train)?.loss;

        let step = self.steps.bump(Phase::Train);
        log_losses(sink, Phase::Train, &loss.values(), step);
        Ok(loss)
    }

    /// Loss on a held-out batch, without gradient tracking.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::GradientTracking`] on an autodiff backend.
    pub fn validation_step<B: Backend, M: ForecastingModel<B>, S: MetricSink>(
        &mut self,
        model: &M,
        batch: &SequenceBatch<B>,
        sink: &mut S,
    ) -> Result<LossValues> {
        let values = self.score(model, batch, Phase::Validate)?.loss.values();

        let step = self.steps.bump(Phase::Validate);
        log_losses(sink, Phase::Validate, &values, step);
        Ok(values)
    }

    /// Validation plus SSIM and PSNR.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::GradientTracking`] on an autodiff backend.
    pub fn test_step<B: Backend, M: ForecastingModel<B>, S: MetricSink>(
        &mut self,
        model: &M,
        batch: &SequenceBatch<B>,
        sink: &mut S,
    ) -> Result<TestOutput> {
        let scored = self.score(model, batch, Phase::Test)?;
        let metrics = self.evaluator.evaluate(scored.truth, scored.prediction)?;
        let losses = scored.loss.values();

        let step = self.steps.bump(Phase::Test);
        log_losses(sink, Phase::Test, &losses, step);
        sink.log_scalar("test/ssim", metrics.ssim, step);
        sink.log_scalar("test/psnr", metrics.psnr, step);
        Ok(TestOutput { losses, metrics })
    }

    /// Forecast a batch and send samples to the visualizer until the run-wide cap.
    ///
    /// Each visualised sample `vi` produces `input_{vi}`, `predict_{vi}` and
    /// `diff_{vi}`. Samples past the cap are skipped, but the returned prediction
    /// always covers the whole batch.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::GradientTracking`] on an autodiff backend, or the
    /// visualizer's error.
    pub fn predict_step<B: Backend, M: ForecastingModel<B>, V: SequenceVisualizer>(
        &mut self,
        model: &M,
        batch: &SequenceBatch<B>,
        visualizer: &mut V,
    ) -> Result<PredictOutput<B>> {
        check_backend::<B>(Phase::Predict)?;
        let truth = batch.full_sequence();
        let prediction = infer(model, batch, Phase::Predict)?.sequence;
        let diff = (truth.clone() - prediction.clone()).abs();
        let step = self.steps.bump(Phase::Predict);

        let batch_size = batch.batch_size();
        let take = self
            .visualise_limit
            .saturating_sub(self.visualised)
            .min(batch_size);
        if take < batch_size {
            tracing::warn!(
                step,
                skipped = batch_size - take,
                limit = self.visualise_limit,
                "visualisation cap reached, skipping samples"
            );
        }
        if take > 0 {
            let truth = host_array(truth)?;
            let predicted = host_array(prediction.clone())?;
            let errors = host_array(diff.clone())?;
            for i in 0..take {
                let vi = self.visualised;
                visualizer.visualise(truth.index_axis(Axis(0), i), &format!("input_{vi}"))?;
                visualizer.visualise(predicted.index_axis(Axis(0), i), &format!("predict_{vi}"))?;
                visualizer.visualise(errors.index_axis(Axis(0), i), &format!("diff_{vi}"))?;
                self.visualised += 1;
            }
        }

        Ok(PredictOutput {
            prediction,
            diff,
            visualised: take,
        })
    }

    /// Forecast a batch and compose its loss against the raw ground truth.
    fn score<B: Backend, M: ForecastingModel<B>>(
        &self,
        model: &M,
        batch: &SequenceBatch<B>,
        phase: Phase,
    ) -> Result<Scored<B>> {
        check_backend::<B>(phase)?;
        let truth = batch.full_sequence();
        let latent_target = latent_target(model, &truth);
        let forecast = infer(model, batch, phase)?;

        let latents = match (forecast.latent, latent_target) {
            (Some(z_pred), Some(z_target)) => Some((z_pred, z_target)),
            _ => None,
        };
        let loss = self
            .composer
            .compose(forecast.sequence.clone(), truth.clone(), latents)?;
        Ok(Scored {
            loss,
            truth,
            prediction: forecast.sequence,
        })
    }
}

struct Scored<B: Backend> {
    loss: ComposedLoss<B>,
    truth: Tensor<B, 5>,
    prediction: Tensor<B, 5>,
}

/// Gradient-tracking phases need an autodiff backend; the others refuse one.
fn check_backend<B: Backend>(phase: Phase) -> Result<()> {
    if !phase.tracks_gradients() && B::ad_enabled() {
        return Err(TrainError::GradientTracking(phase.to_string()));
    }
    Ok(())
}

/// Reject windows the model cannot consume before it sees them.
fn check_windows<B: Backend, M: ForecastingModel<B>>(
    model: &M,
    batch: &SequenceBatch<B>,
    uses_forward: bool,
) -> Result<()> {
    let context = batch.context_shape().steps;
    if let Some(expected) = model.context_steps() {
        if context != expected {
            return Err(TrainError::ShapeMismatch(format!(
                "model expects {expected} context steps, batch has {context}"
            )));
        }
    }
    let horizon = batch.forecast_steps();
    if uses_forward && horizon != model.forecast_steps() {
        return Err(TrainError::ShapeMismatch(format!(
            "model forecasts {} steps, batch has {horizon}",
            model.forecast_steps()
        )));
    }
    Ok(())
}

fn latent_target<B: Backend, M: ForecastingModel<B>>(model: &M, truth: &Tensor<B, 5>) -> Option<Tensor<B, 3>> {
    if model.capabilities().latent {
        model.encode(truth.clone())
    } else {
        None
    }
}

/// Interpolate the context and call the model the way `phase` requires.
fn infer<B: Backend, M: ForecastingModel<B>>(
    model: &M,
    batch: &SequenceBatch<B>,
    phase: Phase,
) -> Result<Forecast<B>> {
    let caps = model.capabilities();
    let horizon_predict = phase.prefers_horizon_predict() && caps.horizon_predict;
    check_windows(model, batch, !horizon_predict)?;

    let context = interpolate_batch(batch.context.clone(), batch.mask.clone())?;
    let input = ForecastInput::new(context, batch.mask.clone());
    if horizon_predict {
        let sequence = model.predict(input, batch.forecast_steps())?.into_sequence();
        return Ok(Forecast {
            sequence,
            latent: None,
        });
    }
    let input = if phase == Phase::Train && caps.teacher_forcing {
        input.with_teacher(batch.target.clone())
    } else {
        input
    };
    Ok(model.forward(input))
}

fn log_losses<S: MetricSink>(sink: &mut S, phase: Phase, values: &LossValues, step: usize) {
    let prefix = phase.log_prefix();
    sink.log_scalar(&format!("{prefix}/loss"), f64::from(values.loss), step);
    sink.log_scalar(&format!("{prefix}/mse"), f64::from(values.full_state), step);
    if let Some(latent) = values.latent {
        sink.log_scalar(&format!("{prefix}/latent_mse"), f64::from(latent), step);
    }
}
