
use crate::batch::Batch;
use crate::checkpoint::CheckpointManager;
use crate::config::TrainParams;
use crate::error::Result;
use crate::loss::{JointLoss, LossValue};
use crate::model::{Gradients, SharedNetwork};
use crate::optim::Adagrad;

use ndarray::Array2;
use std::time::Instant;
use tracing::{debug, info};

/// What a step computes: loss and update, loss only, or the original branch scores only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Evaluate,
    Predict,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StepOutput {
    Trained(LossValue),
    Evaluated(LossValue),
    Predicted(Array2<f32>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    pub mean_loss: f32,
}

struct DisplayProgress {
    window_loss: LossValue, // summed batch losses since the last log line
    window_batches: usize,
    total_loss: f32,
    total_batches: usize,
}

impl DisplayProgress {

    fn new() -> Self {
        Self { window_loss: LossValue::default(), window_batches: 0, total_loss: 0.0, total_batches: 0 }
    }

    fn add(&mut self, value: &LossValue) {
        self.window_loss.syntactic += value.syntactic;
        self.window_loss.sentiment += value.sentiment;
        self.window_loss.combined += value.combined;
        self.window_batches += 1;
        self.total_loss += value.combined;
        self.total_batches += 1;
    }

    fn flush(&mut self, step: u64) {
        if self.window_batches == 0 {
            return;
        }
        let n = self.window_batches as f32;
        info!(
            step,
            loss = self.window_loss.combined / n,
            syntactic = self.window_loss.syntactic / n,
            sentiment = self.window_loss.sentiment / n,
            "training"
        );
        self.window_loss = LossValue::default();
        self.window_batches = 0;
    }

    fn mean(&self) -> f32 {
        if self.total_batches == 0 { 0.0 } else { self.total_loss / self.total_batches as f32 }
    }
}

/// Owns Θ and its optimizer state; Θ only changes inside a `Mode::Train` step.
pub struct Train {
    network: SharedNetwork,
    optimizer: Adagrad,
    loss: JointLoss,
    global_step: u64,
}

impl Train {

    pub fn new(network: SharedNetwork, optimizer: Adagrad, loss: JointLoss) -> Self {
        Self { network, optimizer, loss, global_step: 0 }
    }

    pub fn with_global_step(mut self, global_step: u64) -> Self {
        self.global_step = global_step;
        self
    }

    pub fn network(&self) -> &SharedNetwork {
        &self.network
    }

    pub fn optimizer(&self) -> &Adagrad {
        &self.optimizer
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn step(&mut self, batch: &Batch, mode: Mode) -> StepOutput {

        match mode {
            Mode::Predict => StepOutput::Predicted(self.network.score(&batch.original)),
            Mode::Evaluate => {
                let original = self.network.score(&batch.original);
                let corrupted = self.network.score(&batch.corrupted);
                StepOutput::Evaluated(self.loss.value(&original, &corrupted, &batch.labels))
            },
            Mode::Train => {
                // both branches read the same parameters, the update comes after both
                let original = self.network.forward(&batch.original);
                let corrupted = self.network.forward(&batch.corrupted);
                let (value, d_original, d_corrupted) = self.loss.value_and_gradients(&original.scores, &corrupted.scores, &batch.labels);

                let mut grads = Gradients::zeros(&self.network);
                self.network.backward(&original, &d_original, &mut grads);
                self.network.backward(&corrupted, &d_corrupted, &mut grads);
                self.optimizer.apply(&mut self.network, &grads);

                self.global_step += 1;
                StepOutput::Trained(value)
            }
        }
    }

    /// Mean loss over `batches` without touching Θ.
    pub fn evaluate<I: Iterator<Item = Result<Batch>>>(&mut self, batches: I) -> Result<LossValue> {

        let mut progress = DisplayProgress::new();
        for batch in batches {
            if let StepOutput::Evaluated(value) = self.step(&batch?, Mode::Evaluate) {
                progress.add(&value);
            }
        }
        let n = progress.window_batches.max(1) as f32;
        let window = progress.window_loss;
        Ok(LossValue { syntactic: window.syntactic / n, sentiment: window.sentiment / n, combined: window.combined / n })
    }

    /// Trains on every batch, logging every `log_every_steps` and checkpointing
    /// every `checkpoint_every_steps` as well as after the last batch.
    pub fn run<I: Iterator<Item = Result<Batch>>>(
        &mut self,
        batches: I,
        params: &TrainParams,
        checkpoints: Option<&CheckpointManager>,
    ) -> Result<RunSummary> {

        let timer = Instant::now();
        let first_step = self.global_step;
        let mut last_saved = None;
        let mut progress = DisplayProgress::new();
        let log_every = params.log_every_steps.max(1) as u64;
        let checkpoint_every = params.checkpoint_every_steps.max(1) as u64;

        for batch in batches {
            let batch = batch?;
            if let StepOutput::Trained(value) = self.step(&batch, Mode::Train) {
                progress.add(&value);
            }

            let step = self.global_step;
            if step % log_every == 0 {
                progress.flush(step);
            }
            if let Some(manager) = checkpoints {
                if step % checkpoint_every == 0 {
                    manager.save(step, &self.network, &self.optimizer)?;
                    last_saved = Some(step);
                }
            }
        }
        progress.flush(self.global_step);

        if let Some(manager) = checkpoints {
            if self.global_step > first_step && last_saved != Some(self.global_step) {
                manager.save(self.global_step, &self.network, &self.optimizer)?;
            }
        }

        let steps = self.global_step - first_step;
        debug!("ran {} steps", steps);
        info!("finished {} training steps, took {} seconds ...", steps, timer.elapsed().as_secs());
        Ok(RunSummary { steps, mean_loss: progress.mean() })
    }
}
