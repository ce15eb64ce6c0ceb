//! The step-budgeted training loop.
//!
//! The loop owns the step counter and drives everything else: it draws
//! batches from a restarting cursor, computes the weighted two-part loss,
//! applies one optimizer update per step, advances the learning-rate
//! schedule, and at fixed cadences emits progress lines, runs the evaluator
//! and consults the checkpoint policy. Run length is exactly
//! `num_training_steps` optimizer updates, however many passes over the
//! training data that takes; there is no early convergence exit.
//!
//! Per-step numerical failures (NaN loss, exploding gradients) are not
//! caught here. They propagate and halt the run; for an offline training
//! tool a hard stop beats silent corruption.

use std::time::Instant;

use candle_nn::ops::softmax;
use tracing::info;

use crate::checkpoint::{BestScore, CheckpointPolicy};
use crate::config::TrainerConfig;
use crate::data::{BatchCursor, BatchSource, EvalSource};
use crate::error::{MemSegError, MemSegResult};
use crate::eval::{EvalReport, Evaluator};
use crate::losses::Criterion;
use crate::meter::AverageMeter;
use crate::model::{Mode, SegmentationModel};
use crate::optim::{LrSchedule, StepOptimizer};
use crate::tracking::MetricsSink;

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Best aggregate score and the step that achieved it, if any
    /// evaluation improved on zero.
    pub best: Option<BestScore>,
    /// Report of the final-step evaluation, which always runs.
    pub final_report: EvalReport,
}

/// Orchestrates training and periodic evaluation for one run.
pub struct Trainer {
    config: TrainerConfig,
    evaluator: Evaluator,
}

impl Trainer {
    /// Validate the configuration and build the trainer.
    pub fn new(config: TrainerConfig, evaluator: Evaluator) -> MemSegResult<Self> {
        config.validate()?;
        Ok(Self { config, evaluator })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Run the full step budget.
    ///
    /// `criterion` is `(regression, classification)`: the L1 loss on the
    /// anomaly channel and the focal loss over both channels, combined with
    /// the configured weights. The evaluator runs every `eval_interval`
    /// steps (never at step 0, always on the final step) and the checkpoint
    /// policy is consulted after every evaluation. A "latest" snapshot is
    /// written unconditionally at the end.
    #[allow(clippy::too_many_arguments)]
    pub fn run<M, O, T, V>(
        &self,
        model: &M,
        train_source: &mut T,
        valid_source: &mut V,
        criterion: (&dyn Criterion, &dyn Criterion),
        optimizer: &mut O,
        schedule: Option<&dyn LrSchedule>,
        sink: Option<&dyn MetricsSink>,
    ) -> MemSegResult<TrainingOutcome>
    where
        M: SegmentationModel + ?Sized,
        O: StepOptimizer + ?Sized,
        T: BatchSource + ?Sized,
        V: EvalSource + ?Sized,
    {
        let budget = self.config.num_training_steps;
        let (l1_criterion, focal_criterion) = criterion;

        let mut batch_time = AverageMeter::new();
        let mut data_time = AverageMeter::new();
        let mut losses = AverageMeter::new();
        let mut l1_losses = AverageMeter::new();
        let mut focal_losses = AverageMeter::new();

        let mut policy = CheckpointPolicy::new(&self.config.savedir)?;
        if let Some(sink) = sink {
            sink.log_params(&serde_json::to_value(&self.config)?);
        }

        let mut cursor = BatchCursor::new(train_source);
        let mut last_report: Option<EvalReport> = None;
        let mut end = Instant::now();

        for step in 0..budget {
            let batch = cursor.next_batch()?;
            data_time.update(end.elapsed().as_secs_f64(), 1);
            let batch_size = batch.batch_size()?;

            let outputs = model.forward(&batch.images, Mode::Train)?;
            let probs = softmax(&outputs, 1)?;
            let l1_loss = l1_criterion.forward(&probs, &batch.masks)?;
            let focal_loss = focal_criterion.forward(&probs, &batch.masks)?;
            let loss =
                ((&l1_loss * self.config.l1_weight)? + (&focal_loss * self.config.focal_weight)?)?;

            optimizer.backward_step(&loss)?;

            l1_losses.update(f64::from(l1_loss.to_scalar::<f32>()?), 1);
            focal_losses.update(f64::from(focal_loss.to_scalar::<f32>()?), 1);
            losses.update(f64::from(loss.to_scalar::<f32>()?), 1);
            batch_time.update(end.elapsed().as_secs_f64(), 1);

            if let Some(sink) = sink {
                sink.log_metrics(
                    &[
                        ("lr", optimizer.learning_rate()),
                        ("train_focal_loss", focal_losses.val),
                        ("train_l1_loss", l1_losses.val),
                        ("train_loss", losses.val),
                    ],
                    step,
                );
            }

            if (step + 1) % self.config.log_interval == 0 || step == 0 {
                let rate = batch_size as f64 / batch_time.val.max(f64::EPSILON);
                let rate_avg = batch_size as f64 / batch_time.avg.max(f64::EPSILON);
                info!(
                    "TRAIN [{:>4}/{}] Loss: {:.4} ({:.4}) L1 Loss: {:.4} ({:.4}) \
                     Focal Loss: {:.4} ({:.4}) LR: {:.3e} \
                     Time: {:.3}s, {:>7.2}/s ({:.3}s, {:>7.2}/s) Data: {:.3} ({:.3})",
                    step + 1,
                    budget,
                    losses.val,
                    losses.avg,
                    l1_losses.val,
                    l1_losses.avg,
                    focal_losses.val,
                    focal_losses.avg,
                    optimizer.learning_rate(),
                    batch_time.val,
                    rate,
                    batch_time.avg,
                    rate_avg,
                    data_time.val,
                    data_time.avg,
                );
            }

            // Never at step 0; unconditionally on the final step, so the
            // latest record below is never built from a stale evaluation.
            if ((step + 1) % self.config.eval_interval == 0 && step != 0) || step + 1 == budget {
                let report = self.evaluator.evaluate(model, valid_source)?;
                if let Some(sink) = sink {
                    sink.log_metrics(&report.record_entries(), step);
                }
                policy.consider(&report, step, model)?;
                last_report = Some(report);
            }

            if let Some(schedule) = schedule {
                optimizer.set_learning_rate(schedule.lr_at(step + 1));
            }
            end = Instant::now();
        }

        let final_report = last_report
            .ok_or_else(|| MemSegError::training("run finished without a final evaluation"))?;
        policy.finalize(&final_report, budget, model)?;

        Ok(TrainingOutcome {
            best: policy.best(),
            final_report,
        })
    }
}
