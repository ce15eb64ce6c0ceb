//! Optimizer and learning-rate schedule seams.
//!
//! The loop drives the optimizer through [`StepOptimizer`], a thin seam over
//! whatever actually updates the weights. Any `candle_nn` optimizer (AdamW in
//! practice) satisfies it through the blanket impl. Schedules are pure
//! functions of the step index, advanced once per optimization step.

use std::f64::consts::PI;

use candle_core::Tensor;

use crate::error::{MemSegError, MemSegResult};

/// One optimization step: backpropagate `loss` and apply the update.
///
/// Candle rebuilds the gradient tape on every backward pass, so there is no
/// separate zero-grad operation to expose.
pub trait StepOptimizer {
    fn backward_step(&mut self, loss: &Tensor) -> MemSegResult<()>;

    /// Current learning rate.
    fn learning_rate(&self) -> f64;

    /// Set the learning rate; called once per step when a schedule is
    /// configured.
    fn set_learning_rate(&mut self, lr: f64);
}

impl<O: candle_nn::Optimizer> StepOptimizer for O {
    fn backward_step(&mut self, loss: &Tensor) -> MemSegResult<()> {
        candle_nn::Optimizer::backward_step(self, loss)?;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        candle_nn::Optimizer::learning_rate(self)
    }

    fn set_learning_rate(&mut self, lr: f64) {
        candle_nn::Optimizer::set_learning_rate(self, lr);
    }
}

/// A learning-rate schedule indexed by optimization step.
pub trait LrSchedule: Send + Sync {
    /// Learning rate to apply at `step` (0-indexed).
    fn lr_at(&self, step: u64) -> f64;
}

/// Cosine annealing with linear warmup and optional restarts.
///
/// Each cycle ramps linearly from `min_lr` to the cycle's peak over
/// `warmup_steps`, then follows a half-cosine back down to `min_lr`. After a
/// cycle completes the schedule restarts, with the peak damped by `gamma` per
/// completed cycle. A single cycle spanning the whole step budget gives the
/// usual warmup-then-decay shape.
#[derive(Debug, Clone)]
pub struct CosineWarmupSchedule {
    first_cycle_steps: u64,
    warmup_steps: u64,
    max_lr: f64,
    min_lr: f64,
    gamma: f64,
}

impl CosineWarmupSchedule {
    pub fn new(
        first_cycle_steps: u64,
        warmup_steps: u64,
        max_lr: f64,
        min_lr: f64,
    ) -> MemSegResult<Self> {
        if first_cycle_steps == 0 {
            return Err(MemSegError::invalid_config(
                "first_cycle_steps must be greater than zero",
            ));
        }
        if warmup_steps >= first_cycle_steps {
            return Err(MemSegError::invalid_config(format!(
                "warmup_steps ({warmup_steps}) must be shorter than the cycle ({first_cycle_steps})"
            )));
        }
        if min_lr > max_lr {
            return Err(MemSegError::invalid_config(format!(
                "min_lr ({min_lr}) exceeds max_lr ({max_lr})"
            )));
        }
        Ok(Self {
            first_cycle_steps,
            warmup_steps,
            max_lr,
            min_lr,
            gamma: 1.0,
        })
    }

    /// Damp the peak learning rate by `gamma` after each restart.
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }
}

impl LrSchedule for CosineWarmupSchedule {
    fn lr_at(&self, step: u64) -> f64 {
        let cycle = step / self.first_cycle_steps;
        let step_in_cycle = step % self.first_cycle_steps;
        let peak = self.min_lr + (self.max_lr - self.min_lr) * self.gamma.powi(cycle as i32);

        if step_in_cycle < self.warmup_steps {
            let ramp = step_in_cycle as f64 / self.warmup_steps as f64;
            self.min_lr + (peak - self.min_lr) * ramp
        } else {
            let progress = (step_in_cycle - self.warmup_steps) as f64
                / (self.first_cycle_steps - self.warmup_steps) as f64;
            self.min_lr + (peak - self.min_lr) * 0.5 * (1.0 + (PI * progress).cos())
        }
    }
}
