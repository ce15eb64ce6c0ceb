//! # memseg-trainer-rs
//!
//! Step-budgeted training and evaluation orchestration for memory-augmented
//! anomaly segmentation models. Given a model that maps images to per-pixel
//! two-channel class scores, this crate provides:
//!
//! - A training loop driven by a fixed budget of optimizer updates, with a
//!   weighted L1 + focal loss, per-step learning-rate scheduling, and
//!   throughput/loss progress logging.
//! - An evaluation pipeline that turns raw prediction maps into decision
//!   metrics: image-level AUROC, pixel-level AUROC, the F1-optimal operating
//!   threshold, and (via an external collaborator) region-overlap AUC.
//! - A checkpoint policy that keeps exactly one best and one latest
//!   weight/score pair on disk.
//! - A deterministic three-panel diagnostic heatmap renderer.
//!
//! Dataset construction, the model architecture, and the memory-bank
//! mechanism live outside this crate behind the [`SegmentationModel`],
//! [`BatchSource`] and [`RegionOverlap`] contracts.
//!
//! # Example
//!
//! ```no_run
//! use memseg_trainer_rs::prelude::*;
//!
//! # fn run(model: impl SegmentationModel,
//! #        mut train_source: impl BatchSource,
//! #        mut valid_source: impl EvalSource,
//! #        mut optimizer: impl StepOptimizer) -> MemSegResult<()> {
//! let config = TrainerConfig::default();
//! let schedule = CosineWarmupSchedule::new(config.num_training_steps, 100, 1e-4, 1e-6)?;
//! let trainer = Trainer::new(config, Evaluator::new())?;
//! let outcome = trainer.run(
//!     &model,
//!     &mut train_source,
//!     &mut valid_source,
//!     (&L1Loss, &FocalLoss::default()),
//!     &mut optimizer,
//!     Some(&schedule),
//!     None,
//! )?;
//! println!("final image AUROC: {:.3}", outcome.final_report.auroc_image);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod heatmap;
pub mod losses;
pub mod meter;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod tracking;
pub mod train;

pub use checkpoint::{BestScore, CheckpointPolicy};
pub use config::TrainerConfig;
pub use data::{Batch, BatchCursor, BatchSource, EvalSource, TensorBatches};
pub use error::{MemSegError, MemSegResult};
pub use eval::{EvalReport, Evaluator};
pub use losses::{Criterion, FocalLoss, L1Loss};
pub use meter::AverageMeter;
pub use metrics::RegionOverlap;
pub use model::{Mode, SegmentationModel};
pub use optim::{CosineWarmupSchedule, LrSchedule, StepOptimizer};
pub use tracking::{JsonlSink, MetricsSink};
pub use train::{Trainer, TrainingOutcome};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{BestScore, CheckpointPolicy};
    pub use crate::config::TrainerConfig;
    pub use crate::data::{Batch, BatchSource, EvalSource, TensorBatches};
    pub use crate::error::{MemSegError, MemSegResult};
    pub use crate::eval::{EvalReport, Evaluator};
    pub use crate::losses::{Criterion, FocalLoss, L1Loss};
    pub use crate::model::{Mode, SegmentationModel};
    pub use crate::optim::{CosineWarmupSchedule, LrSchedule, StepOptimizer};
    pub use crate::tracking::{JsonlSink, MetricsSink};
    pub use crate::train::{Trainer, TrainingOutcome};
}
