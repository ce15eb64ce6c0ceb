//! Best-checkpoint selection and score-record persistence.
//!
//! The policy keeps exactly one "best" checkpoint pair on disk, overwritten
//! whenever an evaluation strictly improves on the best aggregate seen so
//! far, and one "latest" pair written unconditionally when training ends.
//! Checkpoint I/O failures are fatal: a run that cannot persist progress has
//! nothing to show for the compute it burns.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::MemSegResult;
use crate::eval::EvalReport;
use crate::model::SegmentationModel;

/// Filenames of the persisted run artifacts.
pub const BEST_MODEL_FILE: &str = "best_model.safetensors";
pub const LATEST_MODEL_FILE: &str = "latest_model.safetensors";
pub const BEST_SCORE_FILE: &str = "best_score.json";
pub const LATEST_SCORE_FILE: &str = "latest_score.json";

/// The best aggregate score seen so far and the step that achieved it.
#[derive(Debug, Clone, Copy)]
pub struct BestScore {
    pub score: f64,
    pub step: u64,
}

/// Decides when to overwrite the best checkpoint and writes run artifacts.
#[derive(Debug)]
pub struct CheckpointPolicy {
    savedir: PathBuf,
    best: Option<BestScore>,
}

impl CheckpointPolicy {
    /// Create the policy, ensuring the save directory exists.
    pub fn new(savedir: impl Into<PathBuf>) -> MemSegResult<Self> {
        let savedir = savedir.into();
        std::fs::create_dir_all(&savedir)?;
        Ok(Self {
            savedir,
            best: None,
        })
    }

    /// Best score recorded so far, if any evaluation improved on zero.
    pub fn best(&self) -> Option<BestScore> {
        self.best
    }

    /// Compare `report` against the best aggregate seen so far; on strict
    /// improvement persist the model weights and the score record, and
    /// remember the new best. Returns whether the best was updated.
    pub fn consider<M>(&mut self, report: &EvalReport, step: u64, model: &M) -> MemSegResult<bool>
    where
        M: SegmentationModel + ?Sized,
    {
        let aggregate = report.aggregate();
        let previous = self.best.map_or(0.0, |b| b.score);
        if aggregate <= previous {
            debug!(
                "no improvement at step {step}: {:.3}% <= best {:.3}%",
                aggregate * 100.0,
                previous * 100.0
            );
            return Ok(false);
        }

        write_score_record(
            &self.savedir.join(BEST_SCORE_FILE),
            "best_step",
            step,
            report,
        )?;
        model.save_weights(&self.savedir.join(BEST_MODEL_FILE))?;
        info!(
            "Best Score {:.3}% to {:.3}%",
            previous * 100.0,
            aggregate * 100.0
        );
        self.best = Some(BestScore {
            score: aggregate,
            step,
        });
        Ok(true)
    }

    /// Persist the end-of-run snapshot: latest weights and latest score
    /// record. Always runs, improvement or not.
    pub fn finalize<M>(&self, report: &EvalReport, step: u64, model: &M) -> MemSegResult<()>
    where
        M: SegmentationModel + ?Sized,
    {
        model.save_weights(&self.savedir.join(LATEST_MODEL_FILE))?;
        write_score_record(
            &self.savedir.join(LATEST_SCORE_FILE),
            "latest_step",
            step,
            report,
        )
    }
}

/// Write a `{<step_key>: step, eval_<metric>: value, ...}` record as
/// tab-indented JSON.
fn write_score_record(
    path: &Path,
    step_key: &str,
    step: u64,
    report: &EvalReport,
) -> MemSegResult<()> {
    let mut record = serde_json::Map::new();
    record.insert(step_key.to_string(), Value::from(step));
    for (key, value) in report.record_entries() {
        record.insert(key.to_string(), Value::from(value));
    }

    let file = File::create(path)?;
    let mut serializer = serde_json::Serializer::with_formatter(
        BufWriter::new(file),
        PrettyFormatter::with_indent(b"\t"),
    );
    Value::Object(record).serialize(&mut serializer)?;
    serializer.into_inner().flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemSegResult;
    use crate::model::Mode;
    use candle_core::Tensor;
    use std::cell::Cell;

    /// Stub model that counts weight saves and writes a marker file.
    struct StubModel {
        saves: Cell<u64>,
    }

    impl StubModel {
        fn new() -> Self {
            Self {
                saves: Cell::new(0),
            }
        }
    }

    impl SegmentationModel for StubModel {
        fn forward(&self, _images: &Tensor, _mode: Mode) -> MemSegResult<Tensor> {
            unreachable!("checkpoint tests never run the model")
        }

        fn save_weights(&self, path: &Path) -> MemSegResult<()> {
            self.saves.set(self.saves.get() + 1);
            std::fs::write(path, b"weights")?;
            Ok(())
        }
    }

    fn report_with_aggregate(value: f64) -> EvalReport {
        EvalReport {
            auroc_image: value,
            best_f1: value,
            best_threshold: value,
            auroc_pixel: 0.0,
            aupro: None,
        }
    }

    #[test]
    fn best_is_rewritten_only_on_strict_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = CheckpointPolicy::new(dir.path()).unwrap();
        let model = StubModel::new();

        let mut updates = Vec::new();
        for (step, score) in [(10u64, 0.5), (20, 0.7), (30, 0.6), (40, 0.9)] {
            let updated = policy
                .consider(&report_with_aggregate(score), step, &model)
                .unwrap();
            updates.push(updated);
        }
        assert_eq!(updates, vec![true, true, false, true]);
        assert_eq!(model.saves.get(), 3);

        let best = policy.best().unwrap();
        assert_eq!(best.step, 40);
        assert!((best.score - 0.9).abs() < 1e-12);

        let record: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(BEST_SCORE_FILE)).unwrap())
                .unwrap();
        assert_eq!(record["best_step"], 40);
        assert!((record["eval_AUROC-image"].as_f64().unwrap() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn equal_score_does_not_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = CheckpointPolicy::new(dir.path()).unwrap();
        let model = StubModel::new();
        assert!(policy
            .consider(&report_with_aggregate(0.5), 1, &model)
            .unwrap());
        assert!(!policy
            .consider(&report_with_aggregate(0.5), 2, &model)
            .unwrap());
        assert_eq!(policy.best().unwrap().step, 1);
    }

    #[test]
    fn finalize_always_writes_latest_pair() {
        let dir = tempfile::tempdir().unwrap();
        let policy = CheckpointPolicy::new(dir.path()).unwrap();
        let model = StubModel::new();
        policy
            .finalize(&report_with_aggregate(0.0), 100, &model)
            .unwrap();
        assert!(dir.path().join(LATEST_MODEL_FILE).exists());
        let text = std::fs::read_to_string(dir.path().join(LATEST_SCORE_FILE)).unwrap();
        assert!(text.contains("\t\"latest_step\""));
        assert!(text.contains("eval_Best-F1-score"));
    }

    #[test]
    fn score_record_is_tab_indented() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        write_score_record(&path, "best_step", 7, &report_with_aggregate(0.25)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n\t"));
    }
}
