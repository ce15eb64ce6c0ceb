//! Evaluation pass over a held-out data source.
//!
//! The evaluator runs the model in inference mode over every validation
//! batch, accumulates image labels, image scores, ground-truth masks and
//! per-pixel anomaly maps, and turns them into calibrated decision metrics.
//! All metric values are materialized to plain `f64` here, at the boundary;
//! logging, tracking and checkpointing downstream never touch tensors.

use std::path::PathBuf;

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax;
use tracing::{debug, info, warn};

use crate::data::EvalSource;
use crate::error::MemSegResult;
use crate::heatmap::render_heatmap;
use crate::metrics::{best_f1, image_anomaly_score, roc_auc_score, trapezoid, RegionOverlap};
use crate::model::{Mode, SegmentationModel};

/// Metrics from one evaluation pass.
///
/// The first three fields are the comparable metrics that feed the
/// checkpoint aggregate and the persisted score record. Pixel-level AUROC
/// and the region-overlap AUC are informational: computed and logged, but
/// not part of the checkpoint decision.
#[derive(Debug, Clone)]
pub struct EvalReport {
    pub auroc_image: f64,
    pub best_f1: f64,
    pub best_threshold: f64,
    pub auroc_pixel: f64,
    /// Present only when a [`RegionOverlap`] collaborator was supplied.
    pub aupro: Option<f64>,
}

impl EvalReport {
    /// The values the checkpoint policy aggregates, in record order.
    ///
    /// The threshold is part of the aggregate even though it is not a
    /// quality score; see DESIGN.md for why this stays as observed.
    pub fn checkpoint_values(&self) -> [f64; 3] {
        [self.auroc_image, self.best_f1, self.best_threshold]
    }

    /// Mean of the comparable metric values.
    pub fn aggregate(&self) -> f64 {
        let values = self.checkpoint_values();
        values.iter().sum::<f64>() / values.len() as f64
    }

    /// Key/value pairs persisted in score records and sent to the tracking
    /// sink, prefixed the way the run artifacts name them.
    pub fn record_entries(&self) -> [(&'static str, f64); 3] {
        [
            ("eval_AUROC-image", self.auroc_image),
            ("eval_Best-F1-score", self.best_f1),
            ("eval_Best-threshold", self.best_threshold),
        ]
    }
}

/// Runs the model over a validation source and computes an [`EvalReport`].
#[derive(Default)]
pub struct Evaluator {
    save_dir: Option<PathBuf>,
    region_overlap: Option<Box<dyn RegionOverlap>>,
}

/// Labels, scores, masks and maps accumulated across one validation pass.
#[derive(Default)]
struct Accumulator {
    labels: Vec<u8>,
    scores: Vec<f32>,
    masks: Vec<Tensor>,
    maps: Vec<Tensor>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one diagnostic composite per batch into `dir`.
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    /// Attach the external region-overlap curve producer.
    pub fn with_region_overlap(mut self, collaborator: Box<dyn RegionOverlap>) -> Self {
        self.region_overlap = Some(collaborator);
        self
    }

    /// Evaluate `model` over every batch of `source`.
    ///
    /// The model is invoked in [`Mode::Eval`]; because the mode is an
    /// argument, there is no training-mode state to restore afterwards.
    /// Degenerate validation sets (single-class labels) surface as
    /// [`crate::error::MemSegError::DegenerateEvaluation`].
    pub fn evaluate<M, S>(&self, model: &M, source: &mut S) -> MemSegResult<EvalReport>
    where
        M: SegmentationModel + ?Sized,
        S: EvalSource + ?Sized,
    {
        let mut acc = Accumulator::default();
        source.restart();

        let mut batch_idx = 0usize;
        while let Some(batch) = source.next_batch()? {
            let outputs = model.forward(&batch.images, Mode::Eval)?;
            let probs = softmax(&outputs, 1)?;
            let anomaly = probs.narrow(1, 1, 1)?.squeeze(1)?.contiguous()?;
            let n = anomaly.dim(0)?;

            let targets: Vec<u8> = batch.targets.to_dtype(DType::U8)?.to_vec1::<u8>()?;
            for i in 0..n {
                let map = anomaly.get(i)?;
                let pixels = map.contiguous()?.flatten_all()?.to_vec1::<f32>()?;
                acc.labels.push(targets[i]);
                acc.scores.push(image_anomaly_score(&pixels) as f32);
                acc.masks.push(batch.masks.get(i)?);
                acc.maps.push(map);
            }

            // One composite per batch, keyed by batch index: coarse-grained
            // sampling, not one render per example. The whole unit, input
            // preparation included, fails independently: a bad sample is
            // logged and skipped, never aborting the pass.
            if let Some(dir) = &self.save_dir {
                let save_path = dir.join(format!("combined_sample_{batch_idx}.png"));
                let rendered = (|| -> MemSegResult<()> {
                    render_heatmap(
                        &batch.images.get(0)?,
                        &anomaly.get(0)?,
                        &batch.masks.get(0)?,
                        &save_path,
                        source.file_path(batch_idx),
                    )
                })();
                if let Err(err) = rendered {
                    warn!(batch = batch_idx, error = %err, "diagnostic render failed, skipping sample");
                }
            }
            batch_idx += 1;
        }

        let report = self.finish(acc)?;
        info!(
            "TEST: AUROC-image: {:.3} | Best-F1-score: {:.3} | Best-threshold: {:.3}",
            report.auroc_image, report.best_f1, report.best_threshold
        );
        debug!(
            auroc_pixel = report.auroc_pixel,
            aupro = ?report.aupro,
            "pixel-level evaluation metrics"
        );
        Ok(report)
    }

    fn finish(&self, acc: Accumulator) -> MemSegResult<EvalReport> {
        let auroc_image = roc_auc_score(&acc.labels, &acc.scores)?;
        let (best_f1, best_threshold) = best_f1(&acc.labels, &acc.scores)?;

        // Pixel-level AUROC pools every pixel of every image.
        let mut pixel_labels = Vec::new();
        let mut pixel_scores = Vec::new();
        for (mask, map) in acc.masks.iter().zip(&acc.maps) {
            let mask_vals = mask.contiguous()?.flatten_all()?.to_vec1::<f32>()?;
            let map_vals = map.contiguous()?.flatten_all()?.to_vec1::<f32>()?;
            pixel_labels.extend(mask_vals.iter().map(|&v| u8::from(v > 0.5)));
            pixel_scores.extend(map_vals);
        }
        let auroc_pixel = roc_auc_score(&pixel_labels, &pixel_scores)?;

        let aupro = match &self.region_overlap {
            Some(collaborator) => {
                let maps = Tensor::stack(&acc.maps, 0)?;
                let masks = Tensor::stack(&acc.masks, 0)?;
                let (fprs, pros) = collaborator.pro_curve(&maps, &masks)?;
                Some(trapezoid(&fprs, &pros))
            }
            None => None,
        };

        Ok(EvalReport {
            auroc_image,
            best_f1,
            best_threshold,
            auroc_pixel,
            aupro,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Batch, TensorBatches};
    use crate::error::MemSegError;
    use candle_core::Device;
    use std::path::Path;

    /// Model that replays a fixed anomaly-probability plane per sample:
    /// raw scores are log-probabilities, so softmax recovers the plane.
    struct FixedMapModel {
        anomaly: Vec<Tensor>,
    }

    impl SegmentationModel for FixedMapModel {
        fn forward(&self, images: &Tensor, _mode: Mode) -> MemSegResult<Tensor> {
            let n = images.dim(0)?;
            let per_sample: Vec<Tensor> = self.anomaly[..n]
                .iter()
                .map(|p| {
                    let background = p.affine(-1.0, 1.0)?;
                    let stacked = Tensor::stack(&[&background, p], 0)?;
                    Ok(stacked.affine(1.0, 1e-6)?.log()?)
                })
                .collect::<MemSegResult<_>>()?;
            Ok(Tensor::stack(&per_sample, 0)?)
        }

        fn save_weights(&self, _path: &Path) -> MemSegResult<()> {
            Ok(())
        }
    }

    fn eval_fixture(device: &Device) -> (FixedMapModel, TensorBatches) {
        // Two images: one anomalous with a hot region, one clean.
        let mut hot = vec![0.1f32; 64];
        for i in 20..28 {
            hot[i] = 0.9;
        }
        let cold = vec![0.1f32; 64];
        let hot_map = Tensor::from_vec(hot, (8, 8), device).unwrap();
        let cold_map = Tensor::from_vec(cold, (8, 8), device).unwrap();

        let images = Tensor::zeros((2, 3, 8, 8), DType::F32, device).unwrap();
        let mut mask = vec![0.0f32; 128];
        for i in 20..28 {
            mask[i] = 1.0;
        }
        let masks = Tensor::from_vec(mask, (2, 8, 8), device).unwrap();
        let targets = Tensor::from_vec(vec![1u8, 0], 2, device).unwrap();
        let batch = Batch::new(images, masks, targets).unwrap();

        let model = FixedMapModel {
            anomaly: vec![hot_map, cold_map],
        };
        (model, TensorBatches::new(vec![batch]))
    }

    #[test]
    fn separable_fixture_scores_perfectly() {
        let device = Device::Cpu;
        let (model, mut source) = eval_fixture(&device);
        let report = Evaluator::new().evaluate(&model, &mut source).unwrap();
        assert!((report.auroc_image - 1.0).abs() < 1e-9);
        assert!((report.best_f1 - 1.0).abs() < 1e-6);
        assert!(report.auroc_pixel > 0.99);
        assert!(report.aupro.is_none());
    }

    #[test]
    fn single_class_validation_set_is_fatal() {
        let device = Device::Cpu;
        let (model, _) = eval_fixture(&device);
        let images = Tensor::zeros((2, 3, 8, 8), DType::F32, &device).unwrap();
        let masks = Tensor::zeros((2, 8, 8), DType::F32, &device).unwrap();
        let targets = Tensor::from_vec(vec![0u8, 0], 2, &device).unwrap();
        let mut source =
            TensorBatches::new(vec![Batch::new(images, masks, targets).unwrap()]);
        let err = Evaluator::new().evaluate(&model, &mut source).unwrap_err();
        assert!(matches!(err, MemSegError::DegenerateEvaluation(_)));
    }

    #[test]
    fn diagnostics_are_written_per_batch() {
        let device = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let (model, mut source) = eval_fixture(&device);
        let evaluator = Evaluator::new().with_save_dir(dir.path());
        evaluator.evaluate(&model, &mut source).unwrap();
        assert!(dir.path().join("combined_sample_0.png").exists());
        assert!(!dir.path().join("combined_sample_1.png").exists());
    }

    #[test]
    fn failed_render_input_is_skipped_not_fatal() {
        /// Produces a constant score map for however many samples arrive,
        /// zero included.
        struct ZerosModel;
        impl SegmentationModel for ZerosModel {
            fn forward(&self, images: &Tensor, _mode: Mode) -> MemSegResult<Tensor> {
                let (n, _c, h, w) = images.dims4()?;
                Ok(Tensor::zeros((n, 2, h, w), DType::F32, images.device())?)
            }

            fn save_weights(&self, _path: &Path) -> MemSegResult<()> {
                Ok(())
            }
        }

        let device = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();

        // A normal batch followed by an empty one: preparing render inputs
        // for the empty batch fails, which must not take down the pass.
        let images = Tensor::zeros((2, 3, 8, 8), DType::F32, &device).unwrap();
        let mut mask = vec![0.0f32; 128];
        for i in 20..28 {
            mask[i] = 1.0;
        }
        let masks = Tensor::from_vec(mask, (2, 8, 8), &device).unwrap();
        let targets = Tensor::from_vec(vec![1u8, 0], 2, &device).unwrap();
        let full = Batch::new(images, masks, targets).unwrap();

        let empty = Batch::new(
            Tensor::zeros((0, 3, 8, 8), DType::F32, &device).unwrap(),
            Tensor::zeros((0, 8, 8), DType::F32, &device).unwrap(),
            Tensor::zeros(0, DType::U8, &device).unwrap(),
        )
        .unwrap();

        let mut source = TensorBatches::new(vec![full, empty]);
        let evaluator = Evaluator::new().with_save_dir(dir.path());
        let report = evaluator.evaluate(&ZerosModel, &mut source).unwrap();

        assert!(report.auroc_image.is_finite());
        assert!(dir.path().join("combined_sample_0.png").exists());
        assert!(!dir.path().join("combined_sample_1.png").exists());
    }

    #[test]
    fn region_overlap_collaborator_is_integrated() {
        struct UnitCurve;
        impl RegionOverlap for UnitCurve {
            fn pro_curve(
                &self,
                _maps: &Tensor,
                _masks: &Tensor,
            ) -> MemSegResult<(Vec<f64>, Vec<f64>)> {
                Ok((vec![0.0, 1.0], vec![1.0, 1.0]))
            }
        }
        let device = Device::Cpu;
        let (model, mut source) = eval_fixture(&device);
        let evaluator = Evaluator::new().with_region_overlap(Box::new(UnitCurve));
        let report = evaluator.evaluate(&model, &mut source).unwrap();
        assert!((report.aupro.unwrap() - 1.0).abs() < 1e-12);
    }
}
