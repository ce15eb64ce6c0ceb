//! Segmentation losses over normalized two-channel predictions.
//!
//! Both criteria consume the softmax-normalized prediction map `(N, 2, H, W)`
//! and the binary ground-truth mask `(N, H, W)`. The training loop combines
//! them with fixed scalar weights.

use candle_core::Tensor;

use crate::error::MemSegResult;

/// Guard for `log(p)` at p = 0.
const LOG_EPS: f64 = 1e-8;

/// A pixel-wise loss over `(probs, mask)` returning a scalar tensor that the
/// optimizer can backpropagate through.
pub trait Criterion {
    fn forward(&self, probs: &Tensor, mask: &Tensor) -> MemSegResult<Tensor>;
}

/// Mean absolute error between the anomaly channel and the ground-truth mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct L1Loss;

impl Criterion for L1Loss {
    fn forward(&self, probs: &Tensor, mask: &Tensor) -> MemSegResult<Tensor> {
        let anomaly = probs.narrow(1, 1, 1)?.squeeze(1)?;
        let diff = (anomaly - mask)?;
        // |d| = relu(d) + relu(-d); keeps the graph differentiable everywhere
        // the optimizer cares about.
        let abs = (diff.relu()? + diff.neg()?.relu()?)?;
        Ok(abs.mean_all()?)
    }
}

/// Focal loss over both channels.
///
/// Down-weights easy pixels by `(1 - p_t)^gamma` so the loss concentrates on
/// the hard (usually anomalous) minority; `alpha` rebalances the two classes.
#[derive(Debug, Clone, Copy)]
pub struct FocalLoss {
    pub gamma: f64,
    pub alpha: f64,
}

impl Default for FocalLoss {
    fn default() -> Self {
        Self {
            gamma: 4.0,
            alpha: 0.25,
        }
    }
}

impl FocalLoss {
    pub fn new(gamma: f64, alpha: f64) -> Self {
        Self { gamma, alpha }
    }
}

impl Criterion for FocalLoss {
    fn forward(&self, probs: &Tensor, mask: &Tensor) -> MemSegResult<Tensor> {
        let p_anomaly = probs.narrow(1, 1, 1)?.squeeze(1)?;
        let p_background = probs.narrow(1, 0, 1)?.squeeze(1)?;
        // 1 - mask
        let inv_mask = mask.affine(-1.0, 1.0)?;

        // p_t: probability assigned to the true class of each pixel.
        let p_t = ((mask * &p_anomaly)? + (&inv_mask * &p_background)?)?;
        // alpha_t: alpha on anomalous pixels, 1 - alpha elsewhere.
        let alpha_t = (mask.affine(self.alpha, 0.0)? + inv_mask.affine(1.0 - self.alpha, 0.0)?)?;

        let focal_weight = p_t.affine(-1.0, 1.0)?.powf(self.gamma)?;
        let log_p_t = p_t.affine(1.0, LOG_EPS)?.log()?;
        let loss = ((alpha_t * focal_weight)? * log_p_t)?.neg()?;
        Ok(loss.mean_all()?)
    }
}
