//! Decision metrics over accumulated evaluation outputs.
//!
//! Everything here is deterministic given identical inputs: ranking ties are
//! resolved by stable ordering and argmax ties resolve to the first
//! occurrence, so repeated evaluations of the same model state produce
//! identical metric values and thresholds.

use candle_core::Tensor;

use crate::error::{MemSegError, MemSegResult};

/// Epsilon guard for F1 against zero precision and recall.
const F1_EPS: f64 = 1e-8;

/// Number of top anomaly pixels pooled into the image-level score.
pub const TOP_K_POOL: usize = 100;

/// Area under the ROC curve for binary `labels` against real `scores`.
///
/// Rank-based (Mann-Whitney) formulation with average ranks for tied scores.
/// Returns [`MemSegError::DegenerateEvaluation`] when the label set contains
/// a single class, where the curve is undefined.
pub fn roc_auc_score(labels: &[u8], scores: &[f32]) -> MemSegResult<f64> {
    if labels.len() != scores.len() {
        return Err(MemSegError::data(format!(
            "label/score length mismatch: {} vs {}",
            labels.len(),
            scores.len()
        )));
    }
    let n = labels.len();
    let n_pos = labels.iter().filter(|&&l| l != 0).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(MemSegError::degenerate(format!(
            "AUROC undefined: {n_pos} positive and {n_neg} negative labels"
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Average ranks across ties, 1-based.
    let mut ranks = vec![0.0f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = avg_rank;
        }
        i = j + 1;
    }

    let rank_sum_pos: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(&l, _)| l != 0)
        .map(|(_, &r)| r)
        .sum();
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Ok((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Precision/recall values at every achievable decision threshold.
#[derive(Debug, Clone)]
pub struct PrCurve {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub thresholds: Vec<f64>,
}

/// Precision/recall curve over all distinct thresholds implied by `scores`,
/// highest threshold first. Ties in score are folded into one curve point.
pub fn precision_recall_curve(labels: &[u8], scores: &[f32]) -> MemSegResult<PrCurve> {
    if labels.len() != scores.len() {
        return Err(MemSegError::data(format!(
            "label/score length mismatch: {} vs {}",
            labels.len(),
            scores.len()
        )));
    }
    let n_pos = labels.iter().filter(|&&l| l != 0).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(MemSegError::degenerate(format!(
            "precision/recall curve undefined: {n_pos} positive and {n_neg} negative labels"
        )));
    }

    // Stable descending sort keeps equal scores in input order.
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut curve = PrCurve {
        precision: Vec::new(),
        recall: Vec::new(),
        thresholds: Vec::new(),
    };
    let mut tp = 0u64;
    let mut fp = 0u64;
    for (i, &idx) in order.iter().enumerate() {
        if labels[idx] != 0 {
            tp += 1;
        } else {
            fp += 1;
        }
        // Emit one point per distinct threshold.
        if i + 1 < order.len() && scores[order[i + 1]] == scores[idx] {
            continue;
        }
        curve.precision.push(tp as f64 / (tp + fp) as f64);
        curve.recall.push(tp as f64 / n_pos as f64);
        curve.thresholds.push(f64::from(scores[idx]));
    }
    Ok(curve)
}

/// Find the threshold on image anomaly scores that maximizes F1.
///
/// F1 is computed as `2PR/(P+R+eps)` at every curve point; argmax ties go to
/// the first occurrence in curve order for reproducibility. Returns
/// `(best_f1, best_threshold)`.
pub fn best_f1(labels: &[u8], scores: &[f32]) -> MemSegResult<(f64, f64)> {
    let curve = precision_recall_curve(labels, scores)?;
    let mut best = (f64::NEG_INFINITY, 0.0);
    for ((&p, &r), &t) in curve
        .precision
        .iter()
        .zip(&curve.recall)
        .zip(&curve.thresholds)
    {
        let f1 = 2.0 * p * r / (p + r + F1_EPS);
        if f1 > best.0 {
            best = (f1, t);
        }
    }
    Ok(best)
}

/// Image-level anomaly score: mean of the `TOP_K_POOL` largest anomaly-channel
/// values. Maps with fewer pixels than the pool size average all pixels.
///
/// Top-k pooling keeps the score sensitive to small defects without being
/// dominated by a single outlier pixel.
pub fn image_anomaly_score(pixels: &[f32]) -> f64 {
    if pixels.is_empty() {
        return 0.0;
    }
    let mut sorted = pixels.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let k = sorted.len().min(TOP_K_POOL);
    sorted[..k].iter().map(|&v| f64::from(v)).sum::<f64>() / k as f64
}

/// Trapezoidal area under the curve `(x, y)`, with `x` ascending.
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[1] + ys[0]) / 2.0)
        .sum()
}

/// External producer of the per-region overlap (PRO) curve.
///
/// Implementations receive the accumulated anomaly maps and ground-truth
/// masks of one evaluation pass, shaped `(N, H, W)`, and return matching
/// false-positive-rate and overlap sequences with FPR ascending. The
/// evaluator integrates the curve with [`trapezoid`].
pub trait RegionOverlap: Send + Sync {
    fn pro_curve(&self, anomaly_maps: &Tensor, masks: &Tensor) -> MemSegResult<(Vec<f64>, Vec<f64>)>;
}
