//! Running scalar statistics for loss and timing signals.
//!
//! `AverageMeter` tracks the latest value and the running average of any
//! scalar stream. Updates may be weighted by a sample count so per-batch
//! values average correctly across uneven batch sizes.

/// Computes and stores the latest value and the running average of a scalar.
#[derive(Debug, Clone, Default)]
pub struct AverageMeter {
    /// Most recent value passed to [`update`](Self::update).
    pub val: f64,
    /// Weighted sum of all values.
    pub sum: f64,
    /// Total weight seen so far.
    pub count: u64,
    /// Running average, `sum / count`.
    pub avg: f64,
}

impl AverageMeter {
    /// Create a zeroed meter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `val` with weight `n` (typically the batch size).
    pub fn update(&mut self, val: f64, n: u64) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
        if self.count > 0 {
            self.avg = self.sum / self.count as f64;
        }
    }

    /// Reset all fields to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
