//! The contract a segmentation model must satisfy.
//!
//! The trainer never looks inside the model: memory banks, backbones and
//! feature matching are all behind this trait. Two things matter here: the
//! forward pass yields an unnormalized two-channel score map, and the
//! train/eval distinction is an explicit argument rather than hidden mutable
//! mode state, so an evaluation pass cannot leave the model in the wrong
//! mode.

use std::path::Path;

use candle_core::Tensor;

use crate::error::MemSegResult;

/// Forward-pass mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Gradient-tracking forward for optimization.
    Train,
    /// Inference forward; implementations should detach outputs from the
    /// autograd graph and disable any train-only behavior (dropout etc.).
    Eval,
}

/// A per-pixel anomaly segmentation model.
pub trait SegmentationModel {
    /// Run the model on a batch of images `(N, C, H, W)` and return raw
    /// two-channel class scores `(N, 2, H, W)`. Channel 1 is the anomaly
    /// channel; the caller normalizes with softmax.
    fn forward(&self, images: &Tensor, mode: Mode) -> MemSegResult<Tensor>;

    /// Serialize the model weights to `path`, overwriting any existing file.
    fn save_weights(&self, path: &Path) -> MemSegResult<()>;
}
