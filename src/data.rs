//! Batch containers and the data-source contracts.
//!
//! Data loading itself (augmentation, synthetic defect generation, worker
//! pools) lives outside this crate; the trainer only needs a restartable
//! source of batches. [`BatchCursor`] turns a finite source into the endless
//! step stream the step-budgeted loop consumes: draw the next batch, restart
//! the source when it runs dry, stop only when the budget says so.

use std::path::{Path, PathBuf};

use candle_core::Tensor;

use crate::error::{MemSegError, MemSegResult};

/// One batch of images, pixel masks and image-level labels.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input images, `(N, C, H, W)`, values in `[0, 1]`.
    pub images: Tensor,
    /// Binary ground-truth masks, `(N, H, W)`.
    pub masks: Tensor,
    /// Binary image-level labels, `(N)`, 1 = anomalous.
    pub targets: Tensor,
}

impl Batch {
    /// Build a batch, checking that the three tensors agree on shape.
    pub fn new(images: Tensor, masks: Tensor, targets: Tensor) -> MemSegResult<Self> {
        let (n, _c, h, w) = images.dims4()?;
        let (mn, mh, mw) = masks.dims3()?;
        let tn = targets.dims1()?;
        if (mn, mh, mw) != (n, h, w) || tn != n {
            return Err(MemSegError::data(format!(
                "inconsistent batch shapes: images {:?}, masks {:?}, targets {:?}",
                images.dims(),
                masks.dims(),
                targets.dims()
            )));
        }
        Ok(Self {
            images,
            masks,
            targets,
        })
    }

    /// Number of samples in the batch.
    pub fn batch_size(&self) -> MemSegResult<usize> {
        Ok(self.images.dim(0)?)
    }
}

/// A restartable source of batches.
///
/// `restart` rewinds the source to its beginning; sources must support being
/// restarted indefinitely. Batch retrieval is a blocking, synchronous call;
/// any internal parallelism is the source's own business.
pub trait BatchSource {
    /// Rewind to the first batch.
    fn restart(&mut self);

    /// Produce the next batch, or `None` when the pass is exhausted.
    fn next_batch(&mut self) -> MemSegResult<Option<Batch>>;
}

/// A batch source used for evaluation, which can additionally name the file
/// behind a batch position for diagnostic output.
pub trait EvalSource: BatchSource {
    /// Source file for the given batch index, if known. Used only for
    /// diagnostic filenames and logging.
    fn file_path(&self, batch_idx: usize) -> Option<&Path>;
}

/// Endless cursor over a restartable batch source.
///
/// Yields exactly one batch per call, restarting the underlying source when
/// it is exhausted. A source that yields nothing even after a restart is a
/// data error, not an end-of-stream.
pub struct BatchCursor<'a, S: BatchSource + ?Sized> {
    source: &'a mut S,
    started: bool,
    restarts: u64,
}

impl<'a, S: BatchSource + ?Sized> BatchCursor<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self {
            source,
            started: false,
            restarts: 0,
        }
    }

    /// How many times the underlying source has been restarted, the initial
    /// rewind included.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Draw the next batch, restarting the source if needed.
    pub fn next_batch(&mut self) -> MemSegResult<Batch> {
        if !self.started {
            self.source.restart();
            self.restarts += 1;
            self.started = true;
        }
        if let Some(batch) = self.source.next_batch()? {
            return Ok(batch);
        }
        self.source.restart();
        self.restarts += 1;
        self.source
            .next_batch()?
            .ok_or_else(|| MemSegError::data("batch source yielded no batches after restart"))
    }
}

/// In-memory batch source over pre-built batches.
///
/// Used by tests and small offline runs; file paths, when provided, map
/// batch indices to the sample files they were built from.
#[derive(Debug, Clone, Default)]
pub struct TensorBatches {
    batches: Vec<Batch>,
    file_list: Vec<PathBuf>,
    pos: usize,
}

impl TensorBatches {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            batches,
            file_list: Vec::new(),
            pos: 0,
        }
    }

    pub fn with_file_list(mut self, file_list: Vec<PathBuf>) -> Self {
        self.file_list = file_list;
        self
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl BatchSource for TensorBatches {
    fn restart(&mut self) {
        self.pos = 0;
    }

    fn next_batch(&mut self) -> MemSegResult<Option<Batch>> {
        let batch = self.batches.get(self.pos).cloned();
        if batch.is_some() {
            self.pos += 1;
        }
        Ok(batch)
    }
}

impl EvalSource for TensorBatches {
    fn file_path(&self, batch_idx: usize) -> Option<&Path> {
        self.file_list.get(batch_idx).map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn small_batch(fill: f32) -> Batch {
        let device = Device::Cpu;
        let images = Tensor::full(fill, (2, 3, 4, 4), &device).unwrap();
        let masks = Tensor::zeros((2, 4, 4), candle_core::DType::F32, &device).unwrap();
        let targets = Tensor::zeros(2, candle_core::DType::U8, &device).unwrap();
        Batch::new(images, masks, targets).unwrap()
    }

    #[test]
    fn batch_rejects_mismatched_shapes() {
        let device = Device::Cpu;
        let images = Tensor::zeros((2, 3, 4, 4), candle_core::DType::F32, &device).unwrap();
        let masks = Tensor::zeros((2, 5, 5), candle_core::DType::F32, &device).unwrap();
        let targets = Tensor::zeros(2, candle_core::DType::U8, &device).unwrap();
        assert!(Batch::new(images, masks, targets).is_err());
    }

    #[test]
    fn cursor_restarts_exhausted_source() {
        let mut source = TensorBatches::new(vec![small_batch(0.1), small_batch(0.2)]);
        let mut cursor = BatchCursor::new(&mut source);
        for _ in 0..5 {
            cursor.next_batch().unwrap();
        }
        // Initial rewind plus one wrap after the second batch ran out twice.
        assert_eq!(cursor.restarts(), 3);
    }

    #[test]
    fn cursor_errors_on_empty_source() {
        let mut source = TensorBatches::new(Vec::new());
        let mut cursor = BatchCursor::new(&mut source);
        assert!(matches!(cursor.next_batch(), Err(MemSegError::Data(_))));
    }
}
