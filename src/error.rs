//! Error types for the MemSeg trainer.

use thiserror::Error;

/// Result type for trainer operations.
pub type MemSegResult<T> = Result<T, MemSegError>;

/// Errors that can occur while training or evaluating a segmentation model.
#[derive(Debug, Error)]
pub enum MemSegError {
    /// Tensor operation failed
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Image encoding/decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Evaluation input on which a metric is mathematically undefined,
    /// e.g. a validation set whose image labels are all one class.
    #[error("Degenerate evaluation input: {0}")]
    DegenerateEvaluation(String),

    /// Data loading error
    #[error("Data error: {0}")]
    Data(String),

    /// Checkpoint persistence error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Training error
    #[error("Training error: {0}")]
    Training(String),
}

impl MemSegError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a degenerate evaluation error
    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateEvaluation(msg.into())
    }

    /// Create a data loading error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create a training error
    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }
}
