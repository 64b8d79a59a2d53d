//! Error types for encoder operations.

use thiserror::Error;

/// Encoder-specific errors.
#[derive(Debug, Error)]
pub enum UmeError {
    /// Input validation failed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tensor shapes from two code paths disagree.
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Contrastive loss type string is not in the closed set.
    #[error("Unknown contrastive loss type: {0}")]
    UnknownLossType(String),

    /// Modality string is not in the closed set.
    #[error("Unknown modality: {0}")]
    UnknownModality(String),

    /// Pretrained model name not in the registry.
    #[error("Unknown model name: {name}. Currently available models: {available:?}")]
    UnknownModel { name: String, available: Vec<String> },

    /// Device request failed validation.
    #[error("Device error: {0}")]
    Device(String),

    /// Tokenization failed.
    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    /// Checkpoint loading failed after retries.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Tensor operation failed.
    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for encoder operations.
pub type UmeResult<T> = Result<T, UmeError>;
