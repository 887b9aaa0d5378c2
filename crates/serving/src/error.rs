// SPDX-License-Identifier: PolyForm-Shield-1.0

use model_runtime::{LoadError, PredictError, UnsupportedKindError};
use thiserror::Error;

/// Errors surfaced by the registry and the dispatcher.
///
/// The core never maps these to transport status codes; that is the
/// gateway's job.
#[derive(Debug, Error)]
pub enum ServingError {
    #[error(transparent)]
    UnsupportedKind(#[from] UnsupportedKindError),

    #[error("failed to load model: {0}")]
    Load(#[from] LoadError),

    #[error("model '{name}' version '{version}' not found")]
    NotFound { name: String, version: String },

    #[error(transparent)]
    Predict(#[from] PredictError),

    /// Every worker is busy and the wait queue is full. Retryable.
    #[error("inference queue is full ({capacity} requests running or queued)")]
    Backpressure { capacity: usize },

    #[error("batch_size must be at least 1")]
    InvalidBatchSize,

    #[error("model serving is shutting down")]
    ShuttingDown,

    /// A worker task panicked or was aborted by the runtime.
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ServingError {
    pub fn not_found(name: &str, version: &str) -> Self {
        ServingError::NotFound {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServingError::Backpressure { .. } | ServingError::ShuttingDown
        )
    }
}
