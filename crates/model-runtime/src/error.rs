// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::path::PathBuf;

use thiserror::Error;

/// Failure while bringing a model's backing resource into memory.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The artifact could not be read from disk.
    #[error("failed to read model artifact {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The artifact was read but is not something this backend can execute.
    #[error("invalid model artifact {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },
}

impl LoadError {
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        LoadError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure while running a prediction against a handle.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("model not loaded")]
    NotLoaded,
    /// The request payload does not match what the backend accepts.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("prediction failed: {0}")]
    Execution(String),
}
