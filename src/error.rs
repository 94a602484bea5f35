use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures raised by the recommendation pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Dataset unreadable or malformed.
    #[error("cannot use dataset '{path}': {reason}")]
    DataSource { path: PathBuf, reason: String },

    /// Degenerate or insufficient training data.
    #[error("training rejected: {0}")]
    Training(String),

    /// Persisted bundle unreadable or failing validation.
    #[error("artifact bundle at '{path}' is unusable: {reason}")]
    ArtifactCorrupt { path: PathBuf, reason: String },

    #[error("model is not ready: train or restore a bundle first")]
    ModelNotReady,

    /// Inference input that the fitted transformers cannot encode.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn data_source(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DataSource {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ArtifactCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
