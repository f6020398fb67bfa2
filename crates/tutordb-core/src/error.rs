//! Error kinds shared by every stage of the pipeline.
//!
//! Each variant carries the underlying cause as text so operators can
//! diagnose failures; [`ErrorKind`] is the coarse classification callers see.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Document has no extractable content")]
    EmptyDocument,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Text extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Caller-facing classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    Unauthorized,
    ExtractionFailed,
    EmbeddingUnavailable,
    DimensionMismatch,
    StoreUnavailable,
    Timeout,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) | Error::InvalidArgument(_) | Error::EmptyDocument => ErrorKind::InvalidInput,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            Error::EmbeddingUnavailable(_) => ErrorKind::EmbeddingUnavailable,
            Error::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Error::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::InvalidConfig(_) => ErrorKind::Internal,
        }
    }

    /// Transient failures worth another attempt at the calling layer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ExtractionFailed(_) | Error::EmbeddingUnavailable(_) | Error::StoreUnavailable(_) | Error::Timeout(_)
        )
    }

    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        Error::StoreUnavailable(err.to_string())
    }

    pub fn embedding<E: std::fmt::Display>(err: E) -> Self {
        Error::EmbeddingUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_reported_as_invalid_input() {
        assert_eq!(Error::EmptyDocument.kind(), ErrorKind::InvalidInput);
        assert_eq!(Error::InvalidArgument("topK".into()).kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn dimension_mismatch_is_never_retried() {
        let err = Error::DimensionMismatch { expected: 768, actual: 1024 };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Embedding dimension mismatch: expected 768, got 1024");
        assert!(Error::store("connection reset").is_retryable());
    }
}
