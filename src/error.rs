//! Error types for the evaluator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors that can occur while loading, scoring or aggregating.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An annotation record violates the schema.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A referenced image does not exist.
    #[error("Image not found at '{0}'")]
    MissingImage(PathBuf),

    /// The model call failed or returned unusable scores.
    #[error("Inference error: {0}")]
    Inference(String),

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The annotation root does not exist or is not a directory.
    #[error("Data directory '{0}' does not exist or is not a directory")]
    InvalidDataDir(PathBuf),

    /// No score files found where aggregation was asked to look.
    #[error("No score files found at '{0}'")]
    ScoresNotFound(PathBuf),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Per-record failure categories recorded in score files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedRecord,
    MissingImage,
    Inference,
}

impl EvalError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Category used when this error is recorded against a single record.
    ///
    /// Anything that is not a schema or image problem happened while asking
    /// the model, so it counts as an inference failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::MalformedRecord(_) => ErrorKind::MalformedRecord,
            EvalError::MissingImage(_) => ErrorKind::MissingImage,
            _ => ErrorKind::Inference,
        }
    }
}

impl From<reqwest::Error> for EvalError {
    fn from(err: reqwest::Error) -> Self {
        EvalError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            EvalError::MalformedRecord("x".into()).kind(),
            ErrorKind::MalformedRecord
        );
        assert_eq!(
            EvalError::MissingImage(PathBuf::from("a.png")).kind(),
            ErrorKind::MissingImage
        );
        assert_eq!(EvalError::Http("boom".into()).kind(), ErrorKind::Inference);
        assert_eq!(
            EvalError::Inference("nan".into()).kind(),
            ErrorKind::Inference
        );
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::MissingImage).unwrap();
        assert_eq!(json, "\"missing_image\"");
    }
}
