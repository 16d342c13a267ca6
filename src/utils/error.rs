//! Error Handling Module
//!
//! Defines the error taxonomy for the road anomaly classifier.
//! Uses thiserror for ergonomic error definitions.
//!
//! Errors fall into two scopes:
//! - **Request-scoped**: a single prediction failed (bad image, forward-pass failure).
//!   The caller reports it and keeps serving.
//! - **Process-scoped**: the model could not be brought up (missing or incompatible
//!   checkpoint, bad configuration, unavailable device). Startup must abort.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for road anomaly operations
#[derive(Error, Debug)]
pub enum RoadAnomalyError {
    /// The image could not be decoded or is unusable
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// The checkpoint file does not exist
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(PathBuf),

    /// The checkpoint does not match the constructed network
    #[error("Incompatible checkpoint '{path}': {reason}")]
    IncompatibleCheckpoint { path: PathBuf, reason: String },

    /// The forward pass failed
    #[error("Inference error: {0}")]
    InferenceExecution(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device/hardware error
    #[error("Device error: {0}")]
    Device(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RoadAnomalyError {
    /// Whether the failure only affects the current request.
    ///
    /// Everything else must prevent the service from reaching a ready state.
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            RoadAnomalyError::InvalidImage(_) | RoadAnomalyError::InferenceExecution(_)
        )
    }

    /// Shorthand for an incompatible checkpoint error
    pub fn incompatible(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RoadAnomalyError::IncompatibleCheckpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<image::ImageError> for RoadAnomalyError {
    fn from(err: image::ImageError) -> Self {
        RoadAnomalyError::InvalidImage(err.to_string())
    }
}

impl From<serde_json::Error> for RoadAnomalyError {
    fn from(err: serde_json::Error) -> Self {
        RoadAnomalyError::Serialization(err.to_string())
    }
}

impl From<safetensors::SafeTensorError> for RoadAnomalyError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        RoadAnomalyError::Serialization(err.to_string())
    }
}

/// Convenience Result type for road anomaly operations
pub type Result<T> = std::result::Result<T, RoadAnomalyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RoadAnomalyError::InvalidImage("truncated PNG".to_string());
        assert_eq!(format!("{}", err), "Invalid image: truncated PNG");
    }

    #[test]
    fn test_incompatible_checkpoint_display() {
        let err = RoadAnomalyError::incompatible("/models/best.safetensors", "shape mismatch");
        let msg = format!("{}", err);
        assert!(msg.contains("best.safetensors"));
        assert!(msg.contains("shape mismatch"));
    }

    #[test]
    fn test_error_scopes() {
        assert!(RoadAnomalyError::InvalidImage("x".into()).is_request_scoped());
        assert!(RoadAnomalyError::InferenceExecution("x".into()).is_request_scoped());
        assert!(!RoadAnomalyError::CheckpointNotFound(PathBuf::from("a")).is_request_scoped());
        assert!(!RoadAnomalyError::incompatible("a", "b").is_request_scoped());
        assert!(!RoadAnomalyError::Device("no gpu".into()).is_request_scoped());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RoadAnomalyError = io_err.into();
        assert!(matches!(err, RoadAnomalyError::Io(_)));
    }
}
