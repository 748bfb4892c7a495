//! Error types for the Heddle pipeline.
//!
//! Step failures never surface through these types: the pipeline turns them
//! into [`RunStatus::Failed`](crate::RunStatus::Failed) on the run record.
//! What remains here are caller mistakes (unknown run, wrong status, bad
//! review decision), collaborator failures as seen from inside a step, and
//! storage failures.

use thiserror::Error;

use crate::RunStatus;

/// The main error type for Heddle operations.
///
/// This enum uses `#[non_exhaustive]` to allow adding new error variants
/// in the future without breaking backward compatibility.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HeddleError {
    /// Error occurred in the checkpoint store layer.
    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    /// A step could not complete.
    #[error("Step execution error: {0}")]
    StepExecution(String),

    /// No snapshot exists for the run.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// The run is not in a status that allows the requested operation.
    #[error("Run {run_id} is {status}, cannot {operation}")]
    InvalidTransition {
        /// The run identifier.
        run_id: String,
        /// The status the run was found in.
        status: RunStatus,
        /// The operation that was refused.
        operation: &'static str,
    },

    /// A review decision could not be interpreted.
    #[error("Invalid review decision: {0}")]
    InvalidDecision(String),

    /// An external collaborator call failed.
    #[error("External call failed: {0}")]
    External(String),

    /// The text-completion collaborator failed.
    #[error("Text completion failed: {0}")]
    Completion(String),

    /// Completion output held no usable structured payload.
    #[error("Could not extract structured data: {0}")]
    Extraction(String),

    /// Engine configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from file or database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error (for the SQLite checkpoint store).
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(String),
}

/// A specialized `Result` type for Heddle operations.
pub type Result<T> = std::result::Result<T, HeddleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_checkpoint() {
        let error = HeddleError::Checkpoint("connection failed".to_string());
        assert_eq!(error.to_string(), "Checkpoint store error: connection failed");
    }

    #[test]
    fn test_error_display_run_not_found() {
        let error = HeddleError::RunNotFound("run-123".to_string());
        assert_eq!(error.to_string(), "Run not found: run-123");
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let error = HeddleError::InvalidTransition {
            run_id: "run-1".to_string(),
            status: RunStatus::Succeeded,
            operation: "resume",
        };
        assert_eq!(error.to_string(), "Run run-1 is succeeded, cannot resume");
    }

    #[test]
    fn test_error_display_invalid_decision() {
        let error = HeddleError::InvalidDecision("maybe".to_string());
        assert_eq!(error.to_string(), "Invalid review decision: maybe");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let heddle_error: HeddleError = json_error.into();
        assert!(heddle_error.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_error_from_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let heddle_error: HeddleError = io_error.into();
        assert!(heddle_error.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_debug_format() {
        let error = HeddleError::Extraction("no array".to_string());
        let debug_output = format!("{:?}", error);
        assert!(debug_output.contains("Extraction"));
        assert!(debug_output.contains("no array"));
    }
}
