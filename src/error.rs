//! Error types for Satlift.

use serde::Serialize;
use thiserror::Error;

/// Satlift error type.
///
/// Variants map one-to-one onto the error classes surfaced at the process
/// boundary; `class()` yields the stable class and `user_report()` the
/// structured form handed to user-facing surfaces.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing input, rejected before a job is created
    #[error("validation error: {0}")]
    Validation(String),

    /// Copyleft-licensed model without a recorded acceptance
    #[error("license acceptance required for model '{0}'")]
    LicenseBlocked(String),

    /// Model environment is not Healthy
    #[error("model environment not ready: {0}")]
    EnvironmentNotReady(String),

    /// Checksum mismatch on downloaded artifacts
    #[error("integrity error for {artifact}: expected sha256 {expected}, got {actual}")]
    Integrity {
        artifact: String,
        expected: String,
        actual: String,
    },

    /// Out-of-memory class failure reported by a model runtime
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Adapter-reported inference failure
    #[error("execution failure: {0}")]
    Execution(String),

    /// User-initiated cancellation; not a failure
    #[error("cancelled")]
    Cancelled,

    /// Registry catalog problem (missing model, malformed entry)
    #[error("registry error: {0}")]
    Registry(String),

    /// Download / manifest transport error
    #[error("network error: {0}")]
    Network(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Satlift operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error classes; the CLI maps these onto exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorClass {
    Validation,
    LicenseBlocked,
    EnvironmentNotReady,
    Integrity,
    ResourceExhausted,
    Execution,
    Cancelled,
    Internal,
}

/// Structured, user-facing rendering of an error.
///
/// Boundary surfaces (CLI, GUI, run report) show this instead of internal
/// traces; the full error chain stays in the log.
#[derive(Debug, Clone, Serialize)]
pub struct UserReport {
    pub title: String,
    pub summary: String,
    pub suggested_fixes: Vec<String>,
    pub code: String,
    pub can_retry: bool,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation(_) => ErrorClass::Validation,
            Error::LicenseBlocked(_) => ErrorClass::LicenseBlocked,
            Error::EnvironmentNotReady(_) => ErrorClass::EnvironmentNotReady,
            Error::Integrity { .. } => ErrorClass::Integrity,
            Error::ResourceExhausted(_) => ErrorClass::ResourceExhausted,
            Error::Execution(_) => ErrorClass::Execution,
            Error::Cancelled => ErrorClass::Cancelled,
            Error::Registry(_) => ErrorClass::Validation,
            Error::Network(_) | Error::Io(_) | Error::Json(_) => ErrorClass::Internal,
        }
    }

    pub fn user_report(&self) -> UserReport {
        match self {
            Error::Validation(message) | Error::Registry(message) => UserReport {
                title: "Invalid request".into(),
                summary: message.clone(),
                suggested_fixes: vec!["Check the inputs and options and try again.".into()],
                code: "VAL-001".into(),
                can_retry: true,
            },
            Error::LicenseBlocked(model) => UserReport {
                title: "License acceptance required".into(),
                summary: format!(
                    "Model '{model}' has an optional copyleft license that must be accepted before installation."
                ),
                suggested_fixes: vec![
                    format!("Review the model license and run `satlift accept-license {model}`."),
                    "Choose a permissively licensed model instead.".into(),
                ],
                code: "MODEL-004".into(),
                can_retry: false,
            },
            Error::EnvironmentNotReady(message) => UserReport {
                title: "Model not ready".into(),
                summary: message.clone(),
                suggested_fixes: vec!["Install and verify the model, then retry the run.".into()],
                code: "ENV-001".into(),
                can_retry: true,
            },
            Error::Integrity { artifact, .. } => UserReport {
                title: "Download integrity check failed".into(),
                summary: format!("'{artifact}' did not match the expected checksum."),
                suggested_fixes: vec![
                    "Retry the download.".into(),
                    "Verify the network connection and try again.".into(),
                ],
                code: "MODEL-002".into(),
                can_retry: true,
            },
            Error::ResourceExhausted(message) => UserReport {
                title: "Out of memory".into(),
                summary: message.clone(),
                suggested_fixes: vec![
                    "Enable tiling or choose a smaller tile size.".into(),
                    "Close other applications and retry.".into(),
                ],
                code: "RUN-002".into(),
                can_retry: true,
            },
            Error::Execution(message) => UserReport {
                title: "Model inference failed".into(),
                summary: message.clone(),
                suggested_fixes: vec![
                    "Check the model log for details.".into(),
                    "Re-verify the model environment and retry.".into(),
                ],
                code: "MODEL-010".into(),
                can_retry: true,
            },
            Error::Cancelled => UserReport {
                title: "Run cancelled".into(),
                summary: "The run was cancelled before it completed.".into(),
                suggested_fixes: Vec::new(),
                code: "RUN-000".into(),
                can_retry: true,
            },
            Error::Network(message) => UserReport {
                title: "Network error".into(),
                summary: message.clone(),
                suggested_fixes: vec!["Check the network connection and try again.".into()],
                code: "NET-001".into(),
                can_retry: true,
            },
            Error::Io(err) => UserReport {
                title: "File access failed".into(),
                summary: err.to_string(),
                suggested_fixes: vec!["Verify the file still exists and is readable.".into()],
                code: "IO-001".into(),
                can_retry: true,
            },
            Error::Json(err) => UserReport {
                title: "Malformed data".into(),
                summary: err.to_string(),
                suggested_fixes: vec![
                    "Check the file for manual edits and restore a valid copy.".into(),
                ],
                code: "IO-003".into(),
                can_retry: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_license_blocked_class() {
        let err = Error::LicenseBlocked("SenGLEAN".into());
        assert_eq!(err.class(), ErrorClass::LicenseBlocked);
        assert!(!err.user_report().can_retry);
    }

    #[test]
    fn test_cancelled_is_not_a_failure_report() {
        let report = Error::Cancelled.user_report();
        assert_eq!(report.code, "RUN-000");
        assert!(report.suggested_fixes.is_empty());
    }

    #[test]
    fn test_io_maps_to_internal() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert_eq!(err.class(), ErrorClass::Internal);
    }
}
