use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domains::export::types::{ExportError, ExportStatus};

/// Admission errors, surfaced synchronously before a job exists
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationError {
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("Unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("Option '{option}' contains an invalid value: {reason}")]
    InvalidOption {
        option: String,
        reason: String,
    },
}

impl ValidationError {
    pub fn invalid_option(option: &str, reason: &str) -> Self {
        Self::InvalidOption {
            option: option.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Download authorization errors; never change job state
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum DownloadError {
    #[error("Export job not found: {0}")]
    NotFound(Uuid),

    #[error("Requester is not allowed to download export {0}")]
    Forbidden(Uuid),

    #[error("Export {job_id} is not ready for download (status: {status:?})")]
    NotReady {
        job_id: Uuid,
        status: ExportStatus,
    },

    #[error("Export {job_id} expired at {expired_at}")]
    Expired {
        job_id: Uuid,
        expired_at: DateTime<Utc>,
    },

    #[error("Artifact for export {job_id} could not be opened: {reason}")]
    Unavailable {
        job_id: Uuid,
        reason: String,
    },
}

/// Service-level errors for the export facade
#[derive(Debug, Error, Clone, Serialize)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Export job not found: {0}")]
    NotFound(Uuid),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::UnsupportedFormat("docx".to_string());
        assert_eq!(err.to_string(), "Unsupported export format: docx");

        let err = ValidationError::invalid_option("delimiter", "must be a single ASCII character");
        assert!(err.to_string().contains("delimiter"));
    }

    #[test]
    fn test_service_error_wraps_download_error() {
        let id = Uuid::new_v4();
        let err: ServiceError = DownloadError::Forbidden(id).into();
        assert!(matches!(err, ServiceError::Download(DownloadError::Forbidden(x)) if x == id));
    }
}
