mod error;

pub use error::{DownloadError, ServiceError, ValidationError};

/// Result type for facade operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for download authorization
pub type DownloadResult<T> = Result<T, DownloadError>;
