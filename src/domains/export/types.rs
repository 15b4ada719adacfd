use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::ValidationError;

/// Opaque filter map, passed through to the data source untouched
pub type Filters = serde_json::Map<String, serde_json::Value>;

/// Export formats supported by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Excel,
    Pdf,
    Json,
    Xml,
    Zip,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 6] = [
        ExportFormat::Csv,
        ExportFormat::Excel,
        ExportFormat::Pdf,
        ExportFormat::Json,
        ExportFormat::Xml,
        ExportFormat::Zip,
    ];

    /// Parse the wire key (`csv|excel|pdf|json|xml|zip`)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "excel" => Some(ExportFormat::Excel),
            "pdf" => Some(ExportFormat::Pdf),
            "json" => Some(ExportFormat::Json),
            "xml" => Some(ExportFormat::Xml),
            "zip" => Some(ExportFormat::Zip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "excel",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Json => "json",
            ExportFormat::Xml => "xml",
            ExportFormat::Zip => "zip",
        }
    }

    /// Get file extension for this format
    pub fn file_extension(&self) -> &'static str {
        crate::domains::export::profiles::profile(*self).extension
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys of the static data source registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKey {
    Employees,
    Candidates,
    Jobs,
    Applications,
    Interviews,
    Assessments,
    Offers,
    Onboarding,
}

impl DataSourceKey {
    pub const ALL: [DataSourceKey; 8] = [
        DataSourceKey::Employees,
        DataSourceKey::Candidates,
        DataSourceKey::Jobs,
        DataSourceKey::Applications,
        DataSourceKey::Interviews,
        DataSourceKey::Assessments,
        DataSourceKey::Offers,
        DataSourceKey::Onboarding,
    ];

    /// Parse a source key, ignoring case like `ExportFormat::parse`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|key| key.as_str().eq_ignore_ascii_case(value))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceKey::Employees => "employees",
            DataSourceKey::Candidates => "candidates",
            DataSourceKey::Jobs => "jobs",
            DataSourceKey::Applications => "applications",
            DataSourceKey::Interviews => "interviews",
            DataSourceKey::Assessments => "assessments",
            DataSourceKey::Offers => "offers",
            DataSourceKey::Onboarding => "onboarding",
        }
    }

    /// Human readable title used in document headers
    pub fn title(&self) -> &'static str {
        match self {
            DataSourceKey::Employees => "Employees",
            DataSourceKey::Candidates => "Candidates",
            DataSourceKey::Jobs => "Jobs",
            DataSourceKey::Applications => "Applications",
            DataSourceKey::Interviews => "Interviews",
            DataSourceKey::Assessments => "Assessments",
            DataSourceKey::Offers => "Offers",
            DataSourceKey::Onboarding => "Onboarding",
        }
    }
}

impl std::fmt::Display for DataSourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSize {
    #[default]
    A4,
    Letter,
    Legal,
}

impl PageSize {
    /// Portrait dimensions in PDF points
    pub fn dimensions(&self) -> (f32, f32) {
        match self {
            PageSize::A4 => (595.0, 842.0),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpreadsheetFormatting {
    pub auto_width: bool,
}

/// Format-specific options; unknown keys are ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportOptions {
    // delimited text
    pub include_headers: Option<bool>,
    pub delimiter: Option<String>,
    pub quote: Option<String>,
    pub escape: Option<String>,
    // spreadsheet
    pub formatting: SpreadsheetFormatting,
    pub include_metadata: bool,
    pub include_summary: bool,
    // document
    pub page_size: Option<PageSize>,
    pub orientation: Option<Orientation>,
    // structured record
    pub pretty: bool,
    // any format
    pub limit: Option<usize>,
    pub preview: bool,
}

impl ExportOptions {
    pub fn include_headers(&self) -> bool {
        self.include_headers.unwrap_or(true)
    }

    pub fn delimiter_byte(&self) -> Result<u8, ValidationError> {
        single_ascii("delimiter", self.delimiter.as_deref(), b',')
    }

    pub fn quote_byte(&self) -> Result<u8, ValidationError> {
        single_ascii("quote", self.quote.as_deref(), b'"')
    }

    pub fn escape_byte(&self) -> Result<Option<u8>, ValidationError> {
        match self.escape.as_deref() {
            None | Some("") => Ok(None),
            Some(value) => single_ascii("escape", Some(value), b'\\').map(Some),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.delimiter_byte()?;
        self.quote_byte()?;
        self.escape_byte()?;
        if self.limit == Some(0) {
            return Err(ValidationError::invalid_option("limit", "must be greater than zero"));
        }
        Ok(())
    }
}

fn single_ascii(option: &str, value: Option<&str>, default: u8) -> Result<u8, ValidationError> {
    match value {
        None => Ok(default),
        Some(s) => match s.as_bytes() {
            [b] if *b == b'\t' || (b.is_ascii() && !b.is_ascii_control()) => Ok(*b),
            _ => Err(ValidationError::invalid_option(option, "must be a single ASCII character")),
        },
    }
}

/// Submission payload as it arrives from the route layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportRequest {
    pub data_source: String,
    pub format: String,
    pub filters: Filters,
    pub fields: Vec<String>,
    pub options: ExportOptions,
}

/// Export job statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Completed | ExportStatus::Failed | ExportStatus::Cancelled)
    }

    /// Monotonic lifecycle; nothing ever moves back into `Queued`
    pub fn can_transition_to(&self, next: ExportStatus) -> bool {
        matches!(
            (self, next),
            (ExportStatus::Queued, ExportStatus::Processing)
                | (ExportStatus::Queued, ExportStatus::Cancelled)
                | (ExportStatus::Processing, ExportStatus::Completed)
                | (ExportStatus::Processing, ExportStatus::Failed)
                | (ExportStatus::Processing, ExportStatus::Cancelled)
        )
    }
}

/// Comprehensive error types for export operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum ExportError {
    /// Row count exceeds the format's ceiling
    RecordLimitExceeded {
        format: ExportFormat,
        limit: usize,
        actual: usize,
    },
    /// Encoder failed for a reason of its own
    EncoderFault(String),
    /// Execution deadline elapsed
    Timeout { timeout_ms: u64 },
    /// Cancelled by user
    Cancelled,
    /// I/O related errors
    Io(String),
    /// Serialization errors
    Serialization(String),
    /// The data source could not supply rows
    DataSource(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::RecordLimitExceeded { format, limit, actual } => write!(
                f,
                "Record limit exceeded: {} export allows {} records, got {}",
                format, limit, actual
            ),
            ExportError::EncoderFault(msg) => write!(f, "Encoder fault: {}", msg),
            ExportError::Timeout { timeout_ms } => write!(f, "Export timed out after {} ms", timeout_ms),
            ExportError::Cancelled => write!(f, "Operation cancelled"),
            ExportError::Io(msg) => write!(f, "I/O error: {}", msg),
            ExportError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ExportError::DataSource(msg) => write!(f, "Data source error: {}", msg),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io(err.to_string())
    }
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

impl From<zip::result::ZipError> for ExportError {
    fn from(err: zip::result::ZipError) -> Self {
        ExportError::EncoderFault(format!("zip: {}", err))
    }
}

/// Export statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStats {
    pub records_written: usize,
    pub bytes_written: u64,
    pub duration_ms: u64,
}

/// Reference to a published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub checksum: String,
}

/// Output of a successful encode, as handed back to the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedArtifact {
    pub artifact: ArtifactRef,
    pub stats: ExportStats,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Illegal transition for export {job_id}: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub job_id: Uuid,
    pub from: ExportStatus,
    pub to: ExportStatus,
}

/// The unit of work, from submission to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub data_source: DataSourceKey,
    pub format: ExportFormat,
    pub filters: Filters,
    pub fields: Vec<String>,
    pub options: ExportOptions,
    pub status: ExportStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<ExportError>,
    pub artifact: Option<ArtifactRef>,
    pub record_count: Option<usize>,
    pub byte_size: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    pub fn new(
        owner_id: Uuid,
        data_source: DataSourceKey,
        format: ExportFormat,
        filters: Filters,
        fields: Vec<String>,
        options: ExportOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            data_source,
            format,
            filters,
            fields,
            options,
            status: ExportStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            artifact: None,
            record_count: None,
            byte_size: None,
            expires_at: None,
        }
    }

    fn transition(&mut self, to: ExportStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError { job_id: self.id, from: self.status, to });
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ExportStatus::Processing)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        encoded: EncodedArtifact,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(ExportStatus::Completed)?;
        self.completed_at = Some(now);
        self.record_count = Some(encoded.stats.records_written);
        self.byte_size = Some(encoded.stats.bytes_written);
        self.artifact = Some(encoded.artifact);
        self.expires_at = Some(expires_at);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: ExportError, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ExportStatus::Failed)?;
        self.completed_at = Some(now);
        self.error = Some(error);
        Ok(())
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ExportStatus::Cancelled)?;
        self.completed_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job() -> ExportJob {
        ExportJob::new(
            Uuid::new_v4(),
            DataSourceKey::Employees,
            ExportFormat::Csv,
            Filters::new(),
            vec![],
            ExportOptions::default(),
        )
    }

    fn artifact() -> EncodedArtifact {
        EncodedArtifact {
            artifact: ArtifactRef { path: PathBuf::from("/tmp/a.csv"), checksum: "00".into() },
            stats: ExportStats { records_written: 3, bytes_written: 42, duration_ms: 1 },
        }
    }

    #[test]
    fn test_format_and_source_parsing() {
        assert_eq!(ExportFormat::parse("CSV"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("excel"), Some(ExportFormat::Excel));
        assert_eq!(ExportFormat::parse("docx"), None);
        assert_eq!(DataSourceKey::parse("employees"), Some(DataSourceKey::Employees));
        assert_eq!(DataSourceKey::parse("payroll"), None);
    }

    #[test]
    fn test_source_keys_ignore_case_like_formats() {
        assert_eq!(DataSourceKey::parse("Employees"), Some(DataSourceKey::Employees));
        assert_eq!(DataSourceKey::parse(" OFFERS "), Some(DataSourceKey::Offers));
        assert_eq!(ExportFormat::parse(" Pdf "), Some(ExportFormat::Pdf));
        assert_eq!(DataSourceKey::parse("employee"), None);
    }

    #[test]
    fn test_completed_job_carries_artifact_and_expiry() {
        let mut job = job();
        let now = Utc::now();
        job.mark_processing(now).unwrap();
        assert!(job.artifact.is_none());
        assert!(job.expires_at.is_none());

        job.mark_completed(artifact(), now, now + Duration::days(7)).unwrap();
        assert_eq!(job.status, ExportStatus::Completed);
        assert_eq!(job.record_count, Some(3));
        assert_eq!(job.byte_size, Some(42));
        assert!(job.artifact.is_some());
        assert_eq!(job.expires_at, Some(now + Duration::days(7)));
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let mut job = job();
        let now = Utc::now();
        assert!(job.mark_completed(artifact(), now, now + Duration::days(1)).is_err());
        job.mark_processing(now).unwrap();
        assert!(job.mark_processing(now).is_err());
        job.mark_failed(ExportError::EncoderFault("boom".into()), now).unwrap();
        assert!(job.error.is_some());
        assert!(job.artifact.is_none());
        assert!(job.mark_cancelled(now).is_err());

        for status in [
            ExportStatus::Queued,
            ExportStatus::Processing,
            ExportStatus::Completed,
            ExportStatus::Failed,
            ExportStatus::Cancelled,
        ] {
            assert!(!status.can_transition_to(ExportStatus::Queued));
        }
    }

    #[test]
    fn test_option_validation() {
        let mut options = ExportOptions::default();
        assert_eq!(options.delimiter_byte().unwrap(), b',');
        options.delimiter = Some(";".into());
        assert_eq!(options.delimiter_byte().unwrap(), b';');
        options.delimiter = Some("\t".into());
        assert_eq!(options.delimiter_byte().unwrap(), b'\t');
        options.delimiter = Some("::".into());
        assert!(options.validate().is_err());

        let options = ExportOptions { limit: Some(0), ..Default::default() };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_options_deserialize_from_camel_case() {
        let options: ExportOptions = serde_json::from_value(serde_json::json!({
            "includeHeaders": false,
            "formatting": { "autoWidth": true },
            "includeSummary": true,
            "pageSize": "Letter",
            "orientation": "landscape",
            "unknownKey": 1
        }))
        .unwrap();
        assert!(!options.include_headers());
        assert!(options.formatting.auto_width);
        assert!(options.include_summary);
        assert_eq!(options.page_size, Some(PageSize::Letter));
        assert_eq!(options.orientation, Some(Orientation::Landscape));
    }
}
