use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::domains::export::profiles;
use crate::domains::export::record::{resolve_fields, Record};
use crate::domains::export::types::*;

/// Rows processed between cancellation checks
pub const CHECKPOINT_INTERVAL: usize = 500;

/// Cooperative cancellation shared between the scheduler and a running encoder
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), ExportError> {
        if self.is_cancelled() {
            Err(ExportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Anything an encoder can write into. Archive-based formats need `Seek`.
pub trait ArtifactSink: Write + Seek {}

impl<T: Write + Seek> ArtifactSink for T {}

/// Everything an encoder needs to know about the job it is serving
#[derive(Debug, Clone)]
pub struct EncodeContext {
    pub job_id: Uuid,
    pub data_source: DataSourceKey,
    pub format: ExportFormat,
    pub filters: Filters,
    /// Resolved column list; never empty when rows exist
    pub fields: Vec<String>,
    pub options: ExportOptions,
    pub exported_at: DateTime<Utc>,
    pub cancel: CancellationFlag,
    /// Bundles skip the spreadsheet above this row count
    pub bundle_spreadsheet_threshold: usize,
}

impl EncodeContext {
    pub fn for_job(job: &ExportJob, rows: &[Record], cancel: CancellationFlag, bundle_spreadsheet_threshold: usize) -> Self {
        Self {
            job_id: job.id,
            data_source: job.data_source,
            format: job.format,
            filters: job.filters.clone(),
            fields: resolve_fields(&job.fields, rows),
            options: job.options.clone(),
            exported_at: Utc::now(),
            cancel,
            bundle_spreadsheet_threshold,
        }
    }

    /// Same job, different output format (bundle steps)
    pub fn with_format(&self, format: ExportFormat) -> Self {
        Self { format, ..self.clone() }
    }

    /// Called from row loops; checks the cancel flag every `CHECKPOINT_INTERVAL` rows
    pub fn checkpoint(&self, row_index: usize) -> Result<(), ExportError> {
        if row_index % CHECKPOINT_INTERVAL == 0 {
            self.cancel.check()?;
        }
        Ok(())
    }
}

/// Strategy turning rows into one artifact format.
///
/// Implementations are stateless and blocking; the scheduler runs them on the
/// blocking pool. They return the number of records written.
pub trait FormatEncoder: Send + Sync {
    fn format(&self) -> ExportFormat;

    fn write_rows(
        &self,
        ctx: &EncodeContext,
        rows: &[Record],
        sink: &mut dyn ArtifactSink,
    ) -> Result<usize, ExportError>;
}

pub fn check_record_limit(format: ExportFormat, count: usize) -> Result<(), ExportError> {
    let limit = profiles::max_records(format);
    if count > limit {
        return Err(ExportError::RecordLimitExceeded { format, limit, actual: count });
    }
    Ok(())
}

/// Encode into a staging file and publish it at `final_path` only on success.
///
/// The staging file is removed when anything fails, including a cancellation
/// raised after the encoder returned but before the rename.
pub fn encode_to_file(
    ctx: &EncodeContext,
    rows: &[Record],
    staging_dir: &Path,
    final_path: &Path,
) -> Result<EncodedArtifact, ExportError> {
    check_record_limit(ctx.format, rows.len())?;
    let start = Instant::now();

    let mut staged = NamedTempFile::new_in(staging_dir)?;
    let records_written = {
        let mut writer = BufWriter::new(staged.as_file_mut());
        let n = profiles::encoder_for(ctx.format).write_rows(ctx, rows, &mut writer)?;
        writer.flush()?;
        n
    };
    staged.as_file().sync_all()?;

    ctx.cancel.check()?;

    let checksum = file_checksum(staged.path())?;
    let bytes_written = staged.as_file().metadata()?.len();

    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    staged
        .persist(final_path)
        .map_err(|e| ExportError::Io(format!("failed to publish artifact: {}", e.error)))?;

    log::debug!(
        "Encoded {} {} records for job {} into {} ({} bytes)",
        records_written,
        ctx.format,
        ctx.job_id,
        final_path.display(),
        bytes_written
    );

    Ok(EncodedArtifact {
        artifact: ArtifactRef { path: final_path.to_path_buf(), checksum },
        stats: ExportStats {
            records_written,
            bytes_written,
            duration_ms: start.elapsed().as_millis() as u64,
        },
    })
}

/// Encode fully in memory, used by previews and tests
pub fn encode_to_vec(ctx: &EncodeContext, rows: &[Record]) -> Result<(Vec<u8>, ExportStats), ExportError> {
    check_record_limit(ctx.format, rows.len())?;
    let start = Instant::now();

    let mut cursor = Cursor::new(Vec::new());
    let records_written = profiles::encoder_for(ctx.format).write_rows(ctx, rows, &mut cursor)?;
    let bytes = cursor.into_inner();

    let stats = ExportStats {
        records_written,
        bytes_written: bytes.len() as u64,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    Ok((bytes, stats))
}

/// Hex SHA-256 of a file
pub fn file_checksum(path: &Path) -> Result<String, ExportError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use serde_json::json;

    pub fn employees(n: usize) -> Vec<Record> {
        (1..=n)
            .map(|i| {
                json!({
                    "id": i,
                    "name": format!("Employee {}", i),
                    "email": format!("employee{}@example.com", i),
                    "salary": 50_000 + (i as i64) * 1_000,
                })
                .as_object()
                .cloned()
                .unwrap()
            })
            .collect()
    }

    pub fn context(format: ExportFormat, fields: &[&str], rows: &[Record]) -> EncodeContext {
        let job = ExportJob::new(
            Uuid::new_v4(),
            DataSourceKey::Employees,
            format,
            Filters::new(),
            fields.iter().map(|f| f.to_string()).collect(),
            ExportOptions::default(),
        );
        EncodeContext::for_job(&job, rows, CancellationFlag::new(), 10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_limit_rejected_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let rows = employees(3);
        let ctx = context(ExportFormat::Pdf, &[], &rows);
        let err = check_record_limit(ExportFormat::Pdf, 20_000).unwrap_err();
        assert!(matches!(err, ExportError::RecordLimitExceeded { limit: 10_000, actual: 20_000, .. }));

        let final_path = dir.path().join("out.pdf");
        let too_many = employees(10_001);
        let err = encode_to_file(&ctx, &too_many, dir.path(), &final_path).unwrap_err();
        assert!(matches!(err, ExportError::RecordLimitExceeded { .. }));
        assert!(!final_path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_encode_to_file_publishes_with_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let rows = employees(3);
        let ctx = context(ExportFormat::Csv, &["id", "email"], &rows);
        let final_path = dir.path().join("employees").join("job.csv");

        let encoded = encode_to_file(&ctx, &rows, dir.path(), &final_path).unwrap();
        assert_eq!(encoded.stats.records_written, 3);
        assert_eq!(encoded.stats.bytes_written, std::fs::metadata(&final_path).unwrap().len());
        assert_eq!(encoded.artifact.checksum, file_checksum(&final_path).unwrap());
        assert_eq!(encoded.artifact.checksum.len(), 64);
    }

    #[test]
    fn test_cancelled_encode_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let rows = employees(10);
        let ctx = context(ExportFormat::Json, &[], &rows);
        ctx.cancel.cancel();
        let final_path = dir.path().join("out.json");

        let err = encode_to_file(&ctx, &rows, dir.path(), &final_path).unwrap_err();
        assert_eq!(err, ExportError::Cancelled);
        assert!(!final_path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
