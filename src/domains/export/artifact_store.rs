use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use uuid::Uuid;

use crate::domains::export::profiles;
use crate::domains::export::repository::ExportJobRegistry;
use crate::domains::export::types::*;
use crate::errors::DownloadError;

const STAGING_DIR: &str = ".staging";

/// Everything a route layer needs to stream one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactHandle {
    pub job_id: Uuid,
    pub path: PathBuf,
    pub mime_type: &'static str,
    pub byte_size: u64,
    pub file_name: String,
    pub checksum: String,
}

impl ArtifactHandle {
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.file_name)
    }

    /// Content-Type, Content-Disposition and Content-Length
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Content-Type", self.mime_type.to_string()),
            ("Content-Disposition", self.content_disposition()),
            ("Content-Length", self.byte_size.to_string()),
        ]
    }
}

/// `<dataSource>_export_<completion epoch millis>.<ext>`
pub fn download_file_name(data_source: DataSourceKey, format: ExportFormat, completed_at: DateTime<Utc>) -> String {
    format!(
        "{}_export_{}.{}",
        data_source,
        completed_at.timestamp_millis(),
        format.file_extension()
    )
}

/// On-disk layout: `<root>/<data_source>/<job_id>.<ext>`, staging under `<root>/.staging`
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    staging: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        std::fs::create_dir_all(&staging)?;
        log::info!("Export artifacts stored under {}", root.display());
        Ok(Self { root, staging })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    pub fn artifact_path(&self, job: &ExportJob) -> PathBuf {
        self.root
            .join(job.data_source.as_str())
            .join(format!("{}.{}", job.id, job.format.file_extension()))
    }

    /// Build a download handle for a Completed job
    pub fn handle_for(&self, job: &ExportJob) -> Result<ArtifactHandle, DownloadError> {
        let (Some(artifact), Some(completed_at)) = (job.artifact.as_ref(), job.completed_at) else {
            return Err(DownloadError::NotReady { job_id: job.id, status: job.status });
        };
        Ok(ArtifactHandle {
            job_id: job.id,
            path: artifact.path.clone(),
            mime_type: profiles::profile(job.format).mime_type,
            byte_size: job.byte_size.unwrap_or_default(),
            file_name: download_file_name(job.data_source, job.format, completed_at),
            checksum: artifact.checksum.clone(),
        })
    }

    /// Delete artifact files; missing files are fine
    pub async fn discard(&self, paths: &[PathBuf]) {
        for path in paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => log::debug!("Deleted export artifact {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to delete export artifact {}: {}", path.display(), e),
            }
        }
    }
}

fn discard_now(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Deleted deferred export artifact {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to delete export artifact {}: {}", path.display(), e),
    }
}

/// Holds a history entry's artifact in place while a download is streaming
pub struct DownloadLease {
    registry: Arc<ExportJobRegistry>,
    job_id: Uuid,
}

impl DownloadLease {
    pub fn acquire(registry: Arc<ExportJobRegistry>, job_id: Uuid) -> Option<Self> {
        registry
            .acquire_lease(job_id)
            .then(|| Self { registry, job_id })
    }
}

impl Drop for DownloadLease {
    fn drop(&mut self) {
        if let Some(path) = self.registry.release_lease(self.job_id) {
            discard_now(&path);
        }
    }
}

/// Artifact byte stream; the lease is released when the stream is dropped
pub struct ArtifactDownload {
    handle: ArtifactHandle,
    file: tokio::fs::File,
    _lease: DownloadLease,
}

impl ArtifactDownload {
    pub async fn open(handle: ArtifactHandle, lease: DownloadLease) -> Result<Self, DownloadError> {
        let file = tokio::fs::File::open(&handle.path)
            .await
            .map_err(|e| DownloadError::Unavailable { job_id: handle.job_id, reason: e.to_string() })?;
        Ok(Self { handle, file, _lease: lease })
    }

    pub fn handle(&self) -> &ArtifactHandle {
        &self.handle
    }
}

impl AsyncRead for ArtifactDownload {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_paths_follow_source_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        assert!(store.staging_dir().is_dir());

        let job = ExportJob::new(
            Uuid::new_v4(),
            DataSourceKey::Candidates,
            ExportFormat::Excel,
            Filters::new(),
            vec![],
            ExportOptions::default(),
        );
        let path = store.artifact_path(&job);
        assert_eq!(path, dir.path().join("candidates").join(format!("{}.xlsx", job.id)));
    }

    #[test]
    fn test_download_headers() {
        let completed_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let handle = ArtifactHandle {
            job_id: Uuid::nil(),
            path: PathBuf::from("/tmp/x.csv"),
            mime_type: "text/csv",
            byte_size: 120,
            file_name: download_file_name(DataSourceKey::Employees, ExportFormat::Csv, completed_at),
            checksum: String::new(),
        };
        assert_eq!(handle.file_name, "employees_export_1714564800000.csv");
        assert_eq!(
            handle.headers(),
            vec![
                ("Content-Type", "text/csv".to_string()),
                ("Content-Disposition", "attachment; filename=\"employees_export_1714564800000.csv\"".to_string()),
                ("Content-Length", "120".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_discard_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let present = dir.path().join("a.csv");
        std::fs::write(&present, b"x").unwrap();

        store.discard(&[present.clone(), dir.path().join("missing.csv")]).await;
        assert!(!present.exists());
    }
}
