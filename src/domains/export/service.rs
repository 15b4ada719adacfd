use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task;
use uuid::Uuid;

use crate::domains::export::artifact_store::{ArtifactDownload, ArtifactHandle, ArtifactStore, DownloadLease};
use crate::domains::export::config::ExportConfig;
use crate::domains::export::data_source::DataSource;
use crate::domains::export::profiles;
use crate::domains::export::queue_manager::{ExportQueueManager, JobHandle, JobProcessor, QueueStats};
use crate::domains::export::reaper::{ExpiryReaper, ReapReport, ReaperHandle};
use crate::domains::export::repository::{CancelOutcome, ExportJobRegistry};
use crate::domains::export::tracker::{HistoryFilter, JobStatusView, JobSummary, StatusTracker};
use crate::domains::export::types::*;
use crate::domains::export::validator::validate_request;
use crate::domains::export::writer::{encode_to_file, encode_to_vec, CancellationFlag, EncodeContext};
use crate::errors::{DownloadError, DownloadResult, ServiceError, ServiceResult, ValidationError};

/// In-memory rendering of a request; nothing is queued or stored
#[derive(Debug, Clone)]
pub struct ExportPreview {
    pub format: ExportFormat,
    pub mime_type: &'static str,
    pub record_count: usize,
    pub content: Vec<u8>,
}

/// What `export` did with a request
pub enum ExportSubmission {
    Queued(JobHandle),
    Preview(ExportPreview),
}

/// Public entry point of the export pipeline.
///
/// Owns the registry, the scheduler, the artifact store and the reaper; none
/// of them are process globals.
pub struct ExportService {
    config: ExportConfig,
    data_source: Arc<dyn DataSource>,
    registry: Arc<ExportJobRegistry>,
    artifacts: ArtifactStore,
    tracker: StatusTracker,
    reaper: ExpiryReaper,
    queue: Arc<ExportQueueManager>,
    runtime: Handle,
}

impl ExportService {
    /// Must be called from within a tokio runtime; jobs run on that runtime.
    pub fn new(config: ExportConfig, data_source: Arc<dyn DataSource>) -> ServiceResult<Arc<Self>> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| ServiceError::Configuration(format!("export service needs a tokio runtime: {}", e)))?;
        let artifacts = ArtifactStore::new(&config.storage_dir).map_err(|e| {
            ServiceError::Configuration(format!(
                "cannot prepare export storage at {}: {}",
                config.storage_dir.display(),
                e
            ))
        })?;
        let registry = Arc::new(ExportJobRegistry::new(config.retention, config.history_limit_per_owner));

        Ok(Arc::new_cyclic(|weak_self| {
            let job_processor = weak_self.clone() as Weak<dyn JobProcessor>;
            let queue = Arc::new(ExportQueueManager::new(
                Arc::clone(&registry),
                artifacts.clone(),
                config.max_concurrent_exports,
                config.export_timeout,
                runtime.clone(),
                job_processor,
            ));
            Self {
                tracker: StatusTracker::new(Arc::clone(&registry), config.download_base_path.clone()),
                reaper: ExpiryReaper::new(Arc::clone(&registry), artifacts.clone()),
                config,
                data_source,
                registry,
                artifacts,
                queue,
                runtime,
            }
        }))
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Validate and queue. Returns as soon as the job is registered.
    pub fn submit(&self, owner_id: Uuid, request: ExportRequest) -> Result<Uuid, ValidationError> {
        self.submit_tracked(owner_id, request).map(|handle| handle.id)
    }

    /// Like `submit`, but hands back a handle that can await the outcome
    pub fn submit_tracked(&self, owner_id: Uuid, request: ExportRequest) -> Result<JobHandle, ValidationError> {
        let validated = validate_request(&request)?;
        Ok(self.queue.enqueue(validated.into_job(owner_id)))
    }

    /// Route a request by its `preview` option
    pub async fn export(&self, owner_id: Uuid, request: ExportRequest) -> ServiceResult<ExportSubmission> {
        if request.options.preview {
            return Ok(ExportSubmission::Preview(self.preview(owner_id, request).await?));
        }
        Ok(ExportSubmission::Queued(self.submit_tracked(owner_id, request)?))
    }

    /// Encode at most `preview_row_cap` rows in memory
    pub async fn preview(&self, owner_id: Uuid, request: ExportRequest) -> ServiceResult<ExportPreview> {
        let validated = validate_request(&request)?;
        let job = validated.into_job(owner_id);
        log::debug!("Previewing {} export of {} for {}", job.format, job.data_source, owner_id);

        let mut rows = self
            .data_source
            .fetch(job.data_source, &job.filters, &job.fields)
            .await
            .map_err(ExportError::from)?;
        let cap = job
            .options
            .limit
            .map_or(self.config.preview_row_cap, |limit| limit.min(self.config.preview_row_cap));
        rows.truncate(cap);

        let ctx = EncodeContext::for_job(&job, &rows, CancellationFlag::new(), self.config.bundle_spreadsheet_threshold);
        let (content, stats) = task::spawn_blocking(move || encode_to_vec(&ctx, &rows))
            .await
            .map_err(|e| ServiceError::InternalError(format!("preview task failed: {}", e)))??;

        Ok(ExportPreview {
            format: job.format,
            mime_type: profiles::profile(job.format).mime_type,
            record_count: stats.records_written,
            content,
        })
    }

    /// Queued jobs become Cancelled at once; processing jobs stop at their
    /// next checkpoint. Returns the status right after the request.
    pub async fn cancel(&self, job_id: Uuid, requester: Uuid) -> ServiceResult<ExportStatus> {
        match self.registry.cancel(job_id, requester, Utc::now())? {
            CancelOutcome::Cancelled { discard } => {
                log::info!("Cancelled queued export {}", job_id);
                self.artifacts.discard(&discard).await;
                Ok(ExportStatus::Cancelled)
            }
            CancelOutcome::Requested => {
                log::info!("Cancellation requested for running export {}", job_id);
                Ok(ExportStatus::Processing)
            }
        }
    }

    pub fn get_status(&self, job_id: Uuid) -> ServiceResult<JobStatusView> {
        self.tracker
            .status(job_id, Utc::now())
            .ok_or(ServiceError::NotFound(job_id))
    }

    pub fn get_history(&self, owner_id: Uuid, filter: &HistoryFilter) -> Vec<JobSummary> {
        self.tracker.history(owner_id, filter)
    }

    pub fn subscribe(&self, job_id: Uuid) -> Option<JobHandle> {
        self.registry
            .subscribe(job_id)
            .map(|rx| JobHandle::new(job_id, rx))
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn authorize_download(&self, job_id: Uuid, requester: Uuid) -> DownloadResult<ArtifactHandle> {
        self.authorize_download_at(job_id, requester, Utc::now())
    }

    pub fn authorize_download_at(
        &self,
        job_id: Uuid,
        requester: Uuid,
        now: DateTime<Utc>,
    ) -> DownloadResult<ArtifactHandle> {
        let job = self.registry.authorize_download(job_id, requester, now)?;
        self.artifacts.handle_for(&job)
    }

    /// Authorize and open the artifact as a byte stream
    pub async fn open_download(&self, job_id: Uuid, requester: Uuid) -> DownloadResult<ArtifactDownload> {
        let handle = self.authorize_download(job_id, requester)?;
        let lease = DownloadLease::acquire(Arc::clone(&self.registry), job_id).ok_or(DownloadError::NotFound(job_id))?;
        ArtifactDownload::open(handle, lease).await
    }

    /// Owner-initiated removal of a finished export and its artifact
    pub async fn delete_export(&self, job_id: Uuid, requester: Uuid) -> ServiceResult<()> {
        if let Some(path) = self.registry.remove(job_id, requester)? {
            self.artifacts.discard(&[path]).await;
        }
        log::info!("Deleted export {}", job_id);
        Ok(())
    }

    pub async fn reap_expired(&self) -> ReapReport {
        self.reap_expired_at(Utc::now()).await
    }

    pub async fn reap_expired_at(&self, now: DateTime<Utc>) -> ReapReport {
        self.reaper.run_once(now).await
    }

    /// Background sweep every `reaper_interval`
    pub fn start_reaper(&self) -> ReaperHandle {
        ReaperHandle::spawn(self.reaper.clone(), self.config.reaper_interval, &self.runtime)
    }
}

#[async_trait]
impl JobProcessor for ExportService {
    async fn process(&self, job: ExportJob, cancel: CancellationFlag) -> Result<EncodedArtifact, ExportError> {
        let mut rows = self
            .data_source
            .fetch(job.data_source, &job.filters, &job.fields)
            .await?;
        if let Some(limit) = job.options.limit {
            rows.truncate(limit);
        }
        cancel.check()?;
        log::debug!("Fetched {} rows for export {}", rows.len(), job.id);

        let ctx = EncodeContext::for_job(&job, &rows, cancel, self.config.bundle_spreadsheet_threshold);
        let staging = self.artifacts.staging_dir().to_path_buf();
        let final_path = self.artifacts.artifact_path(&job);

        task::spawn_blocking(move || encode_to_file(&ctx, &rows, &staging, &final_path))
            .await
            .map_err(|e| ExportError::EncoderFault(format!("encoder task failed: {}", e)))?
    }
}
