use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domains::export::profiles;
use crate::domains::export::repository::{ExportJobRegistry, HistoryEntry};
use crate::domains::export::types::*;

/// Status response as served to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: ExportStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
}

/// One row of an owner's export history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: Uuid,
    pub data_source: DataSourceKey,
    pub format: ExportFormat,
    pub status: ExportStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub record_count: Option<usize>,
    pub byte_size: Option<u64>,
    pub download_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub download_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryFilter {
    pub status: Option<ExportStatus>,
    pub data_source: Option<DataSourceKey>,
    pub format: Option<ExportFormat>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    fn matches(&self, job: &ExportJob) -> bool {
        self.status.map_or(true, |s| s == job.status)
            && self.data_source.map_or(true, |d| d == job.data_source)
            && self.format.map_or(true, |f| f == job.format)
    }
}

/// Coarse progress: nothing is known about an encoder's position
pub fn progress(status: ExportStatus) -> u8 {
    match status {
        ExportStatus::Queued | ExportStatus::Cancelled => 0,
        ExportStatus::Processing => 50,
        ExportStatus::Completed | ExportStatus::Failed => 100,
    }
}

/// Seconds left according to the per-format duration estimate
pub fn estimated_time_remaining(job: &ExportJob, now: DateTime<Utc>) -> Option<u64> {
    let estimate = profiles::profile(job.format).estimated_duration.as_secs() as i64;
    match job.status {
        ExportStatus::Queued => Some(estimate as u64),
        ExportStatus::Processing => {
            let elapsed = job.started_at.map_or(0, |at| (now - at).num_seconds());
            Some((estimate - elapsed).max(0) as u64)
        }
        _ => None,
    }
}

/// Read side of the registry: status views and history listings
pub struct StatusTracker {
    registry: Arc<ExportJobRegistry>,
    download_base_path: String,
}

impl StatusTracker {
    pub fn new(registry: Arc<ExportJobRegistry>, download_base_path: impl Into<String>) -> Self {
        Self {
            registry,
            download_base_path: download_base_path.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn download_url(&self, job: &ExportJob) -> Option<String> {
        (job.status == ExportStatus::Completed)
            .then(|| format!("{}/{}/download", self.download_base_path, job.id))
    }

    pub fn view(&self, job: &ExportJob, now: DateTime<Utc>) -> JobStatusView {
        JobStatusView {
            id: job.id,
            status: job.status,
            progress: progress(job.status),
            estimated_time_remaining: estimated_time_remaining(job, now),
            error: job.error.as_ref().map(|e| e.to_string()),
            download_url: self.download_url(job),
            expires_at: job.expires_at,
            byte_size: job.byte_size,
            record_count: job.record_count,
        }
    }

    pub fn status(&self, job_id: Uuid, now: DateTime<Utc>) -> Option<JobStatusView> {
        self.registry.get(job_id).map(|job| self.view(&job, now))
    }

    fn summary(&self, entry: HistoryEntry) -> JobSummary {
        let download_url = self.download_url(&entry.job);
        let job = entry.job;
        JobSummary {
            id: job.id,
            data_source: job.data_source,
            format: job.format,
            status: job.status,
            created_at: job.created_at,
            completed_at: job.completed_at,
            record_count: job.record_count,
            byte_size: job.byte_size,
            download_url,
            expires_at: job.expires_at,
            download_count: entry.download_count,
        }
    }

    /// Owner's finished exports, newest first
    pub fn history(&self, owner_id: Uuid, filter: &HistoryFilter) -> Vec<JobSummary> {
        self.registry
            .history(owner_id)
            .into_iter()
            .filter(|entry| filter.matches(&entry.job))
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(|entry| self.summary(entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::repository::JobOutcome;
    use chrono::Duration;
    use std::path::PathBuf;

    fn job(owner: Uuid, format: ExportFormat) -> ExportJob {
        ExportJob::new(owner, DataSourceKey::Offers, format, Filters::new(), vec![], ExportOptions::default())
    }

    fn finish(registry: &ExportJobRegistry, job: ExportJob, outcome: JobOutcome) -> Uuid {
        let id = job.id;
        registry.enqueue(job);
        registry.start_next(Utc::now());
        registry.finish(id, outcome, Utc::now());
        id
    }

    fn encoded() -> EncodedArtifact {
        EncodedArtifact {
            artifact: ArtifactRef { path: PathBuf::from("/tmp/o.pdf"), checksum: String::new() },
            stats: ExportStats { records_written: 7, bytes_written: 900, duration_ms: 3 },
        }
    }

    #[test]
    fn test_progress_and_eta() {
        let now = Utc::now();
        let mut job = job(Uuid::new_v4(), ExportFormat::Pdf);
        assert_eq!(progress(job.status), 0);
        assert_eq!(estimated_time_remaining(&job, now), Some(90));

        job.mark_processing(now - Duration::seconds(30)).unwrap();
        assert_eq!(progress(job.status), 50);
        assert_eq!(estimated_time_remaining(&job, now), Some(60));
        assert_eq!(estimated_time_remaining(&job, now + Duration::seconds(600)), Some(0));

        job.mark_failed(ExportError::EncoderFault("x".into()), now).unwrap();
        assert_eq!(progress(job.status), 100);
        assert_eq!(estimated_time_remaining(&job, now), None);
    }

    #[test]
    fn test_status_view_serializes_without_absent_fields() {
        let registry = Arc::new(ExportJobRegistry::new(Duration::days(7), 10));
        let tracker = StatusTracker::new(Arc::clone(&registry), "/api/exports/");
        let owner = Uuid::new_v4();

        let queued = job(owner, ExportFormat::Csv);
        let queued_id = queued.id;
        registry.enqueue(queued);
        let value = serde_json::to_value(tracker.status(queued_id, Utc::now()).unwrap()).unwrap();
        assert_eq!(value["status"], "queued");
        assert_eq!(value["progress"], 0);
        assert_eq!(value["estimatedTimeRemaining"], 30);
        assert!(value.get("downloadUrl").is_none());
        assert!(value.get("error").is_none());

        let done = finish(&registry, job(owner, ExportFormat::Pdf), JobOutcome::Completed(encoded()));
        let view = tracker.status(done, Utc::now()).unwrap();
        assert_eq!(view.download_url, Some(format!("/api/exports/{}/download", done)));
        assert_eq!(view.record_count, Some(7));
        assert_eq!(view.byte_size, Some(900));
        assert!(view.expires_at.is_some());
        assert_eq!(view.progress, 100);
    }

    #[test]
    fn test_history_filters() {
        let registry = Arc::new(ExportJobRegistry::new(Duration::days(7), 10));
        let tracker = StatusTracker::new(Arc::clone(&registry), "/exports");
        let owner = Uuid::new_v4();

        let first = finish(&registry, job(owner, ExportFormat::Pdf), JobOutcome::Completed(encoded()));
        let second = finish(
            &registry,
            job(owner, ExportFormat::Csv),
            JobOutcome::Failed(ExportError::EncoderFault("x".into())),
        );
        let third = finish(&registry, job(owner, ExportFormat::Pdf), JobOutcome::Completed(encoded()));

        let all = tracker.history(owner, &HistoryFilter::default());
        assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![third, second, first]);

        let completed = tracker.history(owner, &HistoryFilter { status: Some(ExportStatus::Completed), ..Default::default() });
        assert_eq!(completed.len(), 2);
        assert!(completed.iter().all(|s| s.download_url.is_some()));

        let csv = tracker.history(owner, &HistoryFilter { format: Some(ExportFormat::Csv), ..Default::default() });
        assert_eq!(csv.len(), 1);
        assert_eq!(csv[0].id, second);

        let limited = tracker.history(owner, &HistoryFilter { limit: Some(1), ..Default::default() });
        assert_eq!(limited[0].id, third);
        assert!(tracker.history(Uuid::new_v4(), &HistoryFilter::default()).is_empty());
    }
}
