use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use uuid::Uuid;

use crate::domains::export::types::*;
use crate::domains::export::writer::CancellationFlag;
use crate::errors::{DownloadError, ServiceError};

/// How an execution ended, as reported to the registry
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(EncodedArtifact),
    Failed(ExportError),
    Cancelled,
}

impl From<Result<EncodedArtifact, ExportError>> for JobOutcome {
    fn from(result: Result<EncodedArtifact, ExportError>) -> Self {
        match result {
            Ok(encoded) => JobOutcome::Completed(encoded),
            Err(ExportError::Cancelled) => JobOutcome::Cancelled,
            Err(err) => JobOutcome::Failed(err),
        }
    }
}

/// A terminal job kept for status queries, listings and downloads
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub job: ExportJob,
    pub download_count: u64,
}

/// Result of filing a finished job
#[derive(Debug, Default)]
pub struct FinishReport {
    /// Status the job ended in; `None` when the job was no longer registered
    pub status: Option<ExportStatus>,
    /// Files that must be deleted by the caller
    pub discard: Vec<PathBuf>,
}

#[derive(Debug)]
pub enum CancelOutcome {
    /// The job was still queued and is now Cancelled
    Cancelled { discard: Vec<PathBuf> },
    /// The job is processing; its encoder will stop at the next checkpoint
    Requested,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<Uuid, ExportJob>,
    queue: VecDeque<Uuid>,
    cancel_flags: HashMap<Uuid, CancellationFlag>,
    history: HashMap<Uuid, HistoryEntry>,
    /// Oldest first
    history_by_owner: HashMap<Uuid, VecDeque<Uuid>>,
    watchers: HashMap<Uuid, watch::Sender<ExportStatus>>,
    leases: HashMap<Uuid, usize>,
    pending_deletion: HashMap<Uuid, PathBuf>,
}

impl RegistryState {
    fn notify(&mut self, job_id: Uuid, status: ExportStatus) {
        if let Some(tx) = self.watchers.get(&job_id) {
            tx.send_replace(status);
        }
        if status.is_terminal() {
            self.watchers.remove(&job_id);
        }
    }

    /// Removes a history entry. Returns the artifact to delete now, or defers
    /// it while download streams still hold a lease.
    fn detach(&mut self, job_id: Uuid) -> Option<PathBuf> {
        let entry = self.history.remove(&job_id)?;
        if let Some(ids) = self.history_by_owner.get_mut(&entry.job.owner_id) {
            ids.retain(|id| *id != job_id);
            if ids.is_empty() {
                self.history_by_owner.remove(&entry.job.owner_id);
            }
        }
        let path = entry.job.artifact.map(|a| a.path)?;
        if self.leases.get(&job_id).copied().unwrap_or(0) > 0 {
            log::debug!("Deferring deletion of {} until its downloads finish", path.display());
            self.pending_deletion.insert(job_id, path);
            None
        } else {
            Some(path)
        }
    }

    fn file_terminal(&mut self, job: ExportJob, history_limit: usize) -> Vec<PathBuf> {
        let owner = job.owner_id;
        let job_id = job.id;
        self.history.insert(job_id, HistoryEntry { job, download_count: 0 });
        let ids = self.history_by_owner.entry(owner).or_default();
        ids.push_back(job_id);

        let overflow = ids.len().saturating_sub(history_limit);
        let evicted: Vec<Uuid> = ids.iter().take(overflow).copied().collect();
        evicted
            .into_iter()
            .filter_map(|id| {
                log::debug!("History for owner {} is full, evicting export {}", owner, id);
                self.detach(id)
            })
            .collect()
    }
}

fn not_owner(job_id: Uuid) -> ServiceError {
    ServiceError::PermissionDenied(format!("export {} belongs to another user", job_id))
}

fn retention_deadline(job: &ExportJob, retention: Duration) -> Option<DateTime<Utc>> {
    match job.status {
        ExportStatus::Completed => job.expires_at,
        _ => job.completed_at.and_then(|at| at.checked_add_signed(retention)),
    }
}

/// Active set, FIFO queue and bounded per-owner history behind one lock.
///
/// Every method takes the lock once and never awaits while holding it.
pub struct ExportJobRegistry {
    state: Mutex<RegistryState>,
    retention: Duration,
    history_limit: usize,
}

impl ExportJobRegistry {
    pub fn new(retention: Duration, history_limit: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            retention,
            history_limit: history_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a freshly admitted job to the tail of the queue
    pub fn enqueue(&self, job: ExportJob) -> watch::Receiver<ExportStatus> {
        let mut state = self.lock();
        let (tx, rx) = watch::channel(job.status);
        state.queue.push_back(job.id);
        state.watchers.insert(job.id, tx);
        state.active.insert(job.id, job);
        rx
    }

    /// Pop the queue head and move it to Processing
    pub fn start_next(&self, now: DateTime<Utc>) -> Option<(ExportJob, CancellationFlag)> {
        let mut state = self.lock();
        while let Some(job_id) = state.queue.pop_front() {
            let Some(job) = state.active.get_mut(&job_id) else { continue };
            if job.mark_processing(now).is_err() {
                continue;
            }
            let job = job.clone();
            let flag = CancellationFlag::new();
            state.cancel_flags.insert(job_id, flag.clone());
            state.notify(job_id, ExportStatus::Processing);
            return Some((job, flag));
        }
        None
    }

    /// Record the outcome of a processing job and file it into history
    pub fn finish(&self, job_id: Uuid, outcome: JobOutcome, now: DateTime<Utc>) -> FinishReport {
        let mut state = self.lock();
        let cancel_requested = state
            .cancel_flags
            .remove(&job_id)
            .is_some_and(|flag| flag.is_cancelled());

        let Some(mut job) = state.active.remove(&job_id) else {
            log::warn!("Finished export {} is no longer registered", job_id);
            let discard = match outcome {
                JobOutcome::Completed(encoded) => vec![encoded.artifact.path],
                _ => Vec::new(),
            };
            return FinishReport { status: None, discard };
        };

        let mut discard = Vec::new();
        let transition = match outcome {
            JobOutcome::Completed(encoded) if cancel_requested => {
                discard.push(encoded.artifact.path);
                job.mark_cancelled(now)
            }
            JobOutcome::Completed(encoded) => {
                let path = encoded.artifact.path.clone();
                let result = match now.checked_add_signed(self.retention) {
                    Some(expires_at) => job.mark_completed(encoded, now, expires_at),
                    None => {
                        log::error!("Retention {} puts export {} past the last representable date", self.retention, job_id);
                        job.mark_failed(
                            ExportError::EncoderFault(format!("artifact expiry out of range for retention {}", self.retention)),
                            now,
                        )
                    }
                };
                if job.status != ExportStatus::Completed {
                    discard.push(path);
                }
                result
            }
            JobOutcome::Failed(err) => job.mark_failed(err, now),
            JobOutcome::Cancelled => job.mark_cancelled(now),
        };
        if let Err(e) = transition {
            log::error!("{}", e);
        }

        let status = job.status;
        state.notify(job_id, status);
        discard.extend(state.file_terminal(job, self.history_limit));
        FinishReport { status: Some(status), discard }
    }

    pub fn cancel(&self, job_id: Uuid, requester: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome, ServiceError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(job) = state.active.get(&job_id) {
            if job.owner_id != requester {
                return Err(not_owner(job_id));
            }
            if job.status != ExportStatus::Queued {
                if let Some(flag) = state.cancel_flags.get(&job_id) {
                    flag.cancel();
                }
                return Ok(CancelOutcome::Requested);
            }
            state.queue.retain(|id| *id != job_id);
            let mut job = state.active.remove(&job_id).ok_or(ServiceError::NotFound(job_id))?;
            job.mark_cancelled(now)
                .map_err(|e| ServiceError::InvalidState(e.to_string()))?;
            state.notify(job_id, ExportStatus::Cancelled);
            let discard = state.file_terminal(job, self.history_limit);
            return Ok(CancelOutcome::Cancelled { discard });
        }

        let (owner, status) = state
            .history
            .get(&job_id)
            .map(|e| (e.job.owner_id, e.job.status))
            .ok_or(ServiceError::NotFound(job_id))?;
        if owner != requester {
            return Err(not_owner(job_id));
        }
        Err(ServiceError::InvalidState(format!("export {} is already {:?}", job_id, status)))
    }

    pub fn get(&self, job_id: Uuid) -> Option<ExportJob> {
        let state = self.lock();
        state
            .active
            .get(&job_id)
            .or_else(|| state.history.get(&job_id).map(|e| &e.job))
            .cloned()
    }

    pub fn download_count(&self, job_id: Uuid) -> Option<u64> {
        self.lock().history.get(&job_id).map(|e| e.download_count)
    }

    /// Checks run in order: existence, ownership, readiness, expiry.
    /// Success bumps the download counter.
    pub fn authorize_download(
        &self,
        job_id: Uuid,
        requester: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ExportJob, DownloadError> {
        let mut state = self.lock();

        if let Some(job) = state.active.get(&job_id) {
            if job.owner_id != requester {
                return Err(DownloadError::Forbidden(job_id));
            }
            return Err(DownloadError::NotReady { job_id, status: job.status });
        }

        let entry = state.history.get_mut(&job_id).ok_or(DownloadError::NotFound(job_id))?;
        if entry.job.owner_id != requester {
            return Err(DownloadError::Forbidden(job_id));
        }
        if entry.job.status != ExportStatus::Completed {
            return Err(DownloadError::NotReady { job_id, status: entry.job.status });
        }
        if let Some(expired_at) = entry.job.expires_at.filter(|at| now > *at) {
            return Err(DownloadError::Expired { job_id, expired_at });
        }

        entry.download_count += 1;
        Ok(entry.job.clone())
    }

    /// Pin a history entry's artifact for the lifetime of a download stream
    pub fn acquire_lease(&self, job_id: Uuid) -> bool {
        let mut state = self.lock();
        if !state.history.contains_key(&job_id) {
            return false;
        }
        *state.leases.entry(job_id).or_insert(0) += 1;
        true
    }

    /// Drop a lease; returns a deferred artifact once the last lease is gone
    pub fn release_lease(&self, job_id: Uuid) -> Option<PathBuf> {
        let mut state = self.lock();
        let remaining = match state.leases.get_mut(&job_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining > 0 {
            return None;
        }
        state.leases.remove(&job_id);
        state.pending_deletion.remove(&job_id)
    }

    pub fn is_pending_deletion(&self, job_id: Uuid) -> bool {
        self.lock().pending_deletion.contains_key(&job_id)
    }

    /// Drop every history entry past its retention deadline.
    /// Returns (removed job ids, artifacts to delete now).
    pub fn reap_expired(&self, now: DateTime<Utc>) -> (Vec<Uuid>, Vec<PathBuf>) {
        let mut state = self.lock();
        let expired: Vec<Uuid> = state
            .history
            .values()
            .filter(|e| retention_deadline(&e.job, self.retention).is_some_and(|at| now > at))
            .map(|e| e.job.id)
            .collect();

        let discard = expired.iter().filter_map(|id| state.detach(*id)).collect();
        (expired, discard)
    }

    /// Owner-initiated removal of a terminal job
    pub fn remove(&self, job_id: Uuid, requester: Uuid) -> Result<Option<PathBuf>, ServiceError> {
        let mut state = self.lock();
        if let Some(job) = state.active.get(&job_id) {
            if job.owner_id != requester {
                return Err(not_owner(job_id));
            }
            return Err(ServiceError::InvalidState(format!(
                "export {} is {:?}; cancel it before deleting",
                job_id, job.status
            )));
        }
        let owner = state
            .history
            .get(&job_id)
            .map(|e| e.job.owner_id)
            .ok_or(ServiceError::NotFound(job_id))?;
        if owner != requester {
            return Err(not_owner(job_id));
        }
        Ok(state.detach(job_id))
    }

    /// Status channel for a job. Terminal jobs get a channel that already
    /// holds their final status.
    pub fn subscribe(&self, job_id: Uuid) -> Option<watch::Receiver<ExportStatus>> {
        let state = self.lock();
        if let Some(tx) = state.watchers.get(&job_id) {
            return Some(tx.subscribe());
        }
        state
            .history
            .get(&job_id)
            .map(|e| watch::channel(e.job.status).1)
    }

    /// Owner's history, newest first
    pub fn history(&self, owner_id: Uuid) -> Vec<HistoryEntry> {
        let state = self.lock();
        state
            .history_by_owner
            .get(&owner_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| state.history.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// (queued, processing)
    pub fn counts(&self) -> (usize, usize) {
        let state = self.lock();
        let processing = state
            .active
            .values()
            .filter(|j| j.status == ExportStatus::Processing)
            .count();
        (state.queue.len(), processing)
    }
}
