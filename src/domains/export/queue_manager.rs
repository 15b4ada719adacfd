use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

use crate::domains::export::artifact_store::ArtifactStore;
use crate::domains::export::repository::{ExportJobRegistry, JobOutcome};
use crate::domains::export::types::*;
use crate::domains::export::writer::CancellationFlag;

/// Executes one dispatched job. The queue manager owns scheduling, deadlines
/// and bookkeeping; the processor only turns a job into an artifact.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: ExportJob, cancel: CancellationFlag) -> Result<EncodedArtifact, ExportError>;
}

/// Handle for tracking export jobs
pub struct JobHandle {
    pub id: Uuid,
    status_receiver: watch::Receiver<ExportStatus>,
}

impl JobHandle {
    pub fn new(id: Uuid, status_receiver: watch::Receiver<ExportStatus>) -> Self {
        Self { id, status_receiver }
    }

    pub fn status(&self) -> ExportStatus {
        *self.status_receiver.borrow()
    }

    /// Resolves once the job reaches Completed, Failed or Cancelled
    pub async fn wait_for_terminal(&mut self) -> ExportStatus {
        loop {
            let status = *self.status_receiver.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if self.status_receiver.changed().await.is_err() {
                return *self.status_receiver.borrow();
            }
        }
    }

    /// Every status change as a stream
    pub fn into_stream(self) -> WatchStream<ExportStatus> {
        WatchStream::new(self.status_receiver)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub capacity: usize,
}

/// Frees a worker's slot and promotes the next job when the worker task ends,
/// whether it finished normally or unwound.
struct SlotGuard {
    manager: Arc<ExportQueueManager>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.manager.promote();
    }
}

/// FIFO scheduler with a fixed number of execution slots.
///
/// Promotion happens synchronously on every enqueue and after every
/// completion, so slots never sit idle while work is queued.
pub struct ExportQueueManager {
    registry: Arc<ExportJobRegistry>,
    artifacts: ArtifactStore,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    export_timeout: Duration,
    runtime: Handle,
    job_processor: Weak<dyn JobProcessor>,
}

impl ExportQueueManager {
    pub fn new(
        registry: Arc<ExportJobRegistry>,
        artifacts: ArtifactStore,
        max_concurrent: usize,
        export_timeout: Duration,
        runtime: Handle,
        job_processor: Weak<dyn JobProcessor>,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            registry,
            artifacts,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            export_timeout,
            runtime,
            job_processor,
        }
    }

    pub fn enqueue(self: &Arc<Self>, job: ExportJob) -> JobHandle {
        let id = job.id;
        log::info!("Queued {} export {} for {}", job.format, id, job.data_source);
        let rx = self.registry.enqueue(job);
        self.promote();
        JobHandle::new(id, rx)
    }

    /// Dispatch queue heads while slots are free
    pub fn promote(self: &Arc<Self>) {
        loop {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                return;
            };
            let Some((job, cancel)) = self.registry.start_next(Utc::now()) else {
                return;
            };
            self.dispatch(job, cancel, permit);
        }
    }

    fn dispatch(self: &Arc<Self>, job: ExportJob, cancel: CancellationFlag, permit: OwnedSemaphorePermit) {
        let slot = SlotGuard {
            manager: Arc::clone(self),
            permit: Some(permit),
        };
        log::debug!("Dispatching export {}", job.id);
        self.runtime.spawn(async move {
            let job_id = job.id;
            let outcome = slot.manager.execute(job, cancel).await;
            slot.manager.on_job_finished(job_id, outcome).await;
        });
    }

    /// Run the processor under the export deadline.
    ///
    /// The processor runs in its own task so a panic surfaces as a join error
    /// and a timeout can abandon it without blocking this slot.
    async fn execute(&self, job: ExportJob, cancel: CancellationFlag) -> JobOutcome {
        let Some(processor) = self.job_processor.upgrade() else {
            log::error!("Job processor was dropped, failing export {}", job.id);
            return JobOutcome::Failed(ExportError::EncoderFault("export processor is gone".into()));
        };

        let job_id = job.id;
        let mut task = self.runtime.spawn({
            let cancel = cancel.clone();
            async move { processor.process(job, cancel).await }
        });

        match tokio::time::timeout(self.export_timeout, &mut task).await {
            Ok(Ok(result)) => result.into(),
            Ok(Err(join_error)) => {
                log::error!("Export {} task failed: {}", job_id, join_error);
                JobOutcome::Failed(ExportError::EncoderFault(format!("export task failed: {}", join_error)))
            }
            Err(_) => {
                let timeout_ms = self.export_timeout.as_millis() as u64;
                log::warn!("Export {} exceeded {} ms, abandoning it", job_id, timeout_ms);
                cancel.cancel();

                // the abandoned encoder may still publish before it notices the flag
                let artifacts = self.artifacts.clone();
                self.runtime.spawn(async move {
                    if let Ok(Ok(late)) = task.await {
                        artifacts.discard(&[late.artifact.path]).await;
                    }
                });
                JobOutcome::Failed(ExportError::Timeout { timeout_ms })
            }
        }
    }

    async fn on_job_finished(&self, job_id: Uuid, outcome: JobOutcome) {
        let report = self.registry.finish(job_id, outcome, Utc::now());
        match report.status {
            Some(ExportStatus::Completed) => log::info!("Export {} completed", job_id),
            Some(ExportStatus::Cancelled) => log::info!("Export {} cancelled", job_id),
            Some(status) => {
                let error = self.registry.get(job_id).and_then(|j| j.error);
                log::warn!("Export {} ended {:?}: {:?}", job_id, status, error);
            }
            None => {}
        }
        self.artifacts.discard(&report.discard).await;
    }

    pub fn stats(&self) -> QueueStats {
        let (queued, processing) = self.registry.counts();
        QueueStats {
            queued,
            processing,
            capacity: self.max_concurrent,
        }
    }
}
