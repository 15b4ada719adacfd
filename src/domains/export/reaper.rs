use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time;
use uuid::Uuid;

use crate::domains::export::artifact_store::ArtifactStore;
use crate::domains::export::repository::ExportJobRegistry;

/// What one sweep removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub removed: Vec<Uuid>,
    pub files_deleted: usize,
}

/// Removes history entries past retention and deletes their artifacts
#[derive(Clone)]
pub struct ExpiryReaper {
    registry: Arc<ExportJobRegistry>,
    artifacts: ArtifactStore,
}

impl ExpiryReaper {
    pub fn new(registry: Arc<ExportJobRegistry>, artifacts: ArtifactStore) -> Self {
        Self { registry, artifacts }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> ReapReport {
        let (removed, discard) = self.registry.reap_expired(now);
        if removed.is_empty() {
            log::debug!("No expired exports to reap");
            return ReapReport::default();
        }
        log::info!("Reaping {} expired exports", removed.len());
        self.artifacts.discard(&discard).await;
        ReapReport {
            removed,
            files_deleted: discard.len(),
        }
    }

    /// Sweep on a fixed interval until the shutdown signal fires
    pub async fn start(self, every: Duration, mut shutdown: oneshot::Receiver<()>) {
        log::info!("Starting export reaper (every {:?})", every);
        let mut interval = time::interval(every);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once(Utc::now()).await;
                }
                _ = &mut shutdown => {
                    log::info!("Received shutdown signal, stopping export reaper");
                    break;
                }
            }
        }
    }
}

/// Running reaper task; dropping it without `shutdown` leaves the task running
pub struct ReaperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl ReaperHandle {
    pub fn spawn(reaper: ExpiryReaper, every: Duration, runtime: &tokio::runtime::Handle) -> Self {
        let (tx, rx) = oneshot::channel();
        let task = runtime.spawn(reaper.start(every, rx));
        Self { shutdown: Some(tx), task }
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            log::error!("Export reaper task ended abnormally: {}", e);
        }
    }
}
