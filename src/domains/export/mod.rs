pub mod artifact_store;
pub mod config;
pub mod data_source;
pub mod profiles;
pub mod queue_manager;
pub mod reaper;
pub mod record;
pub mod repository;
pub mod service;
pub mod tracker;
pub mod types;
pub mod validator;
pub mod writer;
pub mod writers;

pub use artifact_store::{ArtifactDownload, ArtifactHandle, ArtifactStore};
pub use config::ExportConfig;
pub use data_source::{DataSource, DataSourceError, InMemoryDataSource};
pub use queue_manager::{JobHandle, JobProcessor, QueueStats};
pub use record::Record;
pub use service::{ExportPreview, ExportService, ExportSubmission};
pub use tracker::{HistoryFilter, JobStatusView, JobSummary};
pub use types::{DataSourceKey, ExportError, ExportFormat, ExportJob, ExportOptions, ExportRequest, ExportStats, ExportStatus};
