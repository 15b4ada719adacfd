use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::domains::export::record::Record;
use crate::domains::export::types::{DataSourceKey, ExportError, Filters};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    #[error("No rows registered for data source '{0}'")]
    UnsupportedSource(DataSourceKey),
    #[error("Data source unavailable: {0}")]
    Unavailable(String),
}

impl From<DataSourceError> for ExportError {
    fn from(err: DataSourceError) -> Self {
        ExportError::DataSource(err.to_string())
    }
}

/// Capability that supplies the already-selected rows for an export.
///
/// The pipeline never looks behind this trait; how rows are stored, filtered
/// or paged is entirely up to the implementation.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(
        &self,
        source: DataSourceKey,
        filters: &Filters,
        fields: &[String],
    ) -> Result<Vec<Record>, DataSourceError>;
}

/// Fixed row sets per source. Filters are matched by top-level equality.
#[derive(Default)]
pub struct InMemoryDataSource {
    tables: RwLock<HashMap<DataSourceKey, Vec<Record>>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, source: DataSourceKey, rows: Vec<Record>) -> Self {
        self.insert(source, rows);
        self
    }

    pub fn insert(&self, source: DataSourceKey, rows: Vec<Record>) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.insert(source, rows);
    }
}

#[async_trait]
impl DataSource for InMemoryDataSource {
    async fn fetch(
        &self,
        source: DataSourceKey,
        filters: &Filters,
        _fields: &[String],
    ) -> Result<Vec<Record>, DataSourceError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let rows = tables
            .get(&source)
            .ok_or(DataSourceError::UnsupportedSource(source))?;

        Ok(rows
            .iter()
            .filter(|row| filters.iter().all(|(k, v)| row.get(k) == Some(v)))
            .cloned()
            .collect())
    }
}
