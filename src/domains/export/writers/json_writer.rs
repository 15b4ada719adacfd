use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domains::export::record::{project, Record};
use crate::domains::export::types::*;
use crate::domains::export::writer::*;

/// Metadata block shared by the structured formats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub job_id: Uuid,
    pub data_source: DataSourceKey,
    pub exported_at: DateTime<Utc>,
    pub record_count: usize,
    pub fields: Vec<String>,
    pub filters: Filters,
}

impl EnvelopeMetadata {
    pub fn from_context(ctx: &EncodeContext, record_count: usize) -> Self {
        Self {
            job_id: ctx.job_id,
            data_source: ctx.data_source,
            exported_at: ctx.exported_at,
            record_count,
            fields: ctx.fields.clone(),
            filters: ctx.filters.clone(),
        }
    }
}

/// Top-level JSON document: metadata plus the data array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub metadata: EnvelopeMetadata,
    pub data: Vec<Record>,
}

pub struct JsonEncoder;

impl FormatEncoder for JsonEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn write_rows(
        &self,
        ctx: &EncodeContext,
        rows: &[Record],
        sink: &mut dyn ArtifactSink,
    ) -> Result<usize, ExportError> {
        let mut data = Vec::with_capacity(rows.len());
        for (i, record) in rows.iter().enumerate() {
            ctx.checkpoint(i)?;
            data.push(project(record, &ctx.fields));
        }
        ctx.cancel.check()?;

        let envelope = ExportEnvelope {
            metadata: EnvelopeMetadata::from_context(ctx, data.len()),
            data,
        };

        if ctx.options.pretty {
            serde_json::to_writer_pretty(&mut *sink, &envelope)?;
        } else {
            serde_json::to_writer(&mut *sink, &envelope)?;
        }
        sink.flush()?;
        Ok(envelope.data.len())
    }
}
