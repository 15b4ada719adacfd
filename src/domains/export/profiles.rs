use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::time::Duration;

use crate::domains::export::types::ExportFormat;
use crate::domains::export::writer::FormatEncoder;
use crate::domains::export::writers::excel_writer::MAX_SHEET_ROWS;
use crate::domains::export::writers::{
    BundleEncoder, CsvEncoder, ExcelEncoder, JsonEncoder, PdfEncoder, XmlEncoder,
};

/// Static configuration for one export format
pub struct FormatProfile {
    pub format: ExportFormat,
    pub mime_type: &'static str,
    pub extension: &'static str,
    pub max_records: usize,
    /// Rough wall-clock cost used for ETA estimates
    pub estimated_duration: Duration,
    pub encoder: &'static (dyn FormatEncoder + 'static),
}

impl std::fmt::Debug for FormatProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatProfile")
            .field("format", &self.format)
            .field("mime_type", &self.mime_type)
            .field("extension", &self.extension)
            .field("max_records", &self.max_records)
            .field("estimated_duration", &self.estimated_duration)
            .field("encoder", &"<FormatEncoder>")
            .finish()
    }
}

static CSV_ENCODER: CsvEncoder = CsvEncoder;
static EXCEL_ENCODER: ExcelEncoder = ExcelEncoder;
static PDF_ENCODER: PdfEncoder = PdfEncoder;
static JSON_ENCODER: JsonEncoder = JsonEncoder;
static XML_ENCODER: XmlEncoder = XmlEncoder;
static BUNDLE_ENCODER: BundleEncoder = BundleEncoder;

static FORMAT_PROFILES: Lazy<HashMap<ExportFormat, FormatProfile>> = Lazy::new(|| {
    let profiles = [
        FormatProfile {
            format: ExportFormat::Csv,
            mime_type: "text/csv",
            extension: "csv",
            max_records: 1_000_000,
            estimated_duration: Duration::from_secs(30),
            encoder: &CSV_ENCODER,
        },
        FormatProfile {
            format: ExportFormat::Excel,
            mime_type: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            extension: "xlsx",
            // one sheet row is taken by the header
            max_records: MAX_SHEET_ROWS - 1,
            estimated_duration: Duration::from_secs(60),
            encoder: &EXCEL_ENCODER,
        },
        FormatProfile {
            format: ExportFormat::Pdf,
            mime_type: "application/pdf",
            extension: "pdf",
            max_records: 10_000,
            estimated_duration: Duration::from_secs(90),
            encoder: &PDF_ENCODER,
        },
        FormatProfile {
            format: ExportFormat::Json,
            mime_type: "application/json",
            extension: "json",
            max_records: 500_000,
            estimated_duration: Duration::from_secs(20),
            encoder: &JSON_ENCODER,
        },
        FormatProfile {
            format: ExportFormat::Xml,
            mime_type: "application/xml",
            extension: "xml",
            max_records: 500_000,
            estimated_duration: Duration::from_secs(30),
            encoder: &XML_ENCODER,
        },
        // bounded by the json step it always contains
        FormatProfile {
            format: ExportFormat::Zip,
            mime_type: "application/zip",
            extension: "zip",
            max_records: 500_000,
            estimated_duration: Duration::from_secs(120),
            encoder: &BUNDLE_ENCODER,
        },
    ];
    profiles.into_iter().map(|p| (p.format, p)).collect()
});

/// Profile for a format. Every `ExportFormat` variant has one.
pub fn profile(format: ExportFormat) -> &'static FormatProfile {
    &FORMAT_PROFILES[&format]
}

pub fn max_records(format: ExportFormat) -> usize {
    profile(format).max_records
}

pub fn encoder_for(format: ExportFormat) -> &'static dyn FormatEncoder {
    profile(format).encoder
}
