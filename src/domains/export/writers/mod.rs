pub mod bundle_writer;
pub mod csv_writer;
pub mod excel_writer;
pub mod json_writer;
pub mod pdf_writer;
pub mod xml_writer;

pub use bundle_writer::BundleEncoder;
pub use csv_writer::{CsvConfig, CsvEncoder};
pub use excel_writer::ExcelEncoder;
pub use json_writer::{ExportEnvelope, EnvelopeMetadata, JsonEncoder};
pub use pdf_writer::PdfEncoder;
pub use xml_writer::XmlEncoder;
