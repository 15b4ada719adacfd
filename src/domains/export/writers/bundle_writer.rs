use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domains::export::record::{describe_filters, Record};
use crate::domains::export::types::*;
use crate::domains::export::writer::*;
use crate::domains::export::writers::{CsvEncoder, ExcelEncoder, JsonEncoder};

const README_NAME: &str = "README.txt";

/// Multi-artifact archive: delimited text, structured record, optionally a
/// spreadsheet, and a readme describing the bundle.
pub struct BundleEncoder;

impl BundleEncoder {
    /// Formats staged into the archive for a given row count
    pub fn member_formats(ctx: &EncodeContext, row_count: usize) -> Vec<ExportFormat> {
        let mut formats = vec![ExportFormat::Csv, ExportFormat::Json];
        if row_count <= ctx.bundle_spreadsheet_threshold {
            formats.push(ExportFormat::Excel);
        }
        formats
    }

    fn stage_member(
        ctx: &EncodeContext,
        rows: &[Record],
        format: ExportFormat,
        dir: &Path,
    ) -> Result<PathBuf, ExportError> {
        let path = dir.join(format!("{}.{}", ctx.data_source, format.file_extension()));
        let step = ctx.with_format(format);
        let mut writer = BufWriter::new(File::create(&path)?);
        match format {
            ExportFormat::Csv => CsvEncoder.write_rows(&step, rows, &mut writer)?,
            ExportFormat::Json => JsonEncoder.write_rows(&step, rows, &mut writer)?,
            ExportFormat::Excel => ExcelEncoder.write_rows(&step, rows, &mut writer)?,
            other => return Err(ExportError::EncoderFault(format!("{} is not a bundle member", other))),
        };
        writer.flush()?;
        log::debug!("Staged bundle member {} for job {}", path.display(), ctx.job_id);
        Ok(path)
    }

    fn readme(ctx: &EncodeContext, row_count: usize, members: &[PathBuf]) -> String {
        let mut text = String::new();
        text.push_str(&format!("{} export bundle\n\n", ctx.data_source.title()));
        text.push_str(&format!("Job ID: {}\n", ctx.job_id));
        text.push_str(&format!("Exported at: {}\n", ctx.exported_at.to_rfc3339()));
        text.push_str(&format!("Records: {}\n", row_count));
        text.push_str(&format!("Fields: {}\n", ctx.fields.join(", ")));
        text.push_str(&format!("Filters: {}\n\nContents:\n", describe_filters(&ctx.filters)));
        for member in members {
            if let Some(name) = member.file_name() {
                text.push_str(&format!("  - {}\n", name.to_string_lossy()));
            }
        }
        if row_count > ctx.bundle_spreadsheet_threshold {
            text.push_str(&format!(
                "\nThe spreadsheet was omitted because the export has more than {} records.\n",
                ctx.bundle_spreadsheet_threshold
            ));
        }
        text
    }
}

impl FormatEncoder for BundleEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Zip
    }

    fn write_rows(
        &self,
        ctx: &EncodeContext,
        rows: &[Record],
        sink: &mut dyn ArtifactSink,
    ) -> Result<usize, ExportError> {
        // dropped on every exit path, taking the staged members with it
        let staging = tempfile::tempdir()?;

        let mut members = Vec::new();
        for format in Self::member_formats(ctx, rows.len()) {
            ctx.cancel.check()?;
            members.push(Self::stage_member(ctx, rows, format, staging.path())?);
        }

        let readme_path = staging.path().join(README_NAME);
        std::fs::write(&readme_path, Self::readme(ctx, rows.len(), &members))?;
        members.push(readme_path);

        ctx.cancel.check()?;
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(sink);
        for path in &members {
            let Some(name) = path.file_name() else { continue };
            zip.start_file(name.to_string_lossy(), options)?;
            let mut f = File::open(path)?;
            std::io::copy(&mut f, &mut zip)?;
        }
        zip.finish()?;

        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::writer::test_support::*;
    use std::io::{Cursor, Read};

    fn names(bytes: &[u8]) -> Vec<String> {
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        names
    }

    #[test]
    fn test_bundle_contains_all_members() {
        let rows = employees(20);
        let ctx = context(ExportFormat::Zip, &["id", "email"], &rows);
        let (bytes, stats) = encode_to_vec(&ctx, &rows).unwrap();

        assert_eq!(stats.records_written, 20);
        assert_eq!(
            names(&bytes),
            vec!["README.txt", "employees.csv", "employees.json", "employees.xlsx"]
        );

        let mut archive = zip::ZipArchive::new(Cursor::new(&bytes)).unwrap();
        let mut csv = String::new();
        archive.by_name("employees.csv").unwrap().read_to_string(&mut csv).unwrap();
        assert_eq!(csv.lines().count(), 21);
        assert!(csv.starts_with("id,email\n"));
    }

    #[test]
    fn test_spreadsheet_skipped_above_threshold() {
        let rows = employees(5);
        let mut ctx = context(ExportFormat::Zip, &[], &rows);
        ctx.bundle_spreadsheet_threshold = 3;
        let (bytes, _) = encode_to_vec(&ctx, &rows).unwrap();

        assert_eq!(names(&bytes), vec!["README.txt", "employees.csv", "employees.json"]);

        let mut archive = zip::ZipArchive::new(Cursor::new(&bytes)).unwrap();
        let mut readme = String::new();
        archive.by_name(README_NAME).unwrap().read_to_string(&mut readme).unwrap();
        assert!(readme.contains("Records: 5"));
        assert!(readme.contains("more than 3 records"));
    }

    #[test]
    fn test_cancelled_bundle_stops_before_archiving() {
        let rows = employees(5);
        let ctx = context(ExportFormat::Zip, &[], &rows);
        ctx.cancel.cancel();
        assert_eq!(encode_to_vec(&ctx, &rows).unwrap_err(), ExportError::Cancelled);
    }
}
