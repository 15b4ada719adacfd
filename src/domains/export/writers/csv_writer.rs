use crate::domains::export::record::{field_text, Record};
use crate::domains::export::types::*;
use crate::domains::export::writer::*;

/// Delimited-text settings derived from the job options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvConfig {
    pub delimiter: u8,
    pub quote_char: u8,
    pub escape_char: Option<u8>,
    pub include_headers: bool,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote_char: b'"',
            escape_char: None,
            include_headers: true,
        }
    }
}

impl CsvConfig {
    /// Options were validated at admission; anything odd here is an encoder fault.
    pub fn from_options(options: &ExportOptions) -> Result<Self, ExportError> {
        let invalid = |e: crate::errors::ValidationError| ExportError::EncoderFault(e.to_string());
        Ok(Self {
            delimiter: options.delimiter_byte().map_err(invalid)?,
            quote_char: options.quote_byte().map_err(invalid)?,
            escape_char: options.escape_byte().map_err(invalid)?,
            include_headers: options.include_headers(),
        })
    }

    fn builder(&self) -> csv::WriterBuilder {
        let mut builder = csv::WriterBuilder::new();
        builder.delimiter(self.delimiter).quote(self.quote_char).has_headers(false);
        if let Some(escape) = self.escape_char.filter(|e| *e != self.quote_char) {
            builder.double_quote(false).escape(escape);
        }
        builder
    }
}

pub struct CsvEncoder;

impl FormatEncoder for CsvEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn write_rows(
        &self,
        ctx: &EncodeContext,
        rows: &[Record],
        sink: &mut dyn ArtifactSink,
    ) -> Result<usize, ExportError> {
        let config = CsvConfig::from_options(&ctx.options)?;
        let mut wtr = config.builder().from_writer(sink);

        if config.include_headers && !ctx.fields.is_empty() {
            wtr.write_record(&ctx.fields)?;
        }

        let mut written = 0;
        for (i, record) in rows.iter().enumerate() {
            ctx.checkpoint(i)?;
            wtr.write_record(ctx.fields.iter().map(|f| field_text(record, f)))?;
            written += 1;
        }

        wtr.flush()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::writer::test_support::*;
    use serde_json::json;

    fn render(ctx: &EncodeContext, rows: &[Record]) -> String {
        let (bytes, _) = encode_to_vec(ctx, rows).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_selected_fields_with_header() {
        let rows = employees(3);
        let ctx = context(ExportFormat::Csv, &["id", "email"], &rows);
        let text = render(&ctx, &rows);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id,email");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "1,employee1@example.com");
    }

    #[test]
    fn test_all_fields_when_none_selected() {
        let rows = employees(1);
        let ctx = context(ExportFormat::Csv, &[], &rows);
        let text = render(&ctx, &rows);
        assert!(text.starts_with("id,name,email,salary\n"));
    }

    #[test]
    fn test_custom_delimiter_and_no_headers() {
        let rows = employees(2);
        let mut ctx = context(ExportFormat::Csv, &["id", "name"], &rows);
        ctx.options.delimiter = Some(";".into());
        ctx.options.include_headers = Some(false);
        let text = render(&ctx, &rows);
        assert_eq!(text, "1;Employee 1\n2;Employee 2\n");
    }

    #[test]
    fn test_quoting_and_escape() {
        let rows: Vec<Record> = vec![json!({"note": "said \"hi\", then left"}).as_object().cloned().unwrap()];
        let ctx = context(ExportFormat::Csv, &["note"], &rows);
        assert_eq!(render(&ctx, &rows), "note\n\"said \"\"hi\"\", then left\"\n");

        let mut ctx = context(ExportFormat::Csv, &["note"], &rows);
        ctx.options.escape = Some("\\".into());
        assert_eq!(render(&ctx, &rows), "note\n\"said \\\"hi\\\", then left\"\n");
    }

    #[test]
    fn test_missing_field_is_empty_cell() {
        let rows: Vec<Record> = vec![json!({"id": 1}).as_object().cloned().unwrap()];
        let ctx = context(ExportFormat::Csv, &["id", "phone"], &rows);
        assert_eq!(render(&ctx, &rows), "id,phone\n1,\n");
    }
}
