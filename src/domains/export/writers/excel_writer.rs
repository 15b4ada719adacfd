use serde_json::Value;
use std::io::Write;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domains::export::record::{cell_text, describe_filters, Record};
use crate::domains::export::types::*;
use crate::domains::export::writer::*;
use crate::domains::export::writers::xml_writer::escape_markup;

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

const MAX_COLUMN_WIDTH: usize = 60;
const MIN_COLUMN_WIDTH: usize = 8;
const HEADER_STYLE: u8 = 1;

/// Rows per worksheet allowed by the spreadsheet format, header row included
pub const MAX_SHEET_ROWS: usize = 1_048_576;

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Number(String),
    Bool(bool),
    Empty,
}

impl Cell {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Cell::Empty,
            Some(Value::Bool(b)) => Cell::Bool(*b),
            Some(Value::Number(n)) => Cell::Number(n.to_string()),
            Some(other) => Cell::Text(cell_text(other)),
        }
    }

    fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    fn number(n: f64) -> Self {
        Cell::Number(n.to_string())
    }

    fn display_len(&self) -> usize {
        match self {
            Cell::Text(s) | Cell::Number(s) => s.chars().count(),
            Cell::Bool(_) => 5,
            Cell::Empty => 0,
        }
    }
}

/// Spreadsheet column letters: 0 -> A, 25 -> Z, 26 -> AA
fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

fn write_row<W: Write + ?Sized>(out: &mut W, row: usize, cells: &[Cell], style: Option<u8>) -> std::io::Result<()> {
    write!(out, "<row r=\"{}\">", row)?;
    let style_attr = style.map(|s| format!(" s=\"{}\"", s)).unwrap_or_default();
    for (col, cell) in cells.iter().enumerate() {
        let reference = format!("{}{}", column_letter(col), row);
        match cell {
            Cell::Empty => {}
            Cell::Text(s) => write!(
                out,
                "<c r=\"{}\" t=\"inlineStr\"{}><is><t xml:space=\"preserve\">{}</t></is></c>",
                reference,
                style_attr,
                escape_markup(s)
            )?,
            Cell::Number(n) => write!(out, "<c r=\"{}\"{}><v>{}</v></c>", reference, style_attr, n)?,
            Cell::Bool(b) => write!(out, "<c r=\"{}\" t=\"b\"{}><v>{}</v></c>", reference, style_attr, u8::from(*b))?,
        }
    }
    write!(out, "</row>")
}

fn begin_sheet<W: Write + ?Sized>(out: &mut W, widths: Option<&[usize]>) -> std::io::Result<()> {
    write!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>")?;
    write!(out, "<worksheet xmlns=\"{}\">", MAIN_NS)?;
    if let Some(widths) = widths.filter(|w| !w.is_empty()) {
        write!(out, "<cols>")?;
        for (i, width) in widths.iter().enumerate() {
            write!(out, "<col min=\"{0}\" max=\"{0}\" width=\"{1}\" customWidth=\"1\"/>", i + 1, width)?;
        }
        write!(out, "</cols>")?;
    }
    write!(out, "<sheetData>")
}

fn end_sheet<W: Write + ?Sized>(out: &mut W) -> std::io::Result<()> {
    write!(out, "</sheetData></worksheet>")
}

/// Per-column width from the longest rendered value
fn column_widths(ctx: &EncodeContext, rows: &[Record]) -> Vec<usize> {
    ctx.fields
        .iter()
        .map(|field| {
            let longest = rows
                .iter()
                .map(|r| Cell::from_value(r.get(field)).display_len())
                .max()
                .unwrap_or(0)
                .max(field.chars().count());
            (longest + 2).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH)
        })
        .collect()
}

/// count, sum, mean, min, max of one numeric column
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSummary {
    pub field: String,
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Summaries for every selected field holding at least one number
pub fn numeric_summaries(fields: &[String], rows: &[Record]) -> Vec<FieldSummary> {
    fields
        .iter()
        .filter_map(|field| {
            let values: Vec<f64> = rows
                .iter()
                .filter_map(|r| r.get(field).and_then(Value::as_f64))
                .collect();
            if values.is_empty() {
                return None;
            }
            let sum: f64 = values.iter().sum();
            Some(FieldSummary {
                field: field.clone(),
                count: values.len(),
                sum,
                mean: sum / values.len() as f64,
                min: values.iter().cloned().fold(f64::INFINITY, f64::min),
                max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            })
        })
        .collect()
}

pub struct ExcelEncoder;

impl ExcelEncoder {
    fn sheet_names(ctx: &EncodeContext) -> Vec<&'static str> {
        let mut names = vec!["Data"];
        if ctx.options.include_metadata {
            names.push("Metadata");
        }
        if ctx.options.include_summary {
            names.push("Summary");
        }
        names
    }

    fn write_package_parts<W: Write + std::io::Seek>(
        zip: &mut ZipWriter<W>,
        options: FileOptions,
        sheets: &[&str],
    ) -> Result<(), ExportError> {
        zip.start_file("[Content_Types].xml", options)?;
        write!(
            zip,
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
             <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
             <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
             <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
             <Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>"
        )?;
        for i in 1..=sheets.len() {
            write!(
                zip,
                "<Override PartName=\"/xl/worksheets/sheet{}.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>",
                i
            )?;
        }
        write!(zip, "</Types>")?;

        zip.start_file("_rels/.rels", options)?;
        write!(
            zip,
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <Relationships xmlns=\"{}\">\
             <Relationship Id=\"rId1\" Type=\"{}/officeDocument\" Target=\"xl/workbook.xml\"/>\
             </Relationships>",
            PKG_REL_NS, REL_NS
        )?;

        zip.start_file("xl/workbook.xml", options)?;
        write!(
            zip,
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><workbook xmlns=\"{}\" xmlns:r=\"{}\"><sheets>",
            MAIN_NS, REL_NS
        )?;
        for (i, name) in sheets.iter().enumerate() {
            write!(zip, "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>", name, i + 1, i + 1)?;
        }
        write!(zip, "</sheets></workbook>")?;

        zip.start_file("xl/_rels/workbook.xml.rels", options)?;
        write!(
            zip,
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><Relationships xmlns=\"{}\">",
            PKG_REL_NS
        )?;
        for i in 1..=sheets.len() {
            write!(
                zip,
                "<Relationship Id=\"rId{0}\" Type=\"{1}/worksheet\" Target=\"worksheets/sheet{0}.xml\"/>",
                i, REL_NS
            )?;
        }
        write!(
            zip,
            "<Relationship Id=\"rId{}\" Type=\"{}/styles\" Target=\"styles.xml\"/></Relationships>",
            sheets.len() + 1,
            REL_NS
        )?;

        zip.start_file("xl/styles.xml", options)?;
        write!(
            zip,
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><styleSheet xmlns=\"{}\">\
             <fonts count=\"2\"><font><sz val=\"11\"/><name val=\"Calibri\"/></font>\
             <font><b/><sz val=\"11\"/><name val=\"Calibri\"/></font></fonts>\
             <fills count=\"2\"><fill><patternFill patternType=\"none\"/></fill><fill><patternFill patternType=\"gray125\"/></fill></fills>\
             <borders count=\"1\"><border><left/><right/><top/><bottom/><diagonal/></border></borders>\
             <cellStyleXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></cellStyleXfs>\
             <cellXfs count=\"2\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\"/>\
             <xf numFmtId=\"0\" fontId=\"1\" fillId=\"0\" borderId=\"0\" xfId=\"0\" applyFont=\"1\"/></cellXfs>\
             <cellStyles count=\"1\"><cellStyle name=\"Normal\" xfId=\"0\" builtinId=\"0\"/></cellStyles>\
             </styleSheet>",
            MAIN_NS
        )?;
        Ok(())
    }

    fn write_data_sheet<W: Write + ?Sized>(ctx: &EncodeContext, rows: &[Record], out: &mut W) -> Result<usize, ExportError> {
        let widths = ctx.options.formatting.auto_width.then(|| column_widths(ctx, rows));
        begin_sheet(out, widths.as_deref())?;

        let header: Vec<Cell> = ctx.fields.iter().map(Cell::text).collect();
        write_row(out, 1, &header, Some(HEADER_STYLE))?;

        let mut written = 0;
        for (i, record) in rows.iter().enumerate() {
            ctx.checkpoint(i)?;
            let cells: Vec<Cell> = ctx.fields.iter().map(|f| Cell::from_value(record.get(f))).collect();
            write_row(out, i + 2, &cells, None)?;
            written += 1;
        }

        end_sheet(out)?;
        Ok(written)
    }

    fn write_metadata_sheet<W: Write + ?Sized>(ctx: &EncodeContext, count: usize, out: &mut W) -> Result<(), ExportError> {
        let entries = [
            ("Job ID", ctx.job_id.to_string()),
            ("Data Source", ctx.data_source.to_string()),
            ("Exported At", ctx.exported_at.to_rfc3339()),
            ("Record Count", count.to_string()),
            ("Fields", ctx.fields.join(", ")),
            ("Filters", describe_filters(&ctx.filters)),
        ];
        begin_sheet(out, ctx.options.formatting.auto_width.then_some(&[20, 60][..]))?;
        write_row(out, 1, &[Cell::text("Property"), Cell::text("Value")], Some(HEADER_STYLE))?;
        for (i, (key, value)) in entries.into_iter().enumerate() {
            write_row(out, i + 2, &[Cell::text(key), Cell::Text(value)], None)?;
        }
        end_sheet(out)?;
        Ok(())
    }

    fn write_summary_sheet<W: Write + ?Sized>(ctx: &EncodeContext, rows: &[Record], out: &mut W) -> Result<(), ExportError> {
        let summaries = numeric_summaries(&ctx.fields, rows);
        begin_sheet(out, ctx.options.formatting.auto_width.then_some(&[20, 10, 16, 16, 16, 16][..]))?;
        let header: Vec<Cell> = ["Field", "Count", "Sum", "Mean", "Min", "Max"].into_iter().map(Cell::text).collect();
        write_row(out, 1, &header, Some(HEADER_STYLE))?;
        for (i, s) in summaries.iter().enumerate() {
            let cells = [
                Cell::text(s.field.clone()),
                Cell::Number(s.count.to_string()),
                Cell::number(s.sum),
                Cell::number(s.mean),
                Cell::number(s.min),
                Cell::number(s.max),
            ];
            write_row(out, i + 2, &cells, None)?;
        }
        end_sheet(out)?;
        Ok(())
    }
}

impl FormatEncoder for ExcelEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Excel
    }

    fn write_rows(
        &self,
        ctx: &EncodeContext,
        rows: &[Record],
        sink: &mut dyn ArtifactSink,
    ) -> Result<usize, ExportError> {
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        let sheets = Self::sheet_names(ctx);
        let mut zip = ZipWriter::new(sink);

        Self::write_package_parts(&mut zip, options, &sheets)?;

        zip.start_file("xl/worksheets/sheet1.xml", options)?;
        let written = Self::write_data_sheet(ctx, rows, &mut zip)?;

        let mut next_sheet = 2;
        if ctx.options.include_metadata {
            zip.start_file(format!("xl/worksheets/sheet{}.xml", next_sheet), options)?;
            Self::write_metadata_sheet(ctx, written, &mut zip)?;
            next_sheet += 1;
        }
        if ctx.options.include_summary {
            ctx.cancel.check()?;
            zip.start_file(format!("xl/worksheets/sheet{}.xml", next_sheet), options)?;
            Self::write_summary_sheet(ctx, rows, &mut zip)?;
        }

        zip.finish()?;
        Ok(written)
    }
}
