use std::io::Write;
use std::ops::Range;

use crate::domains::export::record::{describe_filters, field_text, Record};
use crate::domains::export::types::*;
use crate::domains::export::writer::*;

const MARGIN: f32 = 36.0;
const TITLE_SIZE: f32 = 14.0;
const BODY_SIZE: f32 = 8.0;
const LINE_HEIGHT: f32 = 11.0;
/// Courier advance width per point of font size
const CHAR_WIDTH_RATIO: f32 = 0.6;
/// Space taken by the title block above the table
const HEADER_BLOCK: f32 = 46.0;
const MAX_COLUMN_CHARS: usize = 30;
const COLUMN_GAP: usize = 2;

// fixed object ids; pages start after these
const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const FONT_ID: usize = 3;
const BOLD_FONT_ID: usize = 4;
const FIRST_PAGE_ID: usize = 5;

/// Byte-counting wrapper so xref offsets can be recorded while streaming
struct CountingWriter<'a, W: Write + ?Sized> {
    inner: &'a mut W,
    written: u64,
}

impl<W: Write + ?Sized> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Debug, Clone)]
struct Column {
    field: String,
    width: usize,
}

/// Page geometry plus how columns and rows are split across pages
#[derive(Debug)]
struct Layout {
    width: f32,
    height: f32,
    columns: Vec<Column>,
    /// Column ranges that fit side by side on one page
    groups: Vec<Range<usize>>,
    rows_per_page: usize,
    pages_per_group: usize,
}

impl Layout {
    fn new(ctx: &EncodeContext, rows: &[Record]) -> Self {
        let (w, h) = ctx.options.page_size.unwrap_or_default().dimensions();
        let (width, height) = match ctx.options.orientation.unwrap_or_default() {
            Orientation::Portrait => (w, h),
            Orientation::Landscape => (h, w),
        };

        let line_chars = ((width - 2.0 * MARGIN) / (BODY_SIZE * CHAR_WIDTH_RATIO)).floor() as usize;
        let columns: Vec<Column> = ctx
            .fields
            .iter()
            .map(|field| {
                let longest = rows
                    .iter()
                    .map(|r| field_text(r, field).chars().count())
                    .max()
                    .unwrap_or(0)
                    .max(field.chars().count());
                Column {
                    field: field.clone(),
                    width: longest.min(MAX_COLUMN_CHARS).min(line_chars.saturating_sub(COLUMN_GAP)).max(1),
                }
            })
            .collect();

        let mut groups = Vec::new();
        let mut start = 0;
        let mut used = 0;
        for (i, column) in columns.iter().enumerate() {
            let needed = column.width + COLUMN_GAP;
            if i > start && used + needed > line_chars {
                groups.push(start..i);
                start = i;
                used = 0;
            }
            used += needed;
        }
        if start < columns.len() {
            groups.push(start..columns.len());
        }
        if groups.is_empty() {
            groups.push(0..0);
        }

        let rows_per_page = (((height - 2.0 * MARGIN - HEADER_BLOCK) / LINE_HEIGHT).floor() as usize).max(1);
        let pages_per_group = rows.len().div_ceil(rows_per_page).max(1);

        Self {
            width,
            height,
            columns,
            groups,
            rows_per_page,
            pages_per_group,
        }
    }

    fn page_count(&self) -> usize {
        self.groups.len() * self.pages_per_group
    }
}

/// Byte for `c` in the fonts' WinAnsiEncoding, when it has one outside ASCII
fn win_ansi_byte(c: char) -> Option<u8> {
    match c {
        '\u{A0}'..='\u{FF}' => Some(c as u8),
        '\u{20AC}' => Some(0x80),
        '\u{2026}' => Some(0x85),
        '\u{2018}' => Some(0x91),
        '\u{2019}' => Some(0x92),
        '\u{201C}' => Some(0x93),
        '\u{201D}' => Some(0x94),
        '\u{2022}' => Some(0x95),
        '\u{2013}' => Some(0x96),
        '\u{2014}' => Some(0x97),
        _ => None,
    }
}

/// Literal string body. Parentheses and backslashes are escaped, WinAnsi
/// characters become octal escapes, anything else is replaced by `?`.
fn pdf_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c == ' ' || c.is_ascii_graphic() => out.push(c),
            c => match win_ansi_byte(c) {
                Some(byte) => out.push_str(&format!("\\{:03o}", byte)),
                None => out.push('?'),
            },
        }
    }
    out
}

fn fit_cell(text: &str, width: usize) -> String {
    let count = text.chars().count();
    if count <= width {
        format!("{:<width$}", text, width = width)
    } else if width <= 3 {
        text.chars().take(width).collect()
    } else {
        let mut cut: String = text.chars().take(width - 3).collect();
        cut.push_str("...");
        cut
    }
}

fn text_line(content: &mut String, font: &str, size: f32, x: f32, y: f32, text: &str) {
    content.push_str(&format!(
        "BT /{} {} Tf {:.2} {:.2} Td ({}) Tj ET\n",
        font,
        size,
        x,
        y,
        pdf_string(text)
    ));
}

pub struct PdfEncoder;

impl PdfEncoder {
    fn write_object<W: Write + ?Sized>(
        out: &mut CountingWriter<'_, W>,
        offsets: &mut [u64],
        id: usize,
        body: &str,
    ) -> std::io::Result<()> {
        offsets[id - 1] = out.written;
        write!(out, "{} 0 obj\n{}\nendobj\n", id, body)
    }

    fn page_content(
        ctx: &EncodeContext,
        layout: &Layout,
        rows: &[Record],
        group: &Range<usize>,
        row_range: Range<usize>,
        page_number: usize,
    ) -> Result<String, ExportError> {
        let mut content = String::new();
        let top = layout.height - MARGIN;
        let columns = &layout.columns[group.clone()];

        text_line(
            &mut content,
            "F2",
            TITLE_SIZE,
            MARGIN,
            top - TITLE_SIZE,
            &format!("{} Export", ctx.data_source.title()),
        );
        text_line(
            &mut content,
            "F1",
            BODY_SIZE,
            MARGIN,
            top - 28.0,
            &format!(
                "Generated {} | Records: {} | Filters: {}",
                ctx.exported_at.format("%Y-%m-%d %H:%M:%S UTC"),
                rows.len(),
                describe_filters(&ctx.filters)
            ),
        );

        let mut y = top - HEADER_BLOCK;
        if columns.is_empty() {
            text_line(&mut content, "F1", BODY_SIZE, MARGIN, y, "No records");
        } else {
            let header: String = columns
                .iter()
                .map(|c| fit_cell(&c.field, c.width + COLUMN_GAP))
                .collect();
            text_line(&mut content, "F2", BODY_SIZE, MARGIN, y, header.trim_end());

            for i in row_range {
                ctx.checkpoint(i)?;
                y -= LINE_HEIGHT;
                let line: String = columns
                    .iter()
                    .map(|c| {
                        let cell = fit_cell(&field_text(&rows[i], &c.field), c.width);
                        format!("{}{}", cell, " ".repeat(COLUMN_GAP))
                    })
                    .collect();
                text_line(&mut content, "F1", BODY_SIZE, MARGIN, y, line.trim_end());
            }
        }

        text_line(
            &mut content,
            "F1",
            BODY_SIZE,
            MARGIN,
            MARGIN / 2.0,
            &format!(
                "Page {} of {} - Total records: {}",
                page_number,
                layout.page_count(),
                rows.len()
            ),
        );
        Ok(content)
    }
}

impl FormatEncoder for PdfEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Pdf
    }

    fn write_rows(
        &self,
        ctx: &EncodeContext,
        rows: &[Record],
        sink: &mut dyn ArtifactSink,
    ) -> Result<usize, ExportError> {
        let layout = Layout::new(ctx, rows);
        let page_count = layout.page_count();
        let object_count = FIRST_PAGE_ID - 1 + 2 * page_count;
        let mut offsets = vec![0u64; object_count];
        let mut out = CountingWriter { inner: sink, written: 0 };

        write!(out, "%PDF-1.4\n%\u{e2}\u{e3}\u{cf}\u{d3}\n")?;
        Self::write_object(&mut out, &mut offsets, CATALOG_ID, &format!("<< /Type /Catalog /Pages {} 0 R >>", PAGES_ID))?;
        Self::write_object(
            &mut out,
            &mut offsets,
            FONT_ID,
            "<< /Type /Font /Subtype /Type1 /BaseFont /Courier /Encoding /WinAnsiEncoding >>",
        )?;
        Self::write_object(
            &mut out,
            &mut offsets,
            BOLD_FONT_ID,
            "<< /Type /Font /Subtype /Type1 /BaseFont /Courier-Bold /Encoding /WinAnsiEncoding >>",
        )?;

        let mut kids = Vec::with_capacity(page_count);
        let mut page_number = 0;
        for group in &layout.groups {
            for chunk in 0..layout.pages_per_group {
                let start = (chunk * layout.rows_per_page).min(rows.len());
                let end = (start + layout.rows_per_page).min(rows.len());
                let page_id = FIRST_PAGE_ID + 2 * page_number;
                let content_id = page_id + 1;
                page_number += 1;

                let content = Self::page_content(ctx, &layout, rows, group, start..end, page_number)?;
                Self::write_object(
                    &mut out,
                    &mut offsets,
                    page_id,
                    &format!(
                        "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {:.0} {:.0}] \
                         /Resources << /Font << /F1 {} 0 R /F2 {} 0 R >> >> /Contents {} 0 R >>",
                        PAGES_ID, layout.width, layout.height, FONT_ID, BOLD_FONT_ID, content_id
                    ),
                )?;
                Self::write_object(
                    &mut out,
                    &mut offsets,
                    content_id,
                    &format!("<< /Length {} >>\nstream\n{}endstream", content.len(), content),
                )?;
                kids.push(format!("{} 0 R", page_id));
            }
        }

        Self::write_object(
            &mut out,
            &mut offsets,
            PAGES_ID,
            &format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), page_count),
        )?;

        let xref_offset = out.written;
        write!(out, "xref\n0 {}\n0000000000 65535 f \n", object_count + 1)?;
        for offset in &offsets {
            write!(out, "{:010} 00000 n \n", offset)?;
        }
        write!(
            out,
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            object_count + 1,
            CATALOG_ID,
            xref_offset
        )?;
        out.flush()?;

        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::writer::test_support::*;
    use serde_json::json;

    fn render(ctx: &EncodeContext, rows: &[Record]) -> String {
        let (bytes, stats) = encode_to_vec(ctx, rows).unwrap();
        assert_eq!(stats.records_written, rows.len());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn test_pdf_string_escaping() {
        assert_eq!(pdf_string("a(b)c\\d"), "a\\(b\\)c\\\\d");
        assert_eq!(pdf_string("tab\there"), "tab?here");
        assert_eq!(pdf_string("日本"), "??");
    }

    #[test]
    fn test_latin1_names_use_win_ansi_escapes() {
        assert_eq!(pdf_string("José"), "Jos\\351");
        assert_eq!(pdf_string("Müller"), "M\\374ller");
        assert_eq!(pdf_string("Ñ"), "\\321");
        assert_eq!(pdf_string("“ok” – €5"), "\\223ok\\224 \\226 \\2005");

        let rows: Vec<Record> = vec![json!({"name": "Zoë Ångström"}).as_object().cloned().unwrap()];
        let ctx = context(ExportFormat::Pdf, &["name"], &rows);
        let text = String::from_utf8_lossy(&encode_to_vec(&ctx, &rows).unwrap().0).into_owned();
        assert!(text.contains("Zo\\353 \\305ngstr\\366m"));
        assert!(!text.contains("Zo?"));
    }

    #[test]
    fn test_fit_cell_pads_and_truncates() {
        assert_eq!(fit_cell("ab", 4), "ab  ");
        assert_eq!(fit_cell("abcdefgh", 6), "abc...");
    }

    #[test]
    fn test_every_row_is_paginated() {
        let rows = employees(150);
        let ctx = context(ExportFormat::Pdf, &["id", "name"], &rows);
        let text = render(&ctx, &rows);

        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.trim_end().ends_with("%%EOF"));
        assert!(text.contains("/Count 3"));
        assert!(text.contains("(Page 3 of 3 - Total records: 150)"));
        assert!(text.contains("(1    Employee 1)"));
        assert!(text.contains("(150  Employee 150)"));
        assert!(text.contains("(Employees Export)"));
    }

    #[test]
    fn test_wide_tables_split_into_column_groups() {
        let record = (0..12)
            .map(|i| (format!("column_number_{:02}", i), json!("x".repeat(25))))
            .collect::<serde_json::Map<_, _>>();
        let rows = vec![record];
        let ctx = context(ExportFormat::Pdf, &[], &rows);
        let text = render(&ctx, &rows);

        let layout = Layout::new(&ctx, &rows);
        assert!(layout.groups.len() > 1);
        assert_eq!(layout.groups.last().unwrap().end, 12);
        assert!(text.contains(&format!("/Count {}", layout.groups.len())));
        assert!(text.contains("column_number_11"));
    }

    #[test]
    fn test_landscape_swaps_media_box() {
        let rows = employees(1);
        let mut ctx = context(ExportFormat::Pdf, &["id"], &rows);
        ctx.options.page_size = Some(PageSize::Letter);
        ctx.options.orientation = Some(Orientation::Landscape);
        let text = render(&ctx, &rows);
        assert!(text.contains("/MediaBox [0 0 792 612]"));
    }

    #[test]
    fn test_empty_export_still_renders_a_page() {
        let ctx = context(ExportFormat::Pdf, &[], &[]);
        let text = render(&ctx, &[]);
        assert!(text.contains("/Count 1"));
        assert!(text.contains("(No records)"));
    }
}
