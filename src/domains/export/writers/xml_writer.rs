use std::borrow::Cow;
use std::io::Write;

use crate::domains::export::record::{cell_text, Record};
use crate::domains::export::types::*;
use crate::domains::export::writer::*;

/// Characters XML 1.0 does not allow anywhere in a document
fn is_forbidden(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}')
}

/// Escape the five markup metacharacters. Characters XML cannot carry become U+FFFD.
pub fn escape_markup(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|c| matches!(c, '&' | '<' | '>' | '"' | '\'') || is_forbidden(c)) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if is_forbidden(c) => out.push(char::REPLACEMENT_CHARACTER),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Turn an arbitrary field name into a usable element name
pub fn element_name(field: &str) -> String {
    let mut name: String = field
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
        .collect();
    let starts_ok = name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_');
    if !starts_ok || name.to_ascii_lowercase().starts_with("xml") {
        name.insert(0, '_');
    }
    name
}

pub struct XmlEncoder;

impl XmlEncoder {
    fn write_metadata<W: Write + ?Sized>(ctx: &EncodeContext, count: usize, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "  <metadata>")?;
        writeln!(out, "    <jobId>{}</jobId>", ctx.job_id)?;
        writeln!(out, "    <dataSource>{}</dataSource>", ctx.data_source)?;
        writeln!(out, "    <exportedAt>{}</exportedAt>", ctx.exported_at.to_rfc3339())?;
        writeln!(out, "    <recordCount>{}</recordCount>", count)?;
        writeln!(out, "    <fields>")?;
        for field in &ctx.fields {
            writeln!(out, "      <field>{}</field>", escape_markup(field))?;
        }
        writeln!(out, "    </fields>")?;
        writeln!(out, "    <filters>")?;
        for (key, value) in &ctx.filters {
            writeln!(
                out,
                "      <filter name=\"{}\">{}</filter>",
                escape_markup(key),
                escape_markup(&cell_text(value))
            )?;
        }
        writeln!(out, "    </filters>")?;
        writeln!(out, "  </metadata>")
    }
}

impl FormatEncoder for XmlEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Xml
    }

    fn write_rows(
        &self,
        ctx: &EncodeContext,
        rows: &[Record],
        sink: &mut dyn ArtifactSink,
    ) -> Result<usize, ExportError> {
        let tags: Vec<String> = ctx.fields.iter().map(|f| element_name(f)).collect();

        writeln!(sink, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
        writeln!(sink, "<export>")?;
        Self::write_metadata(ctx, rows.len(), sink)?;
        writeln!(sink, "  <data>")?;

        let mut written = 0;
        for (i, record) in rows.iter().enumerate() {
            ctx.checkpoint(i)?;
            writeln!(sink, "    <record>")?;
            for (field, tag) in ctx.fields.iter().zip(&tags) {
                match record.get(field) {
                    None | Some(serde_json::Value::Null) => writeln!(sink, "      <{}/>", tag)?,
                    Some(value) => writeln!(
                        sink,
                        "      <{tag}>{}</{tag}>",
                        escape_markup(&cell_text(value)),
                        tag = tag
                    )?,
                }
            }
            writeln!(sink, "    </record>")?;
            written += 1;
        }

        writeln!(sink, "  </data>")?;
        writeln!(sink, "</export>")?;
        sink.flush()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::writer::test_support::*;
    use serde_json::json;

    #[test]
    fn test_escape_markup() {
        assert_eq!(escape_markup("plain"), "plain");
        assert_eq!(
            escape_markup(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&apos;s&lt;/a&gt;"
        );
    }

    #[test]
    fn test_escape_markup_replaces_forbidden_characters() {
        assert_eq!(escape_markup("tab\tline\nret\r"), "tab\tline\nret\r");
        assert_eq!(escape_markup("bell\u{7}nul\u{0}"), "bell\u{FFFD}nul\u{FFFD}");
        assert_eq!(escape_markup("a\u{1B}<b"), "a\u{FFFD}&lt;b");
        assert_eq!(escape_markup("Jos\u{E9}"), "Jos\u{E9}");

        let rows: Vec<Record> = vec![json!({"note": "form\u{C}feed"}).as_object().cloned().unwrap()];
        let ctx = context(ExportFormat::Xml, &["note"], &rows);
        let text = String::from_utf8(encode_to_vec(&ctx, &rows).unwrap().0).unwrap();
        assert!(text.contains("<note>form\u{FFFD}feed</note>"));
        assert!(!text.contains('\u{C}'));
    }

    #[test]
    fn test_element_name_sanitizing() {
        assert_eq!(element_name("email"), "email");
        assert_eq!(element_name("first name"), "first_name");
        assert_eq!(element_name("2fa"), "_2fa");
        assert_eq!(element_name("xmlns"), "_xmlns");
    }

    #[test]
    fn test_document_structure() {
        let rows: Vec<Record> = vec![
            json!({"id": 1, "note": "R&D <lead>"}).as_object().cloned().unwrap(),
            json!({"id": 2, "note": null}).as_object().cloned().unwrap(),
        ];
        let ctx = context(ExportFormat::Xml, &["id", "note"], &rows);
        let (bytes, stats) = encode_to_vec(&ctx, &rows).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert_eq!(stats.records_written, 2);
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<export>"));
        assert!(text.contains("<recordCount>2</recordCount>"));
        assert!(text.contains("<field>note</field>"));
        assert!(text.contains("<note>R&amp;D &lt;lead&gt;</note>"));
        assert!(text.contains("<note/>"));
        assert_eq!(text.matches("<record>").count(), 2);
        assert!(text.trim_end().ends_with("</export>"));
    }
}
