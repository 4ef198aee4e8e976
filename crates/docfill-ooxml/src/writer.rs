//! Part writer
//!
//! Serializes the block model back to WordprocessingML and splices it into
//! the original part, so the root element, its namespace declarations and
//! anything outside the body survive unchanged.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::document::{
    Block, BreakKind, Document, Hyperlink, Paragraph, ParagraphChild, Run, Space, Table,
    TableCell, TableRow,
};
use crate::error::{OoxmlError, Result};

/// Serializer for block content
#[derive(Debug, Default)]
pub struct BodyWriter {
    /// XML output buffer
    output: String,
}

impl BodyWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a whole document's content (blocks, then section properties)
    pub fn write_document(mut self, document: &Document) -> String {
        for block in &document.blocks {
            self.write_block(block);
        }
        if let Some(ref sect) = document.section_properties {
            self.output.push_str(sect.as_str());
        }
        self.output
    }

    /// Serialize blocks without section properties
    pub fn write_blocks(mut self, blocks: &[Block]) -> String {
        for block in blocks {
            self.write_block(block);
        }
        self.output
    }

    fn write_block(&mut self, block: &Block) {
        match block {
            Block::Paragraph(p) => self.write_paragraph(p),
            Block::Table(t) => self.write_table(t),
        }
    }

    fn write_paragraph(&mut self, paragraph: &Paragraph) {
        if paragraph.properties.is_none() && paragraph.children.is_empty() {
            self.output.push_str("<w:p/>");
            return;
        }

        self.output.push_str("<w:p>");
        if let Some(ref props) = paragraph.properties {
            self.output.push_str(props.as_str());
        }
        for child in &paragraph.children {
            match child {
                ParagraphChild::Run(run) => self.write_run(run),
                ParagraphChild::Hyperlink(link) => self.write_hyperlink(link),
                ParagraphChild::Raw(raw) => self.output.push_str(raw.as_str()),
            }
        }
        self.output.push_str("</w:p>");
    }

    fn write_hyperlink(&mut self, link: &Hyperlink) {
        self.output.push_str("<w:hyperlink");
        if let Some(ref id) = link.id {
            self.output
                .push_str(&format!(" r:id=\"{}\"", escape_xml(id)));
        }
        if let Some(ref anchor) = link.anchor {
            self.output
                .push_str(&format!(" w:anchor=\"{}\"", escape_xml(anchor)));
        }
        self.output.push('>');
        for run in &link.runs {
            self.write_run(run);
        }
        self.output.push_str("</w:hyperlink>");
    }

    fn write_run(&mut self, run: &Run) {
        self.output.push_str("<w:r>");
        if let Some(ref props) = run.properties {
            self.output.push_str(props.as_str());
        }
        if let Some(brk) = run.brk {
            match brk.kind {
                BreakKind::TextWrapping => self.output.push_str("<w:br/>"),
                BreakKind::Page => self.output.push_str("<w:br w:type=\"page\"/>"),
                BreakKind::Column => self.output.push_str("<w:br w:type=\"column\"/>"),
            }
        }
        if let Some(ref objects) = run.objects {
            self.output.push_str(objects.as_str());
        }
        if let Some(ref text) = run.text {
            let force_preserve = text.space == Space::Preserve;
            for (i, segment) in text.content.split('\t').enumerate() {
                if i > 0 {
                    self.output.push_str("<w:tab/>");
                }
                if segment.is_empty() {
                    continue;
                }
                if force_preserve || needs_preserve(segment) {
                    self.output.push_str("<w:t xml:space=\"preserve\">");
                } else {
                    self.output.push_str("<w:t>");
                }
                self.output.push_str(&escape_xml(segment));
                self.output.push_str("</w:t>");
            }
        }
        self.output.push_str("</w:r>");
    }

    fn write_table(&mut self, table: &Table) {
        self.output.push_str("<w:tbl>");
        if let Some(ref props) = table.properties {
            self.output.push_str(props.as_str());
        }
        self.output.push_str("<w:tblGrid>");
        for column in &table.grid {
            match column.width {
                Some(ref width) => self
                    .output
                    .push_str(&format!("<w:gridCol w:w=\"{}\"/>", escape_xml(width))),
                None => self.output.push_str("<w:gridCol/>"),
            }
        }
        self.output.push_str("</w:tblGrid>");
        for row in &table.rows {
            self.write_row(row);
        }
        self.output.push_str("</w:tbl>");
    }

    fn write_row(&mut self, row: &TableRow) {
        self.output.push_str("<w:tr>");
        if let Some(ref props) = row.properties {
            self.output.push_str(props.as_str());
        }
        for cell in &row.cells {
            self.write_cell(cell);
        }
        self.output.push_str("</w:tr>");
    }

    fn write_cell(&mut self, cell: &TableCell) {
        self.output.push_str("<w:tc>");
        if let Some(ref props) = cell.properties {
            self.output.push_str(props.as_str());
        }
        for block in &cell.content {
            self.write_block(block);
        }
        // A cell must end with a paragraph
        if !matches!(cell.content.last(), Some(Block::Paragraph(_))) {
            self.output.push_str("<w:p/>");
        }
        self.output.push_str("</w:tc>");
    }
}

/// Replace the block content of `original` (a document, header or footer
/// part) with the serialized `document`.
pub fn replace_body(original: &[u8], document: &Document) -> Result<Vec<u8>> {
    let (content_start, content_end) = locate_container_content(original)?;
    let body = BodyWriter::new().write_document(document);

    let mut output = Vec::with_capacity(content_start + body.len() + original.len() - content_end);
    output.extend_from_slice(&original[..content_start]);
    output.extend_from_slice(body.as_bytes());
    output.extend_from_slice(&original[content_end..]);
    Ok(output)
}

/// Byte range between the container start tag and its end tag
fn locate_container_content(xml: &[u8]) -> Result<(usize, usize)> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut depth = 0usize;
    let mut content_start = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(ref e) => {
                let is_container =
                    matches!(e.local_name().as_ref(), b"body" | b"hdr" | b"ftr");
                if content_start.is_none() && is_container {
                    content_start = Some(reader.buffer_position() as usize);
                    depth = 0;
                } else if content_start.is_some() {
                    depth += 1;
                }
            }
            Event::End(_) if content_start.is_some() => {
                if depth == 0 {
                    return Ok((content_start.unwrap_or(before), before));
                }
                depth -= 1;
            }
            Event::Empty(ref e) if content_start.is_none() => {
                if matches!(e.local_name().as_ref(), b"body" | b"hdr" | b"ftr") {
                    return Err(OoxmlError::InvalidStructure(
                        "self-closing body element cannot be filled".to_string(),
                    ));
                }
            }
            Event::Eof => {
                return Err(OoxmlError::InvalidStructure(
                    "no body, header or footer element found".to_string(),
                ))
            }
            _ => {}
        }
    }
}

fn needs_preserve(text: &str) -> bool {
    text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace)
}

/// Escape special XML characters
fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{GridColumn, RawXml, RunText};

    #[test]
    fn test_write_simple_paragraph() {
        let doc = Document {
            blocks: vec![Block::Paragraph(Paragraph::with_text("Hello"))],
            section_properties: None,
        };
        assert_eq!(
            BodyWriter::new().write_document(&doc),
            "<w:p><w:r><w:t>Hello</w:t></w:r></w:p>"
        );
    }

    #[test]
    fn test_write_preserves_whitespace_and_escapes() {
        let run = Run {
            text: Some(RunText::new(" a < b ")),
            ..Run::default()
        };
        let para = Paragraph {
            properties: None,
            children: vec![ParagraphChild::Run(run)],
        };
        let xml = BodyWriter::new().write_blocks(&[Block::Paragraph(para)]);
        assert!(xml.contains("<w:t xml:space=\"preserve\"> a &lt; b </w:t>"));
    }

    #[test]
    fn test_write_break_and_tab() {
        let run = Run {
            properties: Some(RawXml::new("<w:rPr><w:b/></w:rPr>")),
            text: Some(RunText::new("a\tb")),
            brk: Some(crate::document::Break {
                kind: BreakKind::Page,
            }),
            objects: None,
        };
        let para = Paragraph {
            properties: None,
            children: vec![ParagraphChild::Run(run)],
        };
        let xml = BodyWriter::new().write_blocks(&[Block::Paragraph(para)]);
        assert_eq!(
            xml,
            "<w:p><w:r><w:rPr><w:b/></w:rPr><w:br w:type=\"page\"/><w:t>a</w:t><w:tab/><w:t>b</w:t></w:r></w:p>"
        );
    }

    #[test]
    fn test_write_table_backfills_cell() {
        let table = Table {
            properties: None,
            grid: vec![GridColumn {
                width: Some("2000".to_string()),
            }],
            rows: vec![TableRow {
                properties: None,
                cells: vec![TableCell::default()],
            }],
        };
        let xml = BodyWriter::new().write_blocks(&[Block::Table(table)]);
        assert_eq!(
            xml,
            "<w:tbl><w:tblGrid><w:gridCol w:w=\"2000\"/></w:tblGrid><w:tr><w:tc><w:p/></w:tc></w:tr></w:tbl>"
        );
    }

    #[test]
    fn test_replace_body_keeps_envelope() {
        let original = br#"<?xml version="1.0"?><w:document xmlns:w="ns"><w:body><w:p><w:r><w:t>old</w:t></w:r></w:p><w:sectPr/></w:body></w:document>"#;
        let mut doc = Document::parse(original).unwrap();
        doc.blocks = vec![Block::Paragraph(Paragraph::with_text("new"))];

        let output = replace_body(original, &doc).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_eq!(
            output,
            r#"<?xml version="1.0"?><w:document xmlns:w="ns"><w:body><w:p><w:r><w:t>new</w:t></w:r></w:p><w:sectPr/></w:body></w:document>"#
        );
    }

    #[test]
    fn test_replace_body_without_container() {
        let doc = Document::default();
        assert!(replace_body(b"<root/>", &doc).is_err());
    }
}
