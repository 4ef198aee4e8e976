//! Document content model and parsing (word/document.xml, headers, footers)
//!
//! The model keeps exactly what template rendering needs to see (paragraph
//! text split into runs, hyperlinks, breaks, table structure) and carries
//! everything else through as verbatim XML so a rendered part can be written
//! back without losing formatting.

use std::fmt;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{OoxmlError, Result};

/// Local names of the elements that hold block content in a part
const CONTAINERS: &[&[u8]] = &[b"body", b"hdr", b"ftr"];

/// An already-serialized XML fragment carried through untouched
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawXml(pub String);

impl RawXml {
    /// Wrap a serialized fragment
    pub fn new(xml: impl Into<String>) -> Self {
        Self(xml.into())
    }

    /// The serialized fragment
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RawXml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed document part
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    /// Block content of the part
    pub blocks: Vec<Block>,
    /// Trailing section properties (`w:sectPr`), body parts only
    pub section_properties: Option<RawXml>,
}

/// Block-level elements
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// A paragraph
    Paragraph(Paragraph),
    /// A table
    Table(Table),
}

/// A paragraph with its properties and ordered content
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Paragraph {
    /// Paragraph properties (`w:pPr`)
    pub properties: Option<RawXml>,
    /// Runs, hyperlinks and verbatim children in document order
    pub children: Vec<ParagraphChild>,
}

/// Child elements of a paragraph
#[derive(Debug, Clone, PartialEq)]
pub enum ParagraphChild {
    /// A run
    Run(Run),
    /// A hyperlink
    Hyperlink(Hyperlink),
    /// Content the template engine does not interpret (bookmarks, fields)
    Raw(RawXml),
}

/// A hyperlink and the runs it displays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hyperlink {
    /// Relationship ID for external URLs (r:id)
    pub id: Option<String>,
    /// Internal anchor name (w:anchor)
    pub anchor: Option<String>,
    /// Child runs inside the hyperlink
    pub runs: Vec<Run>,
}

/// A run: the smallest unit of formatted content
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Run {
    /// Run properties (`w:rPr`)
    pub properties: Option<RawXml>,
    /// Text content
    pub text: Option<RunText>,
    /// A break preceding the text
    pub brk: Option<Break>,
    /// Non-text content (drawings, field codes), serialized between break and text
    pub objects: Option<RawXml>,
}

/// Text of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunText {
    /// The text. Tabs are kept as `\t`.
    pub content: String,
    /// Whitespace handling
    pub space: Space,
}

/// Whitespace handling of run text (`xml:space`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Space {
    /// Leading/trailing whitespace may be collapsed by consumers
    #[default]
    Default,
    /// Whitespace is significant
    Preserve,
}

/// A break inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Break {
    /// Kind of break
    pub kind: BreakKind,
}

/// Kind of break (`w:type`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BreakKind {
    /// A line break
    #[default]
    TextWrapping,
    /// A page break
    Page,
    /// A column break
    Column,
}

impl BreakKind {
    fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some("page") => BreakKind::Page,
            Some("column") => BreakKind::Column,
            _ => BreakKind::TextWrapping,
        }
    }
}

/// A table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Table properties (`w:tblPr`)
    pub properties: Option<RawXml>,
    /// Column grid
    pub grid: Vec<GridColumn>,
    /// Table rows
    pub rows: Vec<TableRow>,
}

/// A column of the table grid
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridColumn {
    /// Column width in twentieths of a point, as written
    pub width: Option<String>,
}

/// A table row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRow {
    /// Row properties (`w:trPr`)
    pub properties: Option<RawXml>,
    /// Cells in this row
    pub cells: Vec<TableCell>,
}

/// A table cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableCell {
    /// Cell properties (`w:tcPr`)
    pub properties: Option<RawXml>,
    /// Cell content: paragraphs and nested tables
    pub content: Vec<Block>,
}

impl Document {
    /// Parse the block content of a document, header or footer part
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let mut parser = PartParser::new(xml);

        loop {
            let (_, event) = parser.next()?;
            match event {
                Event::Start(ref e) if CONTAINERS.contains(&e.local_name().as_ref()) => {
                    let end = e.local_name().as_ref().to_vec();
                    return parser.parse_container(&end);
                }
                Event::Empty(ref e) if CONTAINERS.contains(&e.local_name().as_ref()) => {
                    return Ok(Document::default());
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

    /// Get plain text content, one line per top-level paragraph
    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .map(Block::plain_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Block {
    /// Plain text of the block (table cells separated by tabs, rows by newlines)
    pub fn plain_text(&self) -> String {
        match self {
            Block::Paragraph(p) => p.plain_text(),
            Block::Table(t) => t
                .rows
                .iter()
                .map(|row| {
                    row.cells
                        .iter()
                        .map(TableCell::plain_text)
                        .collect::<Vec<_>>()
                        .join("\t")
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// The paragraph, if this block is one
    pub fn as_paragraph(&self) -> Option<&Paragraph> {
        match self {
            Block::Paragraph(p) => Some(p),
            Block::Table(_) => None,
        }
    }
}

impl Paragraph {
    /// A paragraph holding a single text run
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            properties: None,
            children: vec![ParagraphChild::Run(Run::text(text))],
        }
    }

    /// Concatenated text of all runs, hyperlinks included
    pub fn plain_text(&self) -> String {
        self.runs().filter_map(|run| run.text_str()).collect()
    }

    /// Check if this paragraph has no visible text
    pub fn is_empty(&self) -> bool {
        self.plain_text().trim().is_empty()
    }

    /// All runs in document order, flattening hyperlinks
    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.children.iter().flat_map(|child| match child {
            ParagraphChild::Run(run) => std::slice::from_ref(run).iter(),
            ParagraphChild::Hyperlink(link) => link.runs.iter(),
            ParagraphChild::Raw(_) => std::slice::Iter::default(),
        })
    }

    /// The first run's properties, used when runs are regenerated
    pub fn first_run_properties(&self) -> Option<&RawXml> {
        self.runs().next().and_then(|run| run.properties.as_ref())
    }
}

impl Run {
    /// A plain text run without properties
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(RunText::new(text)),
            ..Self::default()
        }
    }

    /// A run holding only a break
    pub fn break_run(kind: BreakKind, properties: Option<RawXml>) -> Self {
        Self {
            properties,
            brk: Some(Break { kind }),
            ..Self::default()
        }
    }

    /// The run's text, if any
    pub fn text_str(&self) -> Option<&str> {
        self.text.as_ref().map(|t| t.content.as_str())
    }

    /// True if the run holds text and nothing else (no break, no objects)
    pub fn is_text_only(&self) -> bool {
        self.text.is_some() && self.brk.is_none() && self.objects.is_none()
    }

    fn has_content(&self) -> bool {
        self.text.is_some() || self.brk.is_some() || self.objects.is_some()
    }
}

impl RunText {
    /// Text with default whitespace handling
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            space: Space::Default,
        }
    }

    /// Text with significant whitespace
    pub fn preserved(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            space: Space::Preserve,
        }
    }
}

impl TableCell {
    /// A cell holding a single empty paragraph
    pub fn empty() -> Self {
        Self {
            properties: None,
            content: vec![Block::Paragraph(Paragraph::default())],
        }
    }

    /// The first paragraph of the cell
    pub fn first_paragraph(&self) -> Option<&Paragraph> {
        self.content.iter().find_map(Block::as_paragraph)
    }

    /// Plain text of the cell, paragraphs separated by newlines
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .map(Block::plain_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl TableRow {
    /// The first paragraph of the first cell, which carries row directives
    pub fn first_paragraph(&self) -> Option<&Paragraph> {
        self.cells.first().and_then(TableCell::first_paragraph)
    }
}

/// Streaming reader over one part, capturing unrecognized content verbatim
struct PartParser<'x> {
    reader: Reader<&'x [u8]>,
    xml: &'x [u8],
}

impl<'x> PartParser<'x> {
    fn new(xml: &'x [u8]) -> Self {
        let mut reader = Reader::from_reader(xml);
        // Whitespace inside w:t is content
        reader.config_mut().trim_text(false);
        Self { reader, xml }
    }

    fn position(&self) -> usize {
        self.reader.buffer_position() as usize
    }

    /// Read the next event along with the byte offset it starts at
    fn next(&mut self) -> Result<(usize, Event<'x>)> {
        let start = self.position();
        let event = self.reader.read_event()?;
        Ok((start, event))
    }

    /// Source text from `start` up to the current position
    fn slice(&self, start: usize) -> RawXml {
        RawXml(String::from_utf8_lossy(&self.xml[start..self.position()]).into_owned())
    }

    /// Consume the rest of an element whose start tag was just read
    fn skip_element(&mut self) -> Result<()> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next()?.1 {
                Event::Start(_) => depth += 1,
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Capture an element whose start tag began at `start`
    fn capture_element(&mut self, start: usize) -> Result<RawXml> {
        self.skip_element()?;
        Ok(self.slice(start))
    }

    fn parse_container(&mut self, end: &[u8]) -> Result<Document> {
        let mut document = Document::default();

        loop {
            let (start, event) = self.next()?;
            match event {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"p" => document
                        .blocks
                        .push(Block::Paragraph(self.parse_paragraph()?)),
                    b"tbl" => document.blocks.push(Block::Table(self.parse_table()?)),
                    b"sectPr" => document.section_properties = Some(self.capture_element(start)?),
                    // Content controls and other wrappers are not templated
                    _ => self.skip_element()?,
                },
                Event::Empty(ref e) => match e.local_name().as_ref() {
                    b"p" => document
                        .blocks
                        .push(Block::Paragraph(Paragraph::default())),
                    b"sectPr" => document.section_properties = Some(self.slice(start)),
                    _ => {}
                },
                Event::End(ref e) if e.local_name().as_ref() == end => return Ok(document),
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
    }

    fn parse_paragraph(&mut self) -> Result<Paragraph> {
        let mut paragraph = Paragraph::default();

        loop {
            let (start, event) = self.next()?;
            match event {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"pPr" => paragraph.properties = Some(self.capture_element(start)?),
                    b"r" => paragraph
                        .children
                        .extend(self.parse_run()?.into_iter().map(ParagraphChild::Run)),
                    b"hyperlink" => {
                        let hyperlink = self.parse_hyperlink(e)?;
                        paragraph.children.push(ParagraphChild::Hyperlink(hyperlink));
                    }
                    _ => {
                        let raw = self.capture_element(start)?;
                        paragraph.children.push(ParagraphChild::Raw(raw));
                    }
                },
                Event::Empty(ref e) => match e.local_name().as_ref() {
                    b"pPr" => paragraph.properties = Some(self.slice(start)),
                    // Spell-check markers split runs and carry no content
                    b"r" | b"proofErr" | b"lastRenderedPageBreak" => {}
                    b"hyperlink" => paragraph
                        .children
                        .push(ParagraphChild::Hyperlink(hyperlink_attrs(e))),
                    _ => paragraph.children.push(ParagraphChild::Raw(self.slice(start))),
                },
                Event::End(ref e) if e.local_name().as_ref() == b"p" => return Ok(paragraph),
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
    }

    fn parse_hyperlink(&mut self, start_tag: &BytesStart) -> Result<Hyperlink> {
        let mut hyperlink = hyperlink_attrs(start_tag);

        loop {
            match self.next()?.1 {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"r" => hyperlink.runs.extend(self.parse_run()?),
                    _ => self.skip_element()?,
                },
                Event::End(ref e) if e.local_name().as_ref() == b"hyperlink" => {
                    return Ok(hyperlink)
                }
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
    }

    /// Parse one `w:r`. A run whose content does not fit the break, objects,
    /// text order is split into several runs sharing the same properties.
    fn parse_run(&mut self) -> Result<Vec<Run>> {
        let mut properties = None;
        let mut pieces: Vec<Run> = Vec::new();
        let mut current = Run::default();

        loop {
            let (start, event) = self.next()?;
            match event {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"rPr" => properties = Some(self.capture_element(start)?),
                    b"t" => {
                        let preserve = get_attr(e, b"xml:space").as_deref() == Some("preserve");
                        let text = self.read_text(b"t")?;
                        append_text(&mut current, &text, preserve);
                    }
                    b"br" | b"cr" => {
                        let kind = BreakKind::from_attr(get_attr(e, b"w:type").as_deref());
                        self.skip_element()?;
                        push_break(&mut pieces, &mut current, kind);
                    }
                    b"lastRenderedPageBreak" => self.skip_element()?,
                    _ => {
                        let raw = self.capture_element(start)?;
                        push_object(&mut pieces, &mut current, raw);
                    }
                },
                Event::Empty(ref e) => match e.local_name().as_ref() {
                    b"rPr" => properties = Some(self.slice(start)),
                    b"t" => append_text(&mut current, "", false),
                    b"tab" => append_text(&mut current, "\t", false),
                    b"br" | b"cr" => {
                        let kind = BreakKind::from_attr(get_attr(e, b"w:type").as_deref());
                        push_break(&mut pieces, &mut current, kind);
                    }
                    b"lastRenderedPageBreak" => {}
                    _ => {
                        let raw = self.slice(start);
                        push_object(&mut pieces, &mut current, raw);
                    }
                },
                Event::End(ref e) if e.local_name().as_ref() == b"r" => break,
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }

        if current.has_content() {
            pieces.push(current);
        }
        for run in &mut pieces {
            run.properties = properties.clone();
        }
        Ok(pieces)
    }

    /// Collect the text of an element up to its end tag
    fn read_text(&mut self, end: &[u8]) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.next()?.1 {
                Event::Text(ref e) => text.push_str(&e.unescape()?),
                Event::CData(ref e) => text.push_str(&String::from_utf8_lossy(e)),
                Event::End(ref e) if e.local_name().as_ref() == end => return Ok(text),
                Event::Start(_) => self.skip_element()?,
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
    }

    fn parse_table(&mut self) -> Result<Table> {
        let mut table = Table::default();

        loop {
            let (start, event) = self.next()?;
            match event {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"tblPr" => table.properties = Some(self.capture_element(start)?),
                    b"tblGrid" => table.grid = self.parse_grid()?,
                    b"tr" => table.rows.push(self.parse_row()?),
                    _ => self.skip_element()?,
                },
                Event::Empty(ref e) => {
                    if e.local_name().as_ref() == b"tblPr" {
                        table.properties = Some(self.slice(start));
                    }
                }
                Event::End(ref e) if e.local_name().as_ref() == b"tbl" => return Ok(table),
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
    }

    fn parse_grid(&mut self) -> Result<Vec<GridColumn>> {
        let mut grid = Vec::new();

        loop {
            match self.next()?.1 {
                Event::Empty(ref e) if e.local_name().as_ref() == b"gridCol" => {
                    grid.push(GridColumn {
                        width: get_attr(e, b"w:w"),
                    });
                }
                Event::Start(ref e) => {
                    if e.local_name().as_ref() == b"gridCol" {
                        grid.push(GridColumn {
                            width: get_attr(e, b"w:w"),
                        });
                    }
                    self.skip_element()?;
                }
                Event::End(ref e) if e.local_name().as_ref() == b"tblGrid" => return Ok(grid),
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
    }

    fn parse_row(&mut self) -> Result<TableRow> {
        let mut row = TableRow::default();

        loop {
            let (start, event) = self.next()?;
            match event {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"trPr" => row.properties = Some(self.capture_element(start)?),
                    b"tc" => row.cells.push(self.parse_cell()?),
                    _ => self.skip_element()?,
                },
                Event::Empty(ref e) => match e.local_name().as_ref() {
                    b"trPr" => row.properties = Some(self.slice(start)),
                    b"tc" => row.cells.push(TableCell::empty()),
                    _ => {}
                },
                Event::End(ref e) if e.local_name().as_ref() == b"tr" => return Ok(row),
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
    }

    fn parse_cell(&mut self) -> Result<TableCell> {
        let mut cell = TableCell::default();

        loop {
            let (start, event) = self.next()?;
            match event {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"tcPr" => cell.properties = Some(self.capture_element(start)?),
                    b"p" => cell.content.push(Block::Paragraph(self.parse_paragraph()?)),
                    b"tbl" => cell.content.push(Block::Table(self.parse_table()?)),
                    _ => self.skip_element()?,
                },
                Event::Empty(ref e) => match e.local_name().as_ref() {
                    b"tcPr" => cell.properties = Some(self.slice(start)),
                    b"p" => cell.content.push(Block::Paragraph(Paragraph::default())),
                    _ => {}
                },
                Event::End(ref e) if e.local_name().as_ref() == b"tc" => {
                    if cell.content.is_empty() {
                        cell.content.push(Block::Paragraph(Paragraph::default()));
                    }
                    return Ok(cell);
                }
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
    }
}

fn append_text(run: &mut Run, text: &str, preserve: bool) {
    let run_text = run.text.get_or_insert_with(RunText::default);
    run_text.content.push_str(text);
    if preserve {
        run_text.space = Space::Preserve;
    }
}

/// A break must come first in its run, so anything already collected is
/// flushed into a run of its own.
fn push_break(pieces: &mut Vec<Run>, current: &mut Run, kind: BreakKind) {
    if current.has_content() {
        pieces.push(std::mem::take(current));
    }
    current.brk = Some(Break { kind });
}

/// Objects are written before the text, so collected text is flushed first.
fn push_object(pieces: &mut Vec<Run>, current: &mut Run, raw: RawXml) {
    if current.text.is_some() {
        pieces.push(std::mem::take(current));
    }
    match current.objects {
        Some(ref mut objects) => objects.0.push_str(raw.as_str()),
        None => current.objects = Some(raw),
    }
}

fn hyperlink_attrs(e: &BytesStart) -> Hyperlink {
    Hyperlink {
        id: get_attr(e, b"r:id"),
        anchor: get_attr(e, b"w:anchor"),
        runs: Vec::new(),
    }
}

/// Get an attribute value by qualified name, unescaped
fn get_attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn unexpected_eof() -> OoxmlError {
    OoxmlError::InvalidStructure("unexpected end of part".to_string())
}
