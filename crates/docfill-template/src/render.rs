//! Structural renderer
//!
//! Walks a sequence of paragraphs and tables with a cursor. Each element is
//! classified from its text; an element that opens an `if`, `unless` or `for`
//! without closing it is matched to its `end` by nesting depth, a branch is
//! selected or the loop unrolled, and the enclosed range is rendered
//! recursively. Everything else is rendered in place.
//!
//! Rendering never touches its input: every output element is newly built,
//! so one parsed template can be rendered any number of times.

use docfill_ooxml::{
    Block, BreakKind, Document, Hyperlink, Paragraph, ParagraphChild, RawXml, Run, RunText, Space,
};
use tracing::{debug, warn};

use crate::config::RenderConfig;
use crate::control::{append_pieces, render_text, LoopHeader, Piece};
use crate::directive::{
    classify, find_matching_end, is_self_contained, BranchKind, DirectiveKind, DirectiveMarker,
    DirectiveMatch,
};
use crate::error::{Result, TemplateError};
use crate::expr::{Expr, ParsedExpr};
use crate::fragment::FragmentResolver;
use crate::functions::FunctionRegistry;
use crate::merge::merge_consecutive_runs;
use crate::scope::Scope;
use crate::token::has_directives;
use crate::value::{Marker, MarkerKind, Value};

/// Per-render bookkeeping. A fresh context is created for every render call.
#[derive(Debug, Default)]
pub struct RenderContext {
    /// Names of the fragments currently being rendered, outermost first
    pub include_stack: Vec<String>,
    /// Current fragment nesting depth
    pub depth: usize,
    /// Image and link markers collected so far
    pub markers: Vec<Marker>,
    /// Row/column visibility requests not yet consumed by a table
    pub(crate) visibility: Vec<MarkerKind>,
}

impl RenderContext {
    fn record(&mut self, marker: Marker) {
        match marker.kind {
            MarkerKind::Image | MarkerKind::Link => self.markers.push(marker),
            kind @ (MarkerKind::HideRow | MarkerKind::HideColumn) => self.visibility.push(kind),
        }
    }
}

/// Result of a render
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    /// Rendered elements
    pub blocks: Vec<Block>,
    /// Image and link markers, in document order
    pub markers: Vec<Marker>,
}

/// Renders element sequences against data
pub struct Renderer<'r> {
    pub(crate) functions: &'r FunctionRegistry,
    fragments: &'r dyn FragmentResolver,
    config: &'r RenderConfig,
}

impl<'r> Renderer<'r> {
    /// Create a renderer over shared, read-only collaborators
    pub fn new(
        functions: &'r FunctionRegistry,
        fragments: &'r dyn FragmentResolver,
        config: &'r RenderConfig,
    ) -> Self {
        Self {
            functions,
            fragments,
            config,
        }
    }

    /// Render elements against a data value
    pub fn render(&self, blocks: &[Block], data: &Value) -> Result<RenderOutput> {
        let scope = Scope::from_value(data);
        self.render_with_scope(blocks, &scope)
    }

    /// Render elements against an existing scope
    pub fn render_with_scope(&self, blocks: &[Block], scope: &Scope<'_>) -> Result<RenderOutput> {
        let mut ctx = RenderContext::default();
        let blocks = self.render_blocks(blocks, scope, &mut ctx)?;

        if !ctx.visibility.is_empty() {
            warn!(
                count = ctx.visibility.len(),
                "hideRow/hideColumn used outside a table cell; ignored"
            );
        }
        Ok(RenderOutput {
            blocks,
            markers: ctx.markers,
        })
    }

    /// Render a whole part, keeping its section properties
    pub fn render_document(
        &self,
        document: &Document,
        data: &Value,
    ) -> Result<(Document, Vec<Marker>)> {
        let output = self.render(&document.blocks, data)?;
        let rendered = Document {
            blocks: output.blocks,
            section_properties: document.section_properties.clone(),
        };
        Ok((rendered, output.markers))
    }

    // ==================== ELEMENT SEQUENCES ====================

    pub(crate) fn render_blocks(
        &self,
        blocks: &[Block],
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Vec<Block>> {
        let texts: Vec<String> = blocks.iter().map(element_text).collect();
        let markers = texts
            .iter()
            .enumerate()
            .map(|(i, text)| classify(text).map_err(|e| e.located(element(i))))
            .collect::<Result<Vec<_>>>()?;

        let mut output = Vec::with_capacity(blocks.len());
        let mut i = 0;

        while i < blocks.len() {
            let marker = &markers[i];
            match marker.kind {
                DirectiveKind::None => {
                    output.push(self.render_element(&blocks[i], scope, ctx)?);
                    i += 1;
                }
                DirectiveKind::InlineFor => {
                    output.push(match &blocks[i] {
                        Block::Paragraph(p) => {
                            Block::Paragraph(self.expand_inline_loop(p, scope, ctx)?)
                        }
                        table => self.render_element(table, scope, ctx)?,
                    });
                    i += 1;
                }
                DirectiveKind::Include => {
                    if marker.has_extra_text(&texts[i]) {
                        warn!(
                            directive = %marker.describe(),
                            "ignoring text next to include"
                        );
                    }
                    output.extend(self.render_include(marker, scope, ctx)?);
                    i += 1;
                }
                DirectiveKind::End | DirectiveKind::Else | DirectiveKind::ElsIf => {
                    return Err(TemplateError::structural(format!(
                        "`{}` without an open block",
                        marker.describe()
                    ))
                    .located(element(i)));
                }
                DirectiveKind::If | DirectiveKind::Unless | DirectiveKind::For => {
                    let matched =
                        find_matching_end(&markers, i).map_err(|e| e.located(element(i)))?;
                    warn_marker_text(&markers, &texts, &matched);

                    let opener = Opener {
                        paragraph: blocks[i].as_paragraph(),
                        text: &texts[i],
                        marker,
                    };
                    let body = if marker.kind == DirectiveKind::For {
                        self.render_loop(&blocks[i + 1..matched.end], &opener, scope, ctx)?
                    } else {
                        self.render_branch(blocks, &markers, i, &matched, &opener, scope, ctx)?
                    };
                    output.extend(body);
                    i = matched.end + 1;
                }
            }
        }

        Ok(output)
    }

    fn render_element(
        &self,
        block: &Block,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Block> {
        Ok(match block {
            Block::Paragraph(p) => Block::Paragraph(self.render_paragraph(p, scope, ctx)?),
            Block::Table(t) => Block::Table(self.render_table(t, scope, ctx)?),
        })
    }

    /// Select the branch of the if/unless opened at `open`.
    ///
    /// Returns the marker index starting the selected body and the index
    /// ending it (exclusive), or `None` if no branch applies.
    pub(crate) fn select_branch(
        &self,
        markers: &[DirectiveMarker],
        open: usize,
        matched: &DirectiveMatch,
        scope: &Scope<'_>,
    ) -> Result<Option<(usize, usize)>> {
        let opener = &markers[open];
        let branch_end = |k: usize| {
            matched
                .branches
                .get(k)
                .map_or(matched.end, |branch| branch.index)
        };

        let holds = self.condition(&opener.content, scope)?;
        let holds = if opener.kind == DirectiveKind::Unless {
            !holds
        } else {
            holds
        };
        if holds {
            return Ok(Some((open, branch_end(0))));
        }

        for (k, branch) in matched.branches.iter().enumerate() {
            let selected = match branch.kind {
                BranchKind::ElsIf => self.condition(&branch.condition, scope)?,
                BranchKind::Else => true,
            };
            if selected {
                return Ok(Some((branch.index, branch_end(k + 1))));
            }
        }
        Ok(None)
    }

    fn condition(&self, source: &str, scope: &Scope<'_>) -> Result<bool> {
        let expr = ParsedExpr::parse(source)?;
        Ok(expr.eval(scope, self.functions)?.is_truthy())
    }

    #[allow(clippy::too_many_arguments)]
    fn render_branch(
        &self,
        blocks: &[Block],
        markers: &[DirectiveMarker],
        open: usize,
        matched: &DirectiveMatch,
        opener: &Opener<'_>,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Vec<Block>> {
        let Some((start, end)) = self.select_branch(markers, open, matched, scope)? else {
            debug!(directive = %opener.marker.describe(), "no branch selected");
            return Ok(Vec::new());
        };

        let mut body = Vec::new();
        if start == open {
            body.extend(self.opener_suffix(opener, scope, ctx)?);
        }
        body.extend(self.render_blocks(&blocks[start + 1..end], scope, ctx)?);
        self.attach_prefix(opener, &mut body, scope, ctx)?;
        Ok(body)
    }

    fn render_loop(
        &self,
        range: &[Block],
        opener: &Opener<'_>,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Vec<Block>> {
        let header = LoopHeader::parse(&opener.marker.content)?;
        let items = header.items(scope, self.functions)?;
        debug!(directive = %opener.marker.describe(), items = items.len(), "unrolling loop");

        let mut body = Vec::new();
        for (position, item) in items.into_iter().enumerate() {
            let iteration = header.bind(scope, position, item);
            body.extend(self.opener_suffix(opener, &iteration, ctx)?);
            body.extend(self.render_blocks(range, &iteration, ctx)?);
        }
        if !body.is_empty() {
            self.attach_prefix(opener, &mut body, scope, ctx)?;
        }
        Ok(body)
    }

    /// Text after the opener tag, rendered as a paragraph opening the body
    fn opener_suffix(
        &self,
        opener: &Opener<'_>,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Option<Block>> {
        let suffix = opener.marker.suffix(opener.text);
        if suffix.trim().is_empty() {
            return Ok(None);
        }
        let pieces = render_text(suffix, scope, self.functions)?;
        let runs = self.pieces_to_runs(pieces, opener.run_properties(), false, ctx);
        Ok(Some(Block::Paragraph(opener.paragraph_with(runs))))
    }

    /// Put the text before the opener tag in front of the first rendered element
    fn attach_prefix(
        &self,
        opener: &Opener<'_>,
        body: &mut Vec<Block>,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<()> {
        let prefix = opener.marker.prefix(opener.text);
        if prefix.trim().is_empty() {
            return Ok(());
        }
        let pieces = render_text(prefix, scope, self.functions)?;
        let runs = self.pieces_to_runs(pieces, opener.run_properties(), true, ctx);

        match body.first_mut() {
            Some(Block::Paragraph(first)) => {
                first
                    .children
                    .splice(0..0, runs.into_iter().map(ParagraphChild::Run));
            }
            // A table cannot take runs, so the prefix gets a paragraph of its own
            _ => body.insert(0, Block::Paragraph(opener.paragraph_with(runs))),
        }
        Ok(())
    }

    fn render_include(
        &self,
        marker: &DirectiveMarker,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Vec<Block>> {
        let name = self.fragment_name(&marker.content, scope)?;
        let fragment = self
            .fragments
            .resolve(&name)
            .ok_or_else(|| TemplateError::FragmentNotFound(name.clone()))?;

        ctx.enter_fragment(&name, self.config.max_include_depth)?;
        let rendered = self.render_blocks(&fragment.blocks, scope, ctx);
        ctx.leave_fragment();
        rendered
    }

    /// Fragment name from an include argument. A bare name that is not a
    /// variable is taken literally.
    fn fragment_name(&self, content: &str, scope: &Scope<'_>) -> Result<String> {
        let expr = ParsedExpr::parse(content)?;
        match expr.eval(scope, self.functions)? {
            Value::Nil => match expr.ast {
                Expr::Variable(name) => Ok(name),
                _ => Err(TemplateError::FragmentNotFound(content.to_string())),
            },
            value => Ok(value.to_string()),
        }
    }

    // ==================== PARAGRAPHS ====================

    /// Render a paragraph without structural directives
    pub(crate) fn render_paragraph(
        &self,
        paragraph: &Paragraph,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Paragraph> {
        if !has_directives(&paragraph.plain_text()) {
            return Ok(paragraph.clone());
        }

        let merged = if self.config.merge_runs {
            merge_consecutive_runs(paragraph)
        } else {
            paragraph.clone()
        };

        let self_contained = merged
            .runs()
            .all(|run| run.text_str().map_or(true, is_self_contained));
        if self_contained {
            return self.render_runs_in_place(&merged, scope, ctx);
        }

        debug!(
            text = %merged.plain_text(),
            "directive spans several runs; rendering paragraph as one run"
        );
        let pieces = render_text(&merged.plain_text(), scope, self.functions)?;
        let runs = self.pieces_to_runs(pieces, merged.first_run_properties(), false, ctx);
        Ok(rebuild_paragraph(&merged, runs))
    }

    fn render_runs_in_place(
        &self,
        paragraph: &Paragraph,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Paragraph> {
        let mut children = Vec::with_capacity(paragraph.children.len());

        for child in &paragraph.children {
            match child {
                ParagraphChild::Run(run) => children.extend(
                    self.render_run(run, scope, ctx)?
                        .into_iter()
                        .map(ParagraphChild::Run),
                ),
                ParagraphChild::Hyperlink(link) => {
                    let mut runs = Vec::with_capacity(link.runs.len());
                    for run in &link.runs {
                        runs.extend(self.render_run(run, scope, ctx)?);
                    }
                    children.push(ParagraphChild::Hyperlink(Hyperlink {
                        id: link.id.clone(),
                        anchor: link.anchor.clone(),
                        runs,
                    }));
                }
                ParagraphChild::Raw(raw) => children.push(ParagraphChild::Raw(raw.clone())),
            }
        }

        Ok(Paragraph {
            properties: paragraph.properties.clone(),
            children,
        })
    }

    fn render_run(
        &self,
        run: &Run,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Vec<Run>> {
        let Some(text) = run.text.as_ref().filter(|t| has_directives(&t.content)) else {
            return Ok(vec![run.clone()]);
        };

        let pieces = render_text(&text.content, scope, self.functions)?;
        let preserve = text.space == Space::Preserve;
        let mut runs = self.pieces_to_runs(pieces, run.properties.as_ref(), preserve, ctx);

        if run.brk.is_some() || run.objects.is_some() {
            runs.insert(
                0,
                Run {
                    properties: run.properties.clone(),
                    text: None,
                    brk: run.brk,
                    objects: run.objects.clone(),
                },
            );
        }
        Ok(runs)
    }

    /// Turn rendered pieces into runs sharing `properties`.
    ///
    /// Newlines in text become line breaks and `{{pageBreak}}` a page break.
    /// Markers are recorded in the context and replaced by their display text.
    pub(crate) fn pieces_to_runs(
        &self,
        pieces: Vec<Piece>,
        properties: Option<&RawXml>,
        preserve: bool,
        ctx: &mut RenderContext,
    ) -> Vec<Run> {
        let mut text_pieces = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match piece {
                Piece::Marker(marker) => {
                    let text = marker.display_text();
                    ctx.record(marker);
                    append_pieces(&mut text_pieces, vec![Piece::Text(text)]);
                }
                other => append_pieces(&mut text_pieces, vec![other]),
            }
        }

        let mut runs = Vec::new();
        for piece in text_pieces {
            match piece {
                Piece::Text(text) => push_text_runs(&mut runs, &text, properties, preserve),
                Piece::PageBreak => runs.push(Run::break_run(BreakKind::Page, properties.cloned())),
                Piece::Marker(_) => {}
            }
        }
        runs
    }
}

/// The element that opened a multi-element directive
struct Opener<'a> {
    paragraph: Option<&'a Paragraph>,
    text: &'a str,
    marker: &'a DirectiveMarker,
}

impl Opener<'_> {
    fn run_properties(&self) -> Option<&RawXml> {
        self.paragraph.and_then(Paragraph::first_run_properties)
    }

    /// A new paragraph with the opener's paragraph properties
    fn paragraph_with(&self, runs: Vec<Run>) -> Paragraph {
        Paragraph {
            properties: self.paragraph.and_then(|p| p.properties.clone()),
            children: runs.into_iter().map(ParagraphChild::Run).collect(),
        }
    }
}

fn element(index: usize) -> String {
    format!("element {}", index + 1)
}

/// Text an element is classified by; tables carry their directives in rows
pub(crate) fn element_text(block: &Block) -> String {
    match block {
        Block::Paragraph(p) => p.plain_text(),
        Block::Table(_) => String::new(),
    }
}

fn warn_marker_text(markers: &[DirectiveMarker], texts: &[String], matched: &DirectiveMatch) {
    let indexes = matched
        .branches
        .iter()
        .map(|branch| branch.index)
        .chain(std::iter::once(matched.end));
    for index in indexes {
        if markers[index].has_extra_text(&texts[index]) {
            warn!(
                directive = %markers[index].describe(),
                text = %texts[index],
                "ignoring text next to directive"
            );
        }
    }
}

/// A paragraph whose text runs were replaced by `runs`. Verbatim children and
/// embedded objects are kept in front; hyperlinks are flattened into the text.
pub(crate) fn rebuild_paragraph(paragraph: &Paragraph, runs: Vec<Run>) -> Paragraph {
    let mut children: Vec<ParagraphChild> = paragraph
        .children
        .iter()
        .filter_map(|child| match child {
            ParagraphChild::Raw(raw) => Some(ParagraphChild::Raw(raw.clone())),
            ParagraphChild::Run(run) if run.objects.is_some() => Some(ParagraphChild::Run(Run {
                text: None,
                brk: None,
                ..run.clone()
            })),
            _ => None,
        })
        .collect();
    children.extend(runs.into_iter().map(ParagraphChild::Run));

    Paragraph {
        properties: paragraph.properties.clone(),
        children,
    }
}

fn push_text_runs(runs: &mut Vec<Run>, text: &str, properties: Option<&RawXml>, preserve: bool) {
    for (line_no, line) in text.split('\n').enumerate() {
        let run_text = match (line.is_empty(), preserve) {
            (true, _) => None,
            (false, true) => Some(RunText::preserved(line)),
            (false, false) => Some(RunText::new(line)),
        };
        if line_no == 0 {
            if let Some(run_text) = run_text {
                runs.push(Run {
                    properties: properties.cloned(),
                    text: Some(run_text),
                    ..Run::default()
                });
            }
        } else {
            runs.push(Run {
                text: run_text,
                ..Run::break_run(BreakKind::TextWrapping, properties.cloned())
            });
        }
    }
}
