//! Inline loop expansion
//!
//! A paragraph such as `Items: {{for x in xs}}{{x}}, {{end}}done` keeps its
//! whole loop in one element. The loop is cut out of the paragraph text, the
//! body is rendered once per item and the pieces are joined with the text
//! around the loop into a single run.

use docfill_ooxml::Paragraph;
use tracing::debug;

use crate::control::{
    append_pieces, parse_control_structures, render_nodes, render_text, LoopHeader,
};
use crate::error::Result;
use crate::render::{rebuild_paragraph, RenderContext, Renderer};
use crate::scope::Scope;
use crate::token::{tokenize_spanned, TokenKind, CLOSE, OPEN};

/// A paragraph's text split around its first top-level loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineLoop<'t> {
    /// Text before the loop opener
    pub prefix: &'t str,
    /// Loop header, `[index,] item in collection`
    pub header: &'t str,
    /// Text between the opener and its end
    pub body: &'t str,
    /// Text after the end
    pub suffix: &'t str,
}

/// Split `text` around its first top-level `for`.
///
/// Returns `None` when there is no top-level loop or its end is missing.
pub fn split_inline_loop(text: &str) -> Option<InlineLoop<'_>> {
    let tokens = tokenize_spanned(text);
    let mut depth = 0usize;
    let mut open = None;

    for (i, spanned) in tokens.iter().enumerate() {
        match spanned.token.kind {
            TokenKind::For if depth == 0 && open.is_none() => {
                open = Some(i);
                depth += 1;
            }
            kind if kind.is_opener() => depth += 1,
            TokenKind::End => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    if let Some(open) = open {
                        let opener = &tokens[open];
                        let tag = &text[opener.start + OPEN.len()..opener.end - CLOSE.len()];
                        return Some(InlineLoop {
                            prefix: &text[..opener.start],
                            header: tag.trim().strip_prefix("for")?.trim(),
                            body: &text[opener.end..spanned.start],
                            suffix: &text[spanned.end..],
                        });
                    }
                }
            }
            _ => {}
        }
    }
    None
}

impl Renderer<'_> {
    /// Expand a paragraph holding a complete loop into a single paragraph
    pub(crate) fn expand_inline_loop(
        &self,
        paragraph: &Paragraph,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Paragraph> {
        let text = paragraph.plain_text();

        let pieces = match split_inline_loop(&text) {
            Some(parts) => {
                let header = LoopHeader::parse(parts.header)?;
                let body = parse_control_structures(parts.body)?;
                let items = header.items(scope, self.functions)?;
                debug!(header = parts.header, items = items.len(), "expanding inline loop");

                let mut pieces = render_text(parts.prefix, scope, self.functions)?;
                for (position, item) in items.into_iter().enumerate() {
                    let iteration = header.bind(scope, position, item);
                    append_pieces(&mut pieces, render_nodes(&body, &iteration, self.functions)?);
                }
                append_pieces(&mut pieces, render_text(parts.suffix, scope, self.functions)?);
                pieces
            }
            // Only nested loops; the inline parser handles the whole text
            None => render_text(&text, scope, self.functions)?,
        };

        let runs = self.pieces_to_runs(pieces, paragraph.first_run_properties(), true, ctx);
        Ok(rebuild_paragraph(paragraph, runs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::fragment::FragmentSet;
    use crate::functions::FunctionRegistry;
    use crate::value::Value;
    use docfill_ooxml::{Block, ParagraphChild, RawXml, Run, Space};
    use serde_json::json;

    fn expand(paragraph: &Paragraph, data: serde_json::Value) -> Result<Paragraph> {
        let functions = FunctionRegistry::with_builtins();
        let fragments = FragmentSet::new();
        let config = RenderConfig::default();
        let renderer = Renderer::new(&functions, &fragments, &config);
        let data = Value::from(data);
        let scope = Scope::from_value(&data);
        renderer.expand_inline_loop(paragraph, &scope, &mut RenderContext::default())
    }

    // ==================== SPLITTING ====================

    #[test]
    fn test_split_simple_loop() {
        let parts = split_inline_loop("Items: {{for x in xs}}{{x}}, {{end}}done").unwrap();
        assert_eq!(parts.prefix, "Items: ");
        assert_eq!(parts.header, "x in xs");
        assert_eq!(parts.body, "{{x}}, ");
        assert_eq!(parts.suffix, "done");
    }

    #[test]
    fn test_split_matches_nested_end() {
        let parts =
            split_inline_loop("{{for g in gs}}[{{for m in g}}{{m}}{{end}}]{{end}}!").unwrap();
        assert_eq!(parts.body, "[{{for m in g}}{{m}}{{end}}]");
        assert_eq!(parts.suffix, "!");
    }

    #[test]
    fn test_split_skips_loop_nested_in_if() {
        assert_eq!(
            split_inline_loop("{{if a}}{{for x in xs}}{{x}}{{end}}{{end}}"),
            None
        );
    }

    #[test]
    fn test_split_without_end() {
        assert_eq!(split_inline_loop("{{for x in xs}}{{x}}"), None);
    }

    // ==================== EXPANSION ====================

    #[test]
    fn test_expand_single_run() {
        let paragraph = Paragraph::with_text("Items: {{for x in xs}}{{x}} {{end}}done");
        let expanded = expand(&paragraph, json!({"xs": ["a", "b"]})).unwrap();

        assert_eq!(expanded.plain_text(), "Items: a b done");
        let runs: Vec<&Run> = expanded.runs().collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text.as_ref().map(|t| t.space), Some(Space::Preserve));
    }

    #[test]
    fn test_expand_with_index_and_nested_if() {
        let paragraph = Paragraph::with_text(
            "{{for i, u in users}}{{if u.admin}}*{{end}}{{i}}={{u.name}};{{end}}",
        );
        let data = json!({"users": [{"name": "ann", "admin": true}, {"name": "bob"}]});

        assert_eq!(expand(&paragraph, data).unwrap().plain_text(), "*0=ann;1=bob;");
    }

    #[test]
    fn test_expand_keeps_formatting() {
        let paragraph = Paragraph {
            properties: Some(RawXml::new("<w:pPr><w:jc w:val=\"center\"/></w:pPr>")),
            children: vec![
                ParagraphChild::Run(Run {
                    properties: Some(RawXml::new("<w:rPr><w:b/></w:rPr>")),
                    ..Run::text("{{for x in xs}}")
                }),
                ParagraphChild::Run(Run::text("{{x}}{{end}}")),
            ],
        };
        let expanded = expand(&paragraph, json!({"xs": [1, 2, 3]})).unwrap();

        assert_eq!(expanded.plain_text(), "123");
        assert_eq!(expanded.properties, paragraph.properties);
        assert_eq!(
            expanded.first_run_properties().map(RawXml::as_str),
            Some("<w:rPr><w:b/></w:rPr>")
        );
    }

    #[test]
    fn test_expand_empty_collection() {
        let paragraph = Paragraph::with_text("[{{for x in xs}}{{x}}{{end}}]");
        assert_eq!(expand(&paragraph, json!({"xs": []})).unwrap().plain_text(), "[]");
    }

    #[test]
    fn test_expand_through_renderer() {
        let functions = FunctionRegistry::with_builtins();
        let fragments = FragmentSet::new();
        let config = RenderConfig::default();
        let output = Renderer::new(&functions, &fragments, &config)
            .render(
                &[Block::Paragraph(Paragraph::with_text(
                    "{{for x in xs}}<{{x}}>{{end}}",
                ))],
                &Value::from(json!({"xs": ["p", "q"]})),
            )
            .unwrap();

        assert_eq!(output.blocks.len(), 1);
        assert_eq!(output.blocks[0].plain_text(), "<p><q>");
    }
}
