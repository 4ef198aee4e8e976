//! Inline control structures
//!
//! When a directive and its whole body sit inside one piece of text, the
//! token stream is parsed into a tree of [`ControlNode`]s by recursive
//! descent and rendered straight to text pieces.

use crate::directive::parse_for_header;
use crate::error::{Result, TemplateError};
use crate::expr::ParsedExpr;
use crate::functions::FunctionRegistry;
use crate::scope::Scope;
use crate::token::{tokenize, Token, TokenKind, CLOSE, OPEN};
use crate::value::{to_slice, Marker, Value};

/// A node of an inline control tree
#[derive(Debug, Clone, PartialEq)]
pub enum ControlNode {
    /// Literal text
    Text(String),
    /// `{{expr}}`
    Expression(ParsedExpr),
    /// `{{if}}` with optional elsif clauses and else body
    If {
        /// Condition
        condition: ParsedExpr,
        /// Body when the condition holds
        then_body: Vec<ControlNode>,
        /// `elsif` conditions and bodies, in order
        elsif_clauses: Vec<(ParsedExpr, Vec<ControlNode>)>,
        /// Body when nothing matched
        else_body: Option<Vec<ControlNode>>,
    },
    /// `{{unless}}` with optional else body
    Unless {
        /// Condition
        condition: ParsedExpr,
        /// Body when the condition does not hold
        then_body: Vec<ControlNode>,
        /// Body when it does
        else_body: Option<Vec<ControlNode>>,
    },
    /// `{{for}}` loop
    For {
        /// Loop variables and collection
        header: LoopHeader,
        /// Loop body
        body: Vec<ControlNode>,
    },
    /// `{{include name}}`
    Include(ParsedExpr),
    /// `{{pageBreak}}`
    PageBreak,
}

/// A rendered piece of inline output
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    /// Text
    Text(String),
    /// A page break
    PageBreak,
    /// A marker value produced by an expression
    Marker(Marker),
}

/// Loop variables plus the parsed collection expression
#[derive(Debug, Clone, PartialEq)]
pub struct LoopHeader {
    /// Optional zero-based index variable
    pub index: Option<String>,
    /// Item variable
    pub item: String,
    /// Collection expression
    pub collection: ParsedExpr,
}

impl LoopHeader {
    /// Parse `[index,] item in collection`
    pub fn parse(content: &str) -> Result<Self> {
        let header = parse_for_header(content)?;
        Ok(Self {
            index: header.index,
            item: header.item,
            collection: ParsedExpr::parse(&header.collection)?,
        })
    }

    /// Evaluate the collection once and coerce it into items
    pub fn items(&self, scope: &Scope<'_>, functions: &FunctionRegistry) -> Result<Vec<Value>> {
        let collection = self.collection.eval(scope, functions)?;
        to_slice(&collection).map_err(|source| TemplateError::Evaluation {
            expression: self.collection.source.clone(),
            source,
        })
    }

    /// A fresh child scope binding the loop variables for one iteration
    pub fn bind<'s>(&self, parent: &'s Scope<'s>, position: usize, item: Value) -> Scope<'s> {
        let scope = parent.child().bind(self.item.clone(), item);
        match self.index {
            Some(ref index) => scope.bind(index.clone(), Value::from(position)),
            None => scope,
        }
    }
}

/// Parse text into a control tree
pub fn parse_control_structures(text: &str) -> Result<Vec<ControlNode>> {
    let mut parser = ControlParser {
        tokens: tokenize(text),
        pos: 0,
    };
    let nodes = parser.parse_nodes(&[])?;
    match parser.peek() {
        None => Ok(nodes),
        Some(token) => Err(unexpected(token)),
    }
}

struct ControlParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ControlParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Parse nodes until end of input or a token in `stop`, which is left unconsumed
    fn parse_nodes(&mut self, stop: &[TokenKind]) -> Result<Vec<ControlNode>> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.get(self.pos).cloned() {
            if stop.contains(&token.kind) {
                break;
            }
            self.pos += 1;

            let node = match token.kind {
                TokenKind::Text => ControlNode::Text(token.value),
                TokenKind::Variable => ControlNode::Expression(ParsedExpr::parse(&token.value)?),
                TokenKind::If => self.parse_if(&token)?,
                TokenKind::Unless => self.parse_unless(&token)?,
                TokenKind::For => self.parse_for(&token)?,
                TokenKind::Include => ControlNode::Include(ParsedExpr::parse(&token.value)?),
                TokenKind::PageBreak => ControlNode::PageBreak,
                TokenKind::End | TokenKind::Else | TokenKind::ElsIf => {
                    return Err(unexpected(&token))
                }
            };
            nodes.push(node);
        }

        Ok(nodes)
    }

    fn parse_if(&mut self, opener: &Token) -> Result<ControlNode> {
        let condition = ParsedExpr::parse(&opener.value)?;
        let branch_stop = [TokenKind::ElsIf, TokenKind::Else, TokenKind::End];
        let then_body = self.parse_nodes(&branch_stop)?;
        let mut elsif_clauses = Vec::new();
        let mut else_body = None;

        loop {
            let Some(token) = self.tokens.get(self.pos).cloned() else {
                return Err(missing_end(opener));
            };
            self.pos += 1;
            match token.kind {
                TokenKind::ElsIf => {
                    let condition = ParsedExpr::parse(&token.value)?;
                    let body = self.parse_nodes(&branch_stop)?;
                    elsif_clauses.push((condition, body));
                }
                TokenKind::Else => {
                    else_body = Some(self.parse_nodes(&[TokenKind::End])?);
                    self.expect_end(opener)?;
                    break;
                }
                _ => break,
            }
        }

        Ok(ControlNode::If {
            condition,
            then_body,
            elsif_clauses,
            else_body,
        })
    }

    fn parse_unless(&mut self, opener: &Token) -> Result<ControlNode> {
        let condition = ParsedExpr::parse(&opener.value)?;
        let then_body = self.parse_nodes(&[TokenKind::Else, TokenKind::End])?;

        let else_body = match self.peek().map(|t| t.kind) {
            Some(TokenKind::Else) => {
                self.pos += 1;
                Some(self.parse_nodes(&[TokenKind::End])?)
            }
            _ => None,
        };
        self.expect_end(opener)?;

        Ok(ControlNode::Unless {
            condition,
            then_body,
            else_body,
        })
    }

    fn parse_for(&mut self, opener: &Token) -> Result<ControlNode> {
        let header = LoopHeader::parse(&opener.value)?;
        let body = self.parse_nodes(&[TokenKind::End])?;
        self.expect_end(opener)?;
        Ok(ControlNode::For { header, body })
    }

    fn expect_end(&mut self, opener: &Token) -> Result<()> {
        match self.peek().map(|t| t.kind) {
            Some(TokenKind::End) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(missing_end(opener)),
        }
    }
}

fn tag(token: &Token) -> String {
    let keyword = match token.kind {
        TokenKind::If => "if ",
        TokenKind::ElsIf => "elsif ",
        TokenKind::Else => "else",
        TokenKind::Unless => "unless ",
        TokenKind::For => "for ",
        TokenKind::End => "end",
        TokenKind::Include => "include ",
        TokenKind::PageBreak => "pageBreak",
        TokenKind::Text | TokenKind::Variable => "",
    };
    format!("{}{}{}{}", OPEN, keyword, token.value, CLOSE)
}

fn unexpected(token: &Token) -> TemplateError {
    TemplateError::structural(format!("unexpected `{}`", tag(token)))
}

fn missing_end(opener: &Token) -> TemplateError {
    TemplateError::structural(format!(
        "missing {}end{} for `{}`",
        OPEN,
        CLOSE,
        tag(opener)
    ))
}

/// Render a control tree to pieces
pub fn render_nodes(
    nodes: &[ControlNode],
    scope: &Scope<'_>,
    functions: &FunctionRegistry,
) -> Result<Vec<Piece>> {
    let mut pieces = Vec::new();
    render_into(nodes, scope, functions, &mut pieces)?;
    Ok(pieces)
}

/// Parse and render text in one step
pub fn render_text(
    text: &str,
    scope: &Scope<'_>,
    functions: &FunctionRegistry,
) -> Result<Vec<Piece>> {
    let nodes = parse_control_structures(text)?;
    render_nodes(&nodes, scope, functions)
}

fn render_into(
    nodes: &[ControlNode],
    scope: &Scope<'_>,
    functions: &FunctionRegistry,
    pieces: &mut Vec<Piece>,
) -> Result<()> {
    for node in nodes {
        match node {
            ControlNode::Text(text) => push_text(pieces, text),
            ControlNode::Expression(expr) => match expr.eval(scope, functions)? {
                Value::Marker(marker) => pieces.push(Piece::Marker(marker)),
                value => push_text(pieces, &value.to_string()),
            },
            ControlNode::If {
                condition,
                then_body,
                elsif_clauses,
                else_body,
            } => {
                if condition.eval(scope, functions)?.is_truthy() {
                    render_into(then_body, scope, functions, pieces)?;
                    continue;
                }
                let mut matched = false;
                for (condition, body) in elsif_clauses {
                    if condition.eval(scope, functions)?.is_truthy() {
                        render_into(body, scope, functions, pieces)?;
                        matched = true;
                        break;
                    }
                }
                if !matched {
                    if let Some(body) = else_body {
                        render_into(body, scope, functions, pieces)?;
                    }
                }
            }
            ControlNode::Unless {
                condition,
                then_body,
                else_body,
            } => {
                if !condition.eval(scope, functions)?.is_truthy() {
                    render_into(then_body, scope, functions, pieces)?;
                } else if let Some(body) = else_body {
                    render_into(body, scope, functions, pieces)?;
                }
            }
            ControlNode::For { header, body } => {
                for (position, item) in header.items(scope, functions)?.into_iter().enumerate() {
                    let iteration = header.bind(scope, position, item);
                    render_into(body, &iteration, functions, pieces)?;
                }
            }
            ControlNode::Include(expr) => {
                return Err(TemplateError::structural(format!(
                    "`{}include {}{}` must stand alone in its paragraph",
                    OPEN, expr.source, CLOSE
                )))
            }
            ControlNode::PageBreak => pieces.push(Piece::PageBreak),
        }
    }
    Ok(())
}

/// Append text, extending a trailing text piece
fn push_text(pieces: &mut Vec<Piece>, text: &str) {
    if text.is_empty() {
        return;
    }
    match pieces.last_mut() {
        Some(Piece::Text(last)) => last.push_str(text),
        _ => pieces.push(Piece::Text(text.to_string())),
    }
}

/// Append pieces, joining text across the seam
pub(crate) fn append_pieces(pieces: &mut Vec<Piece>, more: Vec<Piece>) {
    for piece in more {
        match piece {
            Piece::Text(text) => push_text(pieces, &text),
            other => pieces.push(other),
        }
    }
}

/// Concatenated text of pieces, markers shown by their display text
pub fn pieces_text(pieces: &[Piece]) -> String {
    pieces
        .iter()
        .map(|piece| match piece {
            Piece::Text(text) => text.clone(),
            Piece::PageBreak => String::new(),
            Piece::Marker(marker) => marker.display_text(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(text: &str, data: serde_json::Value) -> Result<String> {
        let scope = Scope::from_value(&Value::from(data));
        let functions = FunctionRegistry::with_builtins();
        render_text(text, &scope, &functions).map(|pieces| pieces_text(&pieces))
    }

    // ==================== PARSING ====================

    #[test]
    fn test_parse_text_and_expression() {
        let nodes = parse_control_structures("Hi {{name}}!").unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0], ControlNode::Text("Hi ".to_string()));
        assert!(matches!(nodes[1], ControlNode::Expression(_)));
    }

    #[test]
    fn test_parse_if_chain() {
        let nodes =
            parse_control_structures("{{if x>10}}big{{elsif x>5}}medium{{else}}small{{end}}")
                .unwrap();
        match &nodes[0] {
            ControlNode::If {
                then_body,
                elsif_clauses,
                else_body,
                ..
            } => {
                assert_eq!(then_body, &vec![ControlNode::Text("big".to_string())]);
                assert_eq!(elsif_clauses.len(), 1);
                assert!(else_body.is_some());
            }
            other => panic!("Expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_structural_errors() {
        for text in [
            "{{if a}}x",
            "x{{end}}",
            "{{else}}",
            "{{if a}}{{else}}x{{elsif b}}y{{end}}",
            "{{unless a}}x{{elsif b}}y{{end}}",
            "{{for a, b, c in xs}}{{end}}",
            "{{for xs}}{{end}}",
            "{{for x in xs}}{{else}}{{end}}",
        ] {
            assert!(
                matches!(parse_control_structures(text), Err(TemplateError::Structural(_))),
                "expected structural error for {:?}",
                text
            );
        }
    }

    #[test]
    fn test_parse_syntax_error() {
        assert!(matches!(
            parse_control_structures("{{if x >}}y{{end}}"),
            Err(TemplateError::Syntax { .. })
        ));
    }

    // ==================== RENDERING ====================

    #[test]
    fn test_if_scenario() {
        assert_eq!(render("{{if x > 5}}yes{{end}}", json!({"x": 10})).unwrap(), "yes");
        assert_eq!(render("{{if x > 5}}yes{{end}}", json!({"x": 3})).unwrap(), "");
    }

    #[test]
    fn test_elsif_scenario() {
        let text = "{{if x>10}}big{{elsif x>5}}medium{{else}}small{{end}}";
        assert_eq!(render(text, json!({"x": 7})).unwrap(), "medium");
        assert_eq!(render(text, json!({"x": 11})).unwrap(), "big");
        assert_eq!(render(text, json!({"x": 1})).unwrap(), "small");
    }

    #[test]
    fn test_if_without_match_renders_nothing() {
        assert_eq!(
            render("a{{if x}}b{{elsif y}}c{{end}}d", json!({})).unwrap(),
            "ad"
        );
    }

    #[test]
    fn test_elsif_conditions_short_circuit() {
        // The failing elsif is never evaluated once the first branch matched
        assert_eq!(
            render("{{if true}}ok{{elsif nosuch()}}bad{{end}}", json!({})).unwrap(),
            "ok"
        );
    }

    #[test]
    fn test_unless() {
        let text = "{{unless paid}}due{{else}}settled{{end}}";
        assert_eq!(render(text, json!({"paid": false})).unwrap(), "due");
        assert_eq!(render(text, json!({"paid": true})).unwrap(), "settled");
    }

    #[test]
    fn test_for_with_index_scenario() {
        assert_eq!(
            render(
                "{{for i, item in items}}{{if i>0}}, {{end}}{{item}}{{end}}",
                json!({"items": ["North", "South", "East"]})
            )
            .unwrap(),
            "North, South, East"
        );
    }

    #[test]
    fn test_for_cardinality() {
        assert_eq!(render("{{for x in xs}}.{{end}}", json!({"xs": [1, 2, 3, 4]})).unwrap(), "....");
        assert_eq!(render("{{for x in xs}}.{{end}}", json!({"xs": []})).unwrap(), "");
        assert_eq!(render("{{for x in xs}}.{{end}}", json!({})).unwrap(), "");
    }

    #[test]
    fn test_for_over_map_and_string() {
        assert_eq!(
            render(
                "{{for e in m}}{{e.key}}={{e.value}};{{end}}",
                json!({"m": {"b": 2, "a": 1}})
            )
            .unwrap(),
            "a=1;b=2;"
        );
        assert_eq!(render("{{for c in s}}[{{c}}]{{end}}", json!({"s": "ab"})).unwrap(), "[a][b]");
    }

    #[test]
    fn test_for_not_iterable() {
        match render("{{for x in n}}{{x}}{{end}}", json!({"n": 5})) {
            Err(TemplateError::Evaluation { expression, .. }) => assert_eq!(expression, "n"),
            other => panic!("Expected evaluation error, got {:?}", other),
        }
    }

    #[test]
    fn test_loop_variable_does_not_leak() {
        assert_eq!(
            render("{{for x in xs}}{{x}}{{end}}|{{x}}", json!({"xs": [1, 2], "x": "outer"}))
                .unwrap(),
            "12|outer"
        );
    }

    #[test]
    fn test_nested_loops() {
        assert_eq!(
            render(
                "{{for row in rows}}{{for c in row}}{{c}}{{end}};{{end}}",
                json!({"rows": [[1, 2], [3]]})
            )
            .unwrap(),
            "12;3;"
        );
    }

    #[test]
    fn test_page_break_and_marker_pieces() {
        let scope = Scope::default();
        let functions = FunctionRegistry::with_builtins();
        let pieces = render_text(
            "a{{pageBreak}}b{{link(\"http://x\", \"X\")}}",
            &scope,
            &functions,
        )
        .unwrap();

        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces[0], Piece::Text("a".to_string()));
        assert_eq!(pieces[1], Piece::PageBreak);
        assert!(matches!(pieces[3], Piece::Marker(_)));
        assert_eq!(pieces_text(&pieces), "abX");
    }

    #[test]
    fn test_inline_include_is_rejected() {
        assert!(matches!(
            render("{{if true}}{{include \"x\"}}{{end}}", json!({})),
            Err(TemplateError::Structural(_))
        ));
    }
}
