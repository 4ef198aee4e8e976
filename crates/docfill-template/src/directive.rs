//! Directive detection and matching
//!
//! A directive may open in one paragraph (or table row) and close several
//! elements later. Each element is classified from its concatenated text,
//! then openers are matched to their `end` by nesting depth.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, TemplateError};
use crate::token::{has_directives, tokenize_spanned, TokenKind, CLOSE, OPEN};

/// What role an element plays in multi-element control flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    /// Opens an if-block continuing in later elements
    If,
    /// Branch marker of an enclosing if
    ElsIf,
    /// Else marker of an enclosing if or unless
    Else,
    /// Opens an unless-block continuing in later elements
    Unless,
    /// Opens a loop continuing in later elements
    For,
    /// Closes the innermost open block
    End,
    /// Includes a fragment
    Include,
    /// A complete loop inside this element
    InlineFor,
    /// No structural role
    None,
}

impl DirectiveKind {
    /// Opens a block that needs a matching `end`
    pub fn is_opener(self) -> bool {
        matches!(
            self,
            DirectiveKind::If | DirectiveKind::Unless | DirectiveKind::For
        )
    }

    fn keyword(self) -> &'static str {
        match self {
            DirectiveKind::If => "if",
            DirectiveKind::ElsIf => "elsif",
            DirectiveKind::Else => "else",
            DirectiveKind::Unless => "unless",
            DirectiveKind::For | DirectiveKind::InlineFor => "for",
            DirectiveKind::End => "end",
            DirectiveKind::Include => "include",
            DirectiveKind::None => "",
        }
    }
}

/// Classification of one element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveMarker {
    /// Role of the element
    pub kind: DirectiveKind,
    /// Directive argument: condition, loop header or fragment name
    pub content: String,
    /// Byte offset where the directive tag starts; text before it is the prefix
    pub prefix_end: usize,
    /// Byte offset just past the directive tag; text from here on is the suffix
    pub suffix_start: usize,
}

impl DirectiveMarker {
    /// A marker for an element without structural role
    pub fn none() -> Self {
        Self {
            kind: DirectiveKind::None,
            content: String::new(),
            prefix_end: 0,
            suffix_start: 0,
        }
    }

    fn none_of(kind: DirectiveKind) -> Self {
        Self {
            kind,
            ..Self::none()
        }
    }

    fn at(kind: DirectiveKind, content: &str, start: usize, end: usize) -> Self {
        Self {
            kind,
            content: content.to_string(),
            prefix_end: start,
            suffix_start: end,
        }
    }

    /// Text before the directive tag
    pub fn prefix<'t>(&self, text: &'t str) -> &'t str {
        text.get(..self.prefix_end).unwrap_or("")
    }

    /// Text after the directive tag
    pub fn suffix<'t>(&self, text: &'t str) -> &'t str {
        text.get(self.suffix_start..).unwrap_or("")
    }

    /// True if the element carries non-blank text besides the directive tag
    pub fn has_extra_text(&self, text: &str) -> bool {
        !self.prefix(text).trim().is_empty() || !self.suffix(text).trim().is_empty()
    }

    /// The tag as written, for messages
    pub fn describe(&self) -> String {
        if self.content.is_empty() {
            format!("{}{}{}", OPEN, self.kind.keyword(), CLOSE)
        } else {
            format!("{}{} {}{}", OPEN, self.kind.keyword(), self.content, CLOSE)
        }
    }
}

/// Classify an element from its concatenated text
pub fn classify(text: &str) -> Result<DirectiveMarker> {
    if !has_directives(text) {
        return Ok(DirectiveMarker::none());
    }

    let tokens = tokenize_spanned(text);
    let mut open: Vec<usize> = Vec::new();
    let mut unmatched_ends = Vec::new();
    let mut branches = Vec::new();
    let mut includes = Vec::new();
    let mut has_for = false;

    for (idx, spanned) in tokens.iter().enumerate() {
        match spanned.token.kind {
            TokenKind::If | TokenKind::Unless => open.push(idx),
            TokenKind::For => {
                has_for = true;
                open.push(idx);
            }
            TokenKind::End => {
                if open.pop().is_none() {
                    unmatched_ends.push(idx);
                }
            }
            TokenKind::Else | TokenKind::ElsIf if open.is_empty() => branches.push(idx),
            TokenKind::Include if open.is_empty() => includes.push(idx),
            _ => {}
        }
    }

    let marker_for = |idx: usize, kind: DirectiveKind| {
        let spanned = &tokens[idx];
        DirectiveMarker::at(kind, &spanned.token.value, spanned.start, spanned.end)
    };

    if unmatched_ends.len() > 1 {
        return Err(TemplateError::structural(format!(
            "`{}` closes more than one block; each end needs its own element",
            text.trim()
        )));
    }
    if branches.len() > 1 || (!branches.is_empty() && !unmatched_ends.is_empty()) {
        return Err(TemplateError::structural(format!(
            "`{}` holds more than one branch or end marker; each needs its own element",
            text.trim()
        )));
    }

    if let Some(&idx) = unmatched_ends.first() {
        if !open.is_empty() {
            return Err(TemplateError::structural(format!(
                "`{}` closes a block and opens another in the same element",
                text.trim()
            )));
        }
        return Ok(marker_for(idx, DirectiveKind::End));
    }

    match open.as_slice() {
        [] => {}
        [idx] => {
            let kind = match tokens[*idx].token.kind {
                TokenKind::If => DirectiveKind::If,
                TokenKind::Unless => DirectiveKind::Unless,
                _ => DirectiveKind::For,
            };
            return Ok(marker_for(*idx, kind));
        }
        _ => {
            return Err(TemplateError::structural(format!(
                "`{}` opens more than one block without closing them",
                text.trim()
            )))
        }
    }

    if let Some(&idx) = branches.first() {
        let kind = match tokens[idx].token.kind {
            TokenKind::Else => DirectiveKind::Else,
            _ => DirectiveKind::ElsIf,
        };
        return Ok(marker_for(idx, kind));
    }

    if has_for {
        return Ok(DirectiveMarker::none_of(DirectiveKind::InlineFor));
    }

    match includes.as_slice() {
        [] => Ok(DirectiveMarker::none()),
        [idx] => Ok(marker_for(*idx, DirectiveKind::Include)),
        _ => Err(TemplateError::structural(format!(
            "`{}` holds more than one include; each include needs its own paragraph",
            text.trim()
        ))),
    }
}

/// True if every directive in `text` opens and closes within it
pub fn is_self_contained(text: &str) -> bool {
    if let Some(open) = text.rfind(OPEN) {
        if !text[open + OPEN.len()..].contains(CLOSE) {
            return false;
        }
    }

    let mut depth = 0usize;
    for spanned in tokenize_spanned(text) {
        match spanned.token.kind {
            TokenKind::If | TokenKind::Unless | TokenKind::For => depth += 1,
            TokenKind::End => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            TokenKind::Else | TokenKind::ElsIf if depth == 0 => return false,
            _ => {}
        }
    }
    depth == 0
}

/// Kind of an if/unless branch marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// `elsif cond`
    ElsIf,
    /// `else`
    Else,
}

/// A branch marker found while matching an if/unless
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElseBranch {
    /// Element index of the marker
    pub index: usize,
    /// Kind of branch
    pub kind: BranchKind,
    /// Condition of an elsif, empty for else
    pub condition: String,
}

/// Result of matching an opener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveMatch {
    /// Element index of the matching end
    pub end: usize,
    /// Branch markers at depth 1, in order
    pub branches: Vec<ElseBranch>,
}

/// Find the `end` matching the opener at `open`, collecting branch markers
pub fn find_matching_end(markers: &[DirectiveMarker], open: usize) -> Result<DirectiveMatch> {
    let opener = &markers[open];
    let mut depth = 1usize;
    let mut branches: Vec<ElseBranch> = Vec::new();

    for (index, marker) in markers.iter().enumerate().skip(open + 1) {
        match marker.kind {
            kind if kind.is_opener() => depth += 1,
            DirectiveKind::End => {
                depth -= 1;
                if depth == 0 {
                    return Ok(DirectiveMatch { end: index, branches });
                }
            }
            DirectiveKind::ElsIf | DirectiveKind::Else if depth == 1 => {
                let kind = if marker.kind == DirectiveKind::Else {
                    BranchKind::Else
                } else {
                    BranchKind::ElsIf
                };
                check_branch(opener, &branches, kind, marker)?;
                branches.push(ElseBranch {
                    index,
                    kind,
                    condition: marker.content.clone(),
                });
            }
            _ => {}
        }
    }

    Err(TemplateError::structural(format!(
        "missing {}end{} for `{}`",
        OPEN,
        CLOSE,
        opener.describe()
    )))
}

fn check_branch(
    opener: &DirectiveMarker,
    seen: &[ElseBranch],
    kind: BranchKind,
    marker: &DirectiveMarker,
) -> Result<()> {
    let allowed = match opener.kind {
        DirectiveKind::If => true,
        DirectiveKind::Unless => kind == BranchKind::Else,
        _ => false,
    };
    if !allowed {
        return Err(TemplateError::structural(format!(
            "`{}` is not allowed inside `{}`",
            marker.describe(),
            opener.describe()
        )));
    }
    if seen.iter().any(|b| b.kind == BranchKind::Else) {
        return Err(TemplateError::structural(format!(
            "`{}` follows the else branch of `{}`",
            marker.describe(),
            opener.describe()
        )));
    }
    Ok(())
}

/// Parsed `for [index,] item in collection` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForHeader {
    /// Optional zero-based index variable
    pub index: Option<String>,
    /// Item variable
    pub item: String,
    /// Collection expression
    pub collection: String,
}

/// Parse a loop header
pub fn parse_for_header(content: &str) -> Result<ForHeader> {
    static IDENT_RE: OnceLock<Regex> = OnceLock::new();
    let ident = IDENT_RE.get_or_init(|| Regex::new(r"^[\p{L}_][\p{L}\p{N}_]*$").unwrap());

    let malformed = |reason: &str| {
        TemplateError::structural(format!(
            "malformed loop `{}for {}{}`: {}",
            OPEN, content, CLOSE, reason
        ))
    };

    let Some((vars, collection)) = content.split_once(" in ") else {
        return Err(malformed("expected `item in collection`"));
    };
    let collection = collection.trim();
    if collection.is_empty() {
        return Err(malformed("missing collection"));
    }

    let names: Vec<&str> = vars.split(',').map(str::trim).collect();
    if let Some(bad) = names.iter().find(|name| !ident.is_match(name)) {
        return Err(malformed(&format!("`{}` is not a variable name", bad)));
    }

    let (index, item) = match names.as_slice() {
        [item] => (None, item.to_string()),
        [index, item] => (Some(index.to_string()), item.to_string()),
        _ => return Err(malformed("at most two loop variables are allowed")),
    };

    Ok(ForHeader {
        index,
        item,
        collection: collection.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(text: &str) -> DirectiveKind {
        classify(text).unwrap().kind
    }

    fn markers(texts: &[&str]) -> Vec<DirectiveMarker> {
        texts.iter().map(|t| classify(t).unwrap()).collect()
    }

    // ==================== CLASSIFY ====================

    #[test]
    fn test_classify_openers_and_markers() {
        assert_eq!(kind("{{if x > 1}}"), DirectiveKind::If);
        assert_eq!(kind("{{unless x}}"), DirectiveKind::Unless);
        assert_eq!(kind("{{for x in xs}}"), DirectiveKind::For);
        assert_eq!(kind("{{elsif x}}"), DirectiveKind::ElsIf);
        assert_eq!(kind("{{else}}"), DirectiveKind::Else);
        assert_eq!(kind("{{end}}"), DirectiveKind::End);
        assert_eq!(kind("{{include \"footer\"}}"), DirectiveKind::Include);
    }

    #[test]
    fn test_classify_regular_elements() {
        assert_eq!(kind("plain text"), DirectiveKind::None);
        assert_eq!(kind("Dear {{name}}"), DirectiveKind::None);
        assert_eq!(kind("{{if a}}x{{end}}"), DirectiveKind::None);
        assert_eq!(kind("{{for x in xs}}{{x}}{{end}}"), DirectiveKind::InlineFor);
        assert_eq!(
            kind("{{if a}}{{for x in xs}}{{x}}{{end}}{{end}}"),
            DirectiveKind::InlineFor
        );
    }

    #[test]
    fn test_classify_opener_offsets() {
        let text = "Total: {{if show}}shown";
        let marker = classify(text).unwrap();

        assert_eq!(marker.kind, DirectiveKind::If);
        assert_eq!(marker.content, "show");
        assert_eq!(marker.prefix(text), "Total: ");
        assert_eq!(marker.suffix(text), "shown");
        assert!(marker.has_extra_text(text));
    }

    #[test]
    fn test_classify_opener_with_inline_construct_before() {
        let marker = classify("{{if a}}x{{end}} {{for y in ys}}").unwrap();
        assert_eq!(marker.kind, DirectiveKind::For);
        assert_eq!(marker.content, "y in ys");
    }

    #[test]
    fn test_classify_structural_errors() {
        assert!(matches!(
            classify("{{if a}}{{if b}}"),
            Err(TemplateError::Structural(_))
        ));
        assert!(matches!(
            classify("{{end}}{{if b}}"),
            Err(TemplateError::Structural(_))
        ));
        assert!(matches!(
            classify("{{include \"a\"}}{{include \"b\"}}"),
            Err(TemplateError::Structural(_))
        ));
        for text in ["{{end}}{{end}}", "{{else}}{{else}}", "{{elsif a}}{{else}}", "{{else}}{{end}}"] {
            assert!(
                matches!(classify(text), Err(TemplateError::Structural(_))),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_marker_without_extra_text() {
        let marker = classify("  {{end}} ").unwrap();
        assert!(!marker.has_extra_text("  {{end}} "));
    }

    #[test]
    fn test_self_contained() {
        assert!(is_self_contained("{{name}}"));
        assert!(is_self_contained("{{if a}}x{{else}}y{{end}}"));
        assert!(!is_self_contained("{{if a}}x"));
        assert!(!is_self_contained("x{{end}}"));
        assert!(!is_self_contained("{{else}}"));
        assert!(!is_self_contained("{{na"));
        assert!(is_self_contained("no tags"));
    }

    // ==================== MATCHING ====================

    #[test]
    fn test_find_matching_end_simple() {
        let markers = markers(&["{{if true}}", "Content", "{{end}}"]);
        let m = find_matching_end(&markers, 0).unwrap();
        assert_eq!(m.end, 2);
        assert!(m.branches.is_empty());
    }

    #[test]
    fn test_find_matching_end_nested() {
        let markers = markers(&[
            "{{for x in xs}}",
            "{{if x}}",
            "a",
            "{{else}}",
            "b",
            "{{end}}",
            "{{end}}",
        ]);
        let m = find_matching_end(&markers, 0).unwrap();
        assert_eq!(m.end, 6);
        // The else belongs to the nested if
        assert!(m.branches.is_empty());

        let inner = find_matching_end(&markers, 1).unwrap();
        assert_eq!(inner.end, 5);
        assert_eq!(inner.branches.len(), 1);
    }

    #[test]
    fn test_find_matching_end_collects_branches() {
        let markers = markers(&[
            "{{if x > 10}}",
            "big",
            "{{elsif x > 5}}",
            "medium",
            "{{else}}",
            "small",
            "{{end}}",
        ]);
        let m = find_matching_end(&markers, 0).unwrap();

        assert_eq!(m.end, 6);
        assert_eq!(
            m.branches,
            vec![
                ElseBranch {
                    index: 2,
                    kind: BranchKind::ElsIf,
                    condition: "x > 5".to_string(),
                },
                ElseBranch {
                    index: 4,
                    kind: BranchKind::Else,
                    condition: String::new(),
                },
            ]
        );
    }

    #[test]
    fn test_find_matching_end_missing() {
        let markers = markers(&["{{if a}}", "text"]);
        match find_matching_end(&markers, 0) {
            Err(TemplateError::Structural(message)) => assert!(message.contains("{{if a}}")),
            other => panic!("Expected structural error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_branches() {
        let elsif_in_unless = markers(&["{{unless a}}", "{{elsif b}}", "{{end}}"]);
        assert!(find_matching_end(&elsif_in_unless, 0).is_err());

        let else_in_for = markers(&["{{for x in xs}}", "{{else}}", "{{end}}"]);
        assert!(find_matching_end(&else_in_for, 0).is_err());

        let double_else = markers(&["{{if a}}", "{{else}}", "{{else}}", "{{end}}"]);
        assert!(find_matching_end(&double_else, 0).is_err());

        let else_in_unless = markers(&["{{unless a}}", "{{else}}", "{{end}}"]);
        assert!(find_matching_end(&else_in_unless, 0).is_ok());
    }

    // ==================== FOR HEADER ====================

    #[test]
    fn test_parse_for_header() {
        assert_eq!(
            parse_for_header("item in items").unwrap(),
            ForHeader {
                index: None,
                item: "item".to_string(),
                collection: "items".to_string(),
            }
        );
        assert_eq!(
            parse_for_header("i, item in order.items").unwrap(),
            ForHeader {
                index: Some("i".to_string()),
                item: "item".to_string(),
                collection: "order.items".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_for_header_errors() {
        for content in ["items", "a, b, c in items", "x in ", "1x in items", ", x in items"] {
            assert!(
                matches!(parse_for_header(content), Err(TemplateError::Structural(_))),
                "expected error for {:?}",
                content
            );
        }
    }
}
