//! Directive tokenizer
//!
//! Splits text into literal text and `{{...}}` tags. Tags are classified by
//! their leading keyword; anything without a keyword is a value expression.
//! Expressions are not validated here, so tokenizing never fails.

use std::sync::OnceLock;

use regex::Regex;

/// Opening delimiter
pub const OPEN: &str = "{{";
/// Closing delimiter
pub const CLOSE: &str = "}}";

/// Kind of token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Literal text
    Text,
    /// Value expression
    Variable,
    /// `{{if cond}}`
    If,
    /// `{{elsif cond}}`, `{{elseif cond}}`, `{{elif cond}}` or `{{else if cond}}`
    ElsIf,
    /// `{{else}}`
    Else,
    /// `{{unless cond}}`
    Unless,
    /// `{{for [index,] item in collection}}`
    For,
    /// `{{end}}`
    End,
    /// `{{include name}}`
    Include,
    /// `{{pageBreak}}`
    PageBreak,
}

impl TokenKind {
    /// Opens a block that needs a matching `end`
    pub fn is_opener(self) -> bool {
        matches!(self, TokenKind::If | TokenKind::Unless | TokenKind::For)
    }
}

/// A token: its kind and payload
///
/// For `Text` the payload is the literal text, for directives it is the
/// trimmed argument (condition, loop header, fragment name), for `Variable`
/// the raw expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Kind of token
    pub kind: TokenKind,
    /// Payload
    pub value: String,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// A token together with the byte range of its source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpannedToken {
    /// The token
    pub token: Token,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

/// Tokenize text into literal text and directives
pub fn tokenize(text: &str) -> Vec<Token> {
    tokenize_spanned(text)
        .into_iter()
        .map(|spanned| spanned.token)
        .collect()
}

/// Tokenize text, keeping each token's source span
pub fn tokenize_spanned(text: &str) -> Vec<SpannedToken> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    // Start of pending literal text
    let mut text_start = 0;

    while let Some(found) = text[pos..].find(OPEN) {
        let open = pos + found;
        let Some(close_rel) = text[open + OPEN.len()..].find(CLOSE) else {
            break;
        };
        let inner_start = open + OPEN.len();
        let close = inner_start + close_rel;
        let end = close + CLOSE.len();
        let inner = text[inner_start..close].trim();

        if inner.is_empty() {
            // `{{}}` stays literal text
            pos = end;
            continue;
        }

        if text_start < open {
            tokens.push(SpannedToken {
                token: Token::new(TokenKind::Text, &text[text_start..open]),
                start: text_start,
                end: open,
            });
        }
        tokens.push(SpannedToken {
            token: classify(inner),
            start: open,
            end,
        });
        pos = end;
        text_start = end;
    }

    if text_start < text.len() {
        tokens.push(SpannedToken {
            token: Token::new(TokenKind::Text, &text[text_start..]),
            start: text_start,
            end: text.len(),
        });
    }
    tokens
}

/// True if `text` contains an opening delimiter
pub fn has_directives(text: &str) -> bool {
    text.contains(OPEN)
}

/// Classify the trimmed content of a tag
fn classify(inner: &str) -> Token {
    static KEYWORD_RE: OnceLock<Regex> = OnceLock::new();
    let re = KEYWORD_RE.get_or_init(|| {
        Regex::new(r"(?s)^(if|elsif|elseif|elif|else\s+if|unless|for|include)\b\s*(.*)$").unwrap()
    });

    match inner {
        "else" => return Token::new(TokenKind::Else, ""),
        "end" => return Token::new(TokenKind::End, ""),
        "pageBreak" => return Token::new(TokenKind::PageBreak, ""),
        _ => {}
    }

    if let Some(caps) = re.captures(inner) {
        let argument = caps.get(2).map_or("", |m| m.as_str()).trim();
        let keyword = caps.get(1).map_or("", |m| m.as_str());
        let kind = match keyword {
            "if" => TokenKind::If,
            "unless" => TokenKind::Unless,
            "for" => TokenKind::For,
            "include" => TokenKind::Include,
            _ => TokenKind::ElsIf,
        };
        // A keyword followed by an operator is an expression about a
        // variable with that name, e.g. `{{for == 1}}`
        if !starts_like_operator(argument) {
            return Token::new(kind, argument);
        }
    }

    Token::new(TokenKind::Variable, inner)
}

fn starts_like_operator(argument: &str) -> bool {
    ["==", "!=", ">=", "<=", ".", "[", "+", "*", "/"]
        .iter()
        .any(|op| argument.starts_with(op))
}
