//! Expression lexer and recursive-descent parser
//!
//! Precedence, lowest first:
//!
//! | level | operators |
//! |---|---|
//! | or | `\|` `\|\|` |
//! | and | `&` `&&` |
//! | comparison | `==` `!=` `>` `>=` `<` `<=` |
//! | additive | `+` `-` |
//! | multiplicative | `*` `/` `%` |
//! | unary | `!` `-` |
//! | postfix | `.field` `[index]` `name(args)` |

use crate::error::{Result, TemplateError};
use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::value::Value;

/// Lexical token of an expression
#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

/// Two-character operators, matched before single characters
const DOUBLE_OPS: &[&str] = &["||", "&&", "==", "!=", ">=", "<="];
const SINGLE_OPS: &[&str] = &[
    "|", "&", ">", "<", "+", "-", "*", "/", "%", "!", ".", "[", "]", "(", ")", ",",
];

fn lex(source: &str) -> std::result::Result<Vec<Lexeme>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut lexemes = Vec::new();
    let mut i = 0;

    'outer: while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            // A dot followed by a digit continues the number; otherwise it is field access
            let is_float =
                i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit();
            if is_float {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let lexeme = if is_float {
                text.parse()
                    .map(Lexeme::Float)
                    .map_err(|_| format!("invalid number `{}`", text))?
            } else {
                text.parse()
                    .map(Lexeme::Int)
                    .map_err(|_| format!("integer `{}` out of range", text))?
            };
            lexemes.push(lexeme);
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            lexemes.push(Lexeme::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if let Some(close) = closing_quote(c) {
            i += 1;
            let mut text = String::new();
            while i < chars.len() {
                let ch = chars[i];
                if ch == close {
                    lexemes.push(Lexeme::Str(text));
                    i += 1;
                    continue 'outer;
                }
                if ch == '\\' && i + 1 < chars.len() {
                    text.push(match chars[i + 1] {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    i += 2;
                    continue;
                }
                text.push(ch);
                i += 1;
            }
            return Err("unterminated string literal".to_string());
        }

        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        if let Some(op) = DOUBLE_OPS.iter().find(|op| rest.starts_with(**op)) {
            lexemes.push(Lexeme::Op(*op));
            i += 2;
            continue;
        }
        if let Some(op) = SINGLE_OPS.iter().find(|op| rest.starts_with(**op)) {
            lexemes.push(Lexeme::Op(*op));
            i += 1;
            continue;
        }

        return Err(format!("unexpected character `{}`", c));
    }

    Ok(lexemes)
}

/// Closing quote for an opening quote character, typographic quotes included
fn closing_quote(open: char) -> Option<char> {
    match open {
        '"' => Some('"'),
        '\'' => Some('\''),
        '\u{201C}' => Some('\u{201D}'),
        '\u{2018}' => Some('\u{2019}'),
        _ => None,
    }
}

/// Parse an expression
pub fn parse(source: &str) -> Result<Expr> {
    let lexemes = lex(source).map_err(|message| TemplateError::syntax(source, message))?;
    if lexemes.is_empty() {
        return Err(TemplateError::syntax(source, "empty expression"));
    }

    let mut parser = Parser {
        lexemes,
        pos: 0,
    };
    let expr = parser
        .parse_or()
        .map_err(|message| TemplateError::syntax(source, message))?;

    match parser.peek() {
        None => Ok(expr),
        Some(extra) => Err(TemplateError::syntax(
            source,
            format!("unexpected {}", describe(extra)),
        )),
    }
}

type ParseResult = std::result::Result<Expr, String>;

struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn advance(&mut self) -> Option<Lexeme> {
        let lexeme = self.lexemes.get(self.pos).cloned();
        if lexeme.is_some() {
            self.pos += 1;
        }
        lexeme
    }

    /// Consume the operator if it is next
    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Lexeme::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> std::result::Result<(), String> {
        if self.eat(op) {
            return Ok(());
        }
        Err(match self.peek() {
            Some(other) => format!("expected `{}`, found {}", op, describe(other)),
            None => format!("expected `{}`, found end of expression", op),
        })
    }

    /// Next binary operator among `ops`, consumed
    fn binary_op(&mut self, ops: &[(&str, BinaryOp)]) -> Option<BinaryOp> {
        let Some(Lexeme::Op(found)) = self.peek() else {
            return None;
        };
        let op = ops.iter().find(|(symbol, _)| symbol == found).map(|(_, op)| *op)?;
        self.pos += 1;
        Some(op)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> ParseResult,
    ) -> ParseResult {
        let mut left = next(self)?;
        while let Some(op) = self.binary_op(ops) {
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> ParseResult {
        self.binary_level(&[("|", BinaryOp::Or), ("||", BinaryOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> ParseResult {
        self.binary_level(
            &[("&", BinaryOp::And), ("&&", BinaryOp::And)],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> ParseResult {
        self.binary_level(
            &[
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
                (">", BinaryOp::Gt),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                ("<=", BinaryOp::Le),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> ParseResult {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> ParseResult {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> ParseResult {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Neg
        } else {
            return self.parse_postfix();
        };
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> ParseResult {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                match self.advance() {
                    Some(Lexeme::Ident(name)) => {
                        expr = Expr::Field {
                            target: Box::new(expr),
                            name,
                        }
                    }
                    Some(other) => {
                        return Err(format!("expected field name, found {}", describe(&other)))
                    }
                    None => return Err("expected field name after `.`".to_string()),
                }
            } else if self.eat("[") {
                let index = self.parse_or()?;
                self.expect("]")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else if matches!(self.peek(), Some(Lexeme::Op("("))) {
                let Expr::Variable(name) = expr else {
                    return Err("only named functions can be called".to_string());
                };
                self.pos += 1;
                let args = self.parse_args()?;
                expr = Expr::Call { name, args };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_args(&mut self) -> std::result::Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.eat(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            if self.eat(")") {
                return Ok(args);
            }
            self.expect(",")?;
        }
    }

    fn parse_primary(&mut self) -> ParseResult {
        match self.advance() {
            Some(Lexeme::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Lexeme::Float(x)) => Ok(Expr::Literal(Value::Float(x))),
            Some(Lexeme::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Lexeme::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "nil" | "null" => Expr::Literal(Value::Nil),
                _ => Expr::Variable(name),
            }),
            Some(Lexeme::Op("(")) => {
                let inner = self.parse_or()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(other) => Err(format!("unexpected {}", describe(&other))),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn describe(lexeme: &Lexeme) -> String {
    match lexeme {
        Lexeme::Int(i) => format!("number `{}`", i),
        Lexeme::Float(x) => format!("number `{}`", x),
        Lexeme::Str(s) => format!("string \"{}\"", s),
        Lexeme::Ident(name) => format!("identifier `{}`", name),
        Lexeme::Op(op) => format!("`{}`", op),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Variable(name.to_string()))
    }

    fn int(i: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Value::Int(i)))
    }

    #[test]
    fn test_parse_comparison() {
        assert_eq!(
            parse("x > 5").unwrap(),
            Expr::Binary {
                op: BinaryOp::Gt,
                left: var("x"),
                right: int(5),
            }
        );
        assert_eq!(
            parse("x>=5").unwrap(),
            Expr::Binary {
                op: BinaryOp::Ge,
                left: var("x"),
                right: int(5),
            }
        );
    }

    #[test]
    fn test_precedence() {
        // a | b & c == 1 + 2 * 3
        let expr = parse("a | b & c == 1 + 2 * 3").unwrap();
        let Expr::Binary { op: BinaryOp::Or, right, .. } = expr else {
            panic!("Expected Or at the root");
        };
        let Expr::Binary { op: BinaryOp::And, right, .. } = *right else {
            panic!("Expected And");
        };
        let Expr::Binary { op: BinaryOp::Eq, right, .. } = *right else {
            panic!("Expected Eq");
        };
        let Expr::Binary { op: BinaryOp::Add, right, .. } = *right else {
            panic!("Expected Add");
        };
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_left_associative() {
        assert_eq!(
            parse("10 - 3 - 2").unwrap(),
            Expr::Binary {
                op: BinaryOp::Sub,
                left: Box::new(Expr::Binary {
                    op: BinaryOp::Sub,
                    left: int(10),
                    right: int(3),
                }),
                right: int(2),
            }
        );
    }

    #[test]
    fn test_postfix_chain() {
        assert_eq!(
            parse("order.items[0].name").unwrap(),
            Expr::Field {
                target: Box::new(Expr::Index {
                    target: Box::new(Expr::Field {
                        target: var("order"),
                        name: "items".to_string(),
                    }),
                    index: int(0),
                }),
                name: "name".to_string(),
            }
        );
    }

    #[test]
    fn test_call() {
        assert_eq!(
            parse("join(tags, \", \")").unwrap(),
            Expr::Call {
                name: "join".to_string(),
                args: vec![
                    Expr::Variable("tags".to_string()),
                    Expr::Literal(Value::from(", ")),
                ],
            }
        );
        assert_eq!(
            parse("hideRow()").unwrap(),
            Expr::Call {
                name: "hideRow".to_string(),
                args: vec![],
            }
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("true").unwrap(), Expr::Literal(Value::Bool(true)));
        assert_eq!(parse("null").unwrap(), Expr::Literal(Value::Nil));
        assert_eq!(parse("2.5").unwrap(), Expr::Literal(Value::Float(2.5)));
        assert_eq!(
            parse(r#"'it\'s'"#).unwrap(),
            Expr::Literal(Value::from("it's"))
        );
    }

    #[test]
    fn test_typographic_quotes() {
        assert_eq!(
            parse("\u{201C}header\u{201D}").unwrap(),
            Expr::Literal(Value::from("header"))
        );
        assert_eq!(
            parse("\u{2018}x\u{2019}").unwrap(),
            Expr::Literal(Value::from("x"))
        );
    }

    #[test]
    fn test_unary() {
        assert_eq!(
            parse("!done").unwrap(),
            Expr::Unary {
                op: UnaryOp::Not,
                operand: var("done"),
            }
        );
        assert!(matches!(
            parse("-x * 2").unwrap(),
            Expr::Binary { op: BinaryOp::Mul, .. }
        ));
    }

    #[test]
    fn test_syntax_errors() {
        for source in ["", "x >", "(a", "a b", "f(1,", "\"open", "a # b", "x.", "1(2)"] {
            assert!(
                matches!(parse(source), Err(TemplateError::Syntax { .. })),
                "expected syntax error for {:?}",
                source
            );
        }
    }

    #[test]
    fn test_syntax_error_carries_expression() {
        match parse("a +") {
            Err(TemplateError::Syntax { expression, .. }) => assert_eq!(expression, "a +"),
            other => panic!("Expected syntax error, got {:?}", other),
        }
    }
}
