//! Expression engine
//!
//! Directive conditions, loop collections and `{{...}}` value tags are small
//! expressions: literals, variables, field and index access, operators and
//! calls into the [`FunctionRegistry`].

pub mod ast;
mod eval;
mod parser;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use eval::evaluate;
pub use parser::parse;

use crate::error::{Result, TemplateError};
use crate::functions::FunctionRegistry;
use crate::scope::Scope;
use crate::value::Value;

/// A parsed expression together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedExpr {
    /// Expression text as written in the template
    pub source: String,
    /// Syntax tree
    pub ast: Expr,
}

impl ParsedExpr {
    /// Parse `source`
    pub fn parse(source: &str) -> Result<Self> {
        Ok(Self {
            source: source.to_string(),
            ast: parse(source)?,
        })
    }

    /// Evaluate, attaching the source text to any failure
    pub fn eval(&self, scope: &Scope<'_>, functions: &FunctionRegistry) -> Result<Value> {
        evaluate(&self.ast, scope, functions).map_err(|source| TemplateError::Evaluation {
            expression: self.source.clone(),
            source,
        })
    }
}
