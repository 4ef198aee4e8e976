//! # docfill-template
//!
//! Template control-flow engine for docfill.
//!
//! Templates are ordinary word-processor documents with `{{...}}` directives
//! in their text:
//!
//! - `{{customer.name}}`, `{{upper(title)}}`, `{{total * 1.2}}` substitute values
//! - `{{if cond}}` / `{{elsif cond}}` / `{{else}}` / `{{end}}` select content
//! - `{{unless cond}}` ... `{{end}}` is the inverted `if`
//! - `{{for [i,] item in items}}` ... `{{end}}` repeats content
//! - `{{include "name"}}` splices in a fragment
//! - `{{pageBreak}}` inserts a page break
//!
//! A directive may live inside a single run, spread over several runs of a
//! paragraph, or span whole paragraphs and table rows. The renderer handles
//! each case and never modifies its input.
//!
//! ## Example
//!
//! ```
//! use docfill_ooxml::{Block, Paragraph};
//! use docfill_template::{FragmentSet, FunctionRegistry, RenderConfig, Renderer, Value};
//!
//! let blocks = vec![
//!     Block::Paragraph(Paragraph::with_text("{{for item in items}}")),
//!     Block::Paragraph(Paragraph::with_text("- {{upper(item)}}")),
//!     Block::Paragraph(Paragraph::with_text("{{end}}")),
//! ];
//! let data = Value::from(serde_json::json!({"items": ["pen", "ink"]}));
//!
//! let functions = FunctionRegistry::with_builtins();
//! let fragments = FragmentSet::new();
//! let config = RenderConfig::default();
//! let output = Renderer::new(&functions, &fragments, &config).render(&blocks, &data)?;
//!
//! let lines: Vec<String> = output.blocks.iter().map(Block::plain_text).collect();
//! assert_eq!(lines, vec!["- PEN", "- INK"]);
//! # Ok::<(), docfill_template::TemplateError>(())
//! ```

pub mod config;
pub mod control;
pub mod directive;
pub mod error;
pub mod expr;
pub mod fragment;
pub mod functions;
pub mod inline_loop;
pub mod merge;
pub mod render;
pub mod scope;
mod table;
pub mod token;
pub mod value;

pub use config::{RenderConfig, DEFAULT_MAX_INCLUDE_DEPTH};
pub use control::{parse_control_structures, render_nodes, render_text, ControlNode, LoopHeader, Piece};
pub use directive::{classify, find_matching_end, DirectiveKind, DirectiveMarker, DirectiveMatch};
pub use error::{EvalError, Result, TemplateError};
pub use expr::{Expr, ParsedExpr};
pub use fragment::{Fragment, FragmentResolver, FragmentSet};
pub use functions::{Arity, Function, FunctionRegistry};
pub use inline_loop::{split_inline_loop, InlineLoop};
pub use merge::merge_consecutive_runs;
pub use render::{RenderContext, RenderOutput, Renderer};
pub use scope::Scope;
pub use token::{tokenize, Token, TokenKind};
pub use value::{Marker, MarkerKind, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
