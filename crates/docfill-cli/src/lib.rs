//! docfill CLI - Command-line interface library
//!
//! This library provides the CLI functionality for docfill:
//! - Render: fill a DOCX/DOTX template with JSON data
//!
//! # Library Usage
//!
//! ```ignore
//! use docfill_cli::{render_command, Settings};
//!
//! let settings = Settings::default();
//! render_command(&template, &data, &output, &settings)?;
//! ```
//!
//! # Binary Usage
//!
//! ```bash
//! # Render a template
//! docfill render letter.dotx customer.json --output letter.docx
//!
//! # With fragments and a config file
//! docfill render invoice.docx order.json -o out.docx -f terms=terms.docx -c docfill.toml
//! ```

pub mod app;
pub mod settings;

pub use app::{load_data, load_fragments, load_settings, render_archive, render_command, run_cli};
pub use app::RenderSummary;
pub use settings::{parse_fragment_arg, Settings};
