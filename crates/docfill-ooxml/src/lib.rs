//! # docfill-ooxml
//!
//! OOXML (Office Open XML) document model for docfill.
//!
//! This crate provides functionality to:
//! - Unpack and repack DOCX/DOTX packages
//! - Read the block content of the document, header and footer parts into
//!   paragraphs, runs, hyperlinks and tables
//! - Write a (rendered) block model back into the original part
//!
//! ## Example: Reading and writing a part
//!
//! ```no_run
//! use docfill_ooxml::{replace_body, Document, OoxmlArchive, DOCUMENT_PART};
//!
//! let mut archive = OoxmlArchive::open("letter.docx")?;
//! let original = archive.document_xml()?.to_vec();
//! let document = Document::parse(&original)?;
//!
//! for block in &document.blocks {
//!     println!("{}", block.plain_text());
//! }
//!
//! archive.set(DOCUMENT_PART, replace_body(&original, &document)?);
//! archive.write_to_file("copy.docx")?;
//! # Ok::<(), docfill_ooxml::OoxmlError>(())
//! ```

pub mod archive;
pub mod document;
pub mod error;
pub mod writer;

pub use archive::{OoxmlArchive, CONTENT_TYPES_PART, DOCUMENT_PART};
pub use document::{
    Block, Break, BreakKind, Document, GridColumn, Hyperlink, Paragraph, ParagraphChild, RawXml,
    Run, RunText, Space, Table, TableCell, TableRow,
};
pub use error::{OoxmlError, Result};
pub use writer::{replace_body, BodyWriter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
