//! Archive handling for DOCX/DOTX packages
//!
//! A DOCX file is a ZIP archive of XML parts. The whole package is unpacked
//! into memory so template parts can be rewritten and the package re-zipped
//! with every other part (styles, media, relationships) carried over as-is.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use zip::read::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;
use tracing::debug;

use crate::error::{OoxmlError, Result};

/// Path of the main document part
pub const DOCUMENT_PART: &str = "word/document.xml";

/// Path of the package content type map
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

const TEMPLATE_MAIN_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.template.main+xml";
const DOCUMENT_MAIN_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml";

/// An unpacked OOXML package
#[derive(Debug, Clone, Default)]
pub struct OoxmlArchive {
    /// All parts in the package, keyed by path
    files: HashMap<String, Vec<u8>>,
}

impl OoxmlArchive {
    /// Open and unpack a DOCX/DOTX file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Unpack a package from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }

    /// Unpack a package from any reader that implements Read + Seek
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut files = HashMap::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            files.insert(name, contents);
        }

        debug!(parts = files.len(), "unpacked OOXML package");
        Ok(Self { files })
    }

    /// Get a part's contents by path
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(|v| v.as_slice())
    }

    /// Get the main document part (word/document.xml)
    pub fn document_xml(&self) -> Result<&[u8]> {
        self.get(DOCUMENT_PART)
            .ok_or_else(|| OoxmlError::MissingFile(DOCUMENT_PART.to_string()))
    }

    /// Paths of every part that may carry template directives: the main
    /// document followed by headers and footers in name order.
    pub fn template_parts(&self) -> Vec<String> {
        let mut extra: Vec<String> = self
            .files
            .keys()
            .filter(|path| is_header_or_footer(path))
            .cloned()
            .collect();
        extra.sort();

        let mut parts = Vec::with_capacity(extra.len() + 1);
        if self.contains(DOCUMENT_PART) {
            parts.push(DOCUMENT_PART.to_string());
        }
        parts.extend(extra);
        parts
    }

    /// Check if a part exists in the package
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// List all part paths
    pub fn file_list(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|s| s.as_str())
    }

    /// Set or replace a part's contents
    pub fn set(&mut self, path: impl Into<String>, contents: Vec<u8>) {
        self.files.insert(path.into(), contents);
    }

    /// Set a part's contents from a string
    pub fn set_string(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.files.insert(path.into(), contents.into().into_bytes());
    }

    /// True if the main part is declared as a template (DOTX)
    pub fn is_template(&self) -> bool {
        self.get(CONTENT_TYPES_PART)
            .map(|types| String::from_utf8_lossy(types).contains(TEMPLATE_MAIN_TYPE))
            .unwrap_or(false)
    }

    /// Re-declare a DOTX main part as a plain document so the package opens
    /// as a DOCX. Returns true if anything changed.
    pub fn convert_template_to_document(&mut self) -> bool {
        let Some(types) = self.get(CONTENT_TYPES_PART) else {
            return false;
        };
        let types = String::from_utf8_lossy(types);
        if !types.contains(TEMPLATE_MAIN_TYPE) {
            return false;
        }
        let converted = types.replace(TEMPLATE_MAIN_TYPE, DOCUMENT_MAIN_TYPE);
        self.set_string(CONTENT_TYPES_PART, converted);
        debug!("declared template main part as document");
        true
    }

    /// Write the package to a file
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_to(file)
    }

    /// Write the package into an in-memory buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    /// Write the package to any writer
    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<()> {
        let mut zip = ZipWriter::new(writer);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        // [Content_Types].xml first, the rest sorted for deterministic output
        let mut paths: Vec<&String> = self.files.keys().collect();
        paths.sort_by(|a, b| {
            let a_key = (a.as_str() != CONTENT_TYPES_PART, a.as_str());
            let b_key = (b.as_str() != CONTENT_TYPES_PART, b.as_str());
            a_key.cmp(&b_key)
        });

        for path in paths {
            zip.start_file(path.as_str(), options)?;
            zip.write_all(&self.files[path])?;
        }

        zip.finish()?;
        Ok(())
    }
}

fn is_header_or_footer(path: &str) -> bool {
    path.strip_prefix("word/")
        .filter(|name| !name.contains('/'))
        .map(|name| {
            (name.starts_with("header") || name.starts_with("footer")) && name.ends_with(".xml")
        })
        .unwrap_or(false)
}
