//! Command-line settings
//!
//! Read from an optional `docfill.toml`:
//!
//! ```toml
//! [render]
//! max_include_depth = 5
//! merge_runs = true
//!
//! [fragments]
//! signature = "fragments/signature.docx"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use docfill_template::RenderConfig;
use serde::{Deserialize, Serialize};

/// Top-level settings structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Render options
    pub render: RenderConfig,
    /// Fragment documents by name
    pub fragments: BTreeMap<String, PathBuf>,
}

impl Settings {
    /// Parse settings from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Resolve relative fragment paths against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in self.fragments.values_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Add a fragment, replacing a configured one with the same name
    pub fn add_fragment(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.fragments.insert(name.into(), path.into());
    }
}

/// Parse a `name=path` fragment argument
pub fn parse_fragment_arg(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected NAME=PATH, got `{}`", arg)),
    }
}
