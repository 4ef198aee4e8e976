//! Render configuration

use serde::{Deserialize, Serialize};

use crate::error::{Result, TemplateError};

/// Default maximum nesting depth of fragment inclusion
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 10;

/// Options that control a render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Maximum nesting depth of `{{include}}`
    pub max_include_depth: usize,
    /// Coalesce split runs before looking for directives
    pub merge_runs: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            merge_runs: true,
        }
    }
}

impl RenderConfig {
    /// Load from TOML; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| TemplateError::Config(e.to_string()))
    }
}
