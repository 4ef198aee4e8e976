//! Fragments
//!
//! A fragment is a separately authored body spliced in by
//! `{{include "name"}}`. Resolution is delegated to a [`FragmentResolver`];
//! cycle and depth bookkeeping live in the per-render [`RenderContext`].

use std::collections::BTreeMap;

use docfill_ooxml::{Block, Document};
use tracing::debug;

use crate::error::{Result, TemplateError};
use crate::render::RenderContext;

/// A named, read-only document body
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Name used by `{{include}}`
    pub name: String,
    /// Parsed body
    pub blocks: Vec<Block>,
}

impl Fragment {
    /// Create a fragment from blocks
    pub fn new(name: impl Into<String>, blocks: Vec<Block>) -> Self {
        Self {
            name: name.into(),
            blocks,
        }
    }

    /// Create a fragment from a parsed document body
    pub fn from_document(name: impl Into<String>, document: Document) -> Self {
        Self::new(name, document.blocks)
    }
}

/// Looks up fragments by name
pub trait FragmentResolver {
    /// The fragment called `name`, if known
    fn resolve(&self, name: &str) -> Option<&Fragment>;
}

/// A map-backed set of fragments
#[derive(Debug, Clone, Default)]
pub struct FragmentSet {
    fragments: BTreeMap<String, Fragment>,
}

impl FragmentSet {
    /// An empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment, replacing one with the same name
    pub fn insert(&mut self, fragment: Fragment) {
        self.fragments.insert(fragment.name.clone(), fragment);
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, fragment: Fragment) -> Self {
        self.insert(fragment);
        self
    }

    /// Number of fragments
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// True if the set holds no fragments
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragment names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }
}

impl FragmentResolver for FragmentSet {
    fn resolve(&self, name: &str) -> Option<&Fragment> {
        self.fragments.get(name)
    }
}

impl RenderContext {
    /// Push `name` onto the inclusion stack, rejecting cycles and excess depth
    pub(crate) fn enter_fragment(&mut self, name: &str, max_depth: usize) -> Result<()> {
        if self.include_stack.iter().any(|n| n == name) {
            let mut chain = self.include_stack.clone();
            chain.push(name.to_string());
            return Err(TemplateError::Cycle { chain });
        }
        if self.depth >= max_depth {
            return Err(TemplateError::DepthExceeded {
                name: name.to_string(),
                max: max_depth,
            });
        }

        self.include_stack.push(name.to_string());
        self.depth += 1;
        debug!(fragment = name, depth = self.depth, "entering fragment");
        Ok(())
    }

    /// Pop the innermost fragment
    pub(crate) fn leave_fragment(&mut self) {
        if let Some(name) = self.include_stack.pop() {
            self.depth = self.depth.saturating_sub(1);
            debug!(fragment = name.as_str(), depth = self.depth, "left fragment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docfill_ooxml::Paragraph;

    #[test]
    fn test_fragment_set_resolves_by_name() {
        let set = FragmentSet::new().with(Fragment::new(
            "footer",
            vec![Block::Paragraph(Paragraph::with_text("Regards"))],
        ));

        assert_eq!(set.len(), 1);
        assert_eq!(set.resolve("footer").unwrap().blocks.len(), 1);
        assert!(set.resolve("header").is_none());
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["footer"]);
    }

    #[test]
    fn test_enter_detects_cycle() {
        let mut ctx = RenderContext::default();
        ctx.enter_fragment("a", 10).unwrap();
        ctx.enter_fragment("b", 10).unwrap();

        assert_eq!(
            ctx.enter_fragment("a", 10),
            Err(TemplateError::Cycle {
                chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            })
        );
    }

    #[test]
    fn test_enter_checks_depth() {
        let mut ctx = RenderContext::default();
        ctx.enter_fragment("a", 1).unwrap();

        assert!(matches!(
            ctx.enter_fragment("b", 1),
            Err(TemplateError::DepthExceeded { max: 1, .. })
        ));
    }

    #[test]
    fn test_leave_pops() {
        let mut ctx = RenderContext::default();
        ctx.enter_fragment("a", 10).unwrap();
        ctx.leave_fragment();

        assert!(ctx.include_stack.is_empty());
        assert_eq!(ctx.depth, 0);
        // Re-entering after leaving is not a cycle
        assert!(ctx.enter_fragment("a", 10).is_ok());
    }
}
