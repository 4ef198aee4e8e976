//! Evaluation environment
//!
//! The root scope holds the render data. Each loop iteration gets a child
//! scope that shadows the loop variables and borrows its parent, so no two
//! iterations ever share bindings and the data itself is never modified.

use std::collections::HashMap;

use crate::value::Value;

/// A chain of variable bindings
#[derive(Debug, Default)]
pub struct Scope<'a> {
    vars: HashMap<String, Value>,
    parent: Option<&'a Scope<'a>>,
}

impl Scope<'static> {
    /// Root scope from a data value; a map's entries become variables
    pub fn from_value(data: &Value) -> Self {
        let vars = match data {
            Value::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => HashMap::new(),
        };
        Self { vars, parent: None }
    }
}

impl<'a> Scope<'a> {
    /// A fresh child scope shadowing this one
    pub fn child(&'a self) -> Scope<'a> {
        Scope {
            vars: HashMap::new(),
            parent: Some(self),
        }
    }

    /// Bind a variable in this scope
    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    /// Resolve a variable, innermost binding first
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        match self.vars.get(name) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.lookup(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_scope_from_map() {
        let scope = Scope::from_value(&Value::from(json!({"name": "Ada", "age": 36})));
        assert_eq!(scope.lookup("name"), Some(&Value::from("Ada")));
        assert_eq!(scope.lookup("missing"), None);
    }

    #[test]
    fn test_root_scope_from_non_map_is_empty() {
        let scope = Scope::from_value(&Value::from(json!([1, 2])));
        assert_eq!(scope.lookup("0"), None);
    }

    #[test]
    fn test_child_shadows_without_touching_parent() {
        let root = Scope::from_value(&Value::from(json!({"x": 1, "y": 2})));
        {
            let child = root.child().bind("x", Value::Int(10));
            assert_eq!(child.lookup("x"), Some(&Value::Int(10)));
            assert_eq!(child.lookup("y"), Some(&Value::Int(2)));
        }
        assert_eq!(root.lookup("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_sibling_iterations_are_independent() {
        let root = Scope::default();
        let first = root.child().bind("item", Value::from("a"));
        let second = root.child().bind("item", Value::from("b"));

        assert_eq!(first.lookup("item"), Some(&Value::from("a")));
        assert_eq!(second.lookup("item"), Some(&Value::from("b")));
        assert_eq!(root.lookup("item"), None);
    }
}
