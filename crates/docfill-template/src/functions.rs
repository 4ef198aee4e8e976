//! Function registry
//!
//! Functions are looked up by name at evaluation time. A registry is an
//! ordinary value handed to each render, so renders with different custom
//! functions never see each other's registrations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::value::{to_slice, Marker, MarkerKind, Value};

/// Accepted argument counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    /// Minimum number of arguments
    pub min: usize,
    /// Maximum number of arguments, `None` for variadic
    pub max: Option<usize>,
}

impl Arity {
    /// Exactly `n` arguments
    pub const fn exact(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    /// Between `min` and `max` arguments
    pub const fn range(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// At least `min` arguments
    pub const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    /// Check an argument count
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", max),
            Some(max) => write!(f, "{} to {}", self.min, max),
            None => write!(f, "at least {}", self.min),
        }
    }
}

/// A function callable from template expressions
pub trait Function: Send + Sync {
    /// Accepted argument counts, checked by the evaluator before `call`
    fn arity(&self) -> Arity;

    /// Call with already-evaluated positional arguments
    fn call(&self, args: &[Value]) -> Result<Value, String>;
}

/// A [`Function`] backed by a closure
struct FnFunction<F> {
    arity: Arity,
    f: F,
}

impl<F> Function for FnFunction<F>
where
    F: Fn(&[Value]) -> Result<Value, String> + Send + Sync,
{
    fn arity(&self) -> Arity {
        self.arity
    }

    fn call(&self, args: &[Value]) -> Result<Value, String> {
        if !self.arity.accepts(args.len()) {
            return Err(format!(
                "expected {} argument(s), got {}",
                self.arity,
                args.len()
            ));
        }
        (self.f)(args)
    }
}

/// Named functions available to expressions
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn Function>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in functions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Register a function, replacing any previous one with the same name
    pub fn register(&mut self, name: impl Into<String>, function: impl Function + 'static) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Register a closure
    pub fn register_fn<F>(&mut self, name: impl Into<String>, arity: Arity, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(name, FnFunction { arity, f });
    }

    /// Look up a function by name
    pub fn lookup(&self, name: &str) -> Option<&dyn Function> {
        self.functions.get(name).map(|f| f.as_ref())
    }

    /// Check if a function is registered
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

// ==================== BUILT-INS ====================

fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register_fn("len", Arity::exact(1), |args| {
        let len = match &args[0] {
            Value::Nil => 0,
            Value::String(s) => s.chars().count(),
            Value::List(items) => items.len(),
            Value::Map(map) => map.len(),
            other => return Err(format!("{} value has no length", other.type_name())),
        };
        Ok(Value::from(len))
    });

    registry.register_fn("upper", Arity::exact(1), |args| {
        Ok(Value::String(args[0].to_string().to_uppercase()))
    });

    registry.register_fn("lower", Arity::exact(1), |args| {
        Ok(Value::String(args[0].to_string().to_lowercase()))
    });

    registry.register_fn("title", Arity::exact(1), |args| {
        Ok(Value::String(title_case(&args[0].to_string())))
    });

    registry.register_fn("trim", Arity::exact(1), |args| {
        Ok(Value::String(args[0].to_string().trim().to_string()))
    });

    // A scalar string is joined character by character
    registry.register_fn("join", Arity::range(1, 2), |args| {
        let items = to_slice(&args[0]).map_err(|e| e.to_string())?;
        let separator = args.get(1).map(Value::to_string).unwrap_or_default();
        Ok(Value::String(
            items
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(&separator),
        ))
    });

    registry.register_fn("default", Arity::exact(2), |args| {
        Ok(if args[0].is_truthy() {
            args[0].clone()
        } else {
            args[1].clone()
        })
    });

    registry.register_fn("contains", Arity::exact(2), |args| {
        let found = match (&args[0], &args[1]) {
            (Value::String(haystack), needle) => haystack.contains(&needle.to_string()),
            (Value::List(items), needle) => items.contains(needle),
            (Value::Map(map), Value::String(key)) => map.contains_key(key),
            (Value::Nil, _) => false,
            (other, _) => {
                return Err(format!("cannot search in {} value", other.type_name()))
            }
        };
        Ok(Value::Bool(found))
    });

    registry.register_fn("str", Arity::exact(1), |args| {
        Ok(Value::String(args[0].to_string()))
    });

    registry.register_fn("image", Arity::range(1, 3), |args| {
        let mut marker = Marker::new(MarkerKind::Image).with("path", args[0].clone());
        if let Some(width) = args.get(1) {
            marker = marker.with("width", width.clone());
        }
        if let Some(height) = args.get(2) {
            marker = marker.with("height", height.clone());
        }
        Ok(Value::Marker(marker))
    });

    registry.register_fn("link", Arity::range(1, 2), |args| {
        let mut marker = Marker::new(MarkerKind::Link).with("url", args[0].clone());
        if let Some(text) = args.get(1) {
            marker = marker.with("text", text.clone());
        }
        Ok(Value::Marker(marker))
    });

    registry.register_fn("hideRow", Arity::exact(0), |_| {
        Ok(Value::Marker(Marker::new(MarkerKind::HideRow)))
    });

    registry.register_fn("hideColumn", Arity::exact(0), |_| {
        Ok(Value::Marker(Marker::new(MarkerKind::HideColumn)))
    });
}

fn title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                result.extend(c.to_uppercase());
            } else {
                result.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            result.push(c);
            at_word_start = true;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, String> {
        let registry = FunctionRegistry::with_builtins();
        registry.lookup(name).unwrap().call(&args)
    }

    #[test]
    fn test_arity() {
        assert!(Arity::exact(1).accepts(1));
        assert!(!Arity::exact(1).accepts(2));
        assert!(Arity::range(1, 3).accepts(3));
        assert!(Arity::at_least(1).accepts(10));
        assert!(!Arity::at_least(1).accepts(0));

        assert_eq!(Arity::exact(2).to_string(), "2");
        assert_eq!(Arity::range(1, 2).to_string(), "1 to 2");
        assert_eq!(Arity::at_least(1).to_string(), "at least 1");
    }

    #[test]
    fn test_direct_call_checks_arity() {
        assert!(call("len", vec![]).is_err());
        assert!(call("default", vec![Value::Nil]).is_err());
        assert!(call("image", vec![]).is_err());
        assert!(call("hideRow", vec![Value::Nil]).is_err());
    }

    #[test]
    fn test_string_builtins() {
        assert_eq!(call("upper", vec!["abc".into()]), Ok("ABC".into()));
        assert_eq!(call("lower", vec!["ABC".into()]), Ok("abc".into()));
        assert_eq!(call("title", vec!["hello wORLD".into()]), Ok("Hello World".into()));
        assert_eq!(call("trim", vec!["  x ".into()]), Ok("x".into()));
        assert_eq!(call("str", vec![Value::Int(5)]), Ok("5".into()));
    }

    #[test]
    fn test_len() {
        assert_eq!(call("len", vec![Value::from(vec![1, 2, 3])]), Ok(Value::Int(3)));
        assert_eq!(call("len", vec!["né".into()]), Ok(Value::Int(2)));
        assert_eq!(call("len", vec![Value::Nil]), Ok(Value::Int(0)));
        assert!(call("len", vec![Value::Bool(true)]).is_err());
    }

    #[test]
    fn test_join() {
        assert_eq!(
            call("join", vec![Value::from(vec!["a", "b"]), ", ".into()]),
            Ok("a, b".into())
        );
        assert_eq!(call("join", vec![Value::from(vec![1, 2])]), Ok("12".into()));
    }

    #[test]
    fn test_join_scalar_string_iterates_characters() {
        assert_eq!(call("join", vec!["abc".into(), "-".into()]), Ok("a-b-c".into()));
        assert!(call("join", vec![Value::Int(3)]).is_err());
    }

    #[test]
    fn test_default_and_contains() {
        assert_eq!(call("default", vec![Value::Nil, "n/a".into()]), Ok("n/a".into()));
        assert_eq!(call("default", vec!["x".into(), "n/a".into()]), Ok("x".into()));

        assert_eq!(
            call("contains", vec!["hello".into(), "ell".into()]),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            call("contains", vec![Value::from(json!({"k": 1})), "k".into()]),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            call("contains", vec![Value::from(vec![1, 2]), Value::Int(3)]),
            Ok(Value::Bool(false))
        );
    }

    #[test]
    fn test_marker_constructors() {
        let Ok(Value::Marker(image)) = call("image", vec!["logo.png".into(), Value::Int(120)])
        else {
            panic!("Expected image marker");
        };
        assert_eq!(image.kind, MarkerKind::Image);
        assert_eq!(image.payload.get("width"), Some(&Value::Int(120)));

        assert_eq!(
            call("hideRow", vec![]),
            Ok(Value::Marker(Marker::new(MarkerKind::HideRow)))
        );
        assert_eq!(
            call("hideColumn", vec![]),
            Ok(Value::Marker(Marker::new(MarkerKind::HideColumn)))
        );
    }

    #[test]
    fn test_custom_function() {
        let mut registry = FunctionRegistry::new();
        assert!(registry.lookup("double").is_none());

        registry.register_fn("double", Arity::exact(1), |args| match &args[0] {
            Value::Int(i) => Ok(Value::Int(i * 2)),
            other => Err(format!("expected int, got {}", other.type_name())),
        });

        let double = registry.lookup("double").unwrap();
        assert_eq!(double.arity(), Arity::exact(1));
        assert_eq!(double.call(&[Value::Int(21)]), Ok(Value::Int(42)));
        assert!(!registry.contains("upper"));
    }

    #[test]
    fn test_registries_are_independent() {
        let mut first = FunctionRegistry::with_builtins();
        let second = FunctionRegistry::with_builtins();
        first.register_fn("shout", Arity::exact(0), |_| Ok("HEY".into()));

        assert!(first.contains("shout"));
        assert!(!second.contains("shout"));
    }
}
