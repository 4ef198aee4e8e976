//! Runtime values
//!
//! Template data arrives as JSON-like trees. [`Value`] is the evaluator's
//! view of that data plus [`Marker`] results, the tagged side channel for
//! effects that cannot be expressed as text (images, links, hidden rows and
//! columns).

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::EvalError;

/// A value produced by data lookup or expression evaluation
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value; unknown variables evaluate to this
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String
    String(String),
    /// Ordered collection
    List(Vec<Value>),
    /// String-keyed map, iterated in key order
    Map(BTreeMap<String, Value>),
    /// Tagged side-channel result of a function call
    Marker(Marker),
}

/// Kinds of side-channel effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// Insert an image
    Image,
    /// Insert a hyperlink
    Link,
    /// Drop the table row that produced the marker
    HideRow,
    /// Drop the table column that produced the marker
    HideColumn,
}

/// A tagged function result that needs special handling instead of text
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    /// What the marker asks for
    pub kind: MarkerKind,
    /// Kind-specific arguments (`path`, `url`, `text`, `width`, ...)
    pub payload: BTreeMap<String, Value>,
}

impl Marker {
    /// Create a marker without payload
    pub fn new(kind: MarkerKind) -> Self {
        Self {
            kind,
            payload: BTreeMap::new(),
        }
    }

    /// Add a payload entry
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Text written in place of the marker: link text, image alt text or nothing
    pub fn display_text(&self) -> String {
        match self.kind {
            MarkerKind::Link => self
                .payload
                .get("text")
                .or_else(|| self.payload.get("url"))
                .map(Value::to_string)
                .unwrap_or_default(),
            MarkerKind::Image => self
                .payload
                .get("alt")
                .map(Value::to_string)
                .unwrap_or_default(),
            MarkerKind::HideRow | MarkerKind::HideColumn => String::new(),
        }
    }
}

impl Value {
    /// Convert any serializable value into a template value
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Value::from)
    }

    /// Truthiness: nil, false, zero, empty string and empty collections are falsy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Marker(_) => true,
        }
    }

    /// Name of the value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Marker(_) => "marker",
        }
    }

    /// Numeric view of the value, if it is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String view of the value, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a map field; anything that is not a map has no fields
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(name),
            _ => None,
        }
    }
}

/// Coerce a value into the sequence a loop iterates over.
///
/// - nil yields nothing
/// - lists pass through
/// - maps yield `{key, value}` maps in key order
/// - strings yield one single-character string per code point
/// - anything else is not iterable
pub fn to_slice(value: &Value) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::List(items) => Ok(items.clone()),
        Value::Map(map) => Ok(map
            .iter()
            .map(|(key, value)| {
                let mut pair = BTreeMap::new();
                pair.insert("key".to_string(), Value::String(key.clone()));
                pair.insert("value".to_string(), value.clone());
                Value::Map(pair)
            })
            .collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(EvalError::NotIterable(format!(
            "{} value `{}`",
            other.type_name(),
            other
        ))),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Value::Marker(marker) => f.write_str(&marker.display_text()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<Marker> for Value {
    fn from(marker: Marker) -> Self {
        Value::Marker(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!Value::Map(BTreeMap::new()).is_truthy());

        assert!(Value::Int(-1).is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::from(vec![1]).is_truthy());
        assert!(Value::Marker(Marker::new(MarkerKind::HideRow)).is_truthy());
    }

    #[test]
    fn test_to_slice_nil_is_empty() {
        assert_eq!(to_slice(&Value::Nil).unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn test_to_slice_string_iterates_code_points() {
        assert_eq!(
            to_slice(&Value::from("ab")).unwrap(),
            vec![Value::from("a"), Value::from("b")]
        );
        assert_eq!(to_slice(&Value::from("né")).unwrap().len(), 2);
    }

    #[test]
    fn test_to_slice_map_yields_pairs() {
        let map = Value::from(json!({"k": "v"}));
        let items = to_slice(&map).unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].field("key"), Some(&Value::from("k")));
        assert_eq!(items[0].field("value"), Some(&Value::from("v")));
    }

    #[test]
    fn test_to_slice_rejects_scalars() {
        assert!(matches!(
            to_slice(&Value::Int(3)),
            Err(EvalError::NotIterable(_))
        ));
        assert!(matches!(
            to_slice(&Value::Bool(true)),
            Err(EvalError::NotIterable(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Nil.to_string(), "");
        assert_eq!(Value::Float(3.0).to_string(), "3");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::from(vec!["a", "b"]).to_string(), "a, b");
        assert_eq!(Value::from(json!({"a": 1})).to_string(), "{a: 1}");
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from(json!(21)), Value::Int(21));
        assert_eq!(Value::from(json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from(json!(null)), Value::Nil);
    }

    #[test]
    fn test_from_serialize_struct() {
        #[derive(Serialize)]
        struct Customer {
            name: String,
            age: u32,
        }

        let value = Value::from_serialize(&Customer {
            name: "Ada".to_string(),
            age: 36,
        })
        .unwrap();
        assert_eq!(value.field("name"), Some(&Value::from("Ada")));
        assert_eq!(value.field("age"), Some(&Value::Int(36)));
    }

    #[test]
    fn test_marker_display_text() {
        let link = Marker::new(MarkerKind::Link)
            .with("url", "https://example.com")
            .with("text", "Example");
        assert_eq!(link.display_text(), "Example");

        let bare = Marker::new(MarkerKind::Link).with("url", "https://example.com");
        assert_eq!(bare.display_text(), "https://example.com");
        assert_eq!(Marker::new(MarkerKind::HideRow).display_text(), "");
    }
}
