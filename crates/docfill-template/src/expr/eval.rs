//! Expression evaluation

use std::cmp::Ordering;

use crate::error::EvalError;
use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::functions::FunctionRegistry;
use crate::scope::Scope;
use crate::value::Value;

/// Evaluate an expression against a scope and function registry
pub fn evaluate(
    expr: &Expr,
    scope: &Scope<'_>,
    functions: &FunctionRegistry,
) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(name) => Ok(scope.lookup(name).cloned().unwrap_or_default()),
        Expr::Field { target, name } => {
            let target = evaluate(target, scope, functions)?;
            field(&target, name)
        }
        Expr::Index { target, index } => {
            let target = evaluate(target, scope, functions)?;
            let index = evaluate(index, scope, functions)?;
            index_value(&target, &index)
        }
        Expr::Unary { op, operand } => {
            let operand = evaluate(operand, scope, functions)?;
            unary(*op, operand)
        }
        Expr::Binary { op, left, right } => match op {
            BinaryOp::Or => {
                if evaluate(left, scope, functions)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(evaluate(right, scope, functions)?.is_truthy()))
            }
            BinaryOp::And => {
                if !evaluate(left, scope, functions)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(evaluate(right, scope, functions)?.is_truthy()))
            }
            _ => {
                let left = evaluate(left, scope, functions)?;
                let right = evaluate(right, scope, functions)?;
                binary(*op, left, right)
            }
        },
        Expr::Call { name, args } => {
            let function = functions
                .lookup(name)
                .ok_or_else(|| EvalError::UnknownFunction(name.clone()))?;

            let arity = function.arity();
            if !arity.accepts(args.len()) {
                return Err(EvalError::Arity {
                    name: name.clone(),
                    expected: arity.to_string(),
                    got: args.len(),
                });
            }

            let args = args
                .iter()
                .map(|arg| evaluate(arg, scope, functions))
                .collect::<Result<Vec<_>, _>>()?;
            function.call(&args).map_err(|message| EvalError::Function {
                name: name.clone(),
                message,
            })
        }
    }
}

fn field(target: &Value, name: &str) -> Result<Value, EvalError> {
    match target {
        Value::Nil => Ok(Value::Nil),
        Value::Map(map) => Ok(map.get(name).cloned().unwrap_or_default()),
        Value::Marker(marker) => Ok(marker.payload.get(name).cloned().unwrap_or_default()),
        other => Err(EvalError::Type(format!(
            "cannot read field `{}` of {} value",
            name,
            other.type_name()
        ))),
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Nil, _) => Ok(Value::Nil),
        (Value::List(items), Value::Int(i)) => {
            Ok(resolve_index(*i, items.len()).map_or(Value::Nil, |i| items[i].clone()))
        }
        (Value::String(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(resolve_index(*i, chars.len())
                .map_or(Value::Nil, |i| Value::String(chars[i].to_string())))
        }
        (Value::Map(map), Value::String(key)) => Ok(map.get(key).cloned().unwrap_or_default()),
        (target, index) => Err(EvalError::Type(format!(
            "cannot index {} value with {} value",
            target.type_name(),
            index.type_name()
        ))),
    }
}

/// Position for an index, negative indexes counting from the end
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Neg => match operand {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(EvalError::Type(format!(
                "cannot negate {} value",
                other.type_name()
            ))),
        },
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(&left, &right))),
        BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
            let ordering = compare(op, &left, &right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::Ge => ordering != Ordering::Less,
                BinaryOp::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }))
        }
        BinaryOp::Add => add(left, right),
        _ => arithmetic(op, left, right),
    }
}

/// Structural equality, with ints and floats compared numerically
fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        _ => left == right,
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Ordering, EvalError> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        EvalError::Type(format!(
            "cannot compare {} {} {}",
            left.type_name(),
            op,
            right.type_name()
        ))
    })
}

fn add(left: Value, right: Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b))),
        (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (left, right) => arithmetic(BinaryOp::Add, left, right),
    }
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    // Exact quotients stay integral
                    match a.checked_rem(b) {
                        Some(0) => a.checked_div(b),
                        Some(_) => return Ok(Value::Float(a as f64 / b as f64)),
                        None => None,
                    }
                }
                _ => a.checked_rem(b),
            };
            result.map(Value::Int).ok_or(EvalError::Overflow)
        }
        _ => {
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Err(EvalError::Type(format!(
                    "cannot apply `{}` to {} and {}",
                    op,
                    left.type_name(),
                    right.type_name()
                )));
            };
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use serde_json::json;

    fn eval_with(source: &str, data: serde_json::Value) -> Result<Value, EvalError> {
        let scope = Scope::from_value(&Value::from(data));
        let functions = FunctionRegistry::with_builtins();
        evaluate(&parse(source).unwrap(), &scope, &functions)
    }

    fn eval(source: &str) -> Value {
        eval_with(source, json!({})).unwrap()
    }

    #[test]
    fn test_comparison_with_variable() {
        assert_eq!(eval_with("x > 5", json!({"x": 10})).unwrap(), Value::Bool(true));
        assert_eq!(eval_with("x > 5", json!({"x": 3})).unwrap(), Value::Bool(false));
        assert_eq!(eval_with("x >= 2.5", json!({"x": 3})).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unknown_variable_is_nil() {
        assert_eq!(eval("missing"), Value::Nil);
        assert_eq!(eval("missing.deeper[3]"), Value::Nil);
        assert_eq!(eval("!missing"), Value::Bool(true));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(eval("7 % 3"), Value::Int(1));
        assert_eq!(eval("6 / 3"), Value::Int(2));
        assert_eq!(eval("7 / 2"), Value::Float(3.5));
        assert_eq!(eval("1.5 + 1"), Value::Float(2.5));
        assert_eq!(eval("-3 + 1"), Value::Int(-2));
    }

    #[test]
    fn test_arithmetic_errors() {
        assert_eq!(eval_with("1 / 0", json!({})), Err(EvalError::DivisionByZero));
        assert_eq!(eval_with("1 % 0", json!({})), Err(EvalError::DivisionByZero));
        assert_eq!(
            eval_with("big * 2", json!({"big": i64::MAX})),
            Err(EvalError::Overflow)
        );
        assert_eq!(
            eval_with("min / -1", json!({"min": i64::MIN})),
            Err(EvalError::Overflow)
        );
        assert_eq!(
            eval_with("min % -1", json!({"min": i64::MIN})),
            Err(EvalError::Overflow)
        );
        assert!(matches!(
            eval_with("true - 1", json!({})),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(eval("\"a\" + \"b\""), Value::from("ab"));
        assert_eq!(
            eval_with("\"No. \" + n", json!({"n": 7})).unwrap(),
            Value::from("No. 7")
        );
    }

    #[test]
    fn test_list_append() {
        assert_eq!(
            eval_with("a + b", json!({"a": [1], "b": [2, 3]})).unwrap(),
            Value::from(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_equality() {
        assert_eq!(eval("1 == 1.0"), Value::Bool(true));
        assert_eq!(eval("\"a\" != \"b\""), Value::Bool(true));
        assert_eq!(eval("nil == missing"), Value::Bool(true));
        assert_eq!(
            eval_with("a == b", json!({"a": [1, 2], "b": [1, 2]})).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_string_ordering() {
        assert_eq!(eval("\"apple\" < \"banana\""), Value::Bool(true));
        assert!(matches!(
            eval_with("\"a\" < 1", json!({})),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn test_logic_short_circuits() {
        // The right-hand side would fail if evaluated
        assert_eq!(eval("true | nosuch()"), Value::Bool(true));
        assert_eq!(eval("false & nosuch()"), Value::Bool(false));
        assert_eq!(eval("1 && \"x\""), Value::Bool(true));
        assert_eq!(eval("0 || \"\""), Value::Bool(false));
    }

    #[test]
    fn test_field_and_index_access() {
        let data = json!({
            "order": {"items": [{"name": "Pen"}, {"name": "Ink"}]},
            "word": "héllo",
        });
        assert_eq!(
            eval_with("order.items[1].name", data.clone()).unwrap(),
            Value::from("Ink")
        );
        assert_eq!(
            eval_with("order.items[-1].name", data.clone()).unwrap(),
            Value::from("Ink")
        );
        assert_eq!(eval_with("order.items[5]", data.clone()).unwrap(), Value::Nil);
        assert_eq!(
            eval_with("order[\"items\"][0].name", data.clone()).unwrap(),
            Value::from("Pen")
        );
        assert_eq!(eval_with("word[1]", data).unwrap(), Value::from("é"));
    }

    #[test]
    fn test_field_on_scalar_is_type_error() {
        assert!(matches!(
            eval_with("n.name", json!({"n": 3})),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn test_calls() {
        assert_eq!(
            eval_with("upper(name)", json!({"name": "ada"})).unwrap(),
            Value::from("ADA")
        );
        assert_eq!(
            eval_with("nosuch(1)", json!({})),
            Err(EvalError::UnknownFunction("nosuch".to_string()))
        );
        assert!(matches!(
            eval_with("upper()", json!({})),
            Err(EvalError::Arity { got: 0, .. })
        ));
    }

    #[test]
    fn test_marker_passes_through() {
        match eval("link(\"https://example.com\", \"Example\")") {
            Value::Marker(marker) => {
                assert_eq!(marker.payload.get("text"), Some(&Value::from("Example")))
            }
            other => panic!("Expected Marker, got {:?}", other),
        }
        assert_eq!(
            eval("link(\"https://example.com\").url"),
            Value::from("https://example.com")
        );
    }
}
