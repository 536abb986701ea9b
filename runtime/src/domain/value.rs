// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Runtime values for the tree-walking interpreter (§4.3 Sandbox). A small,
//! JSON-shaped value model — this dialect has no classes, symbols, or
//! regular expressions (§4.1 grammar), so the value lattice stays small.

use std::fmt;
use std::sync::Arc;

use enclavejs_core::domain::ast::Stmt;
use parking_lot::Mutex;

/// A JS-style function value: either user-defined (captures its defining
/// [`Environment`] for lexical closures) or one of the host's installed
/// native namespaces (§4.3 "safe globals"), resolved by dotted name at call
/// time (e.g. `"Math.floor"`, `"console.log"`).
#[derive(Clone)]
pub enum Callable {
    User {
        params: Vec<String>,
        body: Arc<Vec<Stmt>>,
        is_async: bool,
        closure: super::interpreter::Environment,
    },
    Native(String),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { params, is_async, .. } => write!(f, "Callable::User(params={params:?}, async={is_async})"),
            Self::Native(name) => write!(f, "Callable::Native({name})"),
        }
    }
}

/// The interpreter's runtime value. `Array`/`Object` are reference types
/// (shared, interior-mutable) matching JS aliasing semantics; everything
/// else is by-value.
#[derive(Clone, Debug)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Arc<Mutex<Vec<Value>>>),
    Object(Arc<Mutex<Vec<(String, Value)>>>),
    Function(Arc<Callable>),
    /// An unresolved reference to a native namespace (`Math`, `JSON`,
    /// `console`, ...) that isn't itself callable — only its members are
    /// (§4.3: the sandbox installs these "by name, determined by preset").
    Namespace(&'static str),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn object(entries: Vec<(String, Value)>) -> Self {
        Value::Object(Arc::new(Mutex::new(entries)))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// JS's notion of truthiness, needed for `if`/`while`/`&&`/`||`/`?:`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Namespace(_) => true,
        }
    }

    /// `typeof`-adjacent coercion used for string concatenation and
    /// `console` serialization; not a spec-complete `ToString`, but covers
    /// every literal/expression shape this dialect's grammar can produce.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => {
                let items = items.lock();
                format!("[{}]", items.iter().map(Value::to_display_string).collect::<Vec<_>>().join(","))
            }
            Value::Object(_) => self.to_json().map(|v| v.to_string()).unwrap_or_else(|_| "[object Object]".to_string()),
            Value::Function(_) => "[Function]".to_string(),
            Value::Namespace(name) => format!("[object {name}]"),
        }
    }

    /// Converts to `serde_json::Value` for tool-call argument serialization
    /// and `console`/`stdout` event payloads (§4.5). Functions and
    /// namespaces are not JSON-representable and are rejected.
    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        Ok(match self {
            Value::Undefined => serde_json::Value::Null,
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                let items = items.lock();
                serde_json::Value::Array(items.iter().map(Value::to_json).collect::<Result<_, _>>()?)
            }
            Value::Object(entries) => {
                let entries = entries.lock();
                let mut map = serde_json::Map::new();
                for (k, v) in entries.iter() {
                    map.insert(k.clone(), v.to_json()?);
                }
                serde_json::Value::Object(map)
            }
            Value::Function(_) => return Err(ValueError::NotJsonRepresentable("function")),
            Value::Namespace(_) => return Err(ValueError::NotJsonRepresentable("namespace")),
        })
    }

    /// The inverse of `to_json`, used to hand a tool result back into the
    /// sandbox as a `Value`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::object(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()),
        }
    }

    pub fn get_member(&self, key: &str) -> Value {
        match self {
            Value::Object(entries) => entries.lock().iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()).unwrap_or(Value::Undefined),
            Value::Array(items) => {
                if key == "length" {
                    return Value::Number(items.lock().len() as f64);
                }
                if let Ok(idx) = key.parse::<usize>() {
                    return items.lock().get(idx).cloned().unwrap_or(Value::Undefined);
                }
                Value::Undefined
            }
            Value::Str(s) => {
                if key == "length" {
                    return Value::Number(s.chars().count() as f64);
                }
                Value::Undefined
            }
            Value::Namespace(ns) => Value::Function(Arc::new(Callable::Native(format!("{ns}.{key}")))),
            _ => Value::Undefined,
        }
    }
}

/// Formats a number the way JS's default `ToString` would for the finite,
/// non-fractional-exponent values this dialect's arithmetic produces.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ValueError {
    #[error("value of type {0} is not JSON-representable")]
    NotJsonRepresentable(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_js_semantics() {
        assert!(!Value::Number(0.0).is_truthy());
        assert!(Value::Number(1.0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Undefined.is_truthy());
    }

    #[test]
    fn to_json_round_trips_through_from_json() {
        let original = serde_json::json!({"a": 1, "b": [true, null, "x"]});
        let value = Value::from_json(&original);
        assert_eq!(value.to_json().unwrap(), original);
    }

    #[test]
    fn function_values_are_not_json_representable() {
        let f = Value::Function(Arc::new(Callable::Native("Math.floor".to_string())));
        assert!(matches!(f.to_json(), Err(ValueError::NotJsonRepresentable("function"))));
    }
}
