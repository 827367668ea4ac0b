//! Run-time values and their compile-time types.
use std::fmt;

/// A single value on the shovel stack.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i64),
    Text(String),
    /// A string that names a file or directory.
    Path(String),
}

/// The type of a [`Value`], as tracked by the type checker.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int,
    String,
    Path,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Int,
            Value::Text(_) => ValueType::String,
            Value::Path(_) => ValueType::Path,
        }
    }

    /// Truthiness used by branches and boolean operators.
    ///
    /// Paths have no truthiness, `None` is returned for them.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Value::Int(i) => Some(*i != 0),
            Value::Text(s) => Some(!s.is_empty()),
            Value::Path(_) => None,
        }
    }

    pub fn from_bool(b: bool) -> Self {
        Value::Int(b as i64)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) | Value::Path(s) => f.write_str(s),
        }
    }
}

impl ValueType {
    /// Parses a type name as written in a `proc` header.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(ValueType::Int),
            "str" | "string" => Some(ValueType::String),
            "path" => Some(ValueType::Path),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::Int => "int",
            ValueType::String => "string",
            ValueType::Path => "path",
        })
    }
}

/// Formats a type stack bottom to top, e.g. `[int string]`.
pub fn fmt_types(types: &[ValueType]) -> String {
    let inner: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    format!("[{}]", inner.join(" "))
}
