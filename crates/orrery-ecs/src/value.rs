//! The uniform value tree that backs every component.
//!
//! Components in this crate are dynamically shaped: a [`Value`] is a tagged
//! tree of records, ordered arrays, keyed objects, sets, maps, and scalar
//! leaves. Keeping one representation for all schemas is what lets the
//! observation layer ([`crate::observe`]) walk and diff arbitrary component
//! shapes with a single set of functions.
//!
//! `Struct` is a record whose fields are fixed by the component's schema;
//! `Object` is an open string-keyed object. `Set` and `Map` are keyed by
//! [`Key`] -- floats are deliberately not key material.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// A hashable, ordered key for `Set` membership and `Map` entries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    /// Boolean key.
    Bool(bool),
    /// Integer key.
    Int(i64),
    /// String key.
    Str(String),
}

impl From<bool> for Key {
    fn from(v: bool) -> Self {
        Key::Bool(v)
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Str(v.to_owned())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Str(v)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Bool(b) => write!(f, "{b}"),
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A dynamically shaped component value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absent / uninitialized.
    #[default]
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Integer leaf.
    Int(i64),
    /// Floating-point leaf.
    Float(f64),
    /// String leaf.
    Str(String),
    /// Record with schema-defined fields.
    Struct(BTreeMap<String, Value>),
    /// Ordered array.
    Array(Vec<Value>),
    /// Open string-keyed object.
    Object(BTreeMap<String, Value>),
    /// Set of keys.
    Set(BTreeSet<Key>),
    /// Keyed map.
    Map(BTreeMap<Key, Value>),
}

impl Value {
    /// Build a `Struct` from `(field, value)` pairs.
    pub fn struct_of<S, I>(fields: I) -> Value
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Value)>,
    {
        Value::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build an `Object` from `(key, value)` pairs.
    pub fn object_of<S, I>(entries: I) -> Value
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build an `Array` from values.
    pub fn array_of<I: IntoIterator<Item = Value>>(items: I) -> Value {
        Value::Array(items.into_iter().collect())
    }

    /// Build a `Set` from keys.
    pub fn set_of<K, I>(keys: I) -> Value
    where
        K: Into<Key>,
        I: IntoIterator<Item = K>,
    {
        Value::Set(keys.into_iter().map(Into::into).collect())
    }

    /// Build a `Map` from `(key, value)` pairs.
    pub fn map_of<K, I>(entries: I) -> Value
    where
        K: Into<Key>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether this value is a composite (has observable children).
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Value::Struct(_) | Value::Array(_) | Value::Object(_) | Value::Set(_) | Value::Map(_)
        )
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    /// Read the value at a dotted path, or `None` if the path does not
    /// resolve. Path interpretation matches [`ValuePath`].
    pub fn at_path(&self, path: &ValuePath) -> Option<&Value> {
        let mut current = self;
        for segment in path.segments() {
            current = match current {
                Value::Struct(fields) | Value::Object(fields) => fields.get(segment.as_str())?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                Value::Map(entries) => entries.get(&segment_key(segment))?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

// ---------------------------------------------------------------------------
// ValuePath
// ---------------------------------------------------------------------------

/// A parsed dotted path, e.g. `"transform.position.0"`.
///
/// Segments are untyped strings; each is interpreted by the container it
/// lands on: a field name for structs and objects, a decimal index for
/// arrays, and a [`Key`] for maps (integers and `true`/`false` parse to
/// their typed keys, everything else is a string key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuePath(Vec<String>);

impl ValuePath {
    /// Parse a dotted path. Empty segments are dropped.
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    /// The path segments in order.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether the path has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ValuePath {
    fn from(path: &str) -> Self {
        ValuePath::parse(path)
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Interpret a path segment as a map [`Key`].
pub(crate) fn segment_key(segment: &str) -> Key {
    if let Ok(i) = segment.parse::<i64>() {
        return Key::Int(i);
    }
    match segment {
        "true" => Key::Bool(true),
        "false" => Key::Bool(false),
        _ => Key::Str(segment.to_owned()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
