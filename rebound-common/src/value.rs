//! Dynamic values carried by an [`Exchange`](crate::Exchange).
//!
//! Bodies, headers and properties are all [`Value`]s so that predicates can
//! inspect them without knowing the concrete payload type of a route.

use core::fmt::{self, Display, Formatter};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// A dynamically typed value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(AHashMap<String, Value>),
}

impl Value {
    /// An empty map value
    #[must_use]
    pub fn map() -> Self {
        Self::Map(AHashMap::default())
    }

    /// Builder-style insert, turning `self` into a map first if it isn't one.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Self>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert `value` under `key`, returning the previous value.
    ///
    /// A non-map value is replaced by an empty map before inserting.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Self>) -> Option<Self> {
        if !matches!(self, Self::Map(_)) {
            *self = Self::map();
        }

        match self {
            Self::Map(map) => map.insert(key.into(), value.into()),
            _ => None,
        }
    }

    /// Look up a direct child of a map value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Mutable lookup of a direct child of a map value
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Self> {
        match self {
            Self::Map(map) => map.get_mut(key),
            _ => None,
        }
    }

    /// Follow a dotted path (`a.b.c`) through nested maps.
    ///
    /// An empty path returns `self`. List elements can be addressed by index.
    #[must_use]
    pub fn path(&self, path: &str) -> Option<&Self> {
        if path.is_empty() {
            return Some(self);
        }

        path.split('.').try_fold(self, |current, segment| match current {
            Self::Map(map) => map.get(segment),
            Self::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of this value; integers are widened to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of this value's variant, for error messages
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl Display for Value {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(fmt, "null"),
            Self::Bool(b) => write!(fmt, "{b}"),
            Self::Int(i) => write!(fmt, "{i}"),
            Self::Float(f) => write!(fmt, "{f}"),
            Self::Text(s) => write!(fmt, "{s}"),
            Self::List(items) => {
                write!(fmt, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(fmt, ", ")?;
                    }
                    write!(fmt, "{item}")?;
                }
                write!(fmt, "]")
            }
            Self::Map(map) => {
                let mut keys = map.keys().collect::<Vec<_>>();
                keys.sort();

                write!(fmt, "{{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(fmt, ", ")?;
                    }
                    write!(fmt, "{key}: {}", map[key])?;
                }
                write!(fmt, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<Self>> for Value {
    fn from(value: Vec<Self>) -> Self {
        Self::List(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn nested_path_lookup() {
        let value = Value::map()
            .with("dude", Value::map().with("counter", 3).with("cool", "no"))
            .with("list", vec![Value::from(1), Value::from("two")]);

        assert_eq!(value.path("dude.counter"), Some(&Value::Int(3)));
        assert_eq!(value.path("dude.cool").and_then(Value::as_str), Some("no"));
        assert_eq!(value.path("list.1"), Some(&Value::from("two")));
        assert_eq!(value.path("dude.missing"), None);
        assert_eq!(value.path("dude.counter.deeper"), None);
        assert_eq!(value.path(""), Some(&value));
    }

    #[test]
    fn insert_converts_scalars_to_maps() {
        let mut value = Value::from(7);
        assert_eq!(value.insert("a", true), None);
        assert_eq!(value.get("a"), Some(&Value::Bool(true)));
        assert_eq!(value.insert("a", false), Some(Value::Bool(true)));
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut value = Value::map().with("counter", 1);
        if let Some(Value::Int(counter)) = value.get_mut("counter") {
            *counter += 1;
        }
        assert_eq!(value.get("counter").and_then(Value::as_i64), Some(2));
    }

    #[test]
    fn display_is_stable() {
        let value = Value::map()
            .with("b", vec![Value::Null, Value::from(1.5)])
            .with("a", "text");
        assert_eq!(value.to_string(), "{a: text, b: [null, 1.5]}");
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::from(2).as_f64(), Some(2.0));
        assert_eq!(Value::from(2.5).as_i64(), None);
        assert_eq!(Value::from("2").as_f64(), None);
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::Null.type_name(), "null");
    }
}
