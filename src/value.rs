//! Host-side value representation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{Error, Result};

/// Kind tag of a [`HostValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// No value.
    Unit,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit IEEE float.
    Float,
    /// Boolean.
    Boolean,
    /// UTF-8 text.
    Text,
    /// Ordered sequence.
    List,
    /// Text-keyed mapping.
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unit => "unit",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::List => "list",
            Self::Map => "map",
        };
        f.write_str(name)
    }
}

/// A value exchanged between the host and a plugin.
///
/// The tag alone decides how a value marshals. There is no implicit coercion
/// between tags: an `Integer` never satisfies a `Float` or `Boolean` request.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum HostValue {
    /// No value.
    #[default]
    Unit,
    /// Boolean.
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit IEEE float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Ordered sequence.
    List(Vec<HostValue>),
    /// Text-keyed mapping.
    Map(BTreeMap<String, HostValue>),
}

impl HostValue {
    /// Get the kind tag.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Unit => ValueKind::Unit,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
        }
    }

    /// Check for the unit value.
    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    /// Get the integer, only if this is an `Integer`.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the float, only if this is a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get the boolean, only if this is a `Boolean`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the text, only if this is `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the elements, only if this is a `List`.
    pub fn as_list(&self) -> Option<&[HostValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get the entries, only if this is a `Map`.
    pub fn as_map(&self) -> Option<&BTreeMap<String, HostValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key in a `Map`.
    pub fn get(&self, key: &str) -> Result<&HostValue> {
        let map = self.as_map().ok_or(Error::KindMismatch {
            expected: ValueKind::Map,
            found: self.kind(),
        })?;
        map.get(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// Parse a JSON document.
    ///
    /// Whole JSON numbers become `Integer`, all others `Float`.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Json(e.to_string()))
    }

    /// Render as a JSON document.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Json(e.to_string()))
    }

    fn mismatch(&self, expected: ValueKind) -> Error {
        Error::KindMismatch {
            expected,
            found: self.kind(),
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("()"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::Text(s) => write!(f, "{:?}", s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("#{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        Self::Unit
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for HostValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<HostValue>> From<BTreeMap<String, T>> for HostValue {
    fn from(map: BTreeMap<String, T>) -> Self {
        Self::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<HostValue>> From<HashMap<String, T>> for HostValue {
    fn from(map: HashMap<String, T>) -> Self {
        Self::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<HostValue>> FromIterator<(K, V)> for HostValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl TryFrom<HostValue> for () {
    type Error = Error;

    fn try_from(value: HostValue) -> Result<Self> {
        match value {
            HostValue::Unit => Ok(()),
            other => Err(other.mismatch(ValueKind::Unit)),
        }
    }
}

impl TryFrom<HostValue> for bool {
    type Error = Error;

    fn try_from(value: HostValue) -> Result<Self> {
        value.as_bool().ok_or_else(|| value.mismatch(ValueKind::Boolean))
    }
}

impl TryFrom<HostValue> for i64 {
    type Error = Error;

    fn try_from(value: HostValue) -> Result<Self> {
        value.as_integer().ok_or_else(|| value.mismatch(ValueKind::Integer))
    }
}

impl TryFrom<HostValue> for f64 {
    type Error = Error;

    fn try_from(value: HostValue) -> Result<Self> {
        value.as_float().ok_or_else(|| value.mismatch(ValueKind::Float))
    }
}

impl TryFrom<HostValue> for String {
    type Error = Error;

    fn try_from(value: HostValue) -> Result<Self> {
        match value {
            HostValue::Text(s) => Ok(s),
            other => Err(other.mismatch(ValueKind::Text)),
        }
    }
}

impl TryFrom<HostValue> for Vec<HostValue> {
    type Error = Error;

    fn try_from(value: HostValue) -> Result<Self> {
        match value {
            HostValue::List(items) => Ok(items),
            other => Err(other.mismatch(ValueKind::List)),
        }
    }
}

impl TryFrom<HostValue> for BTreeMap<String, HostValue> {
    type Error = Error;

    fn try_from(value: HostValue) -> Result<Self> {
        match value {
            HostValue::Map(map) => Ok(map),
            other => Err(other.mismatch(ValueKind::Map)),
        }
    }
}
