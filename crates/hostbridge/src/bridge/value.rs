//! Native value model for envelope payloads.
//!
//! The wire carries plain JSON. Associative maps travel in a tagged shape
//! (see [`crate::bridge::codec`]) and become [`Value::Map`] here, so map-typed
//! fields keep both their entry order and their non-string keys.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::codec;

/// Key of an associative map entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for MapKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for MapKey {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

/// Decoded payload value.
///
/// `Object` is a plain keyed record, `Map` is an associative map that was
/// explicitly tagged as one on the wire. Both preserve insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Object(IndexMap<String, Value>),
    Map(IndexMap<MapKey, Value>),
}

impl Value {
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<MapKey>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Field lookup on objects, or string-keyed lookup on maps.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(fields) => fields.get(key),
            Self::Map(entries) => entries.get(&MapKey::Str(key.to_string())),
            _ => None,
        }
    }

    pub fn index(&self, i: usize) -> Option<&Value> {
        self.as_list().and_then(|items| items.get(i))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<MapKey, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite floats have no JSON representation and become `Null`.
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(Self::Number)
            .unwrap_or(Self::Null)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(fields: IndexMap<String, Value>) -> Self {
        Self::Object(fields)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        codec::encode_value(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        codec::decode_value(json).map_err(serde::de::Error::custom)
    }
}
