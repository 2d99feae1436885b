//! # Payload Values
//!
//! Event payloads carry no schema. A [`Payload`] is a closed recursive sum
//! type, so consumers match exhaustively instead of casting at runtime.
//!
//! ## Numeric classification
//!
//! Integers are kept in the narrowest of three tiers:
//!
//! ```text
//! integer literal ──fits i32?──▶ Int32
//!        │ no
//!        └─────────fits i64?──▶ Int64
//!                  │ no
//!                  └──────────▶ Float
//! ```
//!
//! A JSON number written with a fraction or an exponent (`1.5`, `2.0`,
//! `1e3`) is always a `Float`. Classifying by literal form rather than by
//! value keeps `Float(2.0)` a float across an encode/decode round trip.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Number, Value};

use super::codec::{CodecError, CodecResult};

/// Ordered string-keyed mapping. Source order is preserved on decode.
pub type PayloadMap = IndexMap<String, Payload>;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Explicit JSON `null`, distinct from an absent payload.
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f64),
    Text(String),
    List(Vec<Payload>),
    Map(PayloadMap),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Null => "null",
            Payload::Bool(_) => "bool",
            Payload::Int32(_) => "int32",
            Payload::Int64(_) => "int64",
            Payload::Float(_) => "float",
            Payload::Text(_) => "text",
            Payload::List(_) => "list",
            Payload::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Payload::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// Widens `Int32` so callers need not care which tier a value landed in.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Int32(i) => Some(i64::from(*i)),
            Payload::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Payload::Int32(i) => Some(f64::from(*i)),
            Payload::Int64(i) => Some(*i as f64),
            Payload::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Payload]> {
        match self {
            Payload::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&PayloadMap> {
        match self {
            Payload::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Looks up a key when the payload is a map.
    pub fn get(&self, key: &str) -> Option<&Payload> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Converts the payload into a caller-defined type through serde.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> CodecResult<T> {
        serde_json::from_value(Value::from(self)).map_err(|e| CodecError::Payload {
            message: e.to_string(),
        })
    }

    /// Classifies a JSON number into the narrowest tier.
    pub fn from_number(number: &Number) -> Self {
        match number.as_i64() {
            Some(i) => Payload::from(i),
            // u64 above i64::MAX, or a literal with fraction/exponent
            None => Payload::Float(number.as_f64().unwrap_or(f64::NAN)),
        }
    }
}

impl From<&Value> for Payload {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(*b),
            Value::Number(n) => Payload::from_number(n),
            Value::String(s) => Payload::Text(s.clone()),
            Value::Array(items) => Payload::List(items.iter().map(Payload::from).collect()),
            Value::Object(map) => Payload::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Payload::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&Payload> for Value {
    fn from(payload: &Payload) -> Self {
        match payload {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Int32(i) => Value::from(*i),
            Payload::Int64(i) => Value::from(*i),
            // non-finite floats have no JSON form and go out as null
            Payload::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Payload::Text(s) => Value::String(s.clone()),
            Payload::List(items) => Value::Array(items.iter().map(Value::from).collect()),
            Payload::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Payload::Bool(value)
    }
}

impl From<i32> for Payload {
    fn from(value: i32) -> Self {
        Payload::Int32(value)
    }
}

/// Narrows to `Int32` when the value fits, matching what decode produces.
impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        i32::try_from(value).map_or(Payload::Int64(value), Payload::Int32)
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Payload::Float(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl<T: Into<Payload>> From<Vec<T>> for Payload {
    fn from(values: Vec<T>) -> Self {
        Payload::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<PayloadMap> for Payload {
    fn from(map: PayloadMap) -> Self {
        Payload::Map(map)
    }
}

impl<K: Into<String>, V: Into<Payload>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Payload::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
