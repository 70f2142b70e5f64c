use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{Map, Number, Value as JsonValue};

use crate::errors::SerializationError;

/// A single field value of an event record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Bool(bool),
    Int(i64),
    Real(f64),
    Timestamp(DateTime<Utc>),
    Duration(Duration),
    Binary(Vec<u8>),
    /// Opaque or nested content, kept in its JSON form.
    Dynamic(JsonValue),
}

impl Value {
    /// Resolves a foreign JSON representation into a native scalar where one exists.
    /// Arrays and objects stay `Dynamic`.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Real).unwrap_or(Value::Dynamic(JsonValue::Number(n))),
            },
            other => Value::Dynamic(other),
        }
    }

    pub fn normalize(self) -> Self {
        match self {
            Value::Dynamic(inner) => Value::from_json(inner),
            other => other,
        }
    }

    fn to_json(&self, field: &str) -> Result<JsonValue, SerializationError> {
        let json = match self {
            Value::Null => JsonValue::Null,
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number((*i).into()),
            Value::Real(r) => Number::from_f64(*r).map(JsonValue::Number).ok_or_else(|| {
                SerializationError::NonFiniteReal {
                    field: field.to_string(),
                }
            })?,
            Value::Timestamp(ts) => {
                JsonValue::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Duration(d) => JsonValue::String(format_timespan(*d)),
            Value::Binary(bytes) => JsonValue::String(BASE64.encode(bytes)),
            Value::Dynamic(inner) => inner.clone(),
        };
        Ok(json)
    }
}

/// Formats a duration as `[-][d.]hh:mm:ss[.fffffff]`.
pub fn format_timespan(duration: Duration) -> String {
    let negative = duration < Duration::zero();
    let duration = if negative { -duration } else { duration };

    let days = duration.num_days();
    let total_seconds = duration.num_seconds();
    let hours = (total_seconds / 3600) % 24;
    let minutes = (total_seconds / 60) % 60;
    let seconds = total_seconds % 60;
    let subsec_nanos = (duration - Duration::seconds(total_seconds))
        .num_nanoseconds()
        .unwrap_or(0);

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{hours:02}:{minutes:02}:{seconds:02}"));
    if subsec_nanos > 0 {
        out.push_str(&format!(".{:07}", subsec_nanos / 100));
    }
    out
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Value::Duration(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Binary(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Value::Dynamic(value)
    }
}

/// Records accumulated for one bulk ingestion call.
pub type Batch = Vec<Record>;

/// One flat event: field names mapped to values, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`. An existing field keeps its position and the old value is returned.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Builds a record from a JSON object, keeping the object's field order.
    pub fn from_json(value: JsonValue) -> Result<Self, SerializationError> {
        match value {
            JsonValue::Object(map) => Ok(map
                .into_iter()
                .map(|(name, value)| (name, Value::from_json(value)))
                .collect()),
            other => Err(SerializationError::NotAnObject {
                found: json_kind(&other).to_string(),
            }),
        }
    }

    /// Canonical form: every foreign representation resolved into native scalars.
    pub fn normalize(self) -> Self {
        self.fields
            .into_iter()
            .map(|(name, value)| (name, value.normalize()))
            .collect()
    }

    /// Fails on the first value that has no JSON form.
    pub fn ensure_encodable(&self) -> Result<(), SerializationError> {
        match self
            .fields
            .iter()
            .find(|(_, value)| matches!(value, Value::Real(r) if !r.is_finite()))
        {
            Some((name, _)) => Err(SerializationError::NonFiniteReal {
                field: name.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<JsonValue, SerializationError> {
        let mut map = Map::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json(name)?);
        }
        Ok(JsonValue::Object(map))
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
