//! Cell values and column names.
//!
//! A [`Value`] is a closed union of everything a table cell may hold:
//! scalars, binary blobs, nested records, and rich values (media, nested
//! tables, annotations). The type lattice in [`crate::dtypes`] narrows over
//! these values via [`crate::dtypes::TypeDescriptor::of`].
//!
//! Plain JSON conversion lives here; conversions that may need to stage or
//! resolve rich values go through [`crate::media`].

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

use crate::media::RichValue;

/// Discriminant used for binary cells in JSON.
pub const BYTES_TYPE_TAG: &str = "bytes";

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value.
    None,
    /// A boolean.
    Bool(bool),
    /// Any JSON number (integer or float).
    Number(Number),
    /// A UTF-8 string.
    String(String),
    /// Opaque bytes.
    Binary(Vec<u8>),
    /// An ordered mapping of field name to value.
    Record(IndexMap<String, Value>),
    /// A rich value participating in media serialization.
    Rich(Box<RichValue>),
}

impl Value {
    /// Short name of the value's kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Record(_) => "record",
            Value::Rich(rich) => rich.type_name(),
        }
    }

    /// Whether this value is [`Value::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Borrow the rich value, if any.
    pub fn as_rich(&self) -> Option<&RichValue> {
        match self {
            Value::Rich(rich) => Some(rich),
            _ => None,
        }
    }

    /// Render a value that holds no rich values as JSON.
    ///
    /// Returns `None` when a rich value is found anywhere in the tree; those
    /// need a destination and go through [`crate::media::value_to_json`].
    pub fn to_plain_json(&self) -> Option<Json> {
        Some(match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => Json::Number(n.clone()),
            Value::String(s) => Json::String(s.clone()),
            Value::Binary(bytes) => binary_to_json(bytes),
            Value::Record(fields) => {
                let mut out = Map::with_capacity(fields.len());
                for (key, value) in fields {
                    out.insert(key.clone(), value.to_plain_json()?);
                }
                Json::Object(out)
            }
            Value::Rich(_) => return None,
        })
    }

    /// Parse JSON that is known to contain no rich values.
    ///
    /// Objects tagged `{"_type": "bytes"}` decode to [`Value::Binary`]; any
    /// other object becomes a record. Arrays have no cell representation and
    /// yield `None`.
    pub fn from_plain_json(json: &Json) -> Option<Value> {
        Some(match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.clone()),
            Json::String(s) => Value::String(s.clone()),
            Json::Object(map) => {
                if let Some(bytes) = binary_from_json(map) {
                    return bytes.map(Value::Binary);
                }
                let mut fields = IndexMap::with_capacity(map.len());
                for (key, value) in map {
                    fields.insert(key.clone(), Value::from_plain_json(value)?);
                }
                Value::Record(fields)
            }
            Json::Array(_) => return None,
        })
    }
}

/// JSON form of a binary cell: `{"_type": "bytes", "base64": ...}`.
pub fn binary_to_json(bytes: &[u8]) -> Json {
    let mut map = Map::new();
    map.insert("_type".to_string(), Json::String(BYTES_TYPE_TAG.to_string()));
    map.insert("base64".to_string(), Json::String(BASE64.encode(bytes)));
    Json::Object(map)
}

/// Decode a binary cell object.
///
/// Returns `None` if `map` is not tagged as bytes, `Some(None)` if it is
/// tagged but the payload is missing or not valid base64.
pub fn binary_from_json(map: &Map<String, Json>) -> Option<Option<Vec<u8>>> {
    if map.get("_type").and_then(Json::as_str) != Some(BYTES_TYPE_TAG) {
        return None;
    }
    Some(
        map.get("base64")
            .and_then(Json::as_str)
            .and_then(|encoded| BASE64.decode(encoded).ok()),
    )
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Number(v.into())
    }
}

/// Non-finite floats have no JSON representation and become [`Value::None`].
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Number::from_f64(v).map_or(Value::None, Value::Number)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Record(v)
    }
}

impl From<RichValue> for Value {
    fn from(v: RichValue) -> Self {
        Value::Rich(Box::new(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

/// A table column name: a string or an integer, unique within a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnName {
    /// Integer column name.
    Index(i64),
    /// String column name.
    Name(String),
}

impl ColumnName {
    /// Key used for this column in the column-type record.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnName::Index(i) => write!(f, "{i}"),
            ColumnName::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for ColumnName {
    fn from(v: &str) -> Self {
        ColumnName::Name(v.to_string())
    }
}

impl From<String> for ColumnName {
    fn from(v: String) -> Self {
        ColumnName::Name(v)
    }
}

impl From<i64> for ColumnName {
    fn from(v: i64) -> Self {
        ColumnName::Index(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binary_cells_use_tagged_base64() {
        let json = Value::Binary(vec![0, 1, 2, 255]).to_plain_json().expect("plain");
        assert_eq!(json, json!({"_type": "bytes", "base64": "AAEC/w=="}));
        assert_eq!(
            Value::from_plain_json(&json),
            Some(Value::Binary(vec![0, 1, 2, 255]))
        );
    }

    #[test]
    fn objects_without_bytes_tag_are_records() {
        let parsed = Value::from_plain_json(&json!({"x": 1, "y": {"_type": "other"}}))
            .expect("record");
        let Value::Record(fields) = parsed else {
            panic!("expected record");
        };
        assert_eq!(fields["x"], Value::from(1));
        assert!(matches!(fields["y"], Value::Record(_)));
    }

    #[test]
    fn arrays_have_no_cell_form() {
        assert_eq!(Value::from_plain_json(&json!([1, 2])), None);
        assert_eq!(Value::from_plain_json(&json!({"_type": "bytes"})), None);
    }

    #[test]
    fn column_names_deserialize_untagged() {
        let cols: Vec<ColumnName> = serde_json::from_value(json!(["a", 3])).expect("columns");
        assert_eq!(cols, vec![ColumnName::from("a"), ColumnName::Index(3)]);
        assert_eq!(cols[1].key(), "3");
    }

    #[test]
    fn non_finite_floats_become_none() {
        assert_eq!(Value::from(f64::NAN), Value::None);
        assert_eq!(Value::from(None::<i64>), Value::None);
    }
}
