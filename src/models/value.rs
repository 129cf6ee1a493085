//! SQL value model.
//!
//! `SqlValue` is both the parameter type for dispatched statements and the value type
//! read off reflected fields for bulk transfer.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A value bound to a statement or copied into a destination column.
///
/// In JSON, scalars and documents are written as themselves. Bytes and timestamps are
/// written as single-key objects so they read back as the same variant:
/// `{"$bytes": "<base64>"}` and `{"$timestamp": "2024-01-31T12:00:00"}`. A `Json`
/// scalar (e.g. a bare string) reads back as the matching scalar variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (`{"$bytes": "<base64>"}` in JSON)
    #[serde(with = "tagged_bytes")]
    Bytes(Vec<u8>),
    /// Timestamp without time zone (`{"$timestamp": "..."}` in JSON)
    #[serde(with = "tagged_timestamp")]
    Timestamp(NaiveDateTime),
    /// Arbitrary JSON document
    Json(JsonValue),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for SqlValue {
                fn from(v: $t) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Binary data as `{"$bytes": "<base64>"}`.
mod tagged_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    const KEY: &str = "$bytes";

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged {
        #[serde(rename = "$bytes")]
        encoded: String,
    }

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(KEY, &STANDARD.encode(bytes))?;
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tagged = Tagged::deserialize(deserializer)?;
        STANDARD
            .decode(&tagged.encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Timestamps as `{"$timestamp": "<ISO 8601>"}`.
mod tagged_timestamp {
    use chrono::NaiveDateTime;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    const KEY: &str = "$timestamp";

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged {
        #[serde(rename = "$timestamp")]
        value: NaiveDateTime,
    }

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(KEY, value)?;
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        Tagged::deserialize(deserializer).map(|tagged| tagged.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_primitives() {
        assert_eq!(SqlValue::from(7_i32), SqlValue::Int(7));
        assert_eq!(SqlValue::from(7_u32), SqlValue::Int(7));
        assert_eq!(SqlValue::from(true), SqlValue::Bool(true));
        assert_eq!(SqlValue::from("a"), SqlValue::String("a".to_string()));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(1.5_f64)), SqlValue::Float(1.5));
    }

    #[test]
    fn test_type_name() {
        assert_eq!(SqlValue::Null.type_name(), "null");
        assert_eq!(SqlValue::Bytes(vec![1]).type_name(), "bytes");
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Int(0).is_null());
    }

    #[test]
    fn test_deserialize_untagged_json() {
        let values: Vec<SqlValue> =
            serde_json::from_str(r#"[null, true, 42, 2.5, "text", {"k": 1}]"#).unwrap();
        assert_eq!(values[0], SqlValue::Null);
        assert_eq!(values[1], SqlValue::Bool(true));
        assert_eq!(values[2], SqlValue::Int(42));
        assert_eq!(values[3], SqlValue::Float(2.5));
        assert_eq!(values[4], SqlValue::String("text".to_string()));
        assert_eq!(values[5], SqlValue::Json(serde_json::json!({"k": 1})));
    }

    #[test]
    fn test_json_round_trip_keeps_variant() {
        let timestamp = chrono::NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_milli_opt(12, 30, 5, 250)
            .unwrap();
        let values = vec![
            SqlValue::Null,
            SqlValue::Bool(false),
            SqlValue::Int(-7),
            SqlValue::Float(0.5),
            SqlValue::String("3q0=".to_string()),
            SqlValue::Bytes(vec![0xde, 0xad]),
            SqlValue::Timestamp(timestamp),
            SqlValue::Json(serde_json::json!({"k": [1, 2]})),
        ];

        let encoded = serde_json::to_string(&values).unwrap();
        let decoded: Vec<SqlValue> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_bytes_and_timestamps_are_tagged() {
        let bytes = serde_json::to_value(SqlValue::Bytes(vec![0xde, 0xad])).unwrap();
        assert_eq!(bytes, serde_json::json!({"$bytes": "3q0="}));

        let value: SqlValue =
            serde_json::from_str(r#"{"$timestamp": "2024-01-31T12:00:00"}"#).unwrap();
        assert!(matches!(value, SqlValue::Timestamp(_)));

        // Objects that only look similar stay JSON documents
        let value: SqlValue = serde_json::from_str(r#"{"$bytes": "AA==", "extra": 1}"#).unwrap();
        assert!(matches!(value, SqlValue::Json(_)));
        let value: SqlValue = serde_json::from_str(r#"{"$bytes": 5}"#).unwrap();
        assert!(matches!(value, SqlValue::Json(_)));
    }
}
