use std::cmp::Ordering;

use crate::schema::ColumnType;
use crate::TableError;

/// A cell value: a sum type over the supported column value types plus
/// `Null` (spec §4.G.2 "Values are a sum type...").
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    Binary(Vec<u8>),
    /// Raw JSON text (spec §3 `ColumnType::Json(string)`).
    Json(String),
}

fn discriminant_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Int(_) => 1,
        Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Bool(_) => 4,
        Value::DateTime(_) => 5,
        Value::Binary(_) => 6,
        Value::Json(_) => 7,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order used for index keys. Distinct from the query predicate
/// semantics in `query.rs`, where `Null` never compares equal to
/// anything (spec §4.G.3 "Null operands cause every other comparison to
/// evaluate false").
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Binary(a), Binary(b)) => a.cmp(b),
            (Json(a), Json(b)) => a.cmp(b),
            _ => discriminant_rank(self).cmp(&discriminant_rank(other)),
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::String(_) => Some(ColumnType::String),
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::DateTime(_) => Some(ColumnType::DateTime),
            Value::Binary(_) => Some(ColumnType::Binary),
            Value::Json(_) => Some(ColumnType::Json),
        }
    }

    /// Renders this value for the §6.5 JSON wire schema: binary as a
    /// `0x`-prefixed hex string, datetimes as integer epoch milliseconds,
    /// a `Json` column embedded as parsed JSON (falling back to a plain
    /// string if the stored text doesn't parse), `Null` as JSON `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int(i) => serde_json::json!(i),
            Value::Float(f) => serde_json::json!(f),
            Value::String(s) => serde_json::json!(s),
            Value::Bool(b) => serde_json::json!(b),
            Value::DateTime(ms) => serde_json::json!(ms),
            Value::Binary(bytes) => serde_json::json!(format!("0x{}", hex::encode(bytes))),
            Value::Json(text) => serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.clone())),
        }
    }

    /// Parses a JSON scalar into a `Value` of `column_type`, the inverse
    /// of [`Value::to_json`]. JSON `null` always yields `Value::Null`
    /// regardless of `column_type`.
    pub fn from_json(json: &serde_json::Value, column_type: ColumnType) -> Result<Value, TableError> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let bad = |what: &str| TableError::SchemaIncompatible(format!("expected {what}, got {json}"));
        match column_type {
            ColumnType::Integer => json.as_i64().map(Value::Int).ok_or_else(|| bad("an integer")),
            ColumnType::Float => json.as_f64().map(Value::Float).ok_or_else(|| bad("a float")),
            ColumnType::String => json.as_str().map(|s| Value::String(s.to_string())).ok_or_else(|| bad("a string")),
            ColumnType::Boolean => json.as_bool().map(Value::Bool).ok_or_else(|| bad("a boolean")),
            ColumnType::DateTime => json.as_i64().map(Value::DateTime).ok_or_else(|| bad("an epoch-millis integer")),
            ColumnType::Binary => json
                .as_str()
                .and_then(|s| s.strip_prefix("0x"))
                .and_then(|hexstr| hex::decode(hexstr).ok())
                .map(Value::Binary)
                .ok_or_else(|| bad("a 0x-prefixed hex string")),
            ColumnType::Json => serde_json::to_string(json).map(Value::Json).map_err(|_| bad("JSON")),
        }
    }
}
