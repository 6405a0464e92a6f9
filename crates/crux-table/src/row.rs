use std::collections::HashMap;

use crate::schema::TableSchema;
use crate::value::Value;
use crate::{now_millis, TableError};

/// A materialized row: an id, a version starting at 1, creation/update
/// timestamps, and the column values (spec §4.G.2).
#[derive(Debug, Clone)]
pub struct TableRow {
    pub id: u64,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub values: HashMap<String, Value>,
}

impl TableRow {
    pub fn new(id: u64, values: HashMap<String, Value>) -> Self {
        let now = now_millis();
        Self {
            id,
            version: 1,
            created_at: now,
            updated_at: now,
            values,
        }
    }

    pub fn increment_version(&mut self) {
        self.version += 1;
        self.updated_at = now_millis();
    }

    pub fn to_json(&self) -> serde_json::Value {
        let values: serde_json::Map<String, serde_json::Value> =
            self.values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
        serde_json::json!({
            "id": self.id,
            "version": self.version,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "values": values,
        })
    }

    pub fn from_json(json: &serde_json::Value, schema: &TableSchema) -> Result<TableRow, TableError> {
        let id = json
            .get("id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| TableError::SchemaIncompatible("row missing 'id'".to_string()))?;
        let version = json.get("version").and_then(|v| v.as_u64()).unwrap_or(1);
        let created_at = json.get("created_at").and_then(|v| v.as_i64()).unwrap_or_else(now_millis);
        let updated_at = json.get("updated_at").and_then(|v| v.as_i64()).unwrap_or(created_at);
        let mut values = HashMap::new();
        if let Some(values_obj) = json.get("values").and_then(|v| v.as_object()) {
            for (column_name, raw) in values_obj {
                let column_type = schema
                    .column(column_name)
                    .map(|c| c.column_type)
                    .unwrap_or(crate::schema::ColumnType::String);
                values.insert(column_name.clone(), Value::from_json(raw, column_type)?);
            }
        }
        Ok(TableRow {
            id,
            version,
            created_at,
            updated_at,
            values,
        })
    }
}
