use std::collections::HashMap;

use crate::query::Condition;
use crate::value::Value;
use crate::TableError;

/// The column value types a [`Value`] may hold (spec §3 `ColumnType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    DateTime,
    Binary,
    Json,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::DateTime => "datetime",
            ColumnType::Binary => "binary",
            ColumnType::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "integer" => Some(ColumnType::Integer),
            "float" => Some(ColumnType::Float),
            "string" => Some(ColumnType::String),
            "boolean" => Some(ColumnType::Boolean),
            "datetime" => Some(ColumnType::DateTime),
            "binary" => Some(ColumnType::Binary),
            "json" => Some(ColumnType::Json),
            _ => None,
        }
    }
}

/// Constraint categories a column may declare (spec §3 `ColumnDefinition`).
/// `Unique`, `ForeignKey`, and `Check` are enforced at insert/update in the
/// owning [`crate::Table`], not here — `NotNull` is re-checked explicitly
/// by [`TableSchema::validation_errors`] alongside the `nullable` flag
/// (spec §4.G.1 "NotNull constraints are re-checked explicitly"). `Check`
/// reuses the table engine's own [`Condition`] predicate rather than a
/// free-form expression language, since the engine already has one.
#[derive(Debug, Clone)]
pub enum ColumnConstraint {
    NotNull,
    Unique,
    PrimaryKey,
    ForeignKey { table: String, column: String },
    Check(Condition),
    Default(Value),
}

impl ColumnConstraint {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ColumnConstraint::NotNull => serde_json::json!({"kind": "not_null"}),
            ColumnConstraint::Unique => serde_json::json!({"kind": "unique"}),
            ColumnConstraint::PrimaryKey => serde_json::json!({"kind": "primary_key"}),
            ColumnConstraint::ForeignKey { table, column } => {
                serde_json::json!({"kind": "foreign_key", "table": table, "column": column})
            }
            ColumnConstraint::Check(condition) => serde_json::json!({"kind": "check", "condition": condition.to_json()}),
            ColumnConstraint::Default(value) => serde_json::json!({"kind": "default", "value": value.to_json()}),
        }
    }

    pub fn from_json(json: &serde_json::Value, column_type: ColumnType) -> Result<Self, TableError> {
        let bad = || TableError::SchemaIncompatible(format!("malformed column constraint: {json}"));
        match json.get("kind").and_then(|v| v.as_str()).ok_or_else(bad)? {
            "not_null" => Ok(ColumnConstraint::NotNull),
            "unique" => Ok(ColumnConstraint::Unique),
            "primary_key" => Ok(ColumnConstraint::PrimaryKey),
            "foreign_key" => Ok(ColumnConstraint::ForeignKey {
                table: json.get("table").and_then(|v| v.as_str()).ok_or_else(bad)?.to_string(),
                column: json.get("column").and_then(|v| v.as_str()).ok_or_else(bad)?.to_string(),
            }),
            "check" => Ok(ColumnConstraint::Check(Condition::from_json(
                json.get("condition").ok_or_else(bad)?,
                column_type,
            )?)),
            "default" => Ok(ColumnConstraint::Default(Value::from_json(json.get("value").ok_or_else(bad)?, column_type)?)),
            _ => Err(bad()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub constraints: Vec<ColumnConstraint>,
    pub description: Option<String>,
    pub default: Option<Value>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
            constraints: Vec::new(),
            description: None,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<ColumnConstraint>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A table's column layout, primary key, and version (spec §4.G.1).
/// "Any structural change increments the version."
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub version: u64,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn add_column(&mut self, definition: ColumnDefinition) -> Result<(), TableError> {
        if self.column(&definition.name).is_some() {
            return Err(TableError::SchemaIncompatible(format!(
                "column '{}' already exists",
                definition.name
            )));
        }
        self.columns.push(definition);
        self.version += 1;
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Result<(), TableError> {
        let before = self.columns.len();
        self.columns.retain(|c| c.name != name);
        if self.columns.len() == before {
            return Err(TableError::NotFound(format!("column '{name}'")));
        }
        self.primary_key.retain(|c| c != name);
        self.version += 1;
        Ok(())
    }

    pub fn modify_column(&mut self, name: &str, new_definition: ColumnDefinition) -> Result<(), TableError> {
        let slot = self
            .columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| TableError::NotFound(format!("column '{name}'")))?;
        *slot = new_definition;
        self.version += 1;
        Ok(())
    }

    pub fn set_primary_key(&mut self, columns: Vec<String>) -> Result<(), TableError> {
        for column in &columns {
            if self.column(column).is_none() {
                return Err(TableError::NotFound(format!("column '{column}'")));
            }
        }
        self.primary_key = columns;
        self.version += 1;
        Ok(())
    }

    /// Fills in declared defaults for any non-nullable column missing
    /// from `values`, leaving everything else untouched.
    pub fn fill_defaults(&self, mut values: HashMap<String, Value>) -> HashMap<String, Value> {
        for column in &self.columns {
            let missing_or_null = values.get(&column.name).map_or(true, Value::is_null);
            if missing_or_null {
                if let Some(default) = &column.default {
                    values.insert(column.name.clone(), default.clone());
                }
            }
        }
        values
    }

    pub fn validate(&self, values: &HashMap<String, Value>) -> bool {
        self.validation_errors(values).is_empty()
    }

    /// For every non-nullable column (or one explicitly carrying a
    /// `NotNull` constraint): the row must either contain a non-`Null`
    /// value or the column must declare a default (spec §4.G.1
    /// "Validation checks" / "NotNull constraints are re-checked
    /// explicitly"). Also rejects any value whose column isn't declared
    /// on the schema at all (spec §3 "every column present on the Row
    /// exists in the schema of the Row's table version at the time of
    /// write").
    pub fn validation_errors(&self, values: &HashMap<String, Value>) -> Vec<String> {
        let mut errors = Vec::new();
        for column in &self.columns {
            let not_null_required = !column.nullable || column.constraints.iter().any(|c| matches!(c, ColumnConstraint::NotNull));
            if !not_null_required {
                continue;
            }
            let has_value = values.get(&column.name).map_or(false, |v| !v.is_null());
            if !has_value && column.default.is_none() {
                errors.push(format!("column '{}' is required", column.name));
            }
        }
        for key in values.keys() {
            if self.column(key).is_none() {
                errors.push(format!("column '{key}' is not declared in schema"));
            }
        }
        errors
    }

    /// Returns a copy of this schema with `new_version`, which must
    /// exceed the current version (spec §4.G.1 "evolve").
    pub fn evolve(&self, new_version: u64) -> Result<TableSchema, TableError> {
        if new_version <= self.version {
            return Err(TableError::SchemaIncompatible(format!(
                "new version {new_version} must exceed current version {}",
                self.version
            )));
        }
        let mut next = self.clone();
        next.version = new_version;
        Ok(next)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let columns: Vec<serde_json::Value> = self
            .columns
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "column_type": c.column_type.as_str(),
                    "nullable": c.nullable,
                    "constraints": c.constraints.iter().map(ColumnConstraint::to_json).collect::<Vec<_>>(),
                    "description": c.description.clone().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null),
                    "default": c.default.as_ref().map(Value::to_json).unwrap_or(serde_json::Value::Null),
                })
            })
            .collect();
        serde_json::json!({
            "name": self.name,
            "version": self.version,
            "columns": columns,
            "primary_key": self.primary_key,
        })
    }

    pub fn from_json(json: &serde_json::Value) -> Result<TableSchema, TableError> {
        let name = json
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TableError::SchemaIncompatible("schema missing 'name'".to_string()))?
            .to_string();
        let version = json.get("version").and_then(|v| v.as_u64()).unwrap_or(1);
        let mut columns = Vec::new();
        for column_json in json.get("columns").and_then(|v| v.as_array()).into_iter().flatten() {
            let col_name = column_json
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| TableError::SchemaIncompatible("column missing 'name'".to_string()))?
                .to_string();
            let column_type = column_json
                .get("column_type")
                .and_then(|v| v.as_str())
                .and_then(ColumnType::parse)
                .ok_or_else(|| TableError::SchemaIncompatible(format!("column '{col_name}' has an unknown column_type")))?;
            let nullable = column_json.get("nullable").and_then(|v| v.as_bool()).unwrap_or(false);
            let default = match column_json.get("default") {
                Some(v) if !v.is_null() => Some(Value::from_json(v, column_type)?),
                _ => None,
            };
            let description = column_json.get("description").and_then(|v| v.as_str()).map(str::to_string);
            let mut constraints = Vec::new();
            for constraint_json in column_json.get("constraints").and_then(|v| v.as_array()).into_iter().flatten() {
                constraints.push(ColumnConstraint::from_json(constraint_json, column_type)?);
            }
            columns.push(ColumnDefinition {
                name: col_name,
                column_type,
                nullable,
                constraints,
                description,
                default,
            });
        }
        let primary_key: Vec<String> = json
            .get("primary_key")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Ok(TableSchema {
            name,
            version,
            columns,
            primary_key,
        })
    }
}
