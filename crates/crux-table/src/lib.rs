//! The in-memory table engine (spec §4.G): schema, rows, composite-key
//! indexes, queries, change events, transactions with compensating
//! rollback, JSON persistence, and dump/print rendering.

mod dump;
mod index;
mod query;
mod row;
mod schema;
mod value;

pub use dump::{DumpFormat, DumpOptions, Pager};
pub use query::{Condition, QueryOperator, SortDirection, TableQuery};
pub use row::TableRow;
pub use schema::{ColumnConstraint, ColumnDefinition, ColumnType, TableSchema};
pub use value::Value;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use index::TableIndex;

/// Name of the index automatically maintained over a table's declared
/// primary key (spec §4.G.3 "the reserved primary-key index").
pub const PRIMARY_KEY_INDEX: &str = "__primary_key";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("row failed schema validation: {}", .errors.join("; "))]
    ValidationFailed { errors: Vec<String> },
    #[error("unique constraint violated on index '{index}'")]
    UniqueViolation { index: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("schema incompatible: {0}")]
    SchemaIncompatible(String),
    #[error("table i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("table json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A structured notification of a row or schema mutation, fired
/// synchronously inside the table's write lock (spec GLOSSARY "Change
/// event").
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    RowInserted { table: String, row: TableRow },
    RowUpdated { table: String, old: TableRow, new: TableRow },
    RowDeleted { table: String, row: TableRow },
    SchemaChanged { table: String, old_version: u64, new_version: u64 },
    IndexCreated { table: String, index: String },
    IndexDropped { table: String, index: String },
}

#[derive(Debug, Clone, Default)]
pub struct TableStatistics {
    pub total_inserts: u64,
    pub total_updates: u64,
    pub total_deletes: u64,
    pub created_at: i64,
    pub last_modified: i64,
}

type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct TableInner {
    schema: TableSchema,
    rows: BTreeMap<u64, TableRow>,
    indexes: HashMap<String, TableIndex>,
    callbacks: HashMap<String, ChangeCallback>,
    stats: TableStatistics,
}

/// An in-memory table: schema + rows + indexes, guarded by a single
/// reader-writer lock (spec §4.G.4).
pub struct Table {
    name: String,
    inner: RwLock<TableInner>,
    next_row_id: AtomicU64,
    /// Tables registered as ForeignKey referents (spec §3 `ColumnConstraint::ForeignKey`).
    /// `Weak` so a referenced table doesn't keep the referencing table alive.
    foreign_tables: RwLock<HashMap<String, std::sync::Weak<Table>>>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn fire_callbacks(callbacks: &HashMap<String, ChangeCallback>, event: &ChangeEvent) {
    for (name, callback) in callbacks.iter() {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(event)));
        if let Err(payload) = result {
            tracing::error!(
                callback = name,
                error = %panic_message(&*payload),
                "table change callback panicked"
            );
        }
    }
}

impl Table {
    /// Creates an empty table; if `schema` declares a primary key, the
    /// reserved `__primary_key` unique index is created immediately.
    pub fn new(schema: TableSchema) -> Arc<Self> {
        let name = schema.name.clone();
        let primary_key = schema.primary_key.clone();
        let now = now_millis();
        let table = Arc::new(Self {
            name,
            inner: RwLock::new(TableInner {
                schema,
                rows: BTreeMap::new(),
                indexes: HashMap::new(),
                callbacks: HashMap::new(),
                stats: TableStatistics {
                    created_at: now,
                    last_modified: now,
                    ..Default::default()
                },
            }),
            next_row_id: AtomicU64::new(1),
            foreign_tables: RwLock::new(HashMap::new()),
        });
        if !primary_key.is_empty() {
            table
                .inner
                .write()
                .indexes
                .insert(PRIMARY_KEY_INDEX.to_string(), TableIndex::new(PRIMARY_KEY_INDEX, primary_key, true));
        }
        table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> TableSchema {
        self.inner.read().schema.clone()
    }

    pub fn statistics(&self) -> TableStatistics {
        self.inner.read().stats.clone()
    }

    /// Registers `table` as the referent for `ForeignKey` constraints that
    /// name it (spec §4.G.1 "ForeignKey ... enforced at insert/update").
    /// Must be called before any row referencing `name` is inserted.
    pub fn register_foreign_table(&self, name: impl Into<String>, table: &Arc<Table>) {
        self.foreign_tables.write().insert(name.into(), Arc::downgrade(table));
    }

    /// Validates every `ForeignKey` constraint declared on `schema` against
    /// `values`; `Null` always satisfies the constraint. A self-reference
    /// reads `local_rows` directly (the write guard the caller already
    /// holds), since `parking_lot::RwLock` is not reentrant; a reference to
    /// another table goes through the `foreign_tables` registry and fails
    /// closed if that table was never registered or has since been dropped.
    fn check_foreign_keys(&self, schema: &TableSchema, values: &HashMap<String, Value>, local_rows: &BTreeMap<u64, TableRow>) -> Vec<String> {
        let mut errors = Vec::new();
        for column in &schema.columns {
            for constraint in &column.constraints {
                let ColumnConstraint::ForeignKey { table: ref_table, column: ref_column } = constraint else {
                    continue;
                };
                let Some(value) = values.get(&column.name) else {
                    continue;
                };
                if value.is_null() {
                    continue;
                }
                let satisfied = if ref_table == &self.name {
                    local_rows.values().any(|row| row.values.get(ref_column) == Some(value))
                } else {
                    match self.foreign_tables.read().get(ref_table).and_then(std::sync::Weak::upgrade) {
                        Some(referenced) => referenced.inner.read().rows.values().any(|row| row.values.get(ref_column) == Some(value)),
                        None => false,
                    }
                };
                if !satisfied {
                    errors.push(format!("column '{}' violates foreign key to '{ref_table}.{ref_column}'", column.name));
                }
            }
        }
        errors
    }

    /// Validates every `Check` constraint declared on `schema` against `values`.
    fn check_checks(&self, schema: &TableSchema, values: &HashMap<String, Value>) -> Vec<String> {
        let mut errors = Vec::new();
        for column in &schema.columns {
            for constraint in &column.constraints {
                if let ColumnConstraint::Check(condition) = constraint {
                    if !query::evaluate_values(condition, values) {
                        errors.push(format!("column '{}' violates check constraint", column.name));
                    }
                }
            }
        }
        errors
    }

    /// Inserts a new row, allocating a monotone row id (spec §4.G.3
    /// "insert").
    pub fn insert(&self, values: HashMap<String, Value>) -> Result<u64, TableError> {
        let mut guard = self.inner.write();
        let TableInner {
            schema,
            rows,
            indexes,
            callbacks,
            stats,
        } = &mut *guard;

        let full_values = schema.fill_defaults(values);
        let mut errors = schema.validation_errors(&full_values);
        errors.extend(self.check_foreign_keys(schema, &full_values, rows));
        errors.extend(self.check_checks(schema, &full_values));
        if !errors.is_empty() {
            return Err(TableError::ValidationFailed { errors });
        }

        for (name, index) in indexes.iter() {
            let key = index.extract_key(&full_values);
            if index.would_violate_unique(&key) {
                return Err(TableError::UniqueViolation { index: name.clone() });
            }
        }

        let id = self.next_row_id.fetch_add(1, Ordering::SeqCst);
        let row = TableRow::new(id, full_values);
        for index in indexes.values_mut() {
            let key = index.extract_key(&row.values);
            index.insert_key(key, id);
        }

        stats.total_inserts += 1;
        stats.last_modified = now_millis();
        let event = ChangeEvent::RowInserted {
            table: self.name.clone(),
            row: row.clone(),
        };
        rows.insert(id, row);
        fire_callbacks(callbacks, &event);
        Ok(id)
    }

    /// Reinserts a previously-materialized row verbatim (id, version,
    /// timestamps preserved); used by [`TableTransaction`] rollback of a
    /// prior `delete`.
    fn reinsert(&self, row: TableRow) -> Result<(), TableError> {
        let mut guard = self.inner.write();
        let TableInner {
            rows,
            indexes,
            callbacks,
            stats,
            ..
        } = &mut *guard;

        for (name, index) in indexes.iter() {
            let key = index.extract_key(&row.values);
            if index.would_violate_unique(&key) {
                return Err(TableError::UniqueViolation { index: name.clone() });
            }
        }
        for index in indexes.values_mut() {
            let key = index.extract_key(&row.values);
            index.insert_key(key, row.id);
        }
        stats.total_inserts += 1;
        stats.last_modified = now_millis();
        let event = ChangeEvent::RowInserted {
            table: self.name.clone(),
            row: row.clone(),
        };
        rows.insert(row.id, row);
        fire_callbacks(callbacks, &event);
        Ok(())
    }

    /// Updates `row_id` with `values` merged onto the current row (spec
    /// §4.G.3 "update"). Returns `false` if the row does not exist.
    /// A failed validation/unique check leaves the row, its version, and
    /// every index observably unchanged (spec §8 "Update atomicity" —
    /// the version is never bumped on a rejected update).
    pub fn update(&self, row_id: u64, values: HashMap<String, Value>) -> Result<bool, TableError> {
        let mut guard = self.inner.write();
        let TableInner {
            schema,
            rows,
            indexes,
            callbacks,
            stats,
        } = &mut *guard;

        let Some(old_row) = rows.get(&row_id) else {
            return Ok(false);
        };
        let mut new_values = old_row.values.clone();
        for (k, v) in values {
            new_values.insert(k, v);
        }
        let mut errors = schema.validation_errors(&new_values);
        errors.extend(self.check_foreign_keys(schema, &new_values, rows));
        errors.extend(self.check_checks(schema, &new_values));
        if !errors.is_empty() {
            return Err(TableError::ValidationFailed { errors });
        }

        for (name, index) in indexes.iter() {
            let new_key = index.extract_key(&new_values);
            if index.would_violate_unique_excluding(&new_key, row_id) {
                return Err(TableError::UniqueViolation { index: name.clone() });
            }
        }

        let old_row = rows.get(&row_id).expect("checked above").clone();
        for index in indexes.values_mut() {
            let old_key = index.extract_key(&old_row.values);
            let new_key = index.extract_key(&new_values);
            if old_key != new_key {
                index.remove_key(&old_key, row_id);
                index.insert_key(new_key, row_id);
            }
        }

        let new_row = rows.get_mut(&row_id).expect("checked above");
        new_row.values = new_values;
        new_row.increment_version();
        let new_row = new_row.clone();

        stats.total_updates += 1;
        stats.last_modified = now_millis();
        let event = ChangeEvent::RowUpdated {
            table: self.name.clone(),
            old: old_row,
            new: new_row,
        };
        fire_callbacks(callbacks, &event);
        Ok(true)
    }

    /// Deletes `row_id` (spec §4.G.3 "delete"). Returns `false` if absent.
    pub fn delete(&self, row_id: u64) -> Result<bool, TableError> {
        let mut guard = self.inner.write();
        let TableInner {
            rows,
            indexes,
            callbacks,
            stats,
            ..
        } = &mut *guard;

        let Some(row) = rows.remove(&row_id) else {
            return Ok(false);
        };
        for index in indexes.values_mut() {
            let key = index.extract_key(&row.values);
            index.remove_key(&key, row_id);
        }
        stats.total_deletes += 1;
        stats.last_modified = now_millis();
        let event = ChangeEvent::RowDeleted {
            table: self.name.clone(),
            row: row.clone(),
        };
        fire_callbacks(callbacks, &event);
        Ok(true)
    }

    pub fn get(&self, row_id: u64) -> Option<TableRow> {
        self.inner.read().rows.get(&row_id).cloned()
    }

    pub fn all_rows(&self) -> Vec<TableRow> {
        self.inner.read().rows.values().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn find_by_index(&self, index_name: &str, key: &[Value]) -> Result<Vec<TableRow>, TableError> {
        let guard = self.inner.read();
        let index = guard
            .indexes
            .get(index_name)
            .ok_or_else(|| TableError::NotFound(format!("index '{index_name}'")))?;
        Ok(index
            .find_exact(key)
            .into_iter()
            .filter_map(|id| guard.rows.get(&id).cloned())
            .collect())
    }

    /// Row snapshots whose extracted key falls in `start..=end`, in key
    /// order (spec §4.G.3 "enabling both exact-match and range lookup").
    pub fn find_by_index_range(&self, index_name: &str, start: &[Value], end: &[Value]) -> Result<Vec<TableRow>, TableError> {
        let guard = self.inner.read();
        let index = guard
            .indexes
            .get(index_name)
            .ok_or_else(|| TableError::NotFound(format!("index '{index_name}'")))?;
        Ok(index
            .find_range(start, end)
            .into_iter()
            .filter_map(|id| guard.rows.get(&id).cloned())
            .collect())
    }

    /// Runs `query`, applying WHERE (AND of all conditions), ORDER BY
    /// (stable, multi-key), OFFSET, then LIMIT, in that order (spec
    /// §4.G.3 "query").
    pub fn query(&self, query: &TableQuery) -> Vec<TableRow> {
        let guard = self.inner.read();
        let mut rows: Vec<TableRow> = guard
            .rows
            .values()
            .filter(|row| query.conditions.iter().all(|c| query::evaluate(c, row)))
            .cloned()
            .collect();
        drop(guard);

        rows.sort_by(|a, b| query::compare_by_order(&query.order_by, a, b));

        let rows: Vec<TableRow> = match query.offset {
            Some(offset) => rows.into_iter().skip(offset).collect(),
            None => rows,
        };
        match query.limit {
            Some(limit) => rows.into_iter().take(limit).collect(),
            None => rows,
        }
    }

    /// Creates a non-reserved index, validating that every column exists
    /// and pre-populating from current rows (spec §4.G.3 "create_index").
    pub fn create_index(&self, name: impl Into<String>, columns: Vec<String>, unique: bool) -> Result<(), TableError> {
        let name = name.into();
        let mut guard = self.inner.write();
        for column in &columns {
            if guard.schema.column(column).is_none() {
                return Err(TableError::SchemaIncompatible(format!(
                    "unknown column '{column}' for index '{name}'"
                )));
            }
        }
        let mut index = TableIndex::new(&name, columns, unique);
        for row in guard.rows.values() {
            let key = index.extract_key(&row.values);
            if index.would_violate_unique(&key) {
                return Err(TableError::UniqueViolation { index: name });
            }
            index.insert_key(key, row.id);
        }
        guard.indexes.insert(name.clone(), index);
        let event = ChangeEvent::IndexCreated {
            table: self.name.clone(),
            index: name,
        };
        fire_callbacks(&guard.callbacks, &event);
        Ok(())
    }

    /// Drops a non-reserved index (spec §4.G.3 "drop_index").
    pub fn drop_index(&self, name: &str) -> Result<(), TableError> {
        if name == PRIMARY_KEY_INDEX {
            return Err(TableError::SchemaIncompatible(
                "cannot drop the reserved primary-key index".to_string(),
            ));
        }
        let mut guard = self.inner.write();
        if guard.indexes.remove(name).is_some() {
            let event = ChangeEvent::IndexDropped {
                table: self.name.clone(),
                index: name.to_string(),
            };
            fire_callbacks(&guard.callbacks, &event);
        }
        Ok(())
    }

    pub fn index_names(&self) -> Vec<String> {
        self.inner.read().indexes.keys().cloned().collect()
    }

    /// Replaces the schema with `new_schema`, requiring the same table
    /// name and a strictly greater version (spec §4.G.3 "Schema
    /// evolution" / §8 "Schema evolution monotonicity"). Existing rows
    /// are kept as-is.
    pub fn evolve_schema(&self, new_schema: TableSchema) -> Result<(), TableError> {
        let mut guard = self.inner.write();
        if new_schema.name != guard.schema.name {
            return Err(TableError::SchemaIncompatible(format!(
                "schema name mismatch: expected '{}', got '{}'",
                guard.schema.name, new_schema.name
            )));
        }
        if new_schema.version <= guard.schema.version {
            return Err(TableError::SchemaIncompatible(format!(
                "new schema version {} must exceed current version {}",
                new_schema.version, guard.schema.version
            )));
        }
        let old_version = guard.schema.version;
        let new_version = new_schema.version;
        guard.schema = new_schema;
        let event = ChangeEvent::SchemaChanged {
            table: self.name.clone(),
            old_version,
            new_version,
        };
        fire_callbacks(&guard.callbacks, &event);
        Ok(())
    }

    pub fn add_change_callback(&self, name: impl Into<String>, callback: impl Fn(&ChangeEvent) + Send + Sync + 'static) {
        self.inner.write().callbacks.insert(name.into(), Arc::new(callback));
    }

    pub fn remove_change_callback(&self, name: &str) {
        self.inner.write().callbacks.remove(name);
    }

    pub fn begin_transaction(self: &Arc<Self>) -> TableTransaction {
        TableTransaction::new(self.clone())
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write();
        guard.rows.clear();
        for index in guard.indexes.values_mut() {
            index.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().rows.is_empty()
    }

    /// Deep copy including rows, indexes, and callback registrations
    /// (spec §4.G.3 "clone"). Callback closures themselves are shared
    /// (`Arc`-wrapped), not duplicated, since an arbitrary closure cannot
    /// be cloned — the registration mapping is independent per table.
    pub fn clone_table(&self) -> Arc<Table> {
        let guard = self.inner.read();
        let cloned = TableInner {
            schema: guard.schema.clone(),
            rows: guard.rows.clone(),
            indexes: guard.indexes.clone(),
            callbacks: guard.callbacks.clone(),
            stats: guard.stats.clone(),
        };
        let foreign_tables = self.foreign_tables.read().clone();
        Arc::new(Table {
            name: self.name.clone(),
            inner: RwLock::new(cloned),
            next_row_id: AtomicU64::new(self.next_row_id.load(Ordering::SeqCst)),
            foreign_tables: RwLock::new(foreign_tables),
        })
    }

    /// Merges rows from `other` into `self`; requires every column of
    /// `other`'s schema to exist in `self`'s schema with a matching type.
    /// Rows receive a fresh id from `self`'s allocator; rows that fail
    /// validation are skipped (spec §4.G.3 "merge_from").
    pub fn merge_from(&self, other: &Table) -> Result<usize, TableError> {
        if std::ptr::eq(self, other) {
            return Err(TableError::SchemaIncompatible("cannot merge a table into itself".to_string()));
        }
        let other_rows = {
            let self_guard = self.inner.read();
            let other_guard = other.inner.read();
            for other_column in &other_guard.schema.columns {
                match self_guard.schema.column(&other_column.name) {
                    Some(self_column) if self_column.column_type == other_column.column_type => {}
                    _ => {
                        return Err(TableError::SchemaIncompatible(format!(
                            "column '{}' is incompatible between source and destination tables",
                            other_column.name
                        )))
                    }
                }
            }
            other_guard.rows.values().map(|r| r.values.clone()).collect::<Vec<_>>()
        };
        let mut merged = 0usize;
        for values in other_rows {
            if self.insert(values).is_ok() {
                merged += 1;
            }
        }
        Ok(merged)
    }

    /// Swaps the entire contents (schema, rows, indexes, callbacks,
    /// statistics) of two tables, each keeping its own `name` (spec
    /// §4.G.3 "swap"). Lock acquisition is ordered by address to avoid
    /// deadlocking against a concurrent swap of the same pair.
    pub fn swap(&self, other: &Table) {
        if std::ptr::eq(self, other) {
            return;
        }
        let self_addr = self as *const Table as usize;
        let other_addr = other as *const Table as usize;
        if self_addr < other_addr {
            let mut a = self.inner.write();
            let mut b = other.inner.write();
            std::mem::swap(&mut *a, &mut *b);
        } else {
            let mut b = other.inner.write();
            let mut a = self.inner.write();
            std::mem::swap(&mut *a, &mut *b);
        }
    }

    /// Round-trips schema, rows, index definitions, and statistics to a
    /// JSON value matching the wire schema (spec §6.5).
    pub fn to_json(&self) -> serde_json::Value {
        let guard = self.inner.read();
        let columns_json: Vec<serde_json::Value> = guard
            .indexes
            .values()
            .map(|idx| {
                serde_json::json!({
                    "name": idx.name,
                    "columns": idx.columns,
                    "unique": idx.unique,
                })
            })
            .collect();
        serde_json::json!({
            "schema": guard.schema.to_json(),
            "rows": guard.rows.values().map(|r| r.to_json()).collect::<Vec<_>>(),
            "indexes": columns_json,
            "statistics": {
                "total_inserts": guard.stats.total_inserts,
                "total_updates": guard.stats.total_updates,
                "total_deletes": guard.stats.total_deletes,
                "created_at": guard.stats.created_at,
                "last_modified": guard.stats.last_modified,
            }
        })
    }

    /// Rebuilds a table from a JSON value produced by [`Table::to_json`].
    pub fn from_json(json: &serde_json::Value) -> Result<Arc<Table>, TableError> {
        let schema_json = json
            .get("schema")
            .ok_or_else(|| TableError::SchemaIncompatible("missing 'schema'".to_string()))?;
        let schema = TableSchema::from_json(schema_json)?;
        let table = Table::new(schema);

        {
            let mut guard = table.inner.write();
            if let Some(indexes) = json.get("indexes").and_then(|v| v.as_array()) {
                for idx_json in indexes {
                    let name = idx_json
                        .get("name")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| TableError::SchemaIncompatible("index missing 'name'".to_string()))?
                        .to_string();
                    let columns: Vec<String> = idx_json
                        .get("columns")
                        .and_then(|v| v.as_array())
                        .map(|a| a.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
                        .unwrap_or_default();
                    let unique = idx_json.get("unique").and_then(|v| v.as_bool()).unwrap_or(false);
                    guard.indexes.insert(name.clone(), TableIndex::new(&name, columns, unique));
                }
            }
            if let Some(rows) = json.get("rows").and_then(|v| v.as_array()) {
                for row_json in rows {
                    let row = TableRow::from_json(row_json, &guard.schema)?;
                    for index in guard.indexes.values_mut() {
                        let key = index.extract_key(&row.values);
                        index.insert_key(key, row.id);
                    }
                    guard.rows.insert(row.id, row);
                }
            }
            if let Some(stats) = json.get("statistics") {
                guard.stats.total_inserts = stats.get("total_inserts").and_then(|v| v.as_u64()).unwrap_or(0);
                guard.stats.total_updates = stats.get("total_updates").and_then(|v| v.as_u64()).unwrap_or(0);
                guard.stats.total_deletes = stats.get("total_deletes").and_then(|v| v.as_u64()).unwrap_or(0);
                guard.stats.created_at = stats.get("created_at").and_then(|v| v.as_i64()).unwrap_or(0);
                guard.stats.last_modified = stats.get("last_modified").and_then(|v| v.as_i64()).unwrap_or(0);
            }
        }

        let max_id = table.inner.read().rows.keys().next_back().copied().unwrap_or(0);
        table.next_row_id.store(max_id + 1, Ordering::SeqCst);
        Ok(table)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let json = self.to_json();
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &json)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Arc<Table>, TableError> {
        let file = std::fs::File::open(path)?;
        let json: serde_json::Value = serde_json::from_reader(file)?;
        Table::from_json(&json)
    }
}

/// Change-log-only transaction handle (spec §4.G.3 "Transactions" / §9
/// "Transactions without isolation are a known limitation"). Operations
/// apply eagerly against the owning table; `rollback` (explicit, or
/// implicit via `Drop` while still active) replays compensating inverse
/// operations from the recorded log. No isolation is provided against
/// concurrent readers or writers of the same table.
pub struct TableTransaction {
    table: Arc<Table>,
    log: parking_lot::Mutex<Vec<TxnOp>>,
    active: std::sync::atomic::AtomicBool,
}

enum TxnOp {
    Insert { row_id: u64 },
    Update { row_id: u64, old_values: HashMap<String, Value> },
    Delete { row: TableRow },
}

impl TableTransaction {
    fn new(table: Arc<Table>) -> Self {
        Self {
            table,
            log: parking_lot::Mutex::new(Vec::new()),
            active: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn begin(&self) {
        self.active.store(true, Ordering::Release);
        self.log.lock().clear();
    }

    pub fn insert(&self, values: HashMap<String, Value>) -> Result<u64, TableError> {
        let id = self.table.insert(values)?;
        self.log.lock().push(TxnOp::Insert { row_id: id });
        Ok(id)
    }

    pub fn update(&self, row_id: u64, values: HashMap<String, Value>) -> Result<bool, TableError> {
        let Some(old) = self.table.get(row_id) else {
            return Ok(false);
        };
        let changed = self.table.update(row_id, values)?;
        if changed {
            self.log.lock().push(TxnOp::Update {
                row_id,
                old_values: old.values,
            });
        }
        Ok(changed)
    }

    pub fn delete(&self, row_id: u64) -> Result<bool, TableError> {
        let Some(old) = self.table.get(row_id) else {
            return Ok(false);
        };
        let changed = self.table.delete(row_id)?;
        if changed {
            self.log.lock().push(TxnOp::Delete { row: old });
        }
        Ok(changed)
    }

    /// Clears the change log without undoing anything already applied.
    pub fn commit(&self) {
        self.active.store(false, Ordering::Release);
        self.log.lock().clear();
    }

    /// Replays the change log in reverse, applying compensating
    /// operations. Idempotent: a second call is a no-op.
    pub fn rollback(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let ops = std::mem::take(&mut *self.log.lock());
        for op in ops.into_iter().rev() {
            match op {
                TxnOp::Insert { row_id } => {
                    let _ = self.table.delete(row_id);
                }
                TxnOp::Update { row_id, old_values } => {
                    let _ = self.table.update(row_id, old_values);
                }
                TxnOp::Delete { row } => {
                    let _ = self.table.reinsert(row);
                }
            }
        }
    }
}

impl Drop for TableTransaction {
    fn drop(&mut self) {
        if self.active.load(Ordering::Acquire) {
            self.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_schema() -> TableSchema {
        let mut schema = TableSchema::new("people");
        schema
            .add_column(ColumnDefinition::new("id", ColumnType::Integer, false))
            .unwrap();
        schema
            .add_column(ColumnDefinition::new("name", ColumnType::String, false))
            .unwrap();
        schema
            .add_column(ColumnDefinition::new("age", ColumnType::Integer, true))
            .unwrap();
        schema.set_primary_key(vec!["id".to_string()]).unwrap();
        schema
    }

    fn values(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn insert_then_query_scenario() {
        let table = Table::new(person_schema());
        table
            .insert(values(&[("id", Value::Int(1)), ("name", Value::String("A".into())), ("age", Value::Int(30))]))
            .unwrap();
        table
            .insert(values(&[("id", Value::Int(2)), ("name", Value::String("B".into())), ("age", Value::Int(25))]))
            .unwrap();
        table
            .insert(values(&[("id", Value::Int(3)), ("name", Value::String("C".into())), ("age", Value::Int(30))]))
            .unwrap();

        let query = TableQuery::new()
            .where_(Condition {
                column: "age".to_string(),
                operator: QueryOperator::Equal(Value::Int(30)),
            })
            .order_by("id", SortDirection::Desc);
        let rows = table.query(&query);
        let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn unique_violation_scenario() {
        let mut schema = TableSchema::new("users");
        schema
            .add_column(ColumnDefinition::new("id", ColumnType::Integer, false))
            .unwrap();
        schema
            .add_column(ColumnDefinition::new("email", ColumnType::String, false))
            .unwrap();
        let table = Table::new(schema);
        table.create_index("by_email", vec!["email".to_string()], true).unwrap();

        table
            .insert(values(&[("id", Value::Int(1)), ("email", Value::String("a@x".into()))]))
            .unwrap();
        let err = table
            .insert(values(&[("id", Value::Int(2)), ("email", Value::String("a@x".into()))]))
            .unwrap_err();
        assert!(matches!(err, TableError::UniqueViolation { .. }));
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.find_by_index("by_email", &[Value::String("a@x".into())]).unwrap().len(), 1);
    }

    #[test]
    fn insert_index_coherence() {
        let table = Table::new(person_schema());
        let id = table
            .insert(values(&[("id", Value::Int(1)), ("name", Value::String("A".into())), ("age", Value::Int(1))]))
            .unwrap();
        let found = table.find_by_index(PRIMARY_KEY_INDEX, &[Value::Int(1)]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
    }

    #[test]
    fn failed_update_leaves_row_and_version_unchanged() {
        let mut schema = TableSchema::new("users");
        schema
            .add_column(ColumnDefinition::new("id", ColumnType::Integer, false))
            .unwrap();
        schema
            .add_column(ColumnDefinition::new("email", ColumnType::String, false))
            .unwrap();
        let table = Table::new(schema);
        table.create_index("by_email", vec!["email".to_string()], true).unwrap();
        table
            .insert(values(&[("id", Value::Int(1)), ("email", Value::String("a@x".into()))]))
            .unwrap();
        table
            .insert(values(&[("id", Value::Int(2)), ("email", Value::String("b@x".into()))]))
            .unwrap();

        let before = table.get(2).unwrap();
        let err = table
            .update(2, values(&[("email", Value::String("a@x".into()))]))
            .unwrap_err();
        assert!(matches!(err, TableError::UniqueViolation { .. }));
        let after = table.get(2).unwrap();
        assert_eq!(before.version, after.version);
        assert_eq!(before.values, after.values);
    }

    #[test]
    fn round_trip_json_preserves_rows_and_indexes() {
        let table = Table::new(person_schema());
        table
            .insert(values(&[("id", Value::Int(1)), ("name", Value::String("A".into())), ("age", Value::Int(9))]))
            .unwrap();
        table.create_index("by_name", vec!["name".to_string()], false).unwrap();

        let json = table.to_json();
        let restored = Table::from_json(&json).unwrap();
        assert_eq!(restored.row_count(), table.row_count());
        assert_eq!(restored.get(1).unwrap().values, table.get(1).unwrap().values);
        assert_eq!(restored.index_names().len(), table.index_names().len());
    }

    #[test]
    fn schema_evolution_requires_strictly_greater_version() {
        let table = Table::new(person_schema());
        let current = table.schema();
        let older = current.evolve(current.version).unwrap_or(current.clone());
        assert!(table.evolve_schema(older).is_err());
        let newer = current.evolve(current.version + 1).unwrap();
        assert!(table.evolve_schema(newer).is_ok());
    }

    #[test]
    fn transaction_rollback_restores_state() {
        let table = Table::new(person_schema());
        table
            .insert(values(&[("id", Value::Int(1)), ("name", Value::String("A".into())), ("age", Value::Int(1))]))
            .unwrap();

        let txn = table.begin_transaction();
        let new_id = txn
            .insert(values(&[("id", Value::Int(2)), ("name", Value::String("B".into())), ("age", Value::Int(2))]))
            .unwrap();
        txn.delete(1).unwrap();
        assert_eq!(table.row_count(), 1);
        txn.rollback();

        assert_eq!(table.row_count(), 1);
        assert!(table.get(1).is_some());
        assert!(table.get(new_id).is_none());
    }

    #[test]
    fn change_callback_fires_on_insert() {
        let table = Table::new(person_schema());
        let seen = Arc::new(parking_lot::Mutex::new(0u32));
        let seen2 = seen.clone();
        table.add_change_callback("counter", move |event| {
            if matches!(event, ChangeEvent::RowInserted { .. }) {
                *seen2.lock() += 1;
            }
        });
        table
            .insert(values(&[("id", Value::Int(1)), ("name", Value::String("A".into())), ("age", Value::Int(1))]))
            .unwrap();
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn json_value_round_trips_through_column_type() {
        let original = Value::Json(r#"{"a":1,"b":[true,null]}"#.to_string());
        let json = original.to_json();
        let restored = Value::from_json(&json, ColumnType::Json).unwrap();
        assert_eq!(restored.column_type(), Some(ColumnType::Json));
        match restored {
            Value::Json(text) => {
                let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(parsed, json);
            }
            other => panic!("expected Value::Json, got {other:?}"),
        }
    }

    #[test]
    fn insert_rejects_extraneous_column() {
        let table = Table::new(person_schema());
        let err = table
            .insert(values(&[
                ("id", Value::Int(1)),
                ("name", Value::String("A".into())),
                ("age", Value::Int(1)),
                ("nickname", Value::String("Ace".into())),
            ]))
            .unwrap_err();
        assert!(matches!(err, TableError::ValidationFailed { .. }));
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn update_rejects_extraneous_column() {
        let table = Table::new(person_schema());
        table
            .insert(values(&[("id", Value::Int(1)), ("name", Value::String("A".into())), ("age", Value::Int(1))]))
            .unwrap();
        let err = table.update(1, values(&[("nickname", Value::String("Ace".into()))])).unwrap_err();
        assert!(matches!(err, TableError::ValidationFailed { .. }));
    }

    #[test]
    fn index_create_and_drop_fire_events() {
        let table = Table::new(person_schema());
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let events2 = events.clone();
        table.add_change_callback("watcher", move |event| {
            let label = match event {
                ChangeEvent::IndexCreated { index, .. } => Some(format!("created:{index}")),
                ChangeEvent::IndexDropped { index, .. } => Some(format!("dropped:{index}")),
                _ => None,
            };
            if let Some(label) = label {
                events2.lock().push(label);
            }
        });
        table.create_index("by_name", vec!["name".to_string()], false).unwrap();
        table.drop_index("by_name").unwrap();
        assert_eq!(*events.lock(), vec!["created:by_name".to_string(), "dropped:by_name".to_string()]);
    }

    #[test]
    fn drop_index_is_a_no_op_event_wise_when_absent() {
        let table = Table::new(person_schema());
        let seen = Arc::new(parking_lot::Mutex::new(0u32));
        let seen2 = seen.clone();
        table.add_change_callback("counter", move |event| {
            if matches!(event, ChangeEvent::IndexDropped { .. }) {
                *seen2.lock() += 1;
            }
        });
        table.drop_index("never_existed").unwrap();
        assert_eq!(*seen.lock(), 0);
    }

    fn orders_schema_with_fk() -> TableSchema {
        let mut schema = TableSchema::new("orders");
        schema
            .add_column(ColumnDefinition::new("id", ColumnType::Integer, false))
            .unwrap();
        schema
            .add_column(
                ColumnDefinition::new("customer_id", ColumnType::Integer, false)
                    .with_constraints(vec![ColumnConstraint::ForeignKey {
                        table: "people".to_string(),
                        column: "id".to_string(),
                    }]),
            )
            .unwrap();
        schema.set_primary_key(vec!["id".to_string()]).unwrap();
        schema
    }

    #[test]
    fn foreign_key_enforced_across_tables() {
        let people = Table::new(person_schema());
        people
            .insert(values(&[("id", Value::Int(1)), ("name", Value::String("A".into())), ("age", Value::Int(1))]))
            .unwrap();

        let orders = Table::new(orders_schema_with_fk());
        orders.register_foreign_table("people", &people);

        let err = orders
            .insert(values(&[("id", Value::Int(1)), ("customer_id", Value::Int(99))]))
            .unwrap_err();
        assert!(matches!(err, TableError::ValidationFailed { .. }));

        orders
            .insert(values(&[("id", Value::Int(1)), ("customer_id", Value::Int(1))]))
            .unwrap();
        assert_eq!(orders.row_count(), 1);
    }

    #[test]
    fn foreign_key_to_unregistered_table_fails_closed() {
        let orders = Table::new(orders_schema_with_fk());
        let err = orders
            .insert(values(&[("id", Value::Int(1)), ("customer_id", Value::Int(1))]))
            .unwrap_err();
        assert!(matches!(err, TableError::ValidationFailed { .. }));
    }

    #[test]
    fn self_referential_foreign_key_resolves_without_deadlock() {
        let mut schema = TableSchema::new("employees");
        schema
            .add_column(ColumnDefinition::new("id", ColumnType::Integer, false))
            .unwrap();
        schema
            .add_column(
                ColumnDefinition::new("manager_id", ColumnType::Integer, true).with_constraints(vec![ColumnConstraint::ForeignKey {
                    table: "employees".to_string(),
                    column: "id".to_string(),
                }]),
            )
            .unwrap();
        schema.set_primary_key(vec!["id".to_string()]).unwrap();
        let table = Table::new(schema);

        table.insert(values(&[("id", Value::Int(1)), ("manager_id", Value::Null)])).unwrap();
        table.insert(values(&[("id", Value::Int(2)), ("manager_id", Value::Int(1))])).unwrap();
        let err = table.insert(values(&[("id", Value::Int(3)), ("manager_id", Value::Int(404))])).unwrap_err();
        assert!(matches!(err, TableError::ValidationFailed { .. }));
    }

    #[test]
    fn check_constraint_enforced_on_insert_and_update() {
        let mut schema = TableSchema::new("accounts");
        schema
            .add_column(ColumnDefinition::new("id", ColumnType::Integer, false))
            .unwrap();
        schema
            .add_column(ColumnDefinition::new("balance", ColumnType::Integer, false).with_constraints(vec![ColumnConstraint::Check(
                Condition {
                    column: "balance".to_string(),
                    operator: QueryOperator::GreaterThanOrEqual(Value::Int(0)),
                },
            )]))
            .unwrap();
        schema.set_primary_key(vec!["id".to_string()]).unwrap();
        let table = Table::new(schema);

        let err = table.insert(values(&[("id", Value::Int(1)), ("balance", Value::Int(-5))])).unwrap_err();
        assert!(matches!(err, TableError::ValidationFailed { .. }));

        table.insert(values(&[("id", Value::Int(1)), ("balance", Value::Int(10))])).unwrap();
        let err = table.update(1, values(&[("balance", Value::Int(-1))])).unwrap_err();
        assert!(matches!(err, TableError::ValidationFailed { .. }));
        assert_eq!(table.get(1).unwrap().values.get("balance"), Some(&Value::Int(10)));
    }
}
