use std::cmp::Ordering;
use std::collections::HashMap;

use crate::row::TableRow;
use crate::schema::ColumnType;
use crate::value::Value;
use crate::TableError;

/// Comparison operators available to [`Condition`] (spec §4.G.3
/// "QueryOperator"). `Null` never satisfies any operator except
/// `IsNull`/`IsNotNull`; mismatched operand variants evaluate false.
#[derive(Debug, Clone)]
pub enum QueryOperator {
    Equal(Value),
    NotEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    Like(String),
    In(Vec<Value>),
    Between(Value, Value),
    IsNull,
    IsNotNull,
}

impl QueryOperator {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            QueryOperator::Equal(v) => serde_json::json!({"op": "eq", "value": v.to_json()}),
            QueryOperator::NotEqual(v) => serde_json::json!({"op": "ne", "value": v.to_json()}),
            QueryOperator::LessThan(v) => serde_json::json!({"op": "lt", "value": v.to_json()}),
            QueryOperator::LessThanOrEqual(v) => serde_json::json!({"op": "le", "value": v.to_json()}),
            QueryOperator::GreaterThan(v) => serde_json::json!({"op": "gt", "value": v.to_json()}),
            QueryOperator::GreaterThanOrEqual(v) => serde_json::json!({"op": "ge", "value": v.to_json()}),
            QueryOperator::Like(pattern) => serde_json::json!({"op": "like", "pattern": pattern}),
            QueryOperator::In(values) => {
                serde_json::json!({"op": "in", "values": values.iter().map(Value::to_json).collect::<Vec<_>>()})
            }
            QueryOperator::Between(lo, hi) => serde_json::json!({"op": "between", "lo": lo.to_json(), "hi": hi.to_json()}),
            QueryOperator::IsNull => serde_json::json!({"op": "is_null"}),
            QueryOperator::IsNotNull => serde_json::json!({"op": "is_not_null"}),
        }
    }

    pub fn from_json(json: &serde_json::Value, column_type: ColumnType) -> Result<Self, TableError> {
        let bad = || TableError::SchemaIncompatible(format!("malformed query operator: {json}"));
        let value_at = |key: &str| -> Result<&serde_json::Value, TableError> { json.get(key).ok_or_else(bad) };
        match json.get("op").and_then(|v| v.as_str()).ok_or_else(bad)? {
            "eq" => Ok(QueryOperator::Equal(Value::from_json(value_at("value")?, column_type)?)),
            "ne" => Ok(QueryOperator::NotEqual(Value::from_json(value_at("value")?, column_type)?)),
            "lt" => Ok(QueryOperator::LessThan(Value::from_json(value_at("value")?, column_type)?)),
            "le" => Ok(QueryOperator::LessThanOrEqual(Value::from_json(value_at("value")?, column_type)?)),
            "gt" => Ok(QueryOperator::GreaterThan(Value::from_json(value_at("value")?, column_type)?)),
            "ge" => Ok(QueryOperator::GreaterThanOrEqual(Value::from_json(value_at("value")?, column_type)?)),
            "like" => Ok(QueryOperator::Like(json.get("pattern").and_then(|v| v.as_str()).ok_or_else(bad)?.to_string())),
            "in" => {
                let values = json.get("values").and_then(|v| v.as_array()).ok_or_else(bad)?;
                let values = values.iter().map(|v| Value::from_json(v, column_type)).collect::<Result<Vec<_>, _>>()?;
                Ok(QueryOperator::In(values))
            }
            "between" => Ok(QueryOperator::Between(
                Value::from_json(value_at("lo")?, column_type)?,
                Value::from_json(value_at("hi")?, column_type)?,
            )),
            "is_null" => Ok(QueryOperator::IsNull),
            "is_not_null" => Ok(QueryOperator::IsNotNull),
            _ => Err(bad()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub column: String,
    pub operator: QueryOperator,
}

impl Condition {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({"column": self.column, "operator": self.operator.to_json()})
    }

    pub fn from_json(json: &serde_json::Value, column_type: ColumnType) -> Result<Self, TableError> {
        let bad = || TableError::SchemaIncompatible(format!("malformed condition: {json}"));
        let column = json.get("column").and_then(|v| v.as_str()).ok_or_else(bad)?.to_string();
        let operator = QueryOperator::from_json(json.get("operator").ok_or_else(bad)?, column_type)?;
        Ok(Condition { column, operator })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A query against a table: WHERE (AND of all conditions), ORDER BY
/// (stable, multi-key), OFFSET, LIMIT, applied in that order (spec
/// §4.G.3 "query").
#[derive(Debug, Clone, Default)]
pub struct TableQuery {
    pub conditions: Vec<Condition>,
    pub order_by: Vec<(String, SortDirection)>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl TableQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push((column.into(), direction));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

fn compare_non_null(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match (a.column_type(), b.column_type()) {
        (Some(ta), Some(tb)) if ta == tb => Some(a.cmp(b)),
        _ => None,
    }
}

fn values_eq_non_null(a: &Value, b: &Value) -> bool {
    !a.is_null() && !b.is_null() && a == b
}

pub(crate) fn evaluate(condition: &Condition, row: &TableRow) -> bool {
    evaluate_values(condition, &row.values)
}

/// Core predicate evaluation against a raw values map, shared by row
/// queries and by [`ColumnConstraint::Check`](crate::schema::ColumnConstraint::Check)
/// enforcement at insert/update time, which has no [`TableRow`] yet.
pub(crate) fn evaluate_values(condition: &Condition, values: &HashMap<String, Value>) -> bool {
    let actual = values.get(&condition.column).cloned().unwrap_or(Value::Null);
    match &condition.operator {
        QueryOperator::IsNull => actual.is_null(),
        QueryOperator::IsNotNull => !actual.is_null(),
        QueryOperator::Equal(v) => values_eq_non_null(&actual, v),
        QueryOperator::NotEqual(v) => !actual.is_null() && !v.is_null() && !values_eq_non_null(&actual, v),
        QueryOperator::LessThan(v) => matches!(compare_non_null(&actual, v), Some(Ordering::Less)),
        QueryOperator::LessThanOrEqual(v) => matches!(compare_non_null(&actual, v), Some(Ordering::Less) | Some(Ordering::Equal)),
        QueryOperator::GreaterThan(v) => matches!(compare_non_null(&actual, v), Some(Ordering::Greater)),
        QueryOperator::GreaterThanOrEqual(v) => {
            matches!(compare_non_null(&actual, v), Some(Ordering::Greater) | Some(Ordering::Equal))
        }
        QueryOperator::Like(pattern) => match &actual {
            Value::String(s) => s.contains(pattern.as_str()),
            _ => false,
        },
        QueryOperator::In(values) => !actual.is_null() && values.iter().any(|v| values_eq_non_null(&actual, v)),
        QueryOperator::Between(lo, hi) => match (compare_non_null(&actual, lo), compare_non_null(&actual, hi)) {
            (Some(lo_ord), Some(hi_ord)) => lo_ord != Ordering::Less && hi_ord != Ordering::Greater,
            _ => false,
        },
    }
}

pub(crate) fn compare_by_order(order_by: &[(String, SortDirection)], a: &TableRow, b: &TableRow) -> Ordering {
    for (column, direction) in order_by {
        let av = a.values.get(column).cloned().unwrap_or(Value::Null);
        let bv = b.values.get(column).cloned().unwrap_or(Value::Null);
        let ordering = av.cmp(&bv);
        let ordering = if *direction == SortDirection::Desc { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
