use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StoreError;

/// A row as it crosses the store boundary.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    Gte(String, Value),
    Lte(String, Value),
    IsNull(String),
}

impl Filter {
    pub fn eq(column: &str, value: impl Serialize) -> Self {
        Self::Eq(column.to_string(), to_value(value))
    }

    pub fn any_of<T: Serialize>(column: &str, values: impl IntoIterator<Item = T>) -> Self {
        Self::In(column.to_string(), values.into_iter().map(to_value).collect())
    }

    pub fn gte(column: &str, value: impl Serialize) -> Self {
        Self::Gte(column.to_string(), to_value(value))
    }

    pub fn lte(column: &str, value: impl Serialize) -> Self {
        Self::Lte(column.to_string(), to_value(value))
    }

    pub fn is_null(column: &str) -> Self {
        Self::IsNull(column.to_string())
    }

    pub fn column(&self) -> &str {
        match self {
            Self::Eq(column, _)
            | Self::In(column, _)
            | Self::Gte(column, _)
            | Self::Lte(column, _)
            | Self::IsNull(column) => column,
        }
    }

    /// Evaluates the filter against an in-process row. Missing columns read as null.
    pub fn matches(&self, row: &Row) -> bool {
        let cell = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Self::Eq(_, value) => values_equal(cell, value),
            Self::In(_, values) => values.iter().any(|value| values_equal(cell, value)),
            Self::Gte(_, value) => {
                !cell.is_null() && compare_values(cell, value) != std::cmp::Ordering::Less
            }
            Self::Lte(_, value) => {
                !cell.is_null() && compare_values(cell, value) != std::cmp::Ordering::Greater
            }
            Self::IsNull(_) => cell.is_null(),
        }
    }
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Total order used for sorting and range filters: numbers numerically,
/// timestamps chronologically, everything else by its JSON text.
pub fn compare_values(left: &Value, right: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&b.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => {
            match (
                chrono::DateTime::parse_from_rfc3339(a),
                chrono::DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => left.to_string().cmp(&right.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Serialize) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn any_of<T: Serialize>(self, column: &str, values: impl IntoIterator<Item = T>) -> Self {
        self.filter(Filter::any_of(column, values))
    }

    pub fn is_null(self, column: &str) -> Self {
        self.filter(Filter::is_null(column))
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order.push((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub fn encode_row<T: Serialize>(entity: &'static str, value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Decode {
            entity,
            message: format!("expected an object, got {other}"),
        }),
        Err(err) => Err(StoreError::Decode {
            entity,
            message: err.to_string(),
        }),
    }
}

pub fn decode_row<T: DeserializeOwned>(entity: &'static str, row: Row) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(row)).map_err(|err| StoreError::Decode {
        entity,
        message: err.to_string(),
    })
}

pub fn decode_rows<T: DeserializeOwned>(
    entity: &'static str,
    rows: Vec<Row>,
) -> Result<Vec<T>, StoreError> {
    rows.into_iter().map(|row| decode_row(entity, row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn eq_compares_numbers_by_value() {
        let filter = Filter::eq("gpa", 3.0);
        assert!(filter.matches(&row(json!({ "gpa": 3 }))));
        assert!(!filter.matches(&row(json!({ "gpa": 3.5 }))));
    }

    #[test]
    fn range_filters_order_timestamps_chronologically() {
        let filter = Filter::gte("start_time", "2026-03-01T09:00:00Z");
        assert!(filter.matches(&row(json!({ "start_time": "2026-03-01T10:00:00+01:00" }))));
        assert!(!filter.matches(&row(json!({ "start_time": "2026-02-28T23:00:00Z" }))));
        assert!(!filter.matches(&row(json!({ "start_time": null }))));
    }

    #[test]
    fn is_null_treats_missing_column_as_null() {
        let filter = Filter::is_null("read_at");
        assert!(filter.matches(&row(json!({ "id": 1 }))));
        assert!(!filter.matches(&row(json!({ "read_at": "2026-01-01T00:00:00Z" }))));
    }

    #[test]
    fn builder_collects_filters_and_order() {
        let query = Query::table("students")
            .eq("parent_id", "p-1")
            .any_of("grade_level", ["3", "4"])
            .order_by("last_name", Direction::Asc)
            .limit(5);
        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.order, vec![("last_name".to_string(), Direction::Asc)]);
        assert_eq!(query.limit, Some(5));
    }
}
