//! In-process store used by tests and the `demo` command.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{compare_values, ChangeEvent, ChangeKind, Direction, Filter, Query, Row, Store};
use crate::error::StoreError;
use crate::models::tables;

const CHANGE_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy)]
enum OnDelete {
    Cascade,
    SetNull,
}

/// `(parent, child, column, action)` for every reference the portal schema
/// declares with an ON DELETE action. Parents are keyed by `id`.
const REFERENCES: &[(&str, &str, &str, OnDelete)] = &[
    (tables::PROFILES, tables::CLASSROOMS, "teacher_id", OnDelete::SetNull),
    (tables::PROFILES, tables::ACADEMIC_RECORDS, "teacher_id", OnDelete::SetNull),
    (tables::CLASSROOMS, tables::STUDENTS, "classroom_id", OnDelete::SetNull),
    (tables::STUDENTS, tables::ACADEMIC_RECORDS, "student_id", OnDelete::Cascade),
    (tables::STUDENTS, tables::COMMUNICATIONS, "student_id", OnDelete::SetNull),
    (tables::EVENTS, tables::EVENT_ATTENDEES, "event_id", OnDelete::Cascade),
];

type Effects = Vec<(String, ChangeKind, Vec<Row>)>;

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Row>>,
    selects: HashMap<String, usize>,
    failures: HashMap<String, String>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    /// Creates a store that knows only the named tables; any other table reads
    /// as a missing relation.
    pub fn with_tables(tables: &[&str]) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let mut inner = Inner::default();
        for table in tables {
            inner.tables.insert(table.to_string(), Vec::new());
        }
        Self {
            inner: Mutex::new(inner),
            changes,
        }
    }

    /// A store with every table of the portal schema.
    pub fn portal() -> Self {
        Self::with_tables(crate::models::TABLES)
    }

    /// Makes every subsequent operation on `table` fail with `message` until cleared.
    pub fn fail_table(&self, table: &str, message: &str) {
        self.lock()
            .failures
            .insert(table.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, table: &str) {
        self.lock().failures.remove(table);
    }

    /// Number of selects issued against `table` so far.
    pub fn select_count(&self, table: &str) -> usize {
        self.lock().selects.get(table).copied().unwrap_or(0)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, table: &str, kind: ChangeKind, rows: &[Row]) {
        for row in rows {
            // No receivers is not an error.
            let _ = self.changes.send(ChangeEvent {
                table: table.to_string(),
                kind,
                row: row.clone(),
            });
        }
    }
}

fn check(inner: &Inner, table: &str) -> Result<(), StoreError> {
    if let Some(message) = inner.failures.get(table) {
        return Err(StoreError::Database(message.clone()));
    }
    if !inner.tables.contains_key(table) {
        return Err(StoreError::MissingTable(table.to_string()));
    }
    Ok(())
}

/// Applies ON DELETE actions for rows removed from `table`, following
/// cascades, and returns the rows touched in child tables.
fn apply_references(inner: &mut Inner, table: &str, removed: Vec<Row>) -> Effects {
    let mut effects = Effects::new();
    let mut pending = vec![(table.to_string(), removed)];
    while let Some((parent, rows)) = pending.pop() {
        let ids: Vec<&Value> = rows.iter().filter_map(|row| row.get("id")).collect();
        if ids.is_empty() {
            continue;
        }
        for &(_, child, column, action) in REFERENCES.iter().filter(|r| r.0 == parent) {
            let Some(child_rows) = inner.tables.get_mut(child) else {
                continue;
            };
            let refers = |row: &Row| row.get(column).is_some_and(|value| ids.contains(&value));
            match action {
                OnDelete::Cascade => {
                    let (gone, kept): (Vec<Row>, Vec<Row>) =
                        child_rows.drain(..).partition(|row| refers(row));
                    *child_rows = kept;
                    if !gone.is_empty() {
                        effects.push((child.to_string(), ChangeKind::Delete, gone.clone()));
                        pending.push((child.to_string(), gone));
                    }
                }
                OnDelete::SetNull => {
                    let mut nulled = Vec::new();
                    for row in child_rows.iter_mut().filter(|row| refers(row)) {
                        row.insert(column.to_string(), Value::Null);
                        nulled.push(row.clone());
                    }
                    if !nulled.is_empty() {
                        effects.push((child.to_string(), ChangeKind::Update, nulled));
                    }
                }
            }
        }
    }
    effects
}

fn matches_all(filters: &[Filter], row: &Row) -> bool {
    filters.iter().all(|filter| filter.matches(row))
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() || columns.iter().any(|c| c == "*") {
        return row.clone();
    }
    columns
        .iter()
        .filter_map(|column| row.get(column).map(|value| (column.clone(), value.clone())))
        .collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let mut inner = self.lock();
        *inner.selects.entry(query.table.clone()).or_insert(0) += 1;
        check(&inner, &query.table)?;

        let mut rows: Vec<Row> = inner.tables[&query.table]
            .iter()
            .filter(|row| matches_all(&query.filters, row))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            for (column, direction) in &query.order {
                let left = a.get(column).unwrap_or(&Value::Null);
                let right = b.get(column).unwrap_or(&Value::Null);
                let ordering = match direction {
                    Direction::Asc => compare_values(left, right),
                    Direction::Desc => compare_values(right, left),
                };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows.iter().map(|row| project(row, &query.columns)).collect())
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        let stored = {
            let mut inner = self.lock();
            check(&inner, table)?;
            let now = Value::String(Utc::now().to_rfc3339());
            let stored: Vec<Row> = rows
                .into_iter()
                .map(|mut row| {
                    if row.get("id").map_or(true, Value::is_null) {
                        row.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
                    }
                    if row.get("created_at").map_or(true, Value::is_null) {
                        row.insert("created_at".into(), now.clone());
                    }
                    row
                })
                .collect();
            if let Some(existing) = inner.tables.get_mut(table) {
                existing.extend(stored.iter().cloned());
            }
            stored
        };
        self.publish(table, ChangeKind::Insert, &stored);
        Ok(stored)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        if filters.is_empty() {
            return Err(StoreError::Rejected("refusing unfiltered update".into()));
        }
        let updated = {
            let mut inner = self.lock();
            check(&inner, table)?;
            let mut updated = Vec::new();
            if let Some(rows) = inner.tables.get_mut(table) {
                for row in rows.iter_mut().filter(|row| matches_all(filters, row)) {
                    for (column, value) in &patch {
                        row.insert(column.clone(), value.clone());
                    }
                    updated.push(row.clone());
                }
            }
            updated
        };
        self.publish(table, ChangeKind::Update, &updated);
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        if filters.is_empty() {
            return Err(StoreError::Rejected("refusing unfiltered delete".into()));
        }
        let (removed, effects) = {
            let mut inner = self.lock();
            check(&inner, table)?;
            let mut removed = Vec::new();
            if let Some(rows) = inner.tables.get_mut(table) {
                let (gone, kept): (Vec<Row>, Vec<Row>) =
                    rows.drain(..).partition(|row| matches_all(filters, row));
                *rows = kept;
                removed = gone;
            }
            let effects = apply_references(&mut inner, table, removed.clone());
            (removed, effects)
        };
        self.publish(table, ChangeKind::Delete, &removed);
        for (child, kind, rows) in &effects {
            self.publish(child, *kind, rows);
        }
        Ok(removed)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
