//! Postgres backend.
//!
//! Queries are assembled per call. Filter and patch values travel as JSONB and
//! are cast to the column's declared type with `jsonb_populate_record`, so the
//! same code path serves every table. Rows come back through `row_to_json`.
//! Live changes arrive on a `LISTEN` channel fed by the triggers in
//! `migrations/`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::types::Json;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{ChangeEvent, Direction, Filter, Query, Row, Store};
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::task::ScopedTask;

const CHANGE_BUFFER: usize = 1024;

pub struct PgStore {
    pool: PgPool,
    schema: String,
    changes: broadcast::Sender<ChangeEvent>,
    _listener: Option<ScopedTask>,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: &str) -> Result<Self, StoreError> {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Ok(Self {
            pool,
            schema: ident(schema)?.to_string(),
            changes,
            _listener: None,
        })
    }

    /// Opens a pool for `url` and starts listening on the configured change channel.
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;
        Self::new(pool, &config.schema)?
            .listen(&config.change_channel)
            .await
    }

    /// Starts forwarding notifications from `channel` into the change feed.
    pub async fn listen(mut self, channel: &str) -> Result<Self, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(channel).await?;
        let sender = self.changes.clone();
        let channel = channel.to_string();

        self._listener = Some(ScopedTask::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        forward(&sender, &channel, notification.payload());
                    }
                    Err(err) => {
                        warn!(%channel, error = %err, "change listener interrupted");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }));

        Ok(self)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn qualified(&self, table: &str) -> Result<String, StoreError> {
        Ok(format!("{}.{}", self.schema, ident(table)?))
    }
}

/// Publishes one notification payload on the change feed. Returns false when
/// the payload is not a change event.
fn forward(sender: &broadcast::Sender<ChangeEvent>, channel: &str, payload: &str) -> bool {
    match serde_json::from_str::<ChangeEvent>(payload) {
        Ok(event) => {
            debug!(table = %event.table, op = ?event.kind, "row change");
            let _ = sender.send(event);
            true
        }
        Err(err) => {
            warn!(%channel, error = %err, "unreadable change payload");
            false
        }
    }
}

fn ident(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Accumulates a WHERE clause and its JSONB parameters.
struct Clause<'a> {
    table: &'a str,
    sql: String,
    params: Vec<Value>,
    offset: usize,
}

impl<'a> Clause<'a> {
    fn new(table: &'a str, offset: usize) -> Self {
        Self {
            table,
            sql: String::new(),
            params: Vec::new(),
            offset,
        }
    }

    fn placeholder(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.offset + self.params.len())
    }

    fn cast(&mut self, column: &str, value: &Value) -> String {
        let param = self.placeholder(json!({ column: value }));
        format!("(jsonb_populate_record(NULL::{}, {param})).{column}", self.table)
    }

    fn push(&mut self, filters: &[Filter]) -> Result<(), StoreError> {
        for (index, filter) in filters.iter().enumerate() {
            let column = ident(filter.column())?;
            self.sql.push_str(if index == 0 { " WHERE " } else { " AND " });
            let condition = match filter {
                Filter::Eq(_, value) => format!("r.{column} = {}", self.cast(column, value)),
                Filter::Gte(_, value) => format!("r.{column} >= {}", self.cast(column, value)),
                Filter::Lte(_, value) => format!("r.{column} <= {}", self.cast(column, value)),
                Filter::In(_, values) => {
                    let elements: Vec<Value> =
                        values.iter().map(|value| json!({ column: value })).collect();
                    let param = self.placeholder(Value::Array(elements));
                    format!(
                        "r.{column} IN (SELECT (jsonb_populate_record(NULL::{}, e)).{column} \
                         FROM jsonb_array_elements({param}) e)",
                        self.table
                    )
                }
                Filter::IsNull(_) => format!("r.{column} IS NULL"),
            };
            self.sql.push_str(&condition);
        }
        Ok(())
    }
}

fn require_filters(action: &str, filters: &[Filter]) -> Result<(), StoreError> {
    if filters.is_empty() {
        return Err(StoreError::Rejected(format!("refusing unfiltered {action}")));
    }
    Ok(())
}

async fn fetch_rows(
    pool: &PgPool,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<Row>, StoreError> {
    let mut query = sqlx::query_scalar::<_, Json<Value>>(sql);
    for param in params {
        query = query.bind(Json(param));
    }
    let values = query.fetch_all(pool).await?;
    values
        .into_iter()
        .map(|Json(value)| match value {
            Value::Object(row) => Ok(row),
            other => Err(StoreError::Decode {
                entity: "row",
                message: format!("expected an object, got {other}"),
            }),
        })
        .collect()
}

#[async_trait]
impl Store for PgStore {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let table = self.qualified(&query.table)?;
        let columns = if query.columns.is_empty() {
            "r.*".to_string()
        } else {
            query
                .columns
                .iter()
                .map(|c| ident(c).map(|c| format!("r.{c}")))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        };

        let mut clause = Clause::new(&table, 0);
        clause.push(&query.filters)?;

        let mut sql = format!(
            "SELECT row_to_json(t) FROM (SELECT {columns} FROM {table} AS r{}",
            clause.sql
        );
        for (index, (column, direction)) in query.order.iter().enumerate() {
            sql.push_str(if index == 0 { " ORDER BY " } else { ", " });
            sql.push_str(&format!("r.{}", ident(column)?));
            sql.push_str(match direction {
                Direction::Asc => " ASC",
                Direction::Desc => " DESC",
            });
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql.push_str(") t");

        fetch_rows(&self.pool, &sql, clause.params).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        let qualified = self.qualified(table)?;
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(rows.len());

        for row in rows {
            let columns = row
                .keys()
                .map(|c| ident(c).map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ");
            let sql = format!(
                "INSERT INTO {qualified} AS r ({columns}) \
                 SELECT {columns} FROM jsonb_populate_record(NULL::{qualified}, $1) \
                 RETURNING row_to_json(r.*)"
            );
            let Json(value) = sqlx::query_scalar::<_, Json<Value>>(&sql)
                .bind(Json(Value::Object(row)))
                .fetch_one(&mut *tx)
                .await?;
            if let Value::Object(row) = value {
                stored.push(row);
            }
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        require_filters("update", filters)?;
        let qualified = self.qualified(table)?;
        let assignments = patch
            .keys()
            .map(|c| ident(c).map(|c| format!("{c} = p.{c}")))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let mut clause = Clause::new(&qualified, 1);
        clause.push(filters)?;
        let sql = format!(
            "UPDATE {qualified} AS r SET {assignments} \
             FROM jsonb_populate_record(NULL::{qualified}, $1) AS p{} \
             RETURNING row_to_json(r.*)",
            clause.sql
        );

        let mut params = vec![Value::Object(patch)];
        params.extend(clause.params);
        fetch_rows(&self.pool, &sql, params).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        require_filters("delete", filters)?;
        let qualified = self.qualified(table)?;
        let mut clause = Clause::new(&qualified, 0);
        clause.push(filters)?;
        let sql = format!(
            "DELETE FROM {qualified} AS r{} RETURNING row_to_json(r.*)",
            clause.sql
        );
        fetch_rows(&self.pool, &sql, clause.params).await
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
