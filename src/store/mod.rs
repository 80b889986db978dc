//! Row-oriented access to the portal's relational store.
//!
//! Resources talk to the store through the [`Store`] trait: filtered selects,
//! inserts, patches and deletes over JSON rows, plus a broadcast feed of row
//! changes used for live updates. [`postgres::PgStore`] is the production
//! backend; [`memory::MemoryStore`] keeps tables in process.

pub mod memory;
pub mod postgres;
mod query;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::StoreError;

pub use query::{compare_values, decode_row, decode_rows, encode_row, Direction, Filter, Query, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(rename = "op")]
    pub kind: ChangeKind,
    pub row: Row,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Inserts rows and returns them as stored, including server-assigned columns.
    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StoreError>;

    async fn update(&self, table: &str, filters: &[Filter], patch: Row)
        -> Result<Vec<Row>, StoreError>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError>;

    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Insert a single row and return the stored version.
pub async fn insert_one(store: &dyn Store, table: &str, row: Row) -> Result<Row, StoreError> {
    store
        .insert(table, vec![row])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::Rejected(format!("insert into {table} returned no row")))
}

/// A live feed of changes to one table, narrowed by operation and column predicate.
pub struct Subscription {
    receiver: broadcast::Receiver<ChangeEvent>,
    table: String,
    kinds: Vec<ChangeKind>,
    filter: Option<Filter>,
}

#[derive(Debug)]
pub enum SubscriptionEvent {
    Change(ChangeEvent),
    /// The feed overflowed and changes were dropped; state must be reloaded.
    Lagged(u64),
}

impl Subscription {
    pub fn new(store: &dyn Store, table: &str) -> Self {
        Self {
            receiver: store.changes(),
            table: table.to_string(),
            kinds: Vec::new(),
            filter: None,
        }
    }

    pub fn on(mut self, kind: ChangeKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    fn accepts(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && (self.kinds.is_empty() || self.kinds.contains(&event.kind))
            && self.filter.as_ref().map_or(true, |f| f.matches(&event.row))
    }

    /// Waits for the next matching change. Returns `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(SubscriptionEvent::Change(event)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Some(SubscriptionEvent::Lagged(skipped))
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
