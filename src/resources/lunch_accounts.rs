//! Lunch balances for a parent's children.
//!
//! The backing table does not exist yet. A missing relation is reported as
//! [`Availability::NotImplemented`] rather than as an error, so callers can
//! tell "not built" apart from "loaded, nothing to show".

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{tables, LunchAccount};
use crate::notify::Notifier;
use crate::resource::{Loader, Resource, StateOf};
use crate::stats;
use crate::store::{decode_rows, Query, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Availability {
    #[default]
    Unknown,
    Available,
    NotImplemented,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LunchLedger {
    pub availability: Availability,
    pub accounts: Vec<LunchAccount>,
}

pub struct LunchLoader {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Loader for LunchLoader {
    type Key = Uuid;
    type Output = LunchLedger;
    const NAME: &'static str = "lunch accounts";

    async fn load(&self, parent_id: &Uuid) -> Result<LunchLedger, StoreError> {
        let result = self
            .store
            .select(&Query::table(tables::LUNCH_ACCOUNTS).eq("parent_id", parent_id))
            .await;

        match result {
            Ok(rows) => Ok(LunchLedger {
                availability: Availability::Available,
                accounts: decode_rows("lunch account", rows)?,
            }),
            Err(err) if err.is_missing_table() => {
                debug!(error = %err, "lunch accounts not available");
                Ok(LunchLedger {
                    availability: Availability::NotImplemented,
                    accounts: Vec::new(),
                })
            }
            Err(err) => Err(err),
        }
    }
}

pub struct LunchAccounts {
    resource: Resource<LunchLoader>,
    low_balance_threshold: f64,
}

impl LunchAccounts {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, low_balance_threshold: f64) -> Self {
        Self {
            resource: Resource::new(LunchLoader { store }, notifier),
            low_balance_threshold,
        }
    }

    pub async fn set_parent(&self, parent_id: Option<Uuid>) {
        self.resource.set_key(parent_id).await;
    }

    pub async fn refetch(&self) -> bool {
        self.resource.refetch().await
    }

    pub fn state(&self) -> StateOf<LunchLoader> {
        self.resource.snapshot()
    }

    pub fn ledger(&self) -> LunchLedger {
        self.resource.data()
    }

    pub fn availability(&self) -> Availability {
        self.ledger().availability
    }

    pub fn total_balance(&self) -> f64 {
        stats::total_balance(&self.ledger().accounts)
    }

    pub fn low_balance_accounts(&self) -> Vec<LunchAccount> {
        stats::low_balance_accounts(&self.ledger().accounts, self.low_balance_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::fixtures;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn missing_table_reads_as_not_implemented() {
        let (store, notifier) = fixtures::wiring();
        let lunch = LunchAccounts::new(store.clone(), notifier.clone(), 5.0);
        assert_eq!(lunch.availability(), Availability::Unknown);

        lunch.set_parent(Some(Uuid::new_v4())).await;
        assert_eq!(lunch.availability(), Availability::NotImplemented);
        assert!(lunch.state().error.is_none());
        assert!(notifier.notices().is_empty());
        assert_eq!(lunch.total_balance(), 0.0);
    }

    #[tokio::test]
    async fn balances_when_table_exists() {
        let store = Arc::new(MemoryStore::with_tables(&[tables::LUNCH_ACCOUNTS]));
        let parent_id = Uuid::new_v4();
        for balance in [25.50, 3.25] {
            fixtures::put(
                &store,
                tables::LUNCH_ACCOUNTS,
                json!({
                    "student_id": Uuid::new_v4(),
                    "parent_id": parent_id,
                    "balance": balance,
                    "updated_at": null,
                }),
            )
            .await;
        }

        let (_, notifier) = fixtures::wiring();
        let lunch = LunchAccounts::new(store.clone(), notifier, 5.0);
        lunch.set_parent(Some(parent_id)).await;

        assert_eq!(lunch.availability(), Availability::Available);
        assert!((lunch.total_balance() - 28.75).abs() < 1e-9);
        let low = lunch.low_balance_accounts();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].balance, 3.25);
    }

    #[tokio::test]
    async fn other_failures_still_surface() {
        let store = Arc::new(MemoryStore::with_tables(&[tables::LUNCH_ACCOUNTS]));
        store.fail_table(tables::LUNCH_ACCOUNTS, "timeout");
        let (_, notifier) = fixtures::wiring();
        let lunch = LunchAccounts::new(store.clone(), notifier, 5.0);
        lunch.set_parent(Some(Uuid::new_v4())).await;
        assert_eq!(lunch.state().error.as_deref(), Some("database error: timeout"));
    }
}
