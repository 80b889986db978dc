//! Messages addressed to a parent, kept current by a live insert feed.
//!
//! Every insert for the parent triggers a full reload rather than a merge, so
//! the unread count is always derived from the last fetched collection.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{follow_session, required, user_with_role};
use crate::error::StoreError;
use crate::models::{tables, Communication, UserRole};
use crate::notify::{Notice, Notifier};
use crate::resource::{Loader, MutationOutcome, Resource, StateOf};
use crate::session::SessionContext;
use crate::stats;
use crate::store::{
    decode_row, decode_rows, insert_one, ChangeKind, Direction, Filter, Query, Row, Store,
    Subscription, SubscriptionEvent,
};
use crate::task::ScopedTask;

pub struct MessageLoader {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Loader for MessageLoader {
    type Key = Uuid;
    type Output = Vec<Communication>;
    const NAME: &'static str = "messages";

    async fn load(&self, parent_id: &Uuid) -> Result<Vec<Communication>, StoreError> {
        let rows = self
            .store
            .select(
                &Query::table(tables::COMMUNICATIONS)
                    .eq("parent_id", parent_id)
                    .is_null("archived_at")
                    .order_by("created_at", Direction::Desc),
            )
            .await?;
        decode_rows("message", rows)
    }
}

pub struct Communications {
    resource: Arc<Resource<MessageLoader>>,
    live: Mutex<Option<ScopedTask>>,
}

impl Communications {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            resource: Arc::new(Resource::new(MessageLoader { store }, notifier)),
            live: Mutex::new(None),
        }
    }

    fn store(&self) -> &dyn Store {
        self.resource.loader().store.as_ref()
    }

    /// Selects the recipient. The live feed for the previous recipient stops
    /// before the new one starts.
    pub async fn set_parent(&self, parent_id: Option<Uuid>) {
        if self.resource.key() != parent_id {
            let feed = parent_id.map(|id| self.watch_inserts(id));
            if let Ok(mut live) = self.live.lock() {
                *live = feed;
            }
        }
        self.resource.set_key(parent_id).await;
    }

    pub fn follow_session(self: &Arc<Self>, context: &SessionContext) -> ScopedTask {
        follow_session(self, context, |this, session| async move {
            this.set_parent(user_with_role(session, UserRole::Parent))
                .await;
        })
    }

    fn watch_inserts(&self, parent_id: Uuid) -> ScopedTask {
        let mut feed = Subscription::new(self.store(), tables::COMMUNICATIONS)
            .on(ChangeKind::Insert)
            .filter(Filter::eq("parent_id", parent_id));
        let resource = Arc::clone(&self.resource);

        ScopedTask::spawn(async move {
            while let Some(event) = feed.next().await {
                match event {
                    SubscriptionEvent::Change(change) => {
                        debug!(%parent_id, "new message");
                        resource.refetch().await;
                        if !sent_by(&change.row, parent_id) {
                            let subject = change
                                .row
                                .get("subject")
                                .and_then(Value::as_str)
                                .unwrap_or("(no subject)");
                            resource
                                .notifier()
                                .notify(Notice::info("New message", subject));
                        }
                    }
                    SubscriptionEvent::Lagged(skipped) => {
                        warn!(%parent_id, skipped, "message feed lagged, reloading");
                        resource.refetch().await;
                    }
                }
            }
        })
    }

    pub fn has_live_feed(&self) -> bool {
        self.live
            .lock()
            .map(|live| live.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    pub async fn refetch(&self) -> bool {
        self.resource.refetch().await
    }

    pub fn state(&self) -> StateOf<MessageLoader> {
        self.resource.snapshot()
    }

    pub fn messages(&self) -> Vec<Communication> {
        self.resource.data()
    }

    pub fn unread_count(&self) -> usize {
        stats::unread_count(&self.messages())
    }

    /// Marks one message read. Marking an already read message again is a no-op.
    pub async fn mark_as_read(&self, id: Uuid) -> MutationOutcome<usize> {
        let parent_id = self.resource.require_key();
        self.resource
            .mutate("mark message as read", None, async {
                let parent_id = parent_id?;
                let owned = [Filter::eq("id", id), Filter::eq("parent_id", parent_id)];
                let mut unread = owned.to_vec();
                unread.push(Filter::is_null("read_at"));

                let updated = self
                    .store()
                    .update(tables::COMMUNICATIONS, &unread, read_now())
                    .await?;
                if updated.is_empty() {
                    let exists = self
                        .store()
                        .select(
                            &Query::table(tables::COMMUNICATIONS)
                                .eq("id", id)
                                .eq("parent_id", parent_id)
                                .limit(1),
                        )
                        .await?;
                    if exists.is_empty() {
                        return Err(StoreError::not_found("message", id));
                    }
                }
                Ok(updated.len())
            })
            .await
    }

    pub async fn mark_all_as_read(&self) -> MutationOutcome<usize> {
        let parent_id = self.resource.require_key();
        self.resource
            .mutate("mark all messages as read", Some("All messages marked as read"), async {
                let parent_id = parent_id?;
                let updated = self
                    .store()
                    .update(
                        tables::COMMUNICATIONS,
                        &[Filter::eq("parent_id", parent_id), Filter::is_null("read_at")],
                        read_now(),
                    )
                    .await?;
                Ok(updated.len())
            })
            .await
    }

    /// Answers a message. The reply is threaded to the original and starts out
    /// read, since its author is the parent.
    pub async fn reply(&self, id: Uuid, message: &str) -> MutationOutcome<Communication> {
        let parent_id = self.resource.require_key();
        self.resource
            .mutate("send reply", Some("Reply sent"), async {
                let parent_id = parent_id?;
                required("message", message)?;
                let original = self
                    .store()
                    .select(
                        &Query::table(tables::COMMUNICATIONS)
                            .eq("id", id)
                            .eq("parent_id", parent_id)
                            .limit(1),
                    )
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| StoreError::not_found("message", id))?;
                let original: Communication = decode_row("message", original)?;

                let subject = if original.subject.starts_with("Re: ") {
                    original.subject.clone()
                } else {
                    format!("Re: {}", original.subject)
                };
                let row = json!({
                    "parent_id": parent_id,
                    "sender_id": parent_id,
                    "student_id": original.student_id,
                    "subject": subject,
                    "message": message,
                    "priority": original.priority,
                    "category": original.category,
                    "related_to": original.id,
                    "read_at": Utc::now(),
                });
                let stored = insert_one(
                    self.store(),
                    tables::COMMUNICATIONS,
                    row.as_object().cloned().unwrap_or_default(),
                )
                .await?;
                decode_row("message", stored)
            })
            .await
    }

    pub async fn archive(&self, id: Uuid) -> MutationOutcome<()> {
        let parent_id = self.resource.require_key();
        self.resource
            .mutate("archive message", Some("Message archived"), async {
                let parent_id = parent_id?;
                let mut patch = Row::new();
                patch.insert("archived_at".into(), json!(Utc::now()));
                let updated = self
                    .store()
                    .update(
                        tables::COMMUNICATIONS,
                        &[Filter::eq("id", id), Filter::eq("parent_id", parent_id)],
                        patch,
                    )
                    .await?;
                if updated.is_empty() {
                    return Err(StoreError::not_found("message", id));
                }
                Ok(())
            })
            .await
    }
}

fn read_now() -> Row {
    let mut patch = Row::new();
    patch.insert("read_at".into(), json!(Utc::now()));
    patch
}

fn sent_by(row: &Row, user_id: Uuid) -> bool {
    row.get("sender_id")
        .and_then(Value::as_str)
        .and_then(|id| id.parse::<Uuid>().ok())
        == Some(user_id)
}
