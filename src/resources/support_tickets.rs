//! Support tickets, seen either by the user who raised them or by school staff.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{follow_session, required};
use crate::error::StoreError;
use crate::models::{tables, NewTicket, SupportTicket, TicketStatus, UserRole};
use crate::notify::Notifier;
use crate::resource::{Loader, MutationOutcome, Resource, StateOf};
use crate::session::SessionContext;
use crate::stats::{self, TicketStats};
use crate::store::{decode_row, decode_rows, encode_row, insert_one, Direction, Filter, Query, Row, Store};
use crate::task::ScopedTask;

/// Whose tickets are listed. Both variants carry the acting user, who is
/// recorded as the reporter of new tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketScope {
    /// Tickets raised by this user.
    User { user_id: Uuid, school_id: Uuid },
    /// Every ticket for the school.
    School { user_id: Uuid, school_id: Uuid },
}

impl TicketScope {
    pub fn user_id(&self) -> Uuid {
        match *self {
            TicketScope::User { user_id, .. } | TicketScope::School { user_id, .. } => user_id,
        }
    }

    pub fn school_id(&self) -> Uuid {
        match *self {
            TicketScope::User { school_id, .. } | TicketScope::School { school_id, .. } => school_id,
        }
    }

    fn filter(&self) -> Filter {
        match *self {
            TicketScope::User { user_id, .. } => Filter::eq("user_id", user_id),
            TicketScope::School { school_id, .. } => Filter::eq("school_id", school_id),
        }
    }
}

pub struct TicketLoader {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Loader for TicketLoader {
    type Key = TicketScope;
    type Output = Vec<SupportTicket>;
    const NAME: &'static str = "support tickets";

    async fn load(&self, scope: &TicketScope) -> Result<Vec<SupportTicket>, StoreError> {
        let rows = self
            .store
            .select(
                &Query::table(tables::SUPPORT_TICKETS)
                    .filter(scope.filter())
                    .order_by("created_at", Direction::Desc),
            )
            .await?;
        decode_rows("support ticket", rows)
    }
}

pub struct SupportTickets {
    resource: Resource<TicketLoader>,
}

impl SupportTickets {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            resource: Resource::new(TicketLoader { store }, notifier),
        }
    }

    fn store(&self) -> &dyn Store {
        self.resource.loader().store.as_ref()
    }

    pub async fn set_scope(&self, scope: Option<TicketScope>) {
        self.resource.set_key(scope).await;
    }

    /// Administrators see the whole school; everyone else sees their own tickets.
    pub fn follow_session(self: &Arc<Self>, context: &SessionContext) -> ScopedTask {
        follow_session(self, context, |this, session| async move {
            let scope = session.and_then(|s| {
                let school_id = s.school_id()?;
                Some(match s.role() {
                    UserRole::SchoolAdmin => TicketScope::School {
                        user_id: s.user_id,
                        school_id,
                    },
                    _ => TicketScope::User {
                        user_id: s.user_id,
                        school_id,
                    },
                })
            });
            this.set_scope(scope).await;
        })
    }

    pub async fn refetch(&self) -> bool {
        self.resource.refetch().await
    }

    pub fn state(&self) -> StateOf<TicketLoader> {
        self.resource.snapshot()
    }

    pub fn tickets(&self) -> Vec<SupportTicket> {
        self.resource.data()
    }

    pub fn stats(&self) -> TicketStats {
        stats::ticket_stats(&self.tickets())
    }

    pub async fn create_ticket(&self, input: NewTicket) -> MutationOutcome<SupportTicket> {
        let scope = self.resource.require_key();
        self.resource
            .mutate("open ticket", Some("Ticket submitted"), async {
                let scope = scope?;
                required("title", &input.title)?;
                required("description", &input.description)?;
                let mut row = encode_row("support ticket", &input)?;
                row.insert("user_id".into(), json!(scope.user_id()));
                row.insert("school_id".into(), json!(scope.school_id()));
                row.insert("status".into(), json!(TicketStatus::Open));
                let stored = insert_one(self.store(), tables::SUPPORT_TICKETS, row).await?;
                decode_row("support ticket", stored)
            })
            .await
    }

    /// Moves a ticket to `status`. Settling stamps `resolved_at`; reopening clears it.
    pub async fn update_status(&self, id: Uuid, status: TicketStatus) -> MutationOutcome<SupportTicket> {
        let scope = self.resource.require_key();
        self.resource
            .mutate("update ticket", Some("Ticket updated"), async {
                let scope = scope?;
                let mut patch = Row::new();
                patch.insert("status".into(), json!(status));
                let resolved_at = if status.is_settled() {
                    json!(Utc::now())
                } else {
                    Value::Null
                };
                patch.insert("resolved_at".into(), resolved_at);

                let row = self
                    .store()
                    .update(
                        tables::SUPPORT_TICKETS,
                        &[Filter::eq("id", id), scope.filter()],
                        patch,
                    )
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| StoreError::not_found("support ticket", id))?;
                decode_row("support ticket", row)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use crate::resources::fixtures;

    fn ticket(title: &str) -> NewTicket {
        NewTicket {
            title: title.to_string(),
            description: "The calendar page will not load".to_string(),
            category: "technical".to_string(),
            priority: Priority::High,
        }
    }

    #[tokio::test]
    async fn create_ticket_stamps_reporter_and_school() {
        let (store, notifier) = fixtures::wiring();
        let scope = TicketScope::User {
            user_id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
        };
        let desk = SupportTickets::new(store.clone(), notifier);
        desk.set_scope(Some(scope)).await;

        let created = desk.create_ticket(ticket("Login loop")).await.data.unwrap();
        assert_eq!(created.user_id, scope.user_id());
        assert_eq!(created.school_id, scope.school_id());
        assert_eq!(created.status, TicketStatus::Open);
        assert!(created.resolved_at.is_none());
        assert_eq!(desk.stats().open, 1);

        assert!(!desk.create_ticket(ticket("  ")).await.success);
    }

    #[tokio::test]
    async fn resolving_and_reopening_toggle_resolved_at() {
        let (store, notifier) = fixtures::wiring();
        let desk = SupportTickets::new(store.clone(), notifier);
        desk.set_scope(Some(TicketScope::User {
            user_id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
        }))
        .await;
        let id = desk.create_ticket(ticket("Printer")).await.data.unwrap().id;

        let resolved = desk.update_status(id, TicketStatus::Resolved).await.data.unwrap();
        assert!(resolved.resolved_at.is_some());
        assert_eq!(desk.stats().resolved, 1);

        let reopened = desk.update_status(id, TicketStatus::InProgress).await.data.unwrap();
        assert!(reopened.resolved_at.is_none());
        assert_eq!(desk.stats().in_progress, 1);
    }

    #[tokio::test]
    async fn school_scope_sees_every_reporter() {
        let (store, notifier) = fixtures::wiring();
        let school_id = Uuid::new_v4();
        for _ in 0..2 {
            let desk = SupportTickets::new(store.clone(), notifier.clone());
            desk.set_scope(Some(TicketScope::User {
                user_id: Uuid::new_v4(),
                school_id,
            }))
            .await;
            desk.create_ticket(ticket("Broken link")).await;
        }

        let admin = SupportTickets::new(store.clone(), notifier);
        admin
            .set_scope(Some(TicketScope::School {
                user_id: Uuid::new_v4(),
                school_id,
            }))
            .await;
        assert_eq!(admin.tickets().len(), 2);

        let id = admin.tickets()[0].id;
        assert!(admin.update_status(id, TicketStatus::Closed).await.success);
        assert_eq!(admin.stats().closed, 1);
    }

    #[tokio::test]
    async fn users_cannot_touch_other_tickets() {
        let (store, notifier) = fixtures::wiring();
        let school_id = Uuid::new_v4();
        let owner = SupportTickets::new(store.clone(), notifier.clone());
        owner
            .set_scope(Some(TicketScope::User {
                user_id: Uuid::new_v4(),
                school_id,
            }))
            .await;
        let id = owner.create_ticket(ticket("Grades missing")).await.data.unwrap().id;

        let other = SupportTickets::new(store.clone(), notifier);
        other
            .set_scope(Some(TicketScope::User {
                user_id: Uuid::new_v4(),
                school_id,
            }))
            .await;
        assert!(other.tickets().is_empty());
        assert!(!other.update_status(id, TicketStatus::Closed).await.success);
    }

    #[tokio::test]
    async fn follows_session_into_user_or_school_scope() {
        let (store, notifier) = fixtures::wiring();
        let tickets = Arc::new(SupportTickets::new(store.clone(), notifier));
        let context = SessionContext::new();
        let _follower = tickets.follow_session(&context);
        let school_id = Uuid::new_v4();

        let admin = fixtures::session(UserRole::SchoolAdmin, Some(school_id));
        context.sign_in(admin.clone());
        let school_scope = TicketScope::School {
            user_id: admin.user_id,
            school_id,
        };
        fixtures::settles(Some(school_scope), || tickets.state().key).await;

        let parent = fixtures::session(UserRole::Parent, Some(school_id));
        context.sign_in(parent.clone());
        let user_scope = TicketScope::User {
            user_id: parent.user_id,
            school_id,
        };
        fixtures::settles(Some(user_scope), || tickets.state().key).await;

        context.sign_in(fixtures::session(UserRole::Teacher, None));
        fixtures::settles(None, || tickets.state().key).await;

        context.sign_in(admin);
        fixtures::settles(Some(school_scope), || tickets.state().key).await;
        context.sign_out();
        fixtures::settles(None, || tickets.state().key).await;
    }
}
