//! Events a teacher organises, with their attendee lists.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use super::{attendees_for, follow_session, required};
use crate::error::StoreError;
use crate::models::{
    tables, Event, EventAttendee, EventPatch, EventStatus, NewEvent, UserRole,
};
use crate::notify::Notifier;
use crate::resource::{Loader, MutationOutcome, Resource, StateOf};
use crate::session::SessionContext;
use crate::stats::{self, EventStats};
use crate::store::{decode_row, decode_rows, encode_row, insert_one, Direction, Filter, Query, Row, Store};
use crate::task::ScopedTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Organizer {
    pub user_id: Uuid,
    pub school_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrganizedEvent {
    pub event: Event,
    pub attendees: Vec<EventAttendee>,
    pub attendee_count: usize,
}

pub struct OrganizedEventLoader {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Loader for OrganizedEventLoader {
    type Key = Organizer;
    type Output = Vec<OrganizedEvent>;
    const NAME: &'static str = "teacher events";

    async fn load(&self, organizer: &Organizer) -> Result<Vec<OrganizedEvent>, StoreError> {
        let rows = self
            .store
            .select(
                &Query::table(tables::EVENTS)
                    .eq("created_by", organizer.user_id)
                    .order_by("start_time", Direction::Asc),
            )
            .await?;
        let events: Vec<Event> = decode_rows("event", rows)?;
        let ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let attendees = attendees_for(self.store.as_ref(), &ids).await?;

        Ok(events
            .into_iter()
            .map(|event| {
                let attendees: Vec<EventAttendee> = attendees
                    .iter()
                    .filter(|a| a.event_id == event.id)
                    .cloned()
                    .collect();
                OrganizedEvent {
                    attendee_count: stats::attendee_count(&event, &attendees),
                    attendees,
                    event,
                }
            })
            .collect())
    }
}

pub struct TeacherEvents {
    resource: Resource<OrganizedEventLoader>,
}

impl TeacherEvents {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            resource: Resource::new(OrganizedEventLoader { store }, notifier),
        }
    }

    fn store(&self) -> &dyn Store {
        self.resource.loader().store.as_ref()
    }

    pub async fn set_organizer(&self, organizer: Option<Organizer>) {
        self.resource.set_key(organizer).await;
    }

    pub fn follow_session(self: &Arc<Self>, context: &SessionContext) -> ScopedTask {
        follow_session(self, context, |this, session| async move {
            let organizer = session
                .filter(|s| s.role() == UserRole::Teacher)
                .and_then(|s| {
                    s.school_id().map(|school_id| Organizer {
                        user_id: s.user_id,
                        school_id,
                    })
                });
            this.set_organizer(organizer).await;
        })
    }

    pub async fn refetch(&self) -> bool {
        self.resource.refetch().await
    }

    pub fn state(&self) -> StateOf<OrganizedEventLoader> {
        self.resource.snapshot()
    }

    pub fn events(&self) -> Vec<OrganizedEvent> {
        self.resource.data()
    }

    pub fn stats(&self) -> EventStats {
        let organized = self.events();
        let events: Vec<Event> = organized.iter().map(|o| o.event.clone()).collect();
        let attendees: Vec<EventAttendee> = organized
            .into_iter()
            .flat_map(|o| o.attendees)
            .collect();
        stats::event_stats(&events, &attendees)
    }

    pub async fn create_event(&self, input: NewEvent) -> MutationOutcome<Event> {
        let organizer = self.resource.require_key();
        self.resource
            .mutate("create event", Some("Event created"), async {
                let organizer = organizer?;
                required("title", &input.title)?;
                if input.cost < 0.0 {
                    return Err(StoreError::Rejected("cost cannot be negative".into()));
                }
                let mut row = encode_row("event", &input)?;
                row.insert("school_id".into(), json!(organizer.school_id));
                row.insert("created_by".into(), json!(organizer.user_id));
                row.insert("status".into(), json!(EventStatus::Upcoming));
                let stored = insert_one(self.store(), tables::EVENTS, row).await?;
                decode_row("event", stored)
            })
            .await
    }

    pub async fn update_event(&self, id: Uuid, patch: EventPatch) -> MutationOutcome<Event> {
        let organizer = self.resource.require_key();
        self.resource
            .mutate("update event", Some("Event updated"), async {
                let organizer = organizer?;
                let patch = encode_row("event", &patch)?;
                if patch.is_empty() {
                    return Err(StoreError::Rejected("nothing to update".into()));
                }
                self.write_own(organizer, id, patch).await
            })
            .await
    }

    pub async fn cancel_event(&self, id: Uuid) -> MutationOutcome<Event> {
        let organizer = self.resource.require_key();
        self.resource
            .mutate("cancel event", Some("Event cancelled"), async {
                let organizer = organizer?;
                let mut patch = Row::new();
                patch.insert("status".into(), json!(EventStatus::Cancelled));
                self.write_own(organizer, id, patch).await
            })
            .await
    }

    /// Removes the event; the schema cascades to its attendee rows.
    pub async fn delete_event(&self, id: Uuid) -> MutationOutcome<()> {
        let organizer = self.resource.require_key();
        self.resource
            .mutate("delete event", Some("Event deleted"), async {
                let organizer = organizer?;
                let removed = self
                    .store()
                    .delete(
                        tables::EVENTS,
                        &[Filter::eq("id", id), Filter::eq("created_by", organizer.user_id)],
                    )
                    .await?;
                if removed.is_empty() {
                    return Err(StoreError::not_found("event", id));
                }
                Ok(())
            })
            .await
    }

    async fn write_own(&self, organizer: Organizer, id: Uuid, patch: Row) -> Result<Event, StoreError> {
        let row = self
            .store()
            .update(
                tables::EVENTS,
                &[Filter::eq("id", id), Filter::eq("created_by", organizer.user_id)],
                patch,
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("event", id))?;
        decode_row("event", row)
    }
}
