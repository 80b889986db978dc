//! The school calendar as a parent sees it, with their own RSVPs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::{attendees_for, follow_session};
use crate::error::StoreError;
use crate::models::{tables, AttendeeRole, Event, EventAttendee, EventStatus, RsvpStatus};
use crate::notify::Notifier;
use crate::resource::{Loader, MutationOutcome, Resource, StateOf};
use crate::session::SessionContext;
use crate::stats;
use crate::store::{decode_row, decode_rows, insert_one, Direction, Filter, Query, Row, Store};
use crate::task::ScopedTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub school_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventListing {
    pub event: Event,
    /// Every attendee row for the event, whatever its status.
    pub attendee_count: usize,
    pub attending: usize,
    pub my_rsvp: Option<EventAttendee>,
}

#[derive(Debug, Clone)]
pub struct RsvpRequest {
    pub status: RsvpStatus,
    pub role: AttendeeRole,
    pub notes: Option<String>,
}

pub struct EventLoader {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Loader for EventLoader {
    type Key = Viewer;
    type Output = Vec<EventListing>;
    const NAME: &'static str = "school events";

    async fn load(&self, viewer: &Viewer) -> Result<Vec<EventListing>, StoreError> {
        let rows = self
            .store
            .select(
                &Query::table(tables::EVENTS)
                    .eq("school_id", viewer.school_id)
                    .eq("status", EventStatus::Upcoming)
                    .filter(Filter::gte("start_time", Utc::now()))
                    .order_by("start_time", Direction::Asc),
            )
            .await?;
        let events: Vec<Event> = decode_rows("event", rows)?;
        let ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let attendees = attendees_for(self.store.as_ref(), &ids).await?;

        Ok(events
            .into_iter()
            .map(|event| {
                let rows: Vec<EventAttendee> = attendees
                    .iter()
                    .filter(|a| a.event_id == event.id)
                    .cloned()
                    .collect();
                EventListing {
                    attendee_count: stats::attendee_count(&event, &rows),
                    attending: rows
                        .iter()
                        .filter(|a| a.status == RsvpStatus::Attending)
                        .count(),
                    my_rsvp: rows.into_iter().find(|a| a.user_id == viewer.user_id),
                    event,
                }
            })
            .collect())
    }
}

pub struct SchoolEvents {
    resource: Resource<EventLoader>,
}

impl SchoolEvents {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            resource: Resource::new(EventLoader { store }, notifier),
        }
    }

    fn store(&self) -> &dyn Store {
        self.resource.loader().store.as_ref()
    }

    pub async fn set_viewer(&self, viewer: Option<Viewer>) {
        self.resource.set_key(viewer).await;
    }

    /// Any signed-in user with a school sees that school's calendar.
    pub fn follow_session(self: &Arc<Self>, context: &SessionContext) -> ScopedTask {
        follow_session(self, context, |this, session| async move {
            let viewer = session.and_then(|s| {
                s.school_id().map(|school_id| Viewer {
                    school_id,
                    user_id: s.user_id,
                })
            });
            this.set_viewer(viewer).await;
        })
    }

    pub async fn refetch(&self) -> bool {
        self.resource.refetch().await
    }

    pub fn state(&self) -> StateOf<EventLoader> {
        self.resource.snapshot()
    }

    pub fn events(&self) -> Vec<EventListing> {
        self.resource.data()
    }

    /// Records or changes the viewer's response to an event.
    pub async fn rsvp(&self, event_id: Uuid, request: RsvpRequest) -> MutationOutcome<EventAttendee> {
        let viewer = self.resource.require_key();
        self.resource
            .mutate("save RSVP", Some("RSVP saved"), async {
                let viewer = viewer?;
                let event = self.open_event(viewer, event_id).await?;

                let mut fields = Row::new();
                fields.insert("status".into(), json!(request.status));
                fields.insert("role".into(), json!(request.role));
                fields.insert("notes".into(), json!(request.notes));

                let mine = [
                    Filter::eq("event_id", event.id),
                    Filter::eq("user_id", viewer.user_id),
                ];
                let updated = self
                    .store()
                    .update(tables::EVENT_ATTENDEES, &mine, fields.clone())
                    .await?;
                let row = match updated.into_iter().next() {
                    Some(row) => row,
                    None => {
                        fields.insert("event_id".into(), json!(event.id));
                        fields.insert("user_id".into(), json!(viewer.user_id));
                        insert_one(self.store(), tables::EVENT_ATTENDEES, fields).await?
                    }
                };
                decode_row("event attendee", row)
            })
            .await
    }

    pub async fn volunteer(&self, event_id: Uuid, notes: Option<String>) -> MutationOutcome<EventAttendee> {
        self.rsvp(
            event_id,
            RsvpRequest {
                status: RsvpStatus::Attending,
                role: AttendeeRole::Volunteer,
                notes,
            },
        )
        .await
    }

    pub async fn cancel_rsvp(&self, event_id: Uuid) -> MutationOutcome<EventAttendee> {
        let viewer = self.resource.require_key();
        self.resource
            .mutate("cancel RSVP", Some("RSVP cancelled"), async {
                let viewer = viewer?;
                let mut patch = Row::new();
                patch.insert("status".into(), json!(RsvpStatus::Cancelled));
                let row = self
                    .store()
                    .update(
                        tables::EVENT_ATTENDEES,
                        &[
                            Filter::eq("event_id", event_id),
                            Filter::eq("user_id", viewer.user_id),
                        ],
                        patch,
                    )
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| StoreError::not_found("RSVP for event", event_id))?;
                decode_row("event attendee", row)
            })
            .await
    }

    async fn open_event(&self, viewer: Viewer, event_id: Uuid) -> Result<Event, StoreError> {
        let row = self
            .store()
            .select(
                &Query::table(tables::EVENTS)
                    .eq("id", event_id)
                    .eq("school_id", viewer.school_id)
                    .limit(1),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("event", event_id))?;
        let event: Event = decode_row("event", row)?;
        match event.status {
            EventStatus::Upcoming => Ok(event),
            EventStatus::Cancelled => Err(StoreError::Rejected(format!(
                "{} has been cancelled",
                event.title
            ))),
            EventStatus::Completed => Err(StoreError::Rejected(format!(
                "{} has already taken place",
                event.title
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::UserRole;
    use crate::resources::fixtures;
    use crate::store::memory::MemoryStore;

    pub(crate) async fn event(
        store: &MemoryStore,
        school_id: Uuid,
        created_by: Uuid,
        title: &str,
        status: EventStatus,
        days_out: i64,
    ) -> Uuid {
        let stored = fixtures::put(
            store,
            tables::EVENTS,
            json!({
                "school_id": school_id,
                "created_by": created_by,
                "title": title,
                "description": null,
                "start_time": fixtures::days_from_now(days_out),
                "location": "Gym",
                "status": status,
                "requires_rsvp": true,
                "cost": 0.0,
            }),
        )
        .await;
        stored["id"].as_str().and_then(|id| id.parse().ok()).unwrap()
    }

    async fn setup() -> (Arc<MemoryStore>, SchoolEvents, Viewer) {
        let (store, notifier) = fixtures::wiring();
        let viewer = Viewer {
            school_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        (store.clone(), SchoolEvents::new(store, notifier), viewer)
    }

    fn attending() -> RsvpRequest {
        RsvpRequest {
            status: RsvpStatus::Attending,
            role: AttendeeRole::Guest,
            notes: None,
        }
    }

    #[tokio::test]
    async fn lists_only_upcoming_events_for_the_school() {
        let (store, events, viewer) = setup().await;
        let teacher = Uuid::new_v4();
        event(&store, viewer.school_id, teacher, "Science fair", EventStatus::Upcoming, 3).await;
        event(&store, viewer.school_id, teacher, "Book fair", EventStatus::Upcoming, 1).await;
        event(&store, viewer.school_id, teacher, "Cancelled", EventStatus::Cancelled, 2).await;
        event(&store, viewer.school_id, teacher, "Last year", EventStatus::Upcoming, -30).await;
        event(&store, Uuid::new_v4(), teacher, "Elsewhere", EventStatus::Upcoming, 2).await;

        events.set_viewer(Some(viewer)).await;
        let titles: Vec<String> = events.events().into_iter().map(|l| l.event.title).collect();
        assert_eq!(titles, vec!["Book fair", "Science fair"]);
    }

    #[tokio::test]
    async fn rsvp_then_change_keeps_one_row() {
        let (store, events, viewer) = setup().await;
        let id = event(&store, viewer.school_id, Uuid::new_v4(), "Picnic", EventStatus::Upcoming, 5).await;
        events.set_viewer(Some(viewer)).await;

        assert!(events.rsvp(id, attending()).await.success);
        let declined = events
            .rsvp(
                id,
                RsvpRequest {
                    status: RsvpStatus::Declined,
                    ..attending()
                },
            )
            .await;
        assert!(declined.success);

        let listings = events.events();
        let listing = &listings[0];
        assert_eq!(listing.attendee_count, 1);
        assert_eq!(listing.attending, 0);
        assert_eq!(listing.my_rsvp.as_ref().map(|r| r.status), Some(RsvpStatus::Declined));
    }

    #[tokio::test]
    async fn attendee_count_is_number_of_rows() {
        let (store, events, viewer) = setup().await;
        let id = event(&store, viewer.school_id, Uuid::new_v4(), "Concert", EventStatus::Upcoming, 5).await;
        for status in [RsvpStatus::Attending, RsvpStatus::Cancelled] {
            fixtures::put(
                &store,
                tables::EVENT_ATTENDEES,
                json!({
                    "event_id": id,
                    "user_id": Uuid::new_v4(),
                    "status": status,
                    "role": "guest",
                    "notes": null,
                }),
            )
            .await;
        }
        events.set_viewer(Some(viewer)).await;
        let listings = events.events();
        let listing = &listings[0];
        assert_eq!(listing.attendee_count, 2);
        assert_eq!(listing.attending, 1);
        assert!(listing.my_rsvp.is_none());
    }

    #[tokio::test]
    async fn volunteering_is_an_explicit_role() {
        let (store, events, viewer) = setup().await;
        let id = event(&store, viewer.school_id, Uuid::new_v4(), "Bake sale", EventStatus::Upcoming, 5).await;
        events.set_viewer(Some(viewer)).await;

        let outcome = events.volunteer(id, Some("can bring cookies".into())).await;
        let rsvp = outcome.data.unwrap();
        assert_eq!(rsvp.role, AttendeeRole::Volunteer);
        assert_eq!(rsvp.status, RsvpStatus::Attending);

        let plain = events
            .rsvp(
                id,
                RsvpRequest {
                    notes: Some("happy to volunteer next time".into()),
                    ..attending()
                },
            )
            .await
            .data
            .unwrap();
        assert_eq!(plain.role, AttendeeRole::Guest);
    }

    #[tokio::test]
    async fn cannot_rsvp_to_cancelled_event() {
        let (store, events, viewer) = setup().await;
        let id = event(&store, viewer.school_id, Uuid::new_v4(), "Dance", EventStatus::Cancelled, 5).await;
        events.set_viewer(Some(viewer)).await;

        let outcome = events.rsvp(id, attending()).await;
        assert_eq!(outcome.error.as_deref(), Some("Dance has been cancelled"));
        assert!(store.rows(tables::EVENT_ATTENDEES).is_empty());
    }

    #[tokio::test]
    async fn cancel_rsvp_requires_existing_response() {
        let (store, events, viewer) = setup().await;
        let id = event(&store, viewer.school_id, Uuid::new_v4(), "Play", EventStatus::Upcoming, 5).await;
        events.set_viewer(Some(viewer)).await;

        assert!(!events.cancel_rsvp(id).await.success);
        events.rsvp(id, attending()).await;
        let cancelled = events.cancel_rsvp(id).await;
        assert_eq!(cancelled.data.map(|r| r.status), Some(RsvpStatus::Cancelled));
    }

    #[tokio::test]
    async fn follows_any_signed_in_member_of_a_school() {
        let (store, notifier) = fixtures::wiring();
        let events = Arc::new(SchoolEvents::new(store.clone(), notifier));
        let context = SessionContext::new();
        let _follower = events.follow_session(&context);
        let school_id = Uuid::new_v4();

        let teacher = fixtures::session(UserRole::Teacher, Some(school_id));
        context.sign_in(teacher.clone());
        let viewer = Viewer {
            school_id,
            user_id: teacher.user_id,
        };
        fixtures::settles(Some(viewer), || events.state().key).await;

        context.sign_in(fixtures::session(UserRole::Parent, None));
        fixtures::settles(None, || events.state().key).await;

        context.sign_in(teacher);
        fixtures::settles(Some(viewer), || events.state().key).await;
        context.sign_out();
        fixtures::settles(None, || events.state().key).await;
    }
}
