//! Per-entity resources built on [`crate::resource::Resource`].

pub mod academic_records;
pub mod classroom;
pub mod communications;
pub mod events;
pub mod lunch_accounts;
pub mod school_management;
pub mod students;
pub mod support_tickets;
pub mod teacher_events;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{tables, AcademicRecord, EventAttendee, Student, UserRole};
use crate::resource::follow;
use crate::session::{Session, SessionContext};
use crate::store::{decode_rows, Direction, Query, Store};
use crate::task::ScopedTask;

/// Re-runs `apply` on `target` for every session change.
pub(crate) fn follow_session<T, F, Fut>(
    target: &Arc<T>,
    context: &SessionContext,
    apply: F,
) -> ScopedTask
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>, Option<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let target = Arc::clone(target);
    follow(context.subscribe(), move |session| apply(target.clone(), session))
}

/// The signed-in user's id when they hold `role`.
pub(crate) fn user_with_role(session: Option<Session>, role: UserRole) -> Option<Uuid> {
    session.filter(|s| s.role() == role).map(|s| s.user_id)
}

/// Fills each student's current GPA and attendance from their newest record.
pub(crate) async fn attach_latest_records(
    store: &dyn Store,
    students: &mut [Student],
) -> Result<(), StoreError> {
    if students.is_empty() {
        return Ok(());
    }

    let rows = store
        .select(
            &Query::table(tables::ACADEMIC_RECORDS)
                .any_of("student_id", students.iter().map(|s| s.id))
                .order_by("created_at", Direction::Desc),
        )
        .await?;
    let records: Vec<AcademicRecord> = decode_rows("academic record", rows)?;

    let mut latest: HashMap<Uuid, &AcademicRecord> = HashMap::new();
    for record in &records {
        latest.entry(record.student_id).or_insert(record);
    }

    for student in students.iter_mut() {
        if let Some(record) = latest.get(&student.id) {
            student.current_gpa = Some(record.gpa);
            student.attendance_rate = Some(record.attendance_rate);
        }
    }
    Ok(())
}

pub(crate) async fn attendees_for(
    store: &dyn Store,
    event_ids: &[Uuid],
) -> Result<Vec<EventAttendee>, StoreError> {
    if event_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = store
        .select(
            &Query::table(tables::EVENT_ATTENDEES)
                .any_of("event_id", event_ids.iter().copied())
                .order_by("created_at", Direction::Asc),
        )
        .await?;
    decode_rows("event attendee", rows)
}

pub(crate) fn required(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Rejected(format!("{field} is required")));
    }
    Ok(())
}
