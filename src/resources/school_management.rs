//! School-wide view for administrators.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use super::{attach_latest_records, follow_session, required};
use crate::error::StoreError;
use crate::models::{tables, Classroom, Event, NewClassroom, Profile, Student, UserRole};
use crate::notify::Notifier;
use crate::resource::{Loader, MutationOutcome, Resource, StateOf};
use crate::session::SessionContext;
use crate::stats::{self, SchoolStats};
use crate::store::{decode_row, decode_rows, encode_row, insert_one, Direction, Filter, Query, Row, Store};
use crate::task::ScopedTask;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchoolOverview {
    pub classrooms: Vec<Classroom>,
    pub teachers: Vec<Profile>,
    pub students: Vec<Student>,
    pub events: Vec<Event>,
}

pub struct OverviewLoader {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Loader for OverviewLoader {
    type Key = Uuid;
    type Output = SchoolOverview;
    const NAME: &'static str = "school overview";

    async fn load(&self, school_id: &Uuid) -> Result<SchoolOverview, StoreError> {
        let store = self.store.as_ref();
        let classrooms = store
            .select(
                &Query::table(tables::CLASSROOMS)
                    .eq("school_id", school_id)
                    .order_by("grade_level", Direction::Asc)
                    .order_by("name", Direction::Asc),
            )
            .await?;
        let teachers = store
            .select(
                &Query::table(tables::PROFILES)
                    .eq("school_id", school_id)
                    .eq("role", UserRole::Teacher)
                    .order_by("last_name", Direction::Asc),
            )
            .await?;
        let students = store
            .select(
                &Query::table(tables::STUDENTS)
                    .eq("school_id", school_id)
                    .order_by("last_name", Direction::Asc),
            )
            .await?;
        let events = store
            .select(
                &Query::table(tables::EVENTS)
                    .eq("school_id", school_id)
                    .order_by("start_time", Direction::Asc),
            )
            .await?;

        let mut students: Vec<Student> = decode_rows("student", students)?;
        attach_latest_records(store, &mut students).await?;

        Ok(SchoolOverview {
            classrooms: decode_rows("classroom", classrooms)?,
            teachers: decode_rows("profile", teachers)?,
            students,
            events: decode_rows("event", events)?,
        })
    }
}

pub struct SchoolManagement {
    resource: Resource<OverviewLoader>,
}

impl SchoolManagement {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            resource: Resource::new(OverviewLoader { store }, notifier),
        }
    }

    fn store(&self) -> &dyn Store {
        self.resource.loader().store.as_ref()
    }

    pub async fn set_school(&self, school_id: Option<Uuid>) {
        self.resource.set_key(school_id).await;
    }

    pub fn follow_session(self: &Arc<Self>, context: &SessionContext) -> ScopedTask {
        follow_session(self, context, |this, session| async move {
            let school_id = session
                .filter(|s| s.role() == UserRole::SchoolAdmin)
                .and_then(|s| s.school_id());
            this.set_school(school_id).await;
        })
    }

    pub async fn refetch(&self) -> bool {
        self.resource.refetch().await
    }

    pub fn state(&self) -> StateOf<OverviewLoader> {
        self.resource.snapshot()
    }

    pub fn overview(&self) -> SchoolOverview {
        self.resource.data()
    }

    pub fn stats(&self) -> SchoolStats {
        let overview = self.overview();
        stats::school_stats(
            &overview.students,
            overview.teachers.len(),
            &overview.classrooms,
            &overview.events,
        )
    }

    pub async fn create_classroom(&self, input: NewClassroom) -> MutationOutcome<Classroom> {
        let school_id = self.resource.require_key();
        self.resource
            .mutate("create classroom", Some("Classroom created"), async {
                let school_id = school_id?;
                required("name", &input.name)?;
                required("grade level", &input.grade_level)?;
                if let Some(teacher_id) = input.teacher_id {
                    self.staff_teacher(school_id, teacher_id).await?;
                }
                let mut row = encode_row("classroom", &input)?;
                row.insert("school_id".into(), json!(school_id));
                let stored = insert_one(self.store(), tables::CLASSROOMS, row).await?;
                decode_row("classroom", stored)
            })
            .await
    }

    /// Assigns a teacher to a classroom, or clears the assignment with `None`.
    pub async fn assign_teacher(
        &self,
        classroom_id: Uuid,
        teacher_id: Option<Uuid>,
    ) -> MutationOutcome<Classroom> {
        let school_id = self.resource.require_key();
        self.resource
            .mutate("assign teacher", Some("Teacher assigned"), async {
                let school_id = school_id?;
                if let Some(teacher_id) = teacher_id {
                    self.staff_teacher(school_id, teacher_id).await?;
                }
                let mut patch = Row::new();
                patch.insert("teacher_id".into(), json!(teacher_id));
                let row = self
                    .store()
                    .update(
                        tables::CLASSROOMS,
                        &[Filter::eq("id", classroom_id), Filter::eq("school_id", school_id)],
                        patch,
                    )
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| StoreError::not_found("classroom", classroom_id))?;
                decode_row("classroom", row)
            })
            .await
    }

    /// Deletes a classroom; the schema unassigns its students.
    pub async fn remove_classroom(&self, classroom_id: Uuid) -> MutationOutcome<()> {
        let school_id = self.resource.require_key();
        self.resource
            .mutate("remove classroom", Some("Classroom removed"), async {
                let school_id = school_id?;
                let removed = self
                    .store()
                    .delete(
                        tables::CLASSROOMS,
                        &[Filter::eq("id", classroom_id), Filter::eq("school_id", school_id)],
                    )
                    .await?;
                if removed.is_empty() {
                    return Err(StoreError::not_found("classroom", classroom_id));
                }
                Ok(())
            })
            .await
    }

    async fn staff_teacher(&self, school_id: Uuid, teacher_id: Uuid) -> Result<Profile, StoreError> {
        let row = self
            .store()
            .select(
                &Query::table(tables::PROFILES)
                    .eq("id", teacher_id)
                    .eq("school_id", school_id)
                    .eq("role", UserRole::Teacher)
                    .limit(1),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("teacher", teacher_id))?;
        decode_row("profile", row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventStatus;
    use crate::resources::classroom::tests::classroom;
    use crate::resources::events::tests::event;
    use crate::resources::fixtures;
    use crate::store::memory::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, SchoolManagement, Uuid) {
        let (store, notifier) = fixtures::wiring();
        let school_id = Uuid::new_v4();
        let admin = SchoolManagement::new(store.clone(), notifier);
        admin.set_school(Some(school_id)).await;
        (store, admin, school_id)
    }

    #[tokio::test]
    async fn overview_is_scoped_to_the_school() {
        let (store, admin, school_id) = setup().await;
        let teacher = fixtures::profile(&store, UserRole::Teacher, school_id).await;
        fixtures::profile(&store, UserRole::Parent, school_id).await;
        fixtures::profile(&store, UserRole::Teacher, Uuid::new_v4()).await;
        classroom(&store, school_id, Some(teacher.id), "4B").await;
        classroom(&store, school_id, None, "5A").await;
        let avery = fixtures::student(&store, Uuid::new_v4(), school_id, "Avery").await;
        let jules = fixtures::student(&store, Uuid::new_v4(), school_id, "Jules").await;
        fixtures::student(&store, Uuid::new_v4(), Uuid::new_v4(), "Kiara").await;
        fixtures::record(&store, avery, 3.8, 96.0, "2026-09-01T08:00:00Z").await;
        fixtures::record(&store, jules, 3.0, 90.0, "2026-09-01T08:00:00Z").await;
        event(&store, school_id, teacher.id, "Fair", EventStatus::Upcoming, 4).await;
        event(&store, school_id, teacher.id, "Gala", EventStatus::Cancelled, 9).await;

        admin.refetch().await;
        let stats = admin.stats();
        assert_eq!(stats.total_students, 2);
        assert_eq!(stats.total_teachers, 1);
        assert_eq!(stats.total_classrooms, 2);
        assert_eq!(stats.unassigned_classrooms, 1);
        assert_eq!(stats.upcoming_events, 1);
        assert!((stats.average_gpa - 3.4).abs() < 1e-9);
        assert!((stats.average_attendance - 93.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn create_and_assign_classroom() {
        let (store, admin, school_id) = setup().await;
        let teacher = fixtures::profile(&store, UserRole::Teacher, school_id).await;

        let created = admin
            .create_classroom(NewClassroom {
                grade_level: "3".into(),
                name: "3C".into(),
                teacher_id: None,
            })
            .await
            .data
            .unwrap();
        assert_eq!(created.school_id, school_id);
        assert_eq!(admin.stats().unassigned_classrooms, 1);

        let assigned = admin.assign_teacher(created.id, Some(teacher.id)).await;
        assert_eq!(assigned.data.and_then(|c| c.teacher_id), Some(teacher.id));
        assert_eq!(admin.stats().unassigned_classrooms, 0);

        let cleared = admin.assign_teacher(created.id, None).await;
        assert!(cleared.data.unwrap().teacher_id.is_none());
    }

    #[tokio::test]
    async fn only_staff_teachers_can_be_assigned() {
        let (store, admin, school_id) = setup().await;
        let parent = fixtures::profile(&store, UserRole::Parent, school_id).await;
        let elsewhere = fixtures::profile(&store, UserRole::Teacher, Uuid::new_v4()).await;
        let room = classroom(&store, school_id, None, "2A").await;

        assert!(!admin.assign_teacher(room, Some(parent.id)).await.success);
        assert!(!admin.assign_teacher(room, Some(elsewhere.id)).await.success);
    }

    #[tokio::test]
    async fn removing_a_classroom_unassigns_its_students() {
        let (store, admin, school_id) = setup().await;
        let room = classroom(&store, school_id, None, "1A").await;
        let student = fixtures::student(&store, Uuid::new_v4(), school_id, "Avery").await;
        let mut patch = Row::new();
        patch.insert("classroom_id".into(), json!(room));
        store
            .update(tables::STUDENTS, &[Filter::eq("id", student)], patch)
            .await
            .unwrap();

        assert!(admin.remove_classroom(room).await.success);
        let overview = admin.overview();
        assert!(overview.classrooms.is_empty());
        assert_eq!(overview.students.len(), 1);
        assert!(overview.students[0].classroom_id.is_none());
    }

    #[tokio::test]
    async fn cannot_remove_another_schools_classroom() {
        let (store, admin, _) = setup().await;
        let foreign = classroom(&store, Uuid::new_v4(), None, "2C").await;
        let outcome = admin.remove_classroom(foreign).await;
        assert_eq!(outcome.error, Some(format!("classroom {foreign} not found")));
        assert_eq!(store.rows(tables::CLASSROOMS).len(), 1);
    }

    #[tokio::test]
    async fn follows_signed_in_admin_school() {
        let (store, notifier) = fixtures::wiring();
        let admin = Arc::new(SchoolManagement::new(store.clone(), notifier));
        let context = SessionContext::new();
        let _follower = admin.follow_session(&context);
        let school_id = Uuid::new_v4();

        context.sign_in(fixtures::session(UserRole::SchoolAdmin, Some(school_id)));
        fixtures::settles(Some(school_id), || admin.state().key).await;

        context.sign_in(fixtures::session(UserRole::Teacher, Some(school_id)));
        fixtures::settles(None, || admin.state().key).await;

        context.sign_in(fixtures::session(UserRole::SchoolAdmin, Some(school_id)));
        fixtures::settles(Some(school_id), || admin.state().key).await;
        context.sign_out();
        fixtures::settles(None, || admin.state().key).await;
    }
}
