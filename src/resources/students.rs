//! A parent's children.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{attach_latest_records, follow_session, required, user_with_role};
use crate::error::StoreError;
use crate::models::{tables, NewStudent, Student, StudentPatch, UserRole};
use crate::notify::Notifier;
use crate::resource::{Loader, MutationOutcome, Resource, StateOf};
use crate::session::SessionContext;
use crate::stats::{self, StudentStats};
use crate::store::{decode_row, decode_rows, encode_row, insert_one, Direction, Filter, Query, Store};
use crate::task::ScopedTask;

pub struct StudentLoader {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Loader for StudentLoader {
    type Key = Uuid;
    type Output = Vec<Student>;
    const NAME: &'static str = "students";

    async fn load(&self, parent_id: &Uuid) -> Result<Vec<Student>, StoreError> {
        let rows = self
            .store
            .select(
                &Query::table(tables::STUDENTS)
                    .eq("parent_id", parent_id)
                    .order_by("first_name", Direction::Asc),
            )
            .await?;
        let mut students: Vec<Student> = decode_rows("student", rows)?;
        attach_latest_records(self.store.as_ref(), &mut students).await?;
        Ok(students)
    }
}

pub struct Students {
    resource: Resource<StudentLoader>,
}

impl Students {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            resource: Resource::new(StudentLoader { store }, notifier),
        }
    }

    fn store(&self) -> &dyn Store {
        self.resource.loader().store.as_ref()
    }

    pub async fn set_parent(&self, parent_id: Option<Uuid>) {
        self.resource.set_key(parent_id).await;
    }

    /// Tracks the signed-in parent.
    pub fn follow_session(self: &Arc<Self>, context: &SessionContext) -> ScopedTask {
        follow_session(self, context, |this, session| async move {
            this.set_parent(user_with_role(session, UserRole::Parent))
                .await;
        })
    }

    pub async fn refetch(&self) -> bool {
        self.resource.refetch().await
    }

    pub fn state(&self) -> StateOf<StudentLoader> {
        self.resource.snapshot()
    }

    pub fn resource(&self) -> &Resource<StudentLoader> {
        &self.resource
    }

    pub fn students(&self) -> Vec<Student> {
        self.resource.data()
    }

    pub fn stats(&self) -> StudentStats {
        stats::student_stats(&self.students())
    }

    pub async fn add_student(&self, input: NewStudent) -> MutationOutcome<Student> {
        let parent_id = self.resource.require_key();
        self.resource
            .mutate("add student", Some("Student added"), async {
                let parent_id = parent_id?;
                required("first name", &input.first_name)?;
                required("last name", &input.last_name)?;

                let mut row = encode_row("student", &input)?;
                row.insert("parent_id".into(), serde_json::json!(parent_id));
                let stored = insert_one(self.store(), tables::STUDENTS, row).await?;
                decode_row::<Student>("student", stored)
            })
            .await
    }

    pub async fn update_student(&self, id: Uuid, patch: StudentPatch) -> MutationOutcome<Student> {
        let parent_id = self.resource.require_key();
        self.resource
            .mutate("update student", Some("Student updated"), async {
                let parent_id = parent_id?;
                if let Some(classroom_id) = patch.classroom_id {
                    self.check_classroom(id, parent_id, classroom_id).await?;
                }
                let patch = encode_row("student", &patch)?;
                if patch.is_empty() {
                    return Err(StoreError::Rejected("nothing to update".into()));
                }
                let updated = self
                    .store()
                    .update(
                        tables::STUDENTS,
                        &[Filter::eq("id", id), Filter::eq("parent_id", parent_id)],
                        patch,
                    )
                    .await?;
                let row = updated
                    .into_iter()
                    .next()
                    .ok_or_else(|| StoreError::not_found("student", id))?;
                decode_row::<Student>("student", row)
            })
            .await
    }

    /// Rejects classrooms outside the child's school.
    async fn check_classroom(
        &self,
        id: Uuid,
        parent_id: Uuid,
        classroom_id: Uuid,
    ) -> Result<(), StoreError> {
        let row = self
            .store()
            .select(
                &Query::table(tables::STUDENTS)
                    .eq("id", id)
                    .eq("parent_id", parent_id)
                    .limit(1),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("student", id))?;
        let student: Student = decode_row("student", row)?;
        let classrooms = self
            .store()
            .select(
                &Query::table(tables::CLASSROOMS)
                    .eq("id", classroom_id)
                    .eq("school_id", student.school_id)
                    .limit(1),
            )
            .await?;
        if classrooms.is_empty() {
            return Err(StoreError::Rejected(format!(
                "classroom {classroom_id} is not in {}'s school",
                student.first_name
            )));
        }
        Ok(())
    }

    pub async fn remove_student(&self, id: Uuid) -> MutationOutcome<()> {
        let parent_id = self.resource.require_key();
        self.resource
            .mutate("remove student", Some("Student removed"), async {
                let parent_id = parent_id?;
                let removed = self
                    .store()
                    .delete(
                        tables::STUDENTS,
                        &[Filter::eq("id", id), Filter::eq("parent_id", parent_id)],
                    )
                    .await?;
                if removed.is_empty() {
                    return Err(StoreError::not_found("student", id));
                }
                Ok(())
            })
            .await
    }
}
