//! A teacher's classrooms and the students in them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use super::academic_records::insert_record;
use super::{attach_latest_records, follow_session, required, user_with_role};
use crate::error::StoreError;
use crate::models::{
    tables, AcademicRecord, Classroom, Communication, NewAcademicRecord, NewCommunication, Student,
    UserRole,
};
use crate::notify::Notifier;
use crate::resource::{Loader, MutationOutcome, Resource, StateOf};
use crate::session::SessionContext;
use crate::stats::{self, ClassroomStats};
use crate::store::{decode_row, decode_rows, encode_row, insert_one, Direction, Filter, Query, Row, Store};
use crate::task::ScopedTask;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassroomRoster {
    pub classroom: Classroom,
    pub students: Vec<Student>,
}

pub struct RosterLoader {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Loader for RosterLoader {
    type Key = Uuid;
    type Output = Vec<ClassroomRoster>;
    const NAME: &'static str = "classrooms";

    async fn load(&self, teacher_id: &Uuid) -> Result<Vec<ClassroomRoster>, StoreError> {
        let rows = self
            .store
            .select(
                &Query::table(tables::CLASSROOMS)
                    .eq("teacher_id", teacher_id)
                    .order_by("name", Direction::Asc),
            )
            .await?;
        let classrooms: Vec<Classroom> = decode_rows("classroom", rows)?;
        if classrooms.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self
            .store
            .select(
                &Query::table(tables::STUDENTS)
                    .any_of("classroom_id", classrooms.iter().map(|c| c.id))
                    .order_by("last_name", Direction::Asc)
                    .order_by("first_name", Direction::Asc),
            )
            .await?;
        let mut students: Vec<Student> = decode_rows("student", rows)?;
        attach_latest_records(self.store.as_ref(), &mut students).await?;

        Ok(classrooms
            .into_iter()
            .map(|classroom| ClassroomRoster {
                students: students
                    .iter()
                    .filter(|s| s.classroom_id == Some(classroom.id))
                    .cloned()
                    .collect(),
                classroom,
            })
            .collect())
    }
}

pub struct Classrooms {
    resource: Resource<RosterLoader>,
    gpa_floor: f64,
}

impl Classrooms {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, gpa_floor: f64) -> Self {
        Self {
            resource: Resource::new(RosterLoader { store }, notifier),
            gpa_floor,
        }
    }

    fn store(&self) -> &dyn Store {
        self.resource.loader().store.as_ref()
    }

    pub async fn set_teacher(&self, teacher_id: Option<Uuid>) {
        self.resource.set_key(teacher_id).await;
    }

    pub fn follow_session(self: &Arc<Self>, context: &SessionContext) -> ScopedTask {
        follow_session(self, context, |this, session| async move {
            this.set_teacher(user_with_role(session, UserRole::Teacher))
                .await;
        })
    }

    pub async fn refetch(&self) -> bool {
        self.resource.refetch().await
    }

    pub fn state(&self) -> StateOf<RosterLoader> {
        self.resource.snapshot()
    }

    pub fn rosters(&self) -> Vec<ClassroomRoster> {
        self.resource.data()
    }

    pub fn stats_for(&self, classroom_id: Uuid) -> Option<ClassroomStats> {
        self.rosters()
            .into_iter()
            .find(|r| r.classroom.id == classroom_id)
            .map(|r| stats::classroom_stats(&r.students, self.gpa_floor))
    }

    /// Figures across every classroom the teacher has.
    pub fn stats(&self) -> ClassroomStats {
        let students: Vec<Student> = self
            .rosters()
            .into_iter()
            .flat_map(|r| r.students)
            .collect();
        stats::classroom_stats(&students, self.gpa_floor)
    }

    pub async fn record_grades(&self, input: NewAcademicRecord) -> MutationOutcome<AcademicRecord> {
        let teacher_id = self.resource.require_key();
        self.resource
            .mutate("record grades", Some("Grades recorded"), async {
                let teacher_id = teacher_id?;
                self.taught_student(teacher_id, input.student_id).await?;
                insert_record(self.store(), teacher_id, &input).await
            })
            .await
    }

    pub async fn assign_student(&self, student_id: Uuid, classroom_id: Uuid) -> MutationOutcome<Student> {
        let teacher_id = self.resource.require_key();
        self.resource
            .mutate("assign student", Some("Student assigned"), async {
                let teacher_id = teacher_id?;
                let classroom = self.own_classroom(teacher_id, classroom_id).await?;
                let student = self.find_student(student_id).await?;
                if student.school_id != classroom.school_id {
                    return Err(StoreError::Rejected(format!(
                        "{} attends another school",
                        student.full_name()
                    )));
                }
                if let Some(current) = student.classroom_id {
                    match self.own_classroom(teacher_id, current).await {
                        Ok(_) => {}
                        Err(StoreError::NotFound { .. }) => {
                            return Err(StoreError::Rejected(format!(
                                "{} is already in another teacher's class",
                                student.full_name()
                            )));
                        }
                        Err(err) => return Err(err),
                    }
                }
                let mut patch = Row::new();
                patch.insert("classroom_id".into(), json!(classroom_id));
                let row = self
                    .store()
                    .update(tables::STUDENTS, &[Filter::eq("id", student_id)], patch)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| StoreError::not_found("student", student_id))?;
                decode_row("student", row)
            })
            .await
    }

    /// Sends a message to the parent of a student in one of the teacher's classes.
    pub async fn message_parent(
        &self,
        student_id: Uuid,
        input: NewCommunication,
    ) -> MutationOutcome<Communication> {
        let teacher_id = self.resource.require_key();
        self.resource
            .mutate("send message", Some("Message sent"), async {
                let teacher_id = teacher_id?;
                required("subject", &input.subject)?;
                required("message", &input.message)?;
                let student = self.taught_student(teacher_id, student_id).await?;
                if student.parent_id != input.parent_id {
                    return Err(StoreError::Rejected(
                        "recipient is not this student's parent".into(),
                    ));
                }
                let mut row = encode_row("message", &input)?;
                row.insert("sender_id".into(), json!(teacher_id));
                row.insert("student_id".into(), json!(student.id));
                let stored = insert_one(self.store(), tables::COMMUNICATIONS, row).await?;
                decode_row("message", stored)
            })
            .await
    }

    async fn own_classroom(&self, teacher_id: Uuid, classroom_id: Uuid) -> Result<Classroom, StoreError> {
        let row = self
            .store()
            .select(
                &Query::table(tables::CLASSROOMS)
                    .eq("id", classroom_id)
                    .eq("teacher_id", teacher_id)
                    .limit(1),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("classroom", classroom_id))?;
        decode_row("classroom", row)
    }

    async fn find_student(&self, student_id: Uuid) -> Result<Student, StoreError> {
        let row = self
            .store()
            .select(&Query::table(tables::STUDENTS).eq("id", student_id).limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("student", student_id))?;
        decode_row("student", row)
    }

    async fn taught_student(&self, teacher_id: Uuid, student_id: Uuid) -> Result<Student, StoreError> {
        let student = self.find_student(student_id).await?;
        match student.classroom_id {
            Some(classroom_id) => {
                self.own_classroom(teacher_id, classroom_id).await?;
                Ok(student)
            }
            None => Err(StoreError::Rejected(format!(
                "{} is not in one of your classes",
                student.full_name()
            ))),
        }
    }
}
