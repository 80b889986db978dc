//! One student's grade and attendance history.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{tables, AcademicRecord, NewAcademicRecord};
use crate::notify::Notifier;
use crate::resource::{Loader, MutationOutcome, Resource, StateOf};
use crate::stats::{self, AcademicSummary};
use crate::store::{decode_row, decode_rows, encode_row, insert_one, Direction, Query, Store};

pub struct RecordLoader {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Loader for RecordLoader {
    type Key = Uuid;
    type Output = Vec<AcademicRecord>;
    const NAME: &'static str = "academic records";

    async fn load(&self, student_id: &Uuid) -> Result<Vec<AcademicRecord>, StoreError> {
        let rows = self
            .store
            .select(
                &Query::table(tables::ACADEMIC_RECORDS)
                    .eq("student_id", student_id)
                    .order_by("created_at", Direction::Desc),
            )
            .await?;
        decode_rows("academic record", rows)
    }
}

pub struct AcademicRecords {
    resource: Resource<RecordLoader>,
}

impl AcademicRecords {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            resource: Resource::new(RecordLoader { store }, notifier),
        }
    }

    pub async fn set_student(&self, student_id: Option<Uuid>) {
        self.resource.set_key(student_id).await;
    }

    pub async fn refetch(&self) -> bool {
        self.resource.refetch().await
    }

    pub fn state(&self) -> StateOf<RecordLoader> {
        self.resource.snapshot()
    }

    /// Newest first.
    pub fn records(&self) -> Vec<AcademicRecord> {
        self.resource.data()
    }

    pub fn summary(&self) -> AcademicSummary {
        stats::academic_summary(&self.records())
    }

    /// Appends a record for the selected student on behalf of `teacher_id`.
    pub async fn add_record(
        &self,
        teacher_id: Uuid,
        input: NewAcademicRecord,
    ) -> MutationOutcome<AcademicRecord> {
        let student_id = self.resource.require_key();
        let store = self.resource.loader().store.clone();
        self.resource
            .mutate("add academic record", Some("Record saved"), async move {
                let student_id = student_id?;
                if input.student_id != student_id {
                    return Err(StoreError::Rejected(
                        "record belongs to a different student".into(),
                    ));
                }
                insert_record(store.as_ref(), teacher_id, &input).await
            })
            .await
    }
}

pub(crate) async fn insert_record(
    store: &dyn Store,
    teacher_id: Uuid,
    input: &NewAcademicRecord,
) -> Result<AcademicRecord, StoreError> {
    if !(0.0..=4.0).contains(&input.gpa) {
        return Err(StoreError::Rejected(format!(
            "gpa {} is outside 0.0-4.0",
            input.gpa
        )));
    }
    if !(0.0..=100.0).contains(&input.attendance_rate) {
        return Err(StoreError::Rejected(format!(
            "attendance rate {} is outside 0-100",
            input.attendance_rate
        )));
    }
    let mut row = encode_row("academic record", input)?;
    row.insert("teacher_id".into(), serde_json::json!(teacher_id));
    let stored = insert_one(store, tables::ACADEMIC_RECORDS, row).await?;
    decode_row("academic record", stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::fixtures;
    use serde_json::Map;

    fn entry(student_id: Uuid, gpa: f64) -> NewAcademicRecord {
        NewAcademicRecord {
            student_id,
            gpa,
            attendance_rate: 92.0,
            grade_level: "4".to_string(),
            term: "spring".to_string(),
            year: 2026,
            subject_grades: Map::new(),
            comments: Some("steady progress".to_string()),
        }
    }

    #[tokio::test]
    async fn summary_tracks_latest_and_mean() {
        let (store, notifier) = fixtures::wiring();
        let student_id = Uuid::new_v4();
        fixtures::record(&store, student_id, 3.0, 90.0, "2025-12-01T00:00:00Z").await;
        fixtures::record(&store, student_id, 3.6, 98.0, "2026-02-01T00:00:00Z").await;
        fixtures::record(&store, Uuid::new_v4(), 1.0, 50.0, "2026-02-02T00:00:00Z").await;

        let records = AcademicRecords::new(store.clone(), notifier);
        records.set_student(Some(student_id)).await;

        let summary = records.summary();
        assert_eq!(summary.record_count, 2);
        assert_eq!(summary.current_gpa, 3.6);
        assert!((summary.average_gpa - 3.3).abs() < 1e-9);
        assert!((summary.average_attendance - 94.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn student_without_history_has_zero_summary() {
        let (store, notifier) = fixtures::wiring();
        let records = AcademicRecords::new(store.clone(), notifier);
        records.set_student(Some(Uuid::new_v4())).await;
        assert_eq!(records.summary(), AcademicSummary::default());
        assert!(records.state().error.is_none());
    }

    #[tokio::test]
    async fn add_record_appends_and_rejects_out_of_range() {
        let (store, notifier) = fixtures::wiring();
        let student_id = Uuid::new_v4();
        let teacher_id = Uuid::new_v4();
        let records = AcademicRecords::new(store.clone(), notifier);
        records.set_student(Some(student_id)).await;

        let outcome = records.add_record(teacher_id, entry(student_id, 3.4)).await;
        assert!(outcome.success);
        assert_eq!(outcome.data.unwrap().teacher_id, Some(teacher_id));
        assert_eq!(records.records().len(), 1);

        let rejected = records.add_record(teacher_id, entry(student_id, 5.2)).await;
        assert!(!rejected.success);
        assert_eq!(records.records().len(), 1);

        let wrong_student = records.add_record(teacher_id, entry(Uuid::new_v4(), 3.0)).await;
        assert!(!wrong_student.success);
    }
}
