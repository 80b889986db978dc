use anyhow::Context;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{tables, Classroom, Profile, Student, UserRole};
use crate::store::{decode_rows, Query, Row, Store};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Fixed identities created by [`seed`].
#[derive(Debug, Clone, Copy)]
pub struct SeedIds {
    pub school_id: Uuid,
    pub admin_id: Uuid,
    pub teacher_id: Uuid,
    pub parent_id: Uuid,
}

impl Default for SeedIds {
    fn default() -> Self {
        Self {
            school_id: Uuid::from_u128(0x5c4f_0001_0000_4000_8000_0000_0000_0001),
            admin_id: Uuid::from_u128(0x5c4f_0001_0000_4000_8000_0000_0000_00a1),
            teacher_id: Uuid::from_u128(0x5c4f_0001_0000_4000_8000_0000_0000_00b1),
            parent_id: Uuid::from_u128(0x5c4f_0001_0000_4000_8000_0000_0000_00c1),
        }
    }
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

async fn exists(store: &dyn Store, table: &str, id: Uuid) -> anyhow::Result<bool> {
    let rows = store
        .select(&Query::table(table).eq("id", id).limit(1))
        .await?;
    Ok(!rows.is_empty())
}

/// Loads a small school: one admin, teacher and parent, a classroom with two
/// students, their records, messages, events and a support ticket. Re-running
/// is a no-op once the seed profiles exist.
pub async fn seed(store: &dyn Store) -> anyhow::Result<SeedIds> {
    let ids = SeedIds::default();
    if exists(store, tables::PROFILES, ids.parent_id).await? {
        info!("seed data already present");
        return Ok(ids);
    }

    let profiles = vec![
        (ids.admin_id, UserRole::SchoolAdmin, "Morgan", "Reyes", "morgan.reyes@maplegrove.edu"),
        (ids.teacher_id, UserRole::Teacher, "Priya", "Shah", "priya.shah@maplegrove.edu"),
        (ids.parent_id, UserRole::Parent, "Dana", "Lee", "dana.lee@example.com"),
    ];
    for (id, role, first_name, last_name, email) in profiles {
        store
            .insert(
                tables::PROFILES,
                vec![row(json!({
                    "id": id,
                    "school_id": ids.school_id,
                    "role": role,
                    "first_name": first_name,
                    "last_name": last_name,
                    "email": email,
                }))],
            )
            .await
            .with_context(|| format!("failed to seed profile {email}"))?;
    }

    let classroom = Uuid::new_v4();
    store
        .insert(
            tables::CLASSROOMS,
            vec![row(json!({
                "id": classroom,
                "school_id": ids.school_id,
                "teacher_id": ids.teacher_id,
                "grade_level": "4",
                "name": "4B",
            }))],
        )
        .await?;

    let students = vec![("Avery", "4", 3.8, 96.0), ("Jules", "4", 3.2, 91.0)];
    let mut student_ids = Vec::new();
    for (first_name, grade_level, gpa, attendance) in students {
        let student_id = Uuid::new_v4();
        store
            .insert(
                tables::STUDENTS,
                vec![row(json!({
                    "id": student_id,
                    "parent_id": ids.parent_id,
                    "school_id": ids.school_id,
                    "classroom_id": classroom,
                    "first_name": first_name,
                    "last_name": "Lee",
                    "grade_level": grade_level,
                }))],
            )
            .await?;
        store
            .insert(
                tables::ACADEMIC_RECORDS,
                vec![row(json!({
                    "student_id": student_id,
                    "teacher_id": ids.teacher_id,
                    "gpa": gpa,
                    "attendance_rate": attendance,
                    "grade_level": grade_level,
                    "term": "fall",
                    "year": 2026,
                    "subject_grades": { "math": "A-", "reading": "B+" },
                    "comments": "Steady progress this term",
                }))],
            )
            .await?;
        student_ids.push(student_id);
    }

    let messages = vec![
        ("Field trip permission", "Please sign the museum trip form by Friday.", "high", "events"),
        ("Reading log", "Avery finished the reading challenge early.", "normal", "academic"),
    ];
    for (subject, message, priority, category) in messages {
        store
            .insert(
                tables::COMMUNICATIONS,
                vec![row(json!({
                    "parent_id": ids.parent_id,
                    "sender_id": ids.teacher_id,
                    "student_id": student_ids.first(),
                    "subject": subject,
                    "message": message,
                    "priority": priority,
                    "category": category,
                }))],
            )
            .await?;
    }

    let now = Utc::now();
    let events = vec![
        ("Fall Festival", 7, 0.0, true),
        ("Science Night", 14, 5.0, true),
        ("Picture Day", 21, 0.0, false),
    ];
    for (title, days_out, cost, requires_rsvp) in events {
        store
            .insert(
                tables::EVENTS,
                vec![row(json!({
                    "school_id": ids.school_id,
                    "created_by": ids.teacher_id,
                    "title": title,
                    "description": null,
                    "start_time": now + Duration::days(days_out),
                    "location": "Main hall",
                    "status": "upcoming",
                    "requires_rsvp": requires_rsvp,
                    "cost": cost,
                }))],
            )
            .await?;
    }

    store
        .insert(
            tables::SUPPORT_TICKETS,
            vec![row(json!({
                "user_id": ids.parent_id,
                "school_id": ids.school_id,
                "title": "Cannot see report card",
                "description": "The grades tab is empty for Jules.",
                "category": "technical",
                "priority": "normal",
                "status": "open",
            }))],
        )
        .await?;

    info!(school_id = %ids.school_id, "seed data inserted");
    Ok(ids)
}

/// Imports a student roster for `school_id`. Parents are matched by email
/// and created when missing; rows naming a student the parent already has
/// are skipped. Returns the number of students inserted.
pub async fn import_csv(
    store: &dyn Store,
    school_id: Uuid,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        parent_email: String,
        parent_first_name: String,
        parent_last_name: String,
        first_name: String,
        last_name: String,
        grade_level: String,
        classroom: Option<String>,
    }

    let classrooms: Vec<Classroom> = decode_rows(
        "classroom",
        store
            .select(&Query::table(tables::CLASSROOMS).eq("school_id", school_id))
            .await?,
    )?;

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let record = result.with_context(|| format!("invalid roster row {}", line + 1))?;
        let email = record.parent_email.trim().to_lowercase();

        let parents: Vec<Profile> = decode_rows(
            "profile",
            store
                .select(&Query::table(tables::PROFILES).eq("email", &email).limit(1))
                .await?,
        )?;
        let parent_id = match parents.into_iter().next() {
            Some(parent) => parent.id,
            None => {
                let id = Uuid::new_v4();
                store
                    .insert(
                        tables::PROFILES,
                        vec![row(json!({
                            "id": id,
                            "school_id": school_id,
                            "role": UserRole::Parent,
                            "first_name": record.parent_first_name,
                            "last_name": record.parent_last_name,
                            "email": email,
                        }))],
                    )
                    .await?;
                id
            }
        };

        let classroom_id = match record.classroom.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(
                classrooms
                    .iter()
                    .find(|c| c.name == name)
                    .map(|c| c.id)
                    .with_context(|| format!("unknown classroom {name} on row {}", line + 1))?,
            ),
            _ => None,
        };

        let siblings: Vec<Student> = decode_rows(
            "student",
            store
                .select(&Query::table(tables::STUDENTS).eq("parent_id", parent_id))
                .await?,
        )?;
        if siblings
            .iter()
            .any(|s| s.first_name == record.first_name && s.last_name == record.last_name)
        {
            debug!(first_name = %record.first_name, "student already on roster");
            continue;
        }

        store
            .insert(
                tables::STUDENTS,
                vec![row(json!({
                    "parent_id": parent_id,
                    "school_id": school_id,
                    "classroom_id": classroom_id,
                    "first_name": record.first_name,
                    "last_name": record.last_name,
                    "grade_level": record.grade_level,
                }))],
            )
            .await?;
        inserted += 1;
    }

    Ok(inserted)
}
