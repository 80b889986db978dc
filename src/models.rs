use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub mod tables {
    pub const PROFILES: &str = "profiles";
    pub const STUDENTS: &str = "students";
    pub const ACADEMIC_RECORDS: &str = "academic_records";
    pub const COMMUNICATIONS: &str = "parent_communications";
    pub const EVENTS: &str = "events";
    pub const EVENT_ATTENDEES: &str = "event_attendees";
    pub const CLASSROOMS: &str = "classrooms";
    pub const SUPPORT_TICKETS: &str = "support_tickets";
    /// Not part of the schema yet; reads fail with a missing-relation error.
    pub const LUNCH_ACCOUNTS: &str = "lunch_accounts";
}

/// Tables created by the migrations.
pub const TABLES: &[&str] = &[
    tables::PROFILES,
    tables::STUDENTS,
    tables::ACADEMIC_RECORDS,
    tables::COMMUNICATIONS,
    tables::EVENTS,
    tables::EVENT_ATTENDEES,
    tables::CLASSROOMS,
    tables::SUPPORT_TICKETS,
];

// ── Profiles ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Parent,
    Teacher,
    SchoolAdmin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserRole::Parent => "parent",
            UserRole::Teacher => "teacher",
            UserRole::SchoolAdmin => "school admin",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub school_id: Option<Uuid>,
    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Profile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

// ── Students ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub school_id: Uuid,
    #[serde(default)]
    pub classroom_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub grade_level: String,
    pub created_at: DateTime<Utc>,
    /// Filled from the latest academic record after a fetch.
    #[serde(default, skip_serializing)]
    pub current_gpa: Option<f64>,
    #[serde(default, skip_serializing)]
    pub attendance_rate: Option<f64>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStudent {
    pub school_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub grade_level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<Uuid>,
}

// ── Academic records ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcademicRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub teacher_id: Option<Uuid>,
    pub gpa: f64,
    pub attendance_rate: f64,
    pub grade_level: String,
    pub term: String,
    pub year: i32,
    #[serde(default)]
    pub subject_grades: Map<String, Value>,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAcademicRecord {
    pub student_id: Uuid,
    pub gpa: f64,
    pub attendance_rate: f64,
    pub grade_level: String,
    pub term: String,
    pub year: i32,
    #[serde(default)]
    pub subject_grades: Map<String, Value>,
    pub comments: Option<String>,
}

// ── Communications ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Communication {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub sender_id: Uuid,
    pub student_id: Option<Uuid>,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    pub category: String,
    pub read_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub related_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Communication {
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCommunication {
    pub parent_id: Uuid,
    pub student_id: Option<Uuid>,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    pub category: String,
}

// ── Events ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Upcoming,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub school_id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub location: Option<String>,
    pub status: EventStatus,
    pub requires_rsvp: bool,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub location: Option<String>,
    pub requires_rsvp: bool,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_rsvp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    Attending,
    Declined,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendeeRole {
    #[default]
    Guest,
    Volunteer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAttendee {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: RsvpStatus,
    #[serde(default)]
    pub role: AttendeeRole,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Classrooms ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classroom {
    pub id: Uuid,
    pub school_id: Uuid,
    pub teacher_id: Option<Uuid>,
    pub grade_level: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClassroom {
    pub grade_level: String,
    pub name: String,
    pub teacher_id: Option<Uuid>,
}

// ── Support tickets ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportTicket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub priority: Priority,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub priority: Priority,
}

// ── Lunch accounts ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LunchAccount {
    pub id: Uuid,
    pub student_id: Uuid,
    pub parent_id: Uuid,
    pub balance: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn student_row_without_derived_fields_decodes() {
        let row = json!({
            "id": "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2",
            "parent_id": "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc",
            "school_id": "d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2",
            "first_name": "Avery",
            "last_name": "Lee",
            "grade_level": "4",
            "created_at": "2026-01-05T08:00:00+00:00"
        });
        let student: Student = serde_json::from_value(row).unwrap();
        assert_eq!(student.full_name(), "Avery Lee");
        assert!(student.classroom_id.is_none());
        assert!(student.current_gpa.is_none());
    }

    #[test]
    fn derived_student_fields_are_never_written() {
        let value = serde_json::to_value(StudentPatch {
            grade_level: Some("5".into()),
            ..StudentPatch::default()
        })
        .unwrap();
        assert_eq!(value, json!({ "grade_level": "5" }));
    }

    #[test]
    fn enums_use_snake_case_on_the_wire() {
        assert_eq!(serde_json::to_value(UserRole::SchoolAdmin).unwrap(), json!("school_admin"));
        assert_eq!(serde_json::to_value(TicketStatus::InProgress).unwrap(), json!("in_progress"));
        assert_eq!(serde_json::to_value(AttendeeRole::Volunteer).unwrap(), json!("volunteer"));
    }

    #[test]
    fn settled_ticket_statuses() {
        assert!(TicketStatus::Resolved.is_settled());
        assert!(TicketStatus::Closed.is_settled());
        assert!(!TicketStatus::InProgress.is_settled());
    }
}
